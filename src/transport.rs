//! Transport abstraction for instrument I/O.
//!
//! The library does not open USB, TCP, serial or GPIB links itself; the caller
//! supplies an object implementing [`Transport`] (a VISA session, a serial
//! port wrapper, a TCP socket codec, or a simulator in tests). Required
//! methods cover line-oriented command/response traffic plus a mutable I/O
//! timeout; the raw-byte and termination primitives are optional and default
//! to `ErrorKind::Unsupported`, in which case binary block transfers and
//! hardcopy capture are reported as unsupported operations.

use std::io;
use std::time::Duration;

fn unsupported(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("transport does not support {what}"),
    )
}

/// Byte-oriented point-to-point link to one instrument.
///
/// Commands are ASCII lines; the implementation appends/strips line
/// terminators itself. A query sends one command line and returns exactly one
/// response line. All calls block until the transport's timeout elapses.
pub trait Transport {
    /// Send one command line.
    fn write(&mut self, cmd: &str) -> io::Result<()>;

    /// Send one query line and read one response line.
    fn query(&mut self, cmd: &str) -> io::Result<String>;

    /// Current I/O timeout.
    fn timeout(&self) -> Duration;

    /// Replace the I/O timeout. Several session operations install a
    /// temporary timeout and are responsible for restoring the prior value.
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Read exactly `n` raw bytes, ignoring line termination.
    fn read_bytes(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let _ = n;
        Err(unsupported("raw byte reads"))
    }

    /// Read whatever binary payload the instrument has queued, in one gulp.
    fn read_raw(&mut self) -> io::Result<Vec<u8>> {
        Err(unsupported("raw block reads"))
    }

    /// The byte that terminates response lines, if line termination applies.
    fn read_termination(&self) -> Option<u8> {
        Some(b'\n')
    }

    /// Enable or disable line-terminated reads. Binary transfers disable
    /// termination for their duration and restore it afterwards.
    fn set_read_termination(&mut self, term: Option<u8>) -> io::Result<()> {
        let _ = term;
        Ok(())
    }

    /// Best-effort device clear (e.g. VISA `viClear`). Default is a no-op.
    fn clear(&mut self) -> io::Result<()> {
        Ok(())
    }
}
