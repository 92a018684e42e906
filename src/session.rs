//! Session protocol engine.
//!
//! Wraps a [`Transport`] and layers the IEEE 488.2 housekeeping protocol on
//! top of every exchange: command-complete gating via `*OPC?`, error queue
//! draining via `SYST:ERR?`, and recovery after transport faults. The two
//! behaviours can be suspended for a scope with [`Session::suspended`] when a
//! command sequence is incompatible with them (binary transfers, `*RST`).

use std::time::Duration;

use log::debug;

use crate::error::{Result, ScpiError};
use crate::transport::Transport;

const ERROR_QUERY: &str = "SYST:ERR?";
const OPC_QUERY: &str = "*OPC?";
const CLEAR_STATUS: &str = "*CLS";

/// Upper bound on consecutive `SYST:ERR?` reads per drain. A healthy queue
/// reports empty within a couple of reads; the bound keeps a firmware that
/// never reports code 0 from hanging the session.
const MAX_ERROR_READS: usize = 16;

/// Temporary timeout used while probing the error queue after a transport
/// fault. Short on purpose, the instrument is likely wedged.
const RECOVER_TIMEOUT: Duration = Duration::from_millis(100);

/// Error-message fragments that mark a rejected command as "not supported by
/// this instrument" rather than a genuine instrument fault. Matched
/// case-insensitively as substrings of the recovered `SYST:ERR?` message.
const UNSUPPORTED_MARKERS: &[&str] = &[
    "-113",
    "UNDEFINED HEADER",
    "HEADER NOT RECOGNIZED",
    "-102",
    "SYNTAX ERROR",
    "COMMAND ERROR",
    "-420",
    "QUERY UNTERMINATED",
];

fn is_unsupported_message(msg: &str) -> bool {
    let upper = msg.to_uppercase();
    UNSUPPORTED_MARKERS.iter().any(|m| upper.contains(m))
}

/// True for error-queue reads themselves, which must not trigger another
/// drain. A prefix test so that unrelated commands merely containing "ERR"
/// keep their post-query drain.
fn is_error_query(cmd: &str) -> bool {
    cmd.trim_start()
        .trim_start_matches(':')
        .to_uppercase()
        .starts_with("SYST:ERR")
}

/// Per-session protocol switches.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Drain `SYST:ERR?` after every exchange.
    pub check_errors: bool,
    /// Gate every write on `*OPC?` completion.
    pub wait_opc: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            check_errors: true,
            wait_opc: true,
        }
    }
}

/// A checked SCPI session over an owned transport.
pub struct Session {
    io: Box<dyn Transport>,
    /// Drain the error queue after each exchange. Public so callers can flip
    /// it permanently; prefer [`Session::suspended`] for scoped changes.
    pub check_errors: bool,
    /// Gate writes on `*OPC?`. Same scoping advice as `check_errors`.
    pub wait_opc: bool,
    last_cmd: String,
}

impl Session {
    /// Wrap a transport with the given protocol switches.
    pub fn new(io: Box<dyn Transport>, options: SessionOptions) -> Self {
        Session {
            io,
            check_errors: options.check_errors,
            wait_opc: options.wait_opc,
            last_cmd: String::new(),
        }
    }

    /// The last command handed to [`Session::send`], for error attribution.
    pub fn last_cmd(&self) -> &str {
        &self.last_cmd
    }

    /// Checked command write. Transport faults are classified through a quick
    /// error-queue probe; with `check_errors` / `wait_opc` enabled the queue
    /// is drained and completion is awaited before returning.
    pub fn send(&mut self, cmd: &str) -> Result<()> {
        self.last_cmd = cmd.to_string();
        debug!("-> {cmd}");
        if let Err(err) = self.io.write(cmd) {
            return Err(self.classify_transport_fault(cmd, err));
        }
        if self.check_errors {
            self.drain_error_queue()?;
        }
        if self.wait_opc {
            self.ask(OPC_QUERY)?;
            if self.check_errors {
                self.drain_error_queue()?;
            }
        }
        Ok(())
    }

    /// Checked query. The error queue is drained after the response unless
    /// the query is itself an error-queue read.
    pub fn ask(&mut self, cmd: &str) -> Result<String> {
        debug!("? {cmd}");
        let resp = match self.io.query(cmd) {
            Ok(r) => r,
            Err(err) => return Err(self.classify_transport_fault(cmd, err)),
        };
        debug!("<- {}", resp.trim());
        if self.check_errors && !is_error_query(cmd) {
            self.drain_error_queue()?;
        }
        Ok(resp)
    }

    /// Unchecked write, bypassing drain and completion gating. For protocol
    /// sequences where an interleaved `*OPC?` would corrupt the exchange.
    pub fn send_raw(&mut self, cmd: &str) -> Result<()> {
        debug!("-> {cmd} (raw)");
        self.io.write(cmd).map_err(ScpiError::Io)
    }

    /// Read whatever bytes the instrument has pending, without a preceding
    /// command. Requires raw-read support from the transport.
    pub fn read_raw(&mut self) -> Result<Vec<u8>> {
        self.io.read_raw().map_err(ScpiError::Io)
    }

    /// Drain the instrument error queue. Stops on an empty response or a
    /// code-0 entry; the first nonzero (or unparsable) entry is raised as an
    /// instrument fault attributed to the last sent command. A transport
    /// failure during the drain is logged and swallowed so that a flaky
    /// `SYST:ERR?` cannot mask an otherwise successful command.
    pub fn drain_error_queue(&mut self) -> Result<()> {
        for _ in 0..MAX_ERROR_READS {
            let line = match self.io.query(ERROR_QUERY) {
                Ok(l) => l,
                Err(err) => {
                    debug!("error queue check skipped: {err}");
                    return Ok(());
                }
            };
            let line = line.trim().to_string();
            if line.is_empty() {
                break;
            }
            let code = line
                .split(',')
                .next()
                .unwrap_or("")
                .trim()
                .parse::<i32>()
                .unwrap_or(1);
            if code == 0 {
                break;
            }
            return Err(ScpiError::Instrument {
                command: self.last_cmd.clone(),
                message: line,
            });
        }
        Ok(())
    }

    /// Run `f` with both error checking and completion gating suspended. The
    /// previous switch values are restored whether `f` succeeds or fails.
    pub fn suspended<R>(&mut self, f: impl FnOnce(&mut Session) -> Result<R>) -> Result<R> {
        let saved = (self.check_errors, self.wait_opc);
        self.check_errors = false;
        self.wait_opc = false;
        let out = f(self);
        self.check_errors = saved.0;
        self.wait_opc = saved.1;
        out
    }

    /// Run `f` with only completion gating suspended; error checking keeps
    /// its current setting.
    pub fn suspended_opc<R>(&mut self, f: impl FnOnce(&mut Session) -> Result<R>) -> Result<R> {
        let saved = self.wait_opc;
        self.wait_opc = false;
        let out = f(self);
        self.wait_opc = saved;
        out
    }

    /// Issue `cmd` and read an IEEE 488.2 definite-length binary block in
    /// reply: `#`, one digit giving the length-field width, that many ASCII
    /// digits giving the payload length, then the payload. Runs fully
    /// suspended with read termination disabled and `timeout` applied; both
    /// are restored before returning.
    pub fn read_block(&mut self, cmd: &str, timeout: Duration) -> Result<Vec<u8>> {
        self.suspended(|s| {
            let old_term = s.io.read_termination();
            let _ = s.io.set_read_termination(None);
            let old_timeout = s.io.timeout();
            let _ = s.io.set_timeout(timeout);
            let out = s.read_block_inner(cmd);
            let _ = s.io.set_timeout(old_timeout);
            let _ = s.io.set_read_termination(old_term);
            out
        })
    }

    fn read_block_inner(&mut self, cmd: &str) -> Result<Vec<u8>> {
        self.io.write(cmd)?;
        let header = self.io.read_bytes(2)?;
        if header.first() != Some(&b'#') {
            return Err(ScpiError::Parse(format!(
                "binary block does not start with '#': {header:?}"
            )));
        }
        let nd = match header.get(1) {
            Some(d) if d.is_ascii_digit() => usize::from(d - b'0'),
            other => {
                return Err(ScpiError::Parse(format!(
                    "bad binary block length digit: {other:?}"
                )))
            }
        };
        let len_field = self.io.read_bytes(nd)?;
        let ln = std::str::from_utf8(&len_field)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| {
                ScpiError::Parse(format!("bad binary block length field: {len_field:?}"))
            })?;
        let payload = self.io.read_bytes(ln)?;
        // Many instruments append a terminator after the block. Consume it if
        // present; a timeout here is not an error.
        let _ = self.io.read_bytes(1);
        Ok(payload)
    }

    /// Best-effort error-state probe after a transport fault: read one
    /// `SYST:ERR?` entry under a short timeout, then `*CLS`. Returns the
    /// recovered message when the queue held a nonzero entry. Never fails.
    pub fn quick_recover(&mut self) -> Option<String> {
        let old = self.io.timeout();
        let shortened = self.io.set_timeout(RECOVER_TIMEOUT).is_ok();
        let msg = self.io.query(ERROR_QUERY).ok().map(|r| r.trim().to_string());
        let _ = self.io.write(CLEAR_STATUS);
        if shortened {
            let _ = self.io.set_timeout(old);
        }
        let msg = msg.filter(|m| !m.is_empty())?;
        let code = msg
            .split(',')
            .next()
            .unwrap_or("")
            .trim()
            .parse::<i32>()
            .unwrap_or(1);
        if code == 0 {
            None
        } else {
            Some(msg)
        }
    }

    /// Map a transport fault to the crate error taxonomy by probing the
    /// instrument error queue. A recovered rejection message from the fixed
    /// unsupported-command set becomes [`ScpiError::Unsupported`]; any other
    /// recovered message becomes an instrument fault; with nothing recovered
    /// the original I/O error passes through.
    fn classify_transport_fault(&mut self, cmd: &str, err: std::io::Error) -> ScpiError {
        match self.quick_recover() {
            Some(msg) if is_unsupported_message(&msg) => {
                debug!("'{cmd}' rejected as unsupported: {msg}");
                ScpiError::Unsupported(format!("command '{cmd}' rejected: {msg}"))
            }
            Some(msg) => ScpiError::Instrument {
                command: cmd.to_string(),
                message: msg,
            },
            None => ScpiError::Io(err),
        }
    }

    /// Single `*OPC?` completion probe under a temporary timeout. Returns
    /// whether the instrument answered `1`; a timeout is reported as `false`,
    /// never as an error.
    pub fn opc_once(&mut self, timeout: Duration) -> bool {
        let old = self.io.timeout();
        let _ = self.io.set_timeout(timeout);
        let done = self
            .io
            .query(OPC_QUERY)
            .map(|r| r.trim().starts_with('1'))
            .unwrap_or(false);
        let _ = self.io.set_timeout(old);
        done
    }

    /// Transport-level device clear, where supported. Best effort.
    pub fn device_clear(&mut self) {
        if let Err(err) = self.io.clear() {
            debug!("device clear not available: {err}");
        }
    }

    /// Current transport timeout.
    pub fn timeout(&self) -> Duration {
        self.io.timeout()
    }

    /// Change the transport timeout.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.io.set_timeout(timeout).map_err(ScpiError::Io)
    }

    /// Send the first candidate command that the instrument accepts. Each
    /// failed attempt is recorded; when all forms fail the operation is
    /// reported as unsupported with the per-attempt outcomes.
    pub fn send_first(&mut self, candidates: &[String], what: &str) -> Result<()> {
        let mut attempts = Vec::with_capacity(candidates.len());
        for cmd in candidates {
            match self.send(cmd) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    debug!("{what}: '{cmd}' failed: {err}");
                    attempts.push(format!("'{cmd}': {err}"));
                }
            }
        }
        Err(ScpiError::Unsupported(format!(
            "{what}: no accepted command form ({})",
            attempts.join("; ")
        )))
    }

    /// Query counterpart of [`Session::send_first`].
    pub fn ask_first(&mut self, candidates: &[String], what: &str) -> Result<String> {
        let mut attempts = Vec::with_capacity(candidates.len());
        for cmd in candidates {
            match self.ask(cmd) {
                Ok(resp) => return Ok(resp),
                Err(err) => {
                    debug!("{what}: '{cmd}' failed: {err}");
                    attempts.push(format!("'{cmd}': {err}"));
                }
            }
        }
        Err(ScpiError::Unsupported(format!(
            "{what}: no accepted query form ({})",
            attempts.join("; ")
        )))
    }
}
