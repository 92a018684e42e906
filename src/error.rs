//! Custom error types for the library.
//!
//! This module defines the primary error type, `ScpiError`, used everywhere in
//! the crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to classify the distinct failure modes of remote instrument
//! control:
//!
//! - **`NotConnected`**: an operation was attempted before `initialize()` (or
//!   after `close()`), so there is no bound session or dialect.
//! - **`Channel`**: an invalid or unsupported channel index. Raised before any
//!   command reaches the transport.
//! - **`Range`**: a value outside a hard-enumerated allowed set (e.g. probe
//!   attenuation factors on dialects that restrict them).
//! - **`Instrument`**: the instrument reported a nonzero code on its error
//!   queue. Carries the command that provoked it for context.
//! - **`Unsupported`**: the dialect lacks the requested capability, every
//!   candidate command form faulted, or the instrument answered with a
//!   "command not recognized" class of message.
//! - **`Parse`**: a response could not be interpreted as the expected type
//!   (no numeric substring, malformed binary block header, ...).
//! - **`Io`**: a transport-level failure for which no instrument-side error
//!   message could be recovered.

use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type Result<T> = std::result::Result<T, ScpiError>;

/// Errors surfaced by sessions, dialects and facades.
#[derive(Error, Debug)]
pub enum ScpiError {
    #[error("Instrument not connected. Call initialize() first.")]
    NotConnected,

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Range error: {0}")]
    Range(String),

    #[error("Instrument error after '{command}': {message}")]
    Instrument {
        /// The last command written before the fault was reported.
        command: String,
        /// The raw `<code>,"<message>"` error-queue line.
        message: String,
    },

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScpiError {
    /// True for faults meaning "the instrument does not speak this command",
    /// as opposed to a broken transport or a genuine instrument fault.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, ScpiError::Unsupported(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_error_carries_command_context() {
        let err = ScpiError::Instrument {
            command: ":CHAN1:SCAL 0.5".to_string(),
            message: "-222,\"Data out of range\"".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains(":CHAN1:SCAL 0.5"));
        assert!(text.contains("-222"));
    }
}
