//! Error taxonomy for the session client
//!
//! Vendor status codes are mapped into [`Error::Transport`] at the transport
//! boundary; everything above it deals in these kinds only.

use crate::session::SessionState;
use crate::transport::status;

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Negative vendor status code, preserved verbatim
    #[error("transport error {code} ({})", status::name(*.code))]
    Transport { code: i32 },

    /// Malformed or absent control response, broken session preconditions
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Camera rejected the authentication exchange
    #[error("authentication rejected (connection result {0:?})")]
    AuthRejected(String),

    /// Camera reported a device-secret mismatch during authentication
    #[error("device enr mismatch during authentication")]
    EnrMismatch,

    /// Operation attempted from the wrong session state
    #[error("invalid session state: expected {expected}, found {found}")]
    InvalidState {
        expected: SessionState,
        found: SessionState,
    },

    /// No frame arrived within the configured timeout
    #[error("timing failure: {0}")]
    Timing(String),

    /// Pipe or file I/O failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a raw vendor status code
    pub fn transport(code: i32) -> Self {
        Error::Transport { code }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }
}
