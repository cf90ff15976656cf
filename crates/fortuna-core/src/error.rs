//! Error types shared by the fortuna crates.
//!
//! There is no `WouldBlock` variant. Event loops stop draining a descriptor
//! on `io::ErrorKind::WouldBlock` before it ever becomes an [`Error`].

use std::io;

/// Result type for fortuna operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket or file read/write failed.
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),

    /// A value does not fit the shape the store or server requires.
    #[error("validation failure: {0}")]
    Validation(String),

    /// Malformed or unsupported HTTP request.
    #[error("protocol failure: {0}")]
    Protocol(&'static str),

    /// Input buffer filled before a complete request could be parsed.
    #[error("input buffer exhausted before a complete request")]
    BufferExhausted,

    /// On-disk data does not decode.
    #[error("corrupt store: {0}")]
    Corrupt(String),

    /// Store file is locked by another owner.
    #[error("store busy: {0}")]
    Busy(String),

    /// Timestamp could not be rendered as an HTTP date.
    #[error("date formatting failed: {0}")]
    DateFormat(String),
}

impl Error {
    /// True for errors a connection handler answers with an HTTP error
    /// response before closing.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_) | Error::BufferExhausted)
    }
}

impl From<nix::errno::Errno> for Error {
    fn from(e: nix::errno::Errno) -> Self {
        Error::Io(io::Error::from(e))
    }
}
