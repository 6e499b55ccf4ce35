//! Error types for discovery, transfer and archiving.

use thiserror::Error;

/// Coarse failure category reported to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection refused, reset, timed out or closed early
    Network,
    /// Malformed or unparseable header
    Protocol,
    /// Filesystem read/write or archive failure
    Io,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("network error: {0}")]
    Network(#[source] std::io::Error),

    #[error("connection closed early: received {received}/{expected} bytes")]
    ConnectionClosed { received: u64, expected: u64 },

    #[error("timed out while {0}")]
    Timeout(&'static str),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::Network(_)
            | TransferError::ConnectionClosed { .. }
            | TransferError::Timeout(_) => ErrorKind::Network,
            TransferError::Protocol(_) => ErrorKind::Protocol,
            TransferError::Io(_) | TransferError::Archive(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        TransferError::Protocol(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
