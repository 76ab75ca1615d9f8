//! Error types for the TARS bridge.

use std::path::PathBuf;

use tars_protocol::CodecError;

/// Errors that can occur in the bridge
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The socket path could not be bound
    #[error("Failed to bind socket at {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `start()` was called on a listening server
    #[error("Server is already listening on {}", .0.display())]
    AlreadyListening(PathBuf),

    /// The account is disabled in its channel config
    #[error("Channel account is disabled: {0}")]
    AccountDisabled(String),

    /// I/O error on a connection
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Codec error on a connection
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl BridgeError {
    pub(crate) fn bind(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Bind {
            path: path.into(),
            source,
        }
    }

    /// Whether this error means the bridge could not come up at all.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Bind { .. } | Self::AlreadyListening(_) | Self::AccountDisabled(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
