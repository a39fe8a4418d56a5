//! Server errors.

use std::io;

/// Failures starting or running the HTTP listener.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Could not bind the listening socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested `host:port`.
        addr: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Other socket I/O failure.
    #[error("server I/O error: {0}")]
    Io(#[from] io::Error),
}
