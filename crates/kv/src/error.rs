//! Error types for the ordered KV capability.

use std::io;

use snafu::Snafu;

/// Result type alias for KV operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in a KV backend.
///
/// Backend-library errors are captured by message rather than wrapped:
/// redb's error enums are split per operation (database, transaction,
/// table, commit, compaction) and threading five source types through
/// every caller buys nothing the message does not already carry.
#[derive(Debug, Snafu)]
pub enum Error {
    /// I/O error from the filesystem.
    #[snafu(display("I/O error: {source}"))]
    Io {
        /// The underlying I/O error.
        source: io::Error,
    },

    /// Error reported by the backend library.
    #[snafu(display("storage backend error: {message}"))]
    Backend {
        /// Description of the backend failure.
        message: String,
    },

    /// The store was used after `close()`.
    #[snafu(display("key-value store is closed"))]
    Closed,
}

impl Error {
    /// Captures a backend-library error by message.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Error::Backend { message: err.to_string() }
    }
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { source }
    }
}
