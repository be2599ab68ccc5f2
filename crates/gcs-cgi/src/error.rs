//! CGI bridge error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for CGI operations.
pub type Result<T> = std::result::Result<T, CgiError>;

/// Errors that prevent a CGI response from being relayed.
#[derive(Debug, Error)]
pub enum CgiError {
    /// The program could not be started.
    #[error("failed to start {path}: {source}")]
    Spawn {
        /// Program path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A header line exceeded [`MAX_HEADER_LINE`](crate::MAX_HEADER_LINE).
    #[error("header line too long")]
    LongHeaderLine,

    /// Output ended before a header block terminated by a blank line.
    #[error("no headers")]
    NoHeaders,

    /// Neither `Status`, `Location` nor `Content-Type` was sent.
    #[error("missing required Content-Type in headers")]
    MissingContentType,

    /// `Status` header without a leading three digit code.
    #[error("bogus status: {0:?}")]
    BogusStatus(String),

    /// I/O error talking to the child.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
