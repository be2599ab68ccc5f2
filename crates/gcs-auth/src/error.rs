//! Error types for authentication setup.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors raised while preparing an authenticator.
///
/// Per-request credential failures are not errors; they produce a
/// [`Challenge`](crate::Challenge).
#[derive(Debug, Error)]
pub enum AuthError {
    /// Credential file could not be read.
    #[error("failed to read credential file {path}: {source}")]
    ReadFile {
        /// Path of the credential file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Realm contains characters that cannot appear in a quoted header value.
    #[error("invalid realm: {0:?}")]
    InvalidRealm(String),
}
