//! Server error types.

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors that stop the server from starting or running.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Credential file problem.
    #[error("authentication setup failed: {0}")]
    Auth(#[from] gcs_auth::AuthError),

    /// Listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Listen address.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Certificate or key file could not be loaded.
    #[error("failed to load {path}: {source}")]
    TlsFile {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// TLS configuration rejected by rustls.
    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),

    /// Graceful shutdown did not finish within the grace window.
    #[error("graceful shutdown timed out with {connections} connection(s) still open")]
    ShutdownTimeout {
        /// Connections still open when the window elapsed.
        connections: usize,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
