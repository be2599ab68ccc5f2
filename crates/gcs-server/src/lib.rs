//! Git smart-HTTP front end.
//!
//! Serves the repositories under a project root by running
//! `git-http-backend` as a CGI program for every request:
//!
//! ```text
//!   request ──► prefix guard ──► authenticator ──┬─► module discovery (?go-get)
//!                  │ 404            │ 401          └─► CGI bridge ──► git-http-backend
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use gcs_server::{Server, ServerConfig};
//!
//! # async fn run() -> Result<(), gcs_server::ServerError> {
//! let config = ServerConfig::new("/srv/git", "/usr/lib/git-core/git-http-backend")
//!     .with_export_all(true);
//! let server = Server::bind(config).await?;
//! let shutdown = server.shutdown_handle();
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     shutdown.shutdown();
//! });
//! server.serve().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod discovery;
pub mod dispatch;
mod error;
pub mod observability;
pub mod pidfile;
pub mod repo;
pub mod server;
pub mod tls;

pub use config::{ConfigError, ServerConfig, Settings, TlsFiles};
pub use dispatch::{create_router, AppState};
pub use error::{Result, ServerError};
pub use repo::RepoInfo;
pub use server::{Server, ShutdownHandle};
