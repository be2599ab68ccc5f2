//! # Observability
//!
//! - **Structured logging**: pretty or JSON output through `tracing-subscriber`
//! - **Request tracing**: every request runs in a span carrying its request ID
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gcs_server::observability::{init_logging, LogFormat};
//!
//! init_logging("info", LogFormat::Pretty);
//! ```

mod logging;
pub mod middleware;

pub use logging::{init_logging, LogFormat};
pub use middleware::{request_id_middleware, RequestId, REQUEST_ID_HEADER};
