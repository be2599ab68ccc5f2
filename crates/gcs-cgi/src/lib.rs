//! CGI/1.1 bridge.
//!
//! Turns one HTTP request into one run of a CGI program and relays the
//! program's output back as the HTTP response:
//!
//! ```text
//!   request ──► environment (CGI meta-variables + caller extras)
//!   body    ──► child stdin
//!   child stdout ──► status line + headers ──► response head
//!                └──────────────────────────► response body (streamed)
//!   child stderr ──► captured, logged after exit
//! ```
//!
//! Each invocation runs on its own blocking thread for the lifetime of the
//! child process. Running children are registered in a [`ChildTracker`] so a
//! server can kill them on forced shutdown.

mod connection;
mod env;
mod error;
mod handler;
mod head;
mod tracker;

pub use connection::{request_host, ConnectionInfo};
pub use env::CgiEnv;
pub use error::{CgiError, Result};
pub use handler::CgiHandler;
pub use head::{parse_head, CgiHead, MAX_HEADER_LINE};
pub use tracker::ChildTracker;
