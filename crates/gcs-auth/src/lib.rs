//! Authentication for the git CGI server.
//!
//! Provides the request-wrapping credential check that sits in front of the
//! backend:
//! - **None**: every request passes with an empty identity
//! - **Basic**: `Authorization: Basic ...` checked against an htpasswd file
//! - **Digest**: RFC 2617 MD5 digest checked against an htdigest file
//!
//! The crate is independent of any HTTP framework. Callers hand over the
//! request method, request URI and `Authorization` header value, and receive
//! either a [`Grant`] carrying the caller identity or a [`Challenge`] to send
//! back as a `401` response.
//!
//! # Example
//!
//! ```rust,no_run
//! use gcs_auth::{AuthRequest, Authenticator, AuthSettings};
//!
//! let auth = Authenticator::from_settings(&AuthSettings {
//!     realm: "Git".to_string(),
//!     basic_file: Some("/etc/git/htpasswd".into()),
//!     digest_file: None,
//! })?;
//!
//! let request = AuthRequest::new("GET", "/repo.git/info/refs", None);
//! match auth.authenticate(&request) {
//!     Ok(grant) => println!("user: {}", grant.identity),
//!     Err(challenge) => println!("401: {}", challenge.www_authenticate),
//! }
//! # Ok::<(), gcs_auth::AuthError>(())
//! ```

mod authenticator;
mod basic;
mod digest;
mod error;
mod file;
mod htdigest;
mod htpasswd;

pub use authenticator::{
    AuthRequest, AuthSettings, Authenticator, Challenge, Grant, Identity,
    UNAUTHORIZED_BODY, UNAUTHORIZED_CONTENT_TYPE,
};
pub use basic::BasicAuth;
pub use digest::{DigestAuth, DIGEST_CLIENT_CACHE_SIZE, DIGEST_CLIENT_CACHE_TOLERANCE};
pub use error::{AuthError, Result};
pub use htdigest::Htdigest;
pub use htpasswd::{check_secret, Htpasswd};
