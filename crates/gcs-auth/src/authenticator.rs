//! Authentication policy: at most one scheme guards the server.

use std::fmt;
use std::path::PathBuf;

use crate::basic::BasicAuth;
use crate::digest::DigestAuth;
use crate::error::{AuthError, Result};

/// Content type of the `401` response body.
pub const UNAUTHORIZED_CONTENT_TYPE: &str = "text/plain";

/// Body of the `401` response.
pub const UNAUTHORIZED_BODY: &str = "401 Unauthorized\n";

/// Authenticated caller. Empty when no authentication is configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Create an identity for a user name.
    pub fn new(user: impl Into<String>) -> Self {
        Self(user.into())
    }

    /// The identity of an unauthenticated caller.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// User name, possibly empty.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the empty identity.
    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The parts of an HTTP request the authenticators look at.
#[derive(Debug, Clone, Copy)]
pub struct AuthRequest<'a> {
    /// Request method.
    pub method: &'a str,
    /// Request URI as sent by the client (path and query).
    pub uri: &'a str,
    /// `Authorization` header value.
    pub authorization: Option<&'a str>,
}

impl<'a> AuthRequest<'a> {
    /// Bundle the request parts.
    pub fn new(method: &'a str, uri: &'a str, authorization: Option<&'a str>) -> Self {
        Self {
            method,
            uri,
            authorization,
        }
    }
}

/// Successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    /// The caller.
    pub identity: Identity,
    /// `Authentication-Info` header value to add to the response.
    pub authentication_info: Option<String>,
}

impl Grant {
    /// Grant without response headers.
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            authentication_info: None,
        }
    }

    /// Attach an `Authentication-Info` value.
    pub fn with_authentication_info(mut self, info: impl Into<String>) -> Self {
        self.authentication_info = Some(info.into());
        self
    }
}

/// Failed authentication: answer `401` with this challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// `WWW-Authenticate` header value.
    pub www_authenticate: String,
}

impl Challenge {
    pub(crate) fn new(www_authenticate: String) -> Self {
        Self { www_authenticate }
    }
}

/// Which credential files are configured.
#[derive(Debug, Clone, Default)]
pub struct AuthSettings {
    /// Realm announced in challenges.
    pub realm: String,
    /// htpasswd file for Basic authentication.
    pub basic_file: Option<PathBuf>,
    /// htdigest file for Digest authentication.
    pub digest_file: Option<PathBuf>,
}

/// The active authentication scheme.
pub enum Authenticator {
    /// Every request passes with an empty identity.
    None,
    /// HTTP Basic.
    Basic(BasicAuth),
    /// HTTP Digest.
    Digest(DigestAuth),
}

impl Authenticator {
    /// Pick the scheme from the settings. Digest wins when both files are set.
    pub fn from_settings(settings: &AuthSettings) -> Result<Self> {
        if let Some(path) = &settings.digest_file {
            tracing::info!(realm = %settings.realm, path = %path.display(), "Using digest authentication");
            return Ok(Self::Digest(DigestAuth::new(&settings.realm, path)?));
        }

        if let Some(path) = &settings.basic_file {
            tracing::info!(realm = %settings.realm, path = %path.display(), "Using basic authentication");
            return Ok(Self::Basic(BasicAuth::new(&settings.realm, path)?));
        }

        Ok(Self::None)
    }

    /// Short scheme name for logs.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Basic(_) => "basic",
            Self::Digest(_) => "digest",
        }
    }

    /// Check a request.
    pub fn authenticate(&self, request: &AuthRequest<'_>) -> std::result::Result<Grant, Challenge> {
        match self {
            Self::None => Ok(Grant::new(Identity::anonymous())),
            Self::Basic(basic) => basic.authenticate(request),
            Self::Digest(digest) => digest.authenticate(request),
        }
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Authenticator").field(&self.scheme()).finish()
    }
}

/// Validate a realm for use inside a quoted header parameter.
pub(crate) fn quote_realm(realm: String) -> Result<String> {
    if realm.chars().any(|c| c == '"' || c == '\\' || c.is_control()) {
        return Err(AuthError::InvalidRealm(realm));
    }
    Ok(realm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_no_files_means_no_auth() {
        let auth = Authenticator::from_settings(&AuthSettings {
            realm: "Git".to_string(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(auth.scheme(), "none");
        let grant = auth
            .authenticate(&AuthRequest::new("POST", "/x", None))
            .unwrap();
        assert!(grant.identity.is_anonymous());
        assert!(grant.authentication_info.is_none());
    }

    #[test]
    fn test_digest_takes_priority() {
        let dir = tempfile::tempdir().unwrap();
        let basic = dir.path().join("htpasswd");
        let digest = dir.path().join("htdigest");
        fs::write(&basic, "").unwrap();
        fs::write(&digest, "").unwrap();

        let auth = Authenticator::from_settings(&AuthSettings {
            realm: "Git".to_string(),
            basic_file: Some(basic.clone()),
            digest_file: Some(digest),
        })
        .unwrap();
        assert_eq!(auth.scheme(), "digest");

        let auth = Authenticator::from_settings(&AuthSettings {
            realm: "Git".to_string(),
            basic_file: Some(basic),
            digest_file: None,
        })
        .unwrap();
        assert_eq!(auth.scheme(), "basic");
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Authenticator::from_settings(&AuthSettings {
            realm: "Git".to_string(),
            basic_file: Some(dir.path().join("missing")),
            digest_file: None,
        });
        assert!(matches!(result, Err(AuthError::ReadFile { .. })));
    }

    #[test]
    fn test_realm_with_quote_rejected() {
        assert!(quote_realm("Git \"repos\"".to_string()).is_err());
        assert_eq!(quote_realm("Git repos".to_string()).unwrap(), "Git repos");
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(Identity::new("alice").to_string(), "alice");
        assert!(Identity::anonymous().is_anonymous());
    }
}
