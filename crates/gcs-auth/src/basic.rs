//! HTTP Basic authentication.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::PathBuf;

use crate::authenticator::{quote_realm, AuthRequest, Challenge, Grant, Identity};
use crate::error::Result;
use crate::file::CredentialFile;
use crate::htpasswd::Htpasswd;

/// Basic authenticator backed by an htpasswd file.
pub struct BasicAuth {
    realm: String,
    secrets: CredentialFile<Htpasswd>,
}

impl BasicAuth {
    /// Create an authenticator for `realm` reading users from `htpasswd`.
    pub fn new(realm: impl Into<String>, htpasswd: impl Into<PathBuf>) -> Result<Self> {
        let realm = quote_realm(realm.into())?;
        let secrets: CredentialFile<Htpasswd> = CredentialFile::open(htpasswd)?;

        tracing::debug!(
            path = %secrets.path().display(),
            users = secrets.current().len(),
            "Loaded htpasswd file"
        );

        Ok(Self { realm, secrets })
    }

    /// The realm announced in challenges.
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Check the request's credentials.
    pub fn authenticate(&self, request: &AuthRequest<'_>) -> std::result::Result<Grant, Challenge> {
        match self.check(request) {
            Some(user) => Ok(Grant::new(Identity::new(user))),
            None => Err(self.challenge()),
        }
    }

    fn check(&self, request: &AuthRequest<'_>) -> Option<String> {
        let (user, password) = parse_basic(request.authorization?)?;
        self.secrets
            .current()
            .verify(&user, &password)
            .then_some(user)
    }

    fn challenge(&self) -> Challenge {
        Challenge::new(format!("Basic realm=\"{}\"", self.realm))
    }
}

/// Decode `Basic <base64(user:pass)>`.
fn parse_basic(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.split_once(' ')?;
    if scheme != "Basic" {
        return None;
    }

    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, password) = text.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn basic_auth(dir: &tempfile::TempDir) -> BasicAuth {
        let path = dir.path().join("htpasswd");
        // alice / password
        fs::write(&path, "alice:{SHA}W6ph5Mm5Pz8GgiULbPgzG37mj9g=\n").unwrap();
        BasicAuth::new("Git", &path).unwrap()
    }

    fn header(user_pass: &str) -> String {
        format!("Basic {}", STANDARD.encode(user_pass))
    }

    #[test]
    fn test_parse_basic() {
        assert_eq!(
            parse_basic("Basic dXNlcjpwYXNz"),
            Some(("user".to_string(), "pass".to_string()))
        );
        assert_eq!(parse_basic("Bearer dXNlcjpwYXNz"), None);
        assert_eq!(parse_basic("Basic !!!"), None);
        assert_eq!(parse_basic("Basic"), None);
    }

    #[test]
    fn test_password_may_contain_colon() {
        assert_eq!(
            parse_basic(&header("alice:pa:ss")),
            Some(("alice".to_string(), "pa:ss".to_string()))
        );
    }

    #[test]
    fn test_valid_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let auth = basic_auth(&dir);
        let authorization = header("alice:password");

        let grant = auth
            .authenticate(&AuthRequest::new("GET", "/", Some(&authorization)))
            .unwrap();
        assert_eq!(grant.identity.as_str(), "alice");
        assert!(grant.authentication_info.is_none());
    }

    #[test]
    fn test_wrong_password_challenges() {
        let dir = tempfile::tempdir().unwrap();
        let auth = basic_auth(&dir);
        let authorization = header("alice:nope");

        let challenge = auth
            .authenticate(&AuthRequest::new("GET", "/", Some(&authorization)))
            .unwrap_err();
        assert_eq!(challenge.www_authenticate, "Basic realm=\"Git\"");
    }

    #[test]
    fn test_missing_header_challenges() {
        let dir = tempfile::tempdir().unwrap();
        let auth = basic_auth(&dir);

        assert!(auth
            .authenticate(&AuthRequest::new("GET", "/", None))
            .is_err());
    }
}
