//! Server configuration.
//!
//! [`Settings`] holds the raw values from the command line.
//! [`ServerConfig::resolve`] validates them once at startup; the result is
//! never mutated while the server runs.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use gcs_auth::AuthSettings;
use thiserror::Error;

use crate::backend::find_backend_cgi;
use crate::repo::clean_path;

/// Default listen address.
pub const DEFAULT_ADDR: &str = ":8080";

/// Default authentication realm.
pub const DEFAULT_REALM: &str = "Git";

/// Default graceful shutdown window.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration errors. All of them are fatal before listening.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `--cert-file` given without `--key-file`.
    #[error("--key-file is required when --cert-file is specified")]
    KeyFileRequired,

    /// The listen address could not be parsed or resolved.
    #[error("invalid listen address {addr:?}: {reason}")]
    InvalidAddr {
        /// Address as given.
        addr: String,
        /// What went wrong.
        reason: String,
    },

    /// The working directory could not be determined.
    #[error("cannot determine current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    /// `git --exec-path` could not be run.
    #[error("cannot locate git-http-backend: {0}")]
    GitExecPath(#[source] std::io::Error),

    /// `git --exec-path` ran but failed.
    #[error("git --exec-path failed: {0}")]
    GitExecPathFailed(String),
}

/// Raw startup settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Project root; the current directory when absent.
    pub project_root: Option<PathBuf>,
    /// Export repositories without `git-daemon-export-ok`.
    pub export_all: bool,
    /// Backend program; located through `git --exec-path` when absent.
    pub backend_cgi: Option<PathBuf>,
    /// htpasswd file.
    pub basic_auth_file: Option<PathBuf>,
    /// htdigest file.
    pub digest_auth_file: Option<PathBuf>,
    /// Authentication realm.
    pub auth_realm: String,
    /// URI prefix.
    pub uri_prefix: String,
    /// Listen address. `:PORT` means every interface.
    pub addr: String,
    /// TLS certificate chain (PEM).
    pub cert_file: Option<PathBuf>,
    /// TLS private key (PEM).
    pub key_file: Option<PathBuf>,
    /// Answer `?go-get` requests.
    pub go_modules: bool,
    /// Graceful shutdown window.
    pub shutdown_timeout: Duration,
    /// Close remaining connections when the window elapses.
    pub force_close: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project_root: None,
            export_all: false,
            backend_cgi: None,
            basic_auth_file: None,
            digest_auth_file: None,
            auth_realm: DEFAULT_REALM.to_string(),
            uri_prefix: "/".to_string(),
            addr: DEFAULT_ADDR.to_string(),
            cert_file: None,
            key_file: None,
            go_modules: false,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            force_close: false,
        }
    }
}

/// TLS certificate and key files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    /// Certificate chain (PEM).
    pub cert_file: PathBuf,
    /// Private key (PEM).
    pub key_file: PathBuf,
}

/// Validated server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Absolute project root (`GIT_PROJECT_ROOT`).
    pub project_root: PathBuf,
    /// Set `GIT_HTTP_EXPORT_ALL`.
    pub export_all: bool,
    /// Backend program.
    pub backend_cgi: PathBuf,
    /// URI prefix in subtree form: `/` or `/a/b/`.
    pub uri_prefix: String,
    /// Credential files and realm.
    pub auth: AuthSettings,
    /// Listen address.
    pub addr: SocketAddr,
    /// TLS material; plaintext when absent.
    pub tls: Option<TlsFiles>,
    /// Answer `?go-get` requests.
    pub go_modules: bool,
    /// Graceful shutdown window.
    pub shutdown_timeout: Duration,
    /// Close remaining connections when the window elapses.
    pub force_close: bool,
}

impl ServerConfig {
    /// Configuration with defaults for everything but the two paths.
    pub fn new(project_root: impl Into<PathBuf>, backend_cgi: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            export_all: false,
            backend_cgi: backend_cgi.into(),
            uri_prefix: "/".to_string(),
            auth: AuthSettings {
                realm: DEFAULT_REALM.to_string(),
                ..Default::default()
            },
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            tls: None,
            go_modules: false,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            force_close: false,
        }
    }

    /// Validate raw settings.
    pub fn resolve(settings: Settings) -> Result<Self, ConfigError> {
        let tls = match (settings.cert_file, settings.key_file) {
            (Some(cert_file), Some(key_file)) => Some(TlsFiles {
                cert_file,
                key_file,
            }),
            (Some(_), None) => return Err(ConfigError::KeyFileRequired),
            (None, Some(key)) => {
                tracing::warn!(key = %key.display(), "Key file given without certificate; serving plaintext");
                None
            }
            (None, None) => None,
        };

        let addr = parse_listen_addr(&settings.addr)?;

        let root = match settings.project_root {
            Some(root) if !root.as_os_str().is_empty() => root,
            _ => std::env::current_dir().map_err(ConfigError::CurrentDir)?,
        };
        let project_root = absolute_path(&root)?;

        let backend_cgi = match settings.backend_cgi {
            Some(path) => path,
            None => find_backend_cgi()?,
        };

        Ok(Self {
            project_root,
            export_all: settings.export_all,
            backend_cgi,
            uri_prefix: subtree_path(&settings.uri_prefix),
            auth: AuthSettings {
                realm: settings.auth_realm,
                basic_file: settings.basic_auth_file,
                digest_file: settings.digest_auth_file,
            },
            addr,
            tls,
            go_modules: settings.go_modules,
            shutdown_timeout: settings.shutdown_timeout,
            force_close: settings.force_close,
        })
    }

    /// Set the URI prefix.
    pub fn with_uri_prefix(mut self, prefix: &str) -> Self {
        self.uri_prefix = subtree_path(prefix);
        self
    }

    /// Set export-all.
    pub fn with_export_all(mut self, export_all: bool) -> Self {
        self.export_all = export_all;
        self
    }

    /// Enable or disable module discovery.
    pub fn with_go_modules(mut self, go_modules: bool) -> Self {
        self.go_modules = go_modules;
        self
    }

    /// Set the authentication settings.
    pub fn with_auth(mut self, auth: AuthSettings) -> Self {
        self.auth = auth;
        self
    }

    /// Set the listen address.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Serve over TLS.
    pub fn with_tls(mut self, tls: TlsFiles) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Set the shutdown window and whether to force close after it.
    pub fn with_shutdown(mut self, timeout: Duration, force_close: bool) -> Self {
        self.shutdown_timeout = timeout;
        self.force_close = force_close;
        self
    }

    /// CGI root: the prefix without its trailing slash.
    pub fn cgi_root(&self) -> String {
        clean_path(&self.uri_prefix)
    }

    /// `:PORT` suffix for URLs built with `scheme`, empty for the scheme's
    /// default port.
    pub fn url_port(&self, tls: bool) -> String {
        let default = if tls { 443 } else { 80 };
        match self.addr.port() {
            port if port == default => String::new(),
            port => format!(":{port}"),
        }
    }
}

/// Subtree form of a URI prefix: `/` or a cleaned path with a trailing slash.
pub fn subtree_path(uri: &str) -> String {
    if uri.is_empty() || uri == "/" {
        return "/".to_string();
    }
    let cleaned = clean_path(uri);
    if cleaned == "/" {
        cleaned
    } else {
        format!("{cleaned}/")
    }
}

/// Parse a listen address. `:PORT` binds every interface.
pub fn parse_listen_addr(addr: &str) -> Result<SocketAddr, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidAddr {
        addr: addr.to_string(),
        reason,
    };

    if let Some(port) = addr.strip_prefix(':') {
        let port: u16 = port.parse().map_err(|e| invalid(format!("bad port: {e}")))?;
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    if let Ok(addr) = addr.parse() {
        return Ok(addr);
    }

    addr.to_socket_addrs()
        .map_err(|e| invalid(e.to_string()))?
        .next()
        .ok_or_else(|| invalid("no addresses".to_string()))
}

/// Make `path` absolute against the current directory and drop `.`/`..`.
fn absolute_path(path: &Path) -> Result<PathBuf, ConfigError> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(ConfigError::CurrentDir)?
            .join(path)
    };

    let mut cleaned = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    Ok(cleaned)
}
