//! Per-connection facts the CGI environment needs.

use std::net::SocketAddr;

use http::header::HOST;
use http::{HeaderMap, Uri};

/// Connection metadata, stored in request extensions by the listener.
///
/// Requests without it are treated as plaintext from an unknown peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Peer address.
    pub remote_addr: Option<SocketAddr>,
    /// Local address the connection was accepted on.
    pub local_addr: Option<SocketAddr>,
    /// Whether the connection is TLS.
    pub tls: bool,
}

impl ConnectionInfo {
    /// Plaintext connection.
    pub fn plain(remote_addr: SocketAddr, local_addr: SocketAddr) -> Self {
        Self {
            remote_addr: Some(remote_addr),
            local_addr: Some(local_addr),
            tls: false,
        }
    }

    /// TLS connection.
    pub fn tls(remote_addr: SocketAddr, local_addr: SocketAddr) -> Self {
        Self {
            tls: true,
            ..Self::plain(remote_addr, local_addr)
        }
    }

    /// `http` or `https`.
    pub fn scheme(&self) -> &'static str {
        if self.tls {
            "https"
        } else {
            "http"
        }
    }
}

/// Host the client addressed: the `Host` header, or the URI authority for
/// HTTP/2 requests that carry none.
pub fn request_host<'a>(headers: &'a HeaderMap, uri: &'a Uri) -> Option<&'a str> {
    headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .filter(|host| !host.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_host() {
        let mut headers = HeaderMap::new();
        let uri: Uri = "https://h2.example.com/demo".parse().unwrap();
        assert_eq!(request_host(&headers, &uri), Some("h2.example.com"));

        headers.insert(HOST, "example.com:8080".parse().unwrap());
        assert_eq!(request_host(&headers, &uri), Some("example.com:8080"));

        let origin: Uri = "/demo".parse().unwrap();
        assert_eq!(request_host(&HeaderMap::new(), &origin), None);
    }

    #[test]
    fn test_scheme() {
        let a = "127.0.0.1:1".parse().unwrap();
        let b = "127.0.0.1:2".parse().unwrap();
        assert_eq!(ConnectionInfo::plain(a, b).scheme(), "http");
        assert_eq!(ConnectionInfo::tls(a, b).scheme(), "https");
        assert_eq!(ConnectionInfo::default().remote_addr, None);
    }
}
