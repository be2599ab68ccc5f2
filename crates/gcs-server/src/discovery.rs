//! Go module discovery.
//!
//! `go get HOST/path` first fetches `https://HOST/path?go-get=1` and looks
//! for a `go-import` meta tag naming the VCS and clone URL. Those requests
//! are answered here without running the backend.

use std::collections::HashMap;

use askama::Template;
use axum::{
    body::Body,
    extract::Query,
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use gcs_cgi::request_host;

use crate::config::ServerConfig;
use crate::repo::RepoInfo;

/// Query parameter that marks a discovery request.
pub const GO_GET_PARAM: &str = "go-get";

/// Content type of the discovery page.
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// The discovery page.
#[derive(Template)]
#[template(path = "go_import.html")]
pub struct GoImportTemplate<'a> {
    /// Import path, `HOST/path`.
    pub module_path: &'a str,
    /// Version control system.
    pub vcs: &'a str,
    /// Clone URL.
    pub repo_url: &'a str,
}

/// Whether the query string carries `go-get`, with or without a value.
pub fn is_go_get_request(uri: &Uri) -> bool {
    Query::<HashMap<String, String>>::try_from_uri(uri)
        .map(|Query(params)| params.contains_key(GO_GET_PARAM))
        .unwrap_or(false)
}

/// Answer a discovery request.
///
/// `404` when the marker is missing or the path names no repository.
pub fn respond(config: &ServerConfig, uri: &Uri, headers: &HeaderMap, tls: bool) -> Response {
    if !is_go_get_request(uri) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let repo = RepoInfo::resolve(uri.path(), &config.uri_prefix, &config.project_root);
    if !repo.exists {
        tracing::debug!(path = %repo.request_path, "No repository for go-get request");
        return StatusCode::NOT_FOUND.into_response();
    }

    let host = request_host(headers, uri).unwrap_or_default();
    let module_path = format!("{host}{}", repo.request_path);
    let repo_url = clone_url(config, host, &repo.git_path, tls);

    let page = GoImportTemplate {
        module_path: &module_path,
        vcs: "git",
        repo_url: &repo_url,
    };

    match page.render() {
        Ok(html) => {
            let mut response = Response::new(Body::from(html));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(HTML_CONTENT_TYPE),
            );
            response
        }
        Err(e) => {
            tracing::error!(error = %e, module = %module_path, "Failed to render go-import page");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `scheme://host[:port]/git_path`. The listen port is added unless it is
/// the scheme's default or the host already names a port.
pub fn clone_url(config: &ServerConfig, host: &str, git_path: &str, tls: bool) -> String {
    let scheme = if tls { "https" } else { "http" };
    let port = if host_has_port(host) {
        String::new()
    } else {
        config.url_port(tls)
    };
    format!("{scheme}://{host}{port}{git_path}")
}

fn host_has_port(host: &str) -> bool {
    match host.rsplit_once(':') {
        Some((name, port)) => {
            !port.is_empty()
                && port.bytes().all(|b| b.is_ascii_digit())
                && (name.ends_with(']') || !name.contains(':'))
        }
        None => false,
    }
}
