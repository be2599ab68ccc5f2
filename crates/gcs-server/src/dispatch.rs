//! Request dispatch.
//!
//! Layers, outermost first: HTTP trace, request id, URI prefix guard,
//! authentication. The fallback handler then either answers a module
//! discovery request or runs the backend.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use gcs_auth::{
    AuthRequest, Authenticator, Challenge, Identity, UNAUTHORIZED_BODY, UNAUTHORIZED_CONTENT_TYPE,
};
use gcs_cgi::{CgiEnv, CgiHandler, ChildTracker, ConnectionInfo};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::discovery;
use crate::error::Result;
use crate::observability::request_id_middleware;

/// `Authentication-Info` response header.
pub const AUTHENTICATION_INFO: HeaderName = HeaderName::from_static("authentication-info");

/// Shared, read-only request handling state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Active authentication scheme.
    pub auth: Arc<Authenticator>,
    /// Backend runner.
    pub cgi: CgiHandler,
}

impl AppState {
    /// Build the state. Fails when a credential file cannot be read.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let auth = Authenticator::from_settings(&config.auth)?;
        let cgi = CgiHandler::new(&config.backend_cgi, config.cgi_root());
        Ok(Self {
            config: Arc::new(config),
            auth: Arc::new(auth),
            cgi,
        })
    }

    /// Running backend children.
    pub fn tracker(&self) -> Arc<ChildTracker> {
        Arc::clone(self.cgi.tracker())
    }

    /// Backend variables for one request.
    pub fn backend_env(&self, identity: &Identity) -> CgiEnv {
        backend_env(&self.config, identity)
    }
}

/// `GIT_PROJECT_ROOT`, `GIT_HTTP_EXPORT_ALL` when exporting everything, and
/// `REMOTE_USER` for a named caller.
pub fn backend_env(config: &ServerConfig, identity: &Identity) -> CgiEnv {
    let mut env = CgiEnv::new().with(
        "GIT_PROJECT_ROOT",
        config.project_root.to_string_lossy(),
    );
    if config.export_all {
        env.set("GIT_HTTP_EXPORT_ALL", "");
    }
    if !identity.is_anonymous() {
        env.set("REMOTE_USER", identity.as_str());
    }
    env
}

/// Create the router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), prefix_guard))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Reject paths outside the URI prefix before authentication.
///
/// The bare prefix without its trailing slash redirects to the subtree.
async fn prefix_guard(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let prefix = state.config.uri_prefix.as_str();
    let path = request.uri().path();

    if path.starts_with(prefix) {
        return next.run(request).await;
    }

    if prefix != "/" && path == prefix.trim_end_matches('/') {
        let location = match request.uri().query() {
            Some(query) => format!("{prefix}?{query}"),
            None => prefix.to_string(),
        };
        if let Ok(location) = HeaderValue::from_str(&location) {
            return (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response();
        }
    }

    tracing::debug!(path = %path, prefix = %prefix, "Request outside URI prefix");
    StatusCode::NOT_FOUND.into_response()
}

/// Check credentials; on success store the [`Identity`] in request
/// extensions.
async fn auth_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let result = {
        let authorization = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let uri = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        state.auth.authenticate(&AuthRequest::new(
            request.method().as_str(),
            uri,
            authorization,
        ))
    };

    match result {
        Ok(grant) => {
            if !grant.identity.is_anonymous() {
                tracing::debug!(user = %grant.identity, "Authenticated");
            }
            request.extensions_mut().insert(grant.identity);

            let mut response = next.run(request).await;
            if let Some(info) = grant.authentication_info {
                match HeaderValue::from_str(&info) {
                    Ok(value) => {
                        response.headers_mut().insert(AUTHENTICATION_INFO, value);
                    }
                    Err(e) => tracing::warn!(error = %e, "Invalid Authentication-Info value"),
                }
            }
            response
        }
        Err(challenge) => {
            tracing::info!(
                scheme = state.auth.scheme(),
                path = %request.uri().path(),
                "Authentication required"
            );
            unauthorized(&challenge)
        }
    }
}

fn unauthorized(challenge: &Challenge) -> Response {
    let Ok(www_authenticate) = HeaderValue::from_str(&challenge.www_authenticate) else {
        tracing::error!(challenge = %challenge.www_authenticate, "Invalid WWW-Authenticate value");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let mut response = Response::new(Body::from(UNAUTHORIZED_BODY));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    let headers = response.headers_mut();
    headers.insert(header::WWW_AUTHENTICATE, www_authenticate);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(UNAUTHORIZED_CONTENT_TYPE),
    );
    response
}

/// Discovery page for `?go-get` requests when enabled, the backend otherwise.
async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let identity = request
        .extensions()
        .get::<Identity>()
        .cloned()
        .unwrap_or_default();

    if state.config.go_modules && discovery::is_go_get_request(request.uri()) {
        let tls = request
            .extensions()
            .get::<ConnectionInfo>()
            .is_some_and(|conn| conn.tls);
        return discovery::respond(&state.config, request.uri(), request.headers(), tls);
    }

    let env = state.backend_env(&identity);
    state.cgi.serve(request, &env).await
}
