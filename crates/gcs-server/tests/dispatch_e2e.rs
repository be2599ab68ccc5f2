//! End-to-end tests for request dispatch: prefix guard, authentication,
//! module discovery and the backend environment.
//!
//! The backend is a shell script that records that it ran and prints its
//! environment.

#![cfg(unix)]

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use axum::{body::Body, http::Request, Router};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use gcs_auth::AuthSettings;
use gcs_server::{create_router, AppState, ServerConfig};
use md5::{Digest as _, Md5};
use tempfile::TempDir;
use tower::ServiceExt;

struct Fixture {
    dir: TempDir,
    root: PathBuf,
    marker: PathBuf,
    backend: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repos");
        fs::create_dir(&root).unwrap();
        fs::create_dir(root.join("demo.git")).unwrap();

        let marker = dir.path().join("backend-ran");
        let backend = dir.path().join("backend.cgi");
        fs::write(
            &backend,
            format!(
                "#!/bin/sh\ntouch '{}'\nprintf 'Content-Type: text/plain\\r\\n\\r\\n'\nenv\n",
                marker.display()
            ),
        )
        .unwrap();
        fs::set_permissions(&backend, fs::Permissions::from_mode(0o755)).unwrap();

        Self {
            dir,
            root,
            marker,
            backend,
        }
    }

    fn config(&self) -> ServerConfig {
        ServerConfig::new(&self.root, &self.backend)
    }

    fn backend_ran(&self) -> bool {
        self.marker.exists()
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }
}

fn app(config: ServerConfig) -> Router {
    create_router(AppState::new(config).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("host", "example.com")
        .body(Body::empty())
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

fn env_lines(body: &str, key: &str) -> Vec<String> {
    let prefix = format!("{key}=");
    body.lines()
        .filter(|line| line.starts_with(&prefix))
        .map(String::from)
        .collect()
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

fn challenge_params(header: &str) -> HashMap<String, String> {
    header
        .trim_start_matches("Digest ")
        .split(", ")
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.trim_matches('"').to_string()))
        .collect()
}

// ==================== Module discovery ====================

#[tokio::test(flavor = "multi_thread")]
async fn test_go_get_existing_repo() {
    let fx = Fixture::new();
    let app = app(fx
        .config()
        .with_go_modules(true)
        .with_addr("0.0.0.0:80".parse().unwrap()));

    let response = app.oneshot(get("/demo?go-get=1")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "text/html; charset=utf-8"
    );

    let body = body_string(response).await;
    assert!(body.contains(
        r#"<meta name="go-import" content="example.com/demo git http://example.com/demo.git">"#
    ));
    assert!(!fx.backend_ran());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_go_get_clone_url_carries_listen_port() {
    let fx = Fixture::new();
    let app = app(fx
        .config()
        .with_go_modules(true)
        .with_addr("0.0.0.0:8080".parse().unwrap()));

    let response = app.oneshot(get("/demo?go-get=1")).await.unwrap();
    let body = body_string(response).await;
    assert!(body.contains("git http://example.com:8080/demo.git"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_go_get_missing_repo() {
    let fx = Fixture::new();
    let app = app(fx.config().with_go_modules(true));

    let response = app.oneshot(get("/missing?go-get=1")).await.unwrap();
    assert_eq!(response.status(), 404);
    assert!(!fx.backend_ran());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_go_get_ignored_when_disabled() {
    let fx = Fixture::new();
    let app = app(fx.config());

    let response = app.oneshot(get("/demo?go-get=1")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body = body_string(response).await;
    assert_eq!(env_lines(&body, "QUERY_STRING"), vec!["QUERY_STRING=go-get=1"]);
    assert!(fx.backend_ran());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_go_get_under_prefix() {
    let fx = Fixture::new();
    let app = app(fx
        .config()
        .with_go_modules(true)
        .with_uri_prefix("/git")
        .with_addr("0.0.0.0:80".parse().unwrap()));

    let response = app.oneshot(get("/git/demo?go-get=1")).await.unwrap();
    let body = body_string(response).await;
    assert!(body.contains(r#"content="example.com/git/demo git http://example.com/git/demo.git""#));
}

// ==================== Backend environment ====================

#[tokio::test(flavor = "multi_thread")]
async fn test_backend_environment() {
    let fx = Fixture::new();
    let app = app(fx.config());

    let response = app
        .oneshot(get("/demo.git/info/refs?service=git-upload-pack"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body = body_string(response).await;
    assert_eq!(
        env_lines(&body, "GIT_PROJECT_ROOT"),
        vec![format!("GIT_PROJECT_ROOT={}", fx.root.display())]
    );
    assert_eq!(env_lines(&body, "PATH_INFO"), vec!["PATH_INFO=/demo.git/info/refs"]);
    assert_eq!(env_lines(&body, "REQUEST_METHOD"), vec!["REQUEST_METHOD=GET"]);
    assert!(env_lines(&body, "GIT_HTTP_EXPORT_ALL").is_empty());
    assert!(env_lines(&body, "REMOTE_USER").is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_export_all_is_presence_only() {
    let fx = Fixture::new();
    let app = app(fx.config().with_export_all(true));

    let response = app.oneshot(get("/demo.git/HEAD")).await.unwrap();
    let body = body_string(response).await;
    assert_eq!(
        env_lines(&body, "GIT_HTTP_EXPORT_ALL"),
        vec!["GIT_HTTP_EXPORT_ALL="]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_prefix_sets_script_name() {
    let fx = Fixture::new();
    let app = app(fx.config().with_uri_prefix("/git/"));

    let response = app.oneshot(get("/git/demo.git/HEAD")).await.unwrap();
    let body = body_string(response).await;
    assert_eq!(env_lines(&body, "SCRIPT_NAME"), vec!["SCRIPT_NAME=/git"]);
    assert_eq!(env_lines(&body, "PATH_INFO"), vec!["PATH_INFO=/demo.git/HEAD"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_backend_is_500() {
    let fx = Fixture::new();
    let app = app(ServerConfig::new(&fx.root, fx.dir.path().join("nope")));

    let response = app.oneshot(get("/demo.git/HEAD")).await.unwrap();
    assert_eq!(response.status(), 500);
}

// ==================== Prefix guard ====================

#[tokio::test(flavor = "multi_thread")]
async fn test_outside_prefix_is_404_before_auth() {
    let fx = Fixture::new();
    let htdigest = fx.write("htdigest", "");
    let app = app(fx.config().with_uri_prefix("/git").with_auth(AuthSettings {
        realm: "Git".to_string(),
        digest_file: Some(htdigest),
        basic_file: None,
    }));

    let response = app.clone().oneshot(get("/other/demo.git")).await.unwrap();
    assert_eq!(response.status(), 404);

    let response = app.oneshot(get("/git")).await.unwrap();
    assert_eq!(response.status(), 301);
    assert_eq!(response.headers()["location"], "/git/");
    assert!(!fx.backend_ran());
}

// ==================== Authentication ====================

#[tokio::test(flavor = "multi_thread")]
async fn test_digest_without_credentials() {
    let fx = Fixture::new();
    let ha1 = md5_hex("alice:Git:secret");
    let htdigest = fx.write("htdigest", &format!("alice:Git:{ha1}\n"));
    let app = app(fx.config().with_auth(AuthSettings {
        realm: "Git".to_string(),
        digest_file: Some(htdigest),
        basic_file: None,
    }));

    let response = app.oneshot(get("/demo.git/info/refs")).await.unwrap();
    assert_eq!(response.status(), 401);
    let challenge = response.headers()["www-authenticate"].to_str().unwrap();
    assert!(challenge.starts_with("Digest "));
    assert!(challenge.contains(r#"realm="Git""#));
    assert_eq!(response.headers()["content-type"], "text/plain");
    assert_eq!(body_string(response).await, "401 Unauthorized\n");
    assert!(!fx.backend_ran());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_digest_round_trip() {
    let fx = Fixture::new();
    let ha1 = md5_hex("alice:Git:secret");
    let htdigest = fx.write("htdigest", &format!("alice:Git:{ha1}\n"));
    let app = app(fx.config().with_auth(AuthSettings {
        realm: "Git".to_string(),
        digest_file: Some(htdigest),
        basic_file: None,
    }));

    let uri = "/demo.git/info/refs?service=git-upload-pack";
    let response = app.clone().oneshot(get(uri)).await.unwrap();
    let params = challenge_params(response.headers()["www-authenticate"].to_str().unwrap());

    let nonce = &params["nonce"];
    let ha2 = md5_hex(&format!("GET:{uri}"));
    let digest = md5_hex(&format!("{ha1}:{nonce}:00000001:0a4f113b:auth:{ha2}"));
    let authorization = format!(
        "Digest username=\"alice\", realm=\"Git\", nonce=\"{nonce}\", uri=\"{uri}\", \
         response=\"{digest}\", opaque=\"{}\", qop=auth, nc=00000001, cnonce=\"0a4f113b\"",
        params["opaque"]
    );

    let request = Request::builder()
        .uri(uri)
        .header("host", "example.com")
        .header("authorization", authorization)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("authentication-info"));

    let body = body_string(response).await;
    assert_eq!(env_lines(&body, "REMOTE_USER"), vec!["REMOTE_USER=alice"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_digest_unknown_user_rejected() {
    let fx = Fixture::new();
    let ha1 = md5_hex("alice:Git:secret");
    let htdigest = fx.write("htdigest", &format!("alice:Git:{ha1}\n"));
    let app = app(fx.config().with_auth(AuthSettings {
        realm: "Git".to_string(),
        digest_file: Some(htdigest),
        basic_file: None,
    }));

    let uri = "/demo.git/info/refs";
    let response = app.clone().oneshot(get(uri)).await.unwrap();
    let params = challenge_params(response.headers()["www-authenticate"].to_str().unwrap());

    // Computed with an empty HA1, as a client without any secret could.
    let nonce = &params["nonce"];
    let ha2 = md5_hex(&format!("GET:{uri}"));
    let digest = md5_hex(&format!(":{nonce}:00000001:0a4f113b:auth:{ha2}"));
    let authorization = format!(
        "Digest username=\"mallory\", realm=\"Git\", nonce=\"{nonce}\", uri=\"{uri}\", \
         response=\"{digest}\", opaque=\"{}\", qop=auth, nc=00000001, cnonce=\"0a4f113b\"",
        params["opaque"]
    );

    let request = Request::builder()
        .uri(uri)
        .header("host", "example.com")
        .header("authorization", authorization)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), 401);
    assert!(!fx.backend_ran());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_basic_auth() {
    let fx = Fixture::new();
    let htpasswd = fx.write("htpasswd", "alice:{SHA}W6ph5Mm5Pz8GgiULbPgzG37mj9g=\n");
    let app = app(fx.config().with_auth(AuthSettings {
        realm: "Git".to_string(),
        digest_file: None,
        basic_file: Some(htpasswd),
    }));

    let request = |credentials: &str| {
        Request::builder()
            .uri("/demo.git/HEAD")
            .header("host", "example.com")
            .header(
                "authorization",
                format!("Basic {}", STANDARD.encode(credentials)),
            )
            .body(Body::empty())
            .unwrap()
    };

    let response = app.clone().oneshot(request("alice:wrong")).await.unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(
        response.headers()["www-authenticate"],
        r#"Basic realm="Git""#
    );
    assert!(!fx.backend_ran());

    let response = app.oneshot(request("alice:password")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body = body_string(response).await;
    assert_eq!(env_lines(&body, "REMOTE_USER"), vec!["REMOTE_USER=alice"]);
}

// ==================== Observability ====================

#[tokio::test(flavor = "multi_thread")]
async fn test_request_id_echoed() {
    let fx = Fixture::new();
    let app = app(fx.config().with_go_modules(true));

    let request = Request::builder()
        .uri("/missing?go-get")
        .header("host", "example.com")
        .header("x-request-id", "abc-123")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "abc-123");

    let response = app.oneshot(get("/missing?go-get")).await.unwrap();
    assert!(!response.headers()["x-request-id"].is_empty());
}
