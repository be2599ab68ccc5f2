//! One CGI invocation per HTTP request.

use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::thread;

use axum::body::Body;
use bytes::Bytes;
use futures::StreamExt;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::request::Parts;
use http::{Request, Response, StatusCode};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use crate::connection::{request_host, ConnectionInfo};
use crate::env::CgiEnv;
use crate::error::{CgiError, Result};
use crate::head::{parse_head, CgiHead};
use crate::tracker::ChildTracker;

/// Value of `SERVER_SOFTWARE`.
const SERVER_SOFTWARE: &str = concat!("gcs/", env!("CARGO_PKG_VERSION"));

/// `PATH` for the child when the server has none.
const FALLBACK_PATH: &str = "/bin:/usr/bin:/usr/ucb:/usr/bsd:/usr/local/bin";

/// Size of one response body chunk read from the child.
const RELAY_CHUNK_SIZE: usize = 32 * 1024;

/// Chunks buffered between the child and the client.
const RELAY_CHANNEL_DEPTH: usize = 8;

/// Runs a CGI program for each request.
#[derive(Debug, Clone)]
pub struct CgiHandler {
    path: PathBuf,
    root: String,
    tracker: Arc<ChildTracker>,
}

impl CgiHandler {
    /// Handler for the program at `path`, mounted at URL prefix `root`.
    pub fn new(path: impl Into<PathBuf>, root: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            root: root.into(),
            tracker: Arc::new(ChildTracker::new()),
        }
    }

    /// Program path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// URL prefix (`SCRIPT_NAME`).
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Tracker holding this handler's running children.
    pub fn tracker(&self) -> &Arc<ChildTracker> {
        &self.tracker
    }

    /// Build the CGI meta-variables for a request.
    pub fn request_env(&self, parts: &Parts, conn: &ConnectionInfo) -> CgiEnv {
        let root = if self.root.is_empty() { "/" } else { &self.root };
        let path = parts.uri.path();
        let host = request_host(&parts.headers, &parts.uri).unwrap_or_default();

        let mut env = CgiEnv::new();
        env.set("SERVER_SOFTWARE", SERVER_SOFTWARE);
        env.set("SERVER_PROTOCOL", format!("{:?}", parts.version));
        env.set("HTTP_HOST", host);
        env.set("GATEWAY_INTERFACE", "CGI/1.1");
        env.set("REQUEST_METHOD", parts.method.as_str());
        env.set("QUERY_STRING", parts.uri.query().unwrap_or_default());
        env.set(
            "REQUEST_URI",
            parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or(path),
        );

        let path_info = match path.strip_prefix(root) {
            Some(rest) if root != "/" => rest,
            _ => path,
        };
        env.set("PATH_INFO", path_info);
        env.set("SCRIPT_NAME", root);
        env.set("SCRIPT_FILENAME", self.path.to_string_lossy());

        env.set("SERVER_PORT", server_port(host, conn.tls));
        env.set("SERVER_NAME", server_name(host));

        if let Some(remote) = conn.remote_addr {
            env.set("REMOTE_ADDR", remote.ip().to_string());
            env.set("REMOTE_HOST", remote.ip().to_string());
            env.set("REMOTE_PORT", remote.port().to_string());
        }
        if conn.tls {
            env.set("HTTPS", "on");
        }

        for name in parts.headers.keys() {
            let key = format!("HTTP_{}", env_name(name.as_str()));
            if key == "HTTP_PROXY" {
                continue;
            }
            let separator = if *name == http::header::COOKIE { "; " } else { ", " };
            let value = parts
                .headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(separator);
            env.set(key, value);
        }

        let content_length = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);
        if content_length > 0 {
            env.set("CONTENT_LENGTH", content_length.to_string());
        }
        if let Some(ct) = parts.headers.get(CONTENT_TYPE) {
            env.set("CONTENT_TYPE", String::from_utf8_lossy(ct.as_bytes()));
        }

        env.set(
            "PATH",
            std::env::var("PATH").unwrap_or_else(|_| FALLBACK_PATH.to_string()),
        );
        if let Ok(ld) = std::env::var("LD_LIBRARY_PATH") {
            env.set("LD_LIBRARY_PATH", ld);
        }

        env
    }

    /// Run the program for `request`. `extra` is applied on top of the
    /// request's meta-variables.
    ///
    /// Never fails: errors before the response head is known answer `500`.
    pub async fn serve(&self, request: Request<Body>, extra: &CgiEnv) -> Response<Body> {
        let (parts, body) = request.into_parts();
        let conn = parts
            .extensions
            .get::<ConnectionInfo>()
            .copied()
            .unwrap_or_default();

        let mut env = self.request_env(&parts, &conn);
        env.extend(extra);

        let (head_tx, head_rx) = oneshot::channel();
        let (chunk_tx, chunk_rx) = mpsc::channel(RELAY_CHANNEL_DEPTH);

        let invocation = Invocation {
            program: self.path.clone(),
            env,
            tracker: Arc::clone(&self.tracker),
            runtime: Handle::current(),
        };
        tokio::task::spawn_blocking(move || invocation.run(body, head_tx, chunk_tx));

        match head_rx.await {
            Ok(Ok(head)) => {
                let CgiHead { status, headers } = head;
                let mut response = Response::new(Body::from_stream(ReceiverStream::new(chunk_rx)));
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                response
            }
            Ok(Err(e)) => {
                tracing::error!(path = %parts.uri.path(), error = %e, "CGI error");
                internal_error()
            }
            Err(_) => {
                tracing::error!(path = %parts.uri.path(), "CGI invocation ended without a response");
                internal_error()
            }
        }
    }
}

fn internal_error() -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

/// `content-type` -> `CONTENT_TYPE`. `=` is mapped too so a header cannot
/// inject a second variable.
fn env_name(header: &str) -> String {
    header
        .chars()
        .map(|c| match c {
            '-' | '=' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

fn server_port(host: &str, tls: bool) -> String {
    host.rsplit_once(':')
        .map(|(_, port)| port)
        .filter(|port| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
        .map(str::to_string)
        .unwrap_or_else(|| if tls { "443" } else { "80" }.to_string())
}

fn server_name(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        if let Some((v6, _)) = rest.split_once(']') {
            return v6;
        }
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

/// State moved onto the blocking thread.
struct Invocation {
    program: PathBuf,
    env: CgiEnv,
    tracker: Arc<ChildTracker>,
    runtime: Handle,
}

impl Invocation {
    fn run(
        self,
        body: Body,
        head_tx: oneshot::Sender<Result<CgiHead>>,
        chunk_tx: mpsc::Sender<io::Result<Bytes>>,
    ) {
        let dir = self
            .program
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));

        let spawned = Command::new(&self.program)
            .env_clear()
            .envs(self.env.iter())
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                let _ = head_tx.send(Err(CgiError::Spawn {
                    path: self.program.clone(),
                    source,
                }));
                return;
            }
        };

        let (Some(stdin), Some(stdout), Some(mut stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            let _ = child.wait();
            let _ = head_tx.send(Err(CgiError::Io(io::Error::other("child pipes unavailable"))));
            return;
        };

        let id = self.tracker.register(child);
        tracing::debug!(id, program = %self.program.display(), "CGI child started");

        // Detached: the child may exit without draining its input.
        let runtime = self.runtime.clone();
        thread::spawn(move || feed_stdin(&runtime, body, stdin));

        let stderr_reader = thread::spawn(move || {
            let mut captured = Vec::new();
            let _ = stderr.read_to_end(&mut captured);
            captured
        });

        let mut stdout = BufReader::new(stdout);
        match parse_head(&mut stdout) {
            Ok(head) => {
                if head_tx.send(Ok(head)).is_err() {
                    self.tracker.kill(id);
                } else if let Err(e) = relay(&mut stdout, &chunk_tx) {
                    tracing::warn!(id, error = %e, "CGI: failed to relay response body");
                    self.tracker.kill(id);
                }
            }
            Err(e) => {
                let _ = head_tx.send(Err(e));
                self.tracker.kill(id);
            }
        }
        drop(stdout);

        // The body ends only once the child is reaped and no longer tracked.
        let status = self.tracker.release(id).map(|mut child| child.wait());
        drop(chunk_tx);

        let captured = stderr_reader.join().unwrap_or_default();
        if !captured.is_empty() {
            tracing::warn!(
                id,
                program = %self.program.display(),
                "CGI stderr: {}",
                String::from_utf8_lossy(&captured).trim_end()
            );
        }

        match status {
            Some(Ok(status)) if !status.success() => {
                tracing::warn!(id, %status, "CGI child exited unsuccessfully");
            }
            Some(Err(e)) => tracing::error!(id, error = %e, "CGI: failed to wait for child"),
            _ => tracing::debug!(id, "CGI child finished"),
        }
    }
}

/// Copy the request body into the child's stdin, then close it.
fn feed_stdin(runtime: &Handle, body: Body, mut stdin: ChildStdin) {
    let mut stream = body.into_data_stream();
    while let Some(chunk) = runtime.block_on(stream.next()) {
        match chunk {
            Ok(bytes) => {
                if let Err(e) = stdin.write_all(&bytes) {
                    tracing::debug!(error = %e, "CGI child stopped reading its input");
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Request body ended with an error");
                return;
            }
        }
    }
}

/// Forward stdout to the response body until EOF.
fn relay<R: Read>(stdout: &mut R, chunks: &mpsc::Sender<io::Result<Bytes>>) -> io::Result<()> {
    let mut buf = vec![0u8; RELAY_CHUNK_SIZE];
    loop {
        let n = match stdout.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = chunks.blocking_send(Err(io::Error::new(e.kind(), e.to_string())));
                return Err(e);
            }
        };
        chunks
            .blocking_send(Ok(Bytes::copy_from_slice(&buf[..n])))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))?;
    }
}
