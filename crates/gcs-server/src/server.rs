//! Listener and connection lifecycle.
//!
//! [`Server::bind`] opens the socket, [`Server::serve`] accepts until the
//! [`ShutdownHandle`] fires and then drains open connections for the grace
//! window. When the window elapses with `force_close` set, remaining
//! connections are dropped and running backend children are killed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, extract::ConnectInfo, Router};
use gcs_cgi::{ChildTracker, ConnectionInfo};
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use hyper_util::server::graceful::{GracefulShutdown, Watcher};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::config::ServerConfig;
use crate::dispatch::{create_router, AppState};
use crate::error::{Result, ServerError};
use crate::tls::build_acceptor;

/// Pause after a failed `accept`, e.g. when out of file descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Owned trigger for stopping a [`Server`].
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    /// Create an untriggered handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop accepting connections and start draining.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until shutdown is requested.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }
}

/// A bound server.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    state: AppState,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Load credentials and TLS material, then bind the listen address.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let acceptor = config.tls.as_ref().map(build_acceptor).transpose()?;
        let addr = config.addr;
        let state = AppState::new(config)?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            acceptor,
            state,
            shutdown: ShutdownHandle::new(),
        })
    }

    /// Bound address; differs from the configured one when port 0 was used.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle that stops [`serve`](Server::serve).
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Running backend children.
    pub fn tracker(&self) -> Arc<ChildTracker> {
        self.state.tracker()
    }

    /// Accept connections until shutdown, then drain.
    pub async fn serve(self) -> Result<()> {
        let Server {
            listener,
            local_addr,
            acceptor,
            state,
            shutdown,
        } = self;

        let config = Arc::clone(&state.config);
        let tracker = state.tracker();
        let router = create_router(state);
        let graceful = GracefulShutdown::new();
        let mut connections = JoinSet::new();

        tracing::info!(
            addr = %local_addr,
            tls = acceptor.is_some(),
            prefix = %config.uri_prefix,
            "Listening"
        );

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!(error = %e, "Accept failed");
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                            continue;
                        }
                    };
                    connections.spawn(handle_connection(
                        stream,
                        remote_addr,
                        local_addr,
                        acceptor.clone(),
                        router.clone(),
                        graceful.watcher(),
                    ));
                }
            }
        }

        drop(listener);
        tracing::info!(
            connections = connections.len(),
            timeout = ?config.shutdown_timeout,
            "Draining connections"
        );

        let drained = tokio::time::timeout(config.shutdown_timeout, async {
            graceful.shutdown().await;
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_ok() {
            tracing::info!("All connections closed");
            return Ok(());
        }

        let remaining = connections.len();
        if config.force_close {
            connections.abort_all();
            let killed = tracker.kill_all();
            tracing::warn!(
                connections = remaining,
                killed_children = killed,
                "Grace window elapsed; forced close"
            );
        }
        Err(ServerError::ShutdownTimeout {
            connections: remaining,
        })
    }
}

async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    router: Router,
    watcher: Watcher,
) {
    match acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls) => {
                let conn = ConnectionInfo::tls(remote_addr, local_addr);
                serve_io(tls, conn, router, watcher).await;
            }
            Err(e) => tracing::debug!(peer = %remote_addr, error = %e, "TLS handshake failed"),
        },
        None => {
            let conn = ConnectionInfo::plain(remote_addr, local_addr);
            serve_io(stream, conn, router, watcher).await;
        }
    }
}

async fn serve_io<S>(io: S, conn: ConnectionInfo, router: Router, watcher: Watcher)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(conn);
        if let Some(remote) = conn.remote_addr {
            request.extensions_mut().insert(ConnectInfo(remote));
        }
        router.clone().oneshot(request.map(Body::new))
    });

    let builder = AutoBuilder::new(TokioExecutor::new());
    let connection = builder.serve_connection(TokioIo::new(io), service);
    if let Err(e) = watcher.watch(connection).await {
        tracing::debug!(peer = ?conn.remote_addr, error = %e, "Connection error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_handle() {
        let handle = ShutdownHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_shutdown());

        handle.shutdown();
        clone.wait().await;
        assert!(clone.is_shutdown());
    }

    #[tokio::test]
    async fn test_bind_and_stop() {
        let root = tempfile::tempdir().unwrap();
        let config = ServerConfig::new(root.path(), "/bin/false")
            .with_addr("127.0.0.1:0".parse().unwrap());

        let server = Server::bind(config).await.unwrap();
        assert_ne!(server.local_addr().port(), 0);

        let handle = server.shutdown_handle();
        let task = tokio::spawn(server.serve());
        handle.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let root = tempfile::tempdir().unwrap();
        let config = ServerConfig::new(root.path(), "/bin/false")
            .with_addr(occupied.local_addr().unwrap());

        assert!(matches!(
            Server::bind(config).await,
            Err(ServerError::Bind { .. })
        ));
    }
}
