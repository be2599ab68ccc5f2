//! git-cgi-server - serve Git repositories over smart HTTP.
//!
//! Runs `git-http-backend` as a CGI program for each request.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use gcs_server::config::{DEFAULT_ADDR, DEFAULT_REALM};
use gcs_server::observability::{init_logging, LogFormat};
use gcs_server::pidfile::PidFile;
use gcs_server::{Server, ServerConfig, ServerError, Settings};
use tokio::signal;

/// How long blocked workers may hold up process exit.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Git smart-HTTP server backed by git-http-backend
#[derive(Parser, Debug)]
#[command(name = "git-cgi-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory containing the repositories (default: current directory)
    #[arg(value_name = "REPOS_DIR")]
    repos_dir: Option<PathBuf>,

    /// Export all repositories
    #[arg(long)]
    export_all: bool,

    /// Path to the CGI (git-http-backend)
    #[arg(long, value_name = "PATH")]
    backend_cgi: Option<PathBuf>,

    /// Path to the basic auth file (htpasswd)
    #[arg(long, value_name = "PATH")]
    basic_auth_file: Option<PathBuf>,

    /// Path to the digest auth file (htdigest)
    #[arg(long, value_name = "PATH")]
    digest_auth_file: Option<PathBuf>,

    /// Realm name for the auth
    #[arg(long, default_value = DEFAULT_REALM)]
    auth_realm: String,

    /// URI prefix
    #[arg(long, default_value = "/")]
    uri_prefix: String,

    /// Server address
    #[arg(long, default_value = DEFAULT_ADDR)]
    addr: String,

    /// TLS certificate (PEM)
    #[arg(long, value_name = "PATH")]
    cert_file: Option<PathBuf>,

    /// TLS certificate key (PEM)
    #[arg(long, value_name = "PATH")]
    key_file: Option<PathBuf>,

    /// PID file
    #[arg(long, value_name = "PATH")]
    pid: Option<PathBuf>,

    /// Answer `go get` module discovery requests
    #[arg(long)]
    go_modules: bool,

    /// Graceful shutdown window in seconds
    #[arg(long, default_value_t = 5, value_name = "SECS")]
    shutdown_timeout: u64,

    /// Close remaining connections and kill backends when the window elapses
    #[arg(long)]
    force_close: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (pretty, json)
    #[arg(long, default_value = "pretty")]
    log_format: String,
}

impl Args {
    fn settings(&self) -> Settings {
        Settings {
            project_root: self.repos_dir.clone(),
            export_all: self.export_all,
            backend_cgi: self.backend_cgi.clone(),
            basic_auth_file: self.basic_auth_file.clone(),
            digest_auth_file: self.digest_auth_file.clone(),
            auth_realm: self.auth_realm.clone(),
            uri_prefix: self.uri_prefix.clone(),
            addr: self.addr.clone(),
            cert_file: self.cert_file.clone(),
            key_file: self.key_file.clone(),
            go_modules: self.go_modules,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout),
            force_close: self.force_close,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(&args.log_level, LogFormat::parse(&args.log_format));

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Fatal error");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = ServerConfig::resolve(args.settings()).context("invalid configuration")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        project_root = %config.project_root.display(),
        backend = %config.backend_cgi.display(),
        export_all = config.export_all,
        go_modules = config.go_modules,
        "Server configuration"
    );

    let _pid_file = args
        .pid
        .as_ref()
        .map(PidFile::create)
        .transpose()
        .context("failed to write PID file")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let result = runtime.block_on(serve(config));

    // Backend threads blocked on a stalled child must not keep the process alive.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let addr = config.addr;
    let server = Server::bind(config)
        .await
        .with_context(|| format!("failed to start server on {addr}"))?;

    let handle = server.shutdown_handle();
    tokio::spawn(async move {
        let signal = shutdown_signal().await;
        tracing::info!(signal, "Shutting down HTTP server");
        handle.shutdown();
    });

    tracing::info!(
        addr = %server.local_addr(),
        pid = std::process::id(),
        "Starting HTTP server"
    );

    match server.serve().await {
        Ok(()) => {}
        Err(e @ ServerError::ShutdownTimeout { .. }) => {
            tracing::warn!(error = %e, "HTTP server shutdown error");
        }
        Err(e) => return Err(e).context("HTTP server error"),
    }

    tracing::info!("HTTP server stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM. Returns the signal name.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
