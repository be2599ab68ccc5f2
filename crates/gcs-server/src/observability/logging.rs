//! Logging setup for the server binary: compact text or flat JSON on stderr,
//! filtered by `--log-level` unless `RUST_LOG` is set.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable pretty format.
    Pretty,
    /// JSON format for log aggregation.
    Json,
}

impl LogFormat {
    /// Parse log format from string. Anything but `json` is pretty.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Default filter for a level: our crates at `level`, HTTP tracing at info.
pub(crate) fn default_filter(level: &str) -> String {
    ["gcs_server", "gcs_cgi", "gcs_auth", "git_cgi_server"]
        .iter()
        .map(|target| format!("{target}={level}"))
        .chain(std::iter::once("tower_http=info".to_string()))
        .collect::<Vec<_>>()
        .join(",")
}

/// `RUST_LOG` when set and valid, otherwise [`default_filter`].
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(level)))
}

/// Install the global subscriber, writing to stderr.
///
/// JSON events are flattened and carry only the innermost span, which holds
/// the request ID.
///
/// ```rust,no_run
/// use gcs_server::observability::{init_logging, LogFormat};
///
/// init_logging("info", LogFormat::Json);
/// ```
pub fn init_logging(level: &str, format: LogFormat) {
    let registry = tracing_subscriber::registry().with(env_filter(level));
    let layer = fmt::layer().with_writer(std::io::stderr);

    match format {
        LogFormat::Json => registry
            .with(layer.json().flatten_event(true).with_span_list(false))
            .init(),
        LogFormat::Pretty => registry.with(layer.compact()).init(),
    }

    tracing::debug!(level, ?format, "Logging initialized");
}
