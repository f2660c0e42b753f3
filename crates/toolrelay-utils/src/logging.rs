//! Logging and tracing utilities

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the log layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One JSON object per line, for log shippers
    Json,
}

/// Initialize tracing subscriber with default configuration
///
/// `RUST_LOG` overrides the default `info` level.
pub fn init_tracing() {
    init_tracing_with(LogFormat::Pretty, "info");
}

/// Initialize tracing with an explicit format and default filter
///
/// Logs go to stderr so command output on stdout stays clean. Returns
/// `false` if a global subscriber was already installed.
pub fn init_tracing_with(format: LogFormat, default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    installed.is_ok()
}
