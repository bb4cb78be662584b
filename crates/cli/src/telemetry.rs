// Logging setup for the CLI
//
// Logs go to stderr so that `--output json` on stdout stays machine-readable.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "fanout_dispatch=warn,fanout=info";

/// Configuration for console logging
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Whether to enable console logging
    pub enable_console: bool,
    /// Log filter (e.g., "info", "fanout_dispatch=debug")
    pub log_filter: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enable_console: true,
            log_filter: None,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    pub fn from_env() -> Self {
        Self {
            enable_console: true,
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
        }
    }

    pub fn with_console(mut self, enable: bool) -> Self {
        self.enable_console = enable;
        self
    }
}

/// Keeps logging installed; hold it for the lifetime of the process
pub struct TelemetryGuard {
    _private: (),
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::debug!("Telemetry shut down");
    }
}

/// Install the global subscriber
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let filter = config
        .log_filter
        .as_ref()
        .and_then(|f| EnvFilter::try_new(f).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));

    let console_layer = config.enable_console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(filter)
    });

    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry().with(console_layer).try_init();

    TelemetryGuard { _private: () }
}
