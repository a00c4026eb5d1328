//! Structured logging setup.
//!
//! `RUST_LOG` takes precedence over the configured level. Output goes to
//! stderr so stdout stays free for command output such as `tx-risk stats`.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable output for local development.
    Pretty,
    /// JSON lines for log aggregation.
    Json,
}

impl LogFormat {
    /// Accepts "json" or "pretty" (case-insensitive); anything else is `Pretty`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Build the default filter directive for a configured level.
///
/// Keeps dependency chatter (sqlx statements, NATS internals) at `warn`
/// unless `RUST_LOG` says otherwise.
pub fn default_directive(level: &str) -> String {
    format!("tx_risk_pipeline={level},tx_risk={level},tower_http={level},sqlx=warn,async_nats=warn,warn")
}

/// Initialize the global tracing subscriber. Call once, early in `main()`.
pub fn init_logging(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.level)));
    let format = LogFormat::from_str_lossy(&config.format);

    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(true);

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr.with_line_number(true))
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr.json())
                .init();
        }
    }

    tracing::debug!(?format, "logging initialized");
}
