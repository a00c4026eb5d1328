//! Configuration management for the transaction risk pipeline

use anyhow::{ensure, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Prefix of the environment variables that override configuration values,
/// e.g. `TXRISK_DATABASE__HOST` or `TXRISK_DETECTION__RISK_THRESHOLD`.
pub const ENV_PREFIX: &str = "TXRISK";

/// Which classifier implementation the worker runs
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    /// Random score after a random delay
    #[default]
    Dummy,
    /// Trained risk model
    Model,
}

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub nats: NatsConfig,
    pub classifier: ClassifierConfig,
    pub detection: DetectionConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Socket address the API listens on
    pub bind_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
        }
    }
}

/// PostgreSQL connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    /// Upper bound on pooled connections
    pub max_connections: u32,
    /// Seconds to wait for a free connection
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            name: "transactions".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 5,
        }
    }
}

/// NATS JetStream configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Durable stream holding submitted transactions
    pub stream: String,
    /// Subject transactions are published on
    pub subject: String,
    /// Durable consumer name used by the worker
    pub consumer: String,
    /// Maximum number of pooled publish contexts
    pub max_publishers: usize,
    /// How long a publish may wait for a free pooled context
    pub publish_acquire_timeout_ms: u64,
    /// Maximum unacknowledged messages held by the worker
    pub prefetch: usize,
    /// Seconds before an unacknowledged message is redelivered
    pub ack_wait_secs: u64,
    /// Cap on delivery attempts per message, unlimited when unset
    pub max_deliver: Option<i64>,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream: "TRANSACTIONS".to_string(),
            subject: "transaction".to_string(),
            consumer: "transaction-worker".to_string(),
            max_publishers: 16,
            publish_acquire_timeout_ms: 2_000,
            prefetch: 32,
            ack_wait_secs: 30,
            max_deliver: None,
        }
    }
}

/// Classifier selection and simulated latency bounds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub kind: ClassifierKind,
    /// Lower bound of the simulated inference time, milliseconds
    pub min_latency_ms: u64,
    /// Upper bound of the simulated inference time, milliseconds
    pub max_latency_ms: u64,
}

impl ClassifierConfig {
    pub fn min_latency(&self) -> Duration {
        Duration::from_millis(self.min_latency_ms)
    }

    pub fn max_latency(&self) -> Duration {
        Duration::from_millis(self.max_latency_ms)
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            kind: ClassifierKind::Dummy,
            min_latency_ms: 50,
            max_latency_ms: 300,
        }
    }
}

/// Detection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Scores strictly above this are HIGH priority and persisted
    pub risk_threshold: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            risk_threshold: 0.8,
        }
    }
}

/// Worker pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on classifying one message, milliseconds
    pub processing_timeout_ms: u64,
    /// Delay before a requeued message is redelivered, milliseconds
    pub requeue_delay_ms: u64,
    /// Interval between metrics summaries, seconds
    pub report_interval_secs: u64,
}

impl PipelineConfig {
    pub fn processing_timeout(&self) -> Duration {
        Duration::from_millis(self.processing_timeout_ms)
    }

    pub fn requeue_delay(&self) -> Duration {
        Duration::from_millis(self.requeue_delay_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            processing_timeout_ms: 10_000,
            requeue_delay_ms: 1_000,
            report_interval_secs: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `config/config.toml` (if present) and the environment
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific optional file, then the environment
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (0.0..=1.0).contains(&self.detection.risk_threshold),
            "detection.risk_threshold must be within [0, 1], got {}",
            self.detection.risk_threshold
        );
        ensure!(
            self.classifier.min_latency_ms <= self.classifier.max_latency_ms,
            "classifier.min_latency_ms ({}) exceeds classifier.max_latency_ms ({})",
            self.classifier.min_latency_ms,
            self.classifier.max_latency_ms
        );
        ensure!(self.nats.max_publishers > 0, "nats.max_publishers must be > 0");
        ensure!(self.nats.prefetch > 0, "nats.prefetch must be > 0");
        ensure!(
            self.database.max_connections > 0,
            "database.max_connections must be > 0"
        );
        ensure!(
            self.pipeline.processing_timeout_ms > 0,
            "pipeline.processing_timeout_ms must be > 0"
        );
        ensure!(
            self.pipeline.report_interval_secs > 0,
            "pipeline.report_interval_secs must be > 0"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.nats.prefetch, 32);
        assert_eq!(config.detection.risk_threshold, 0.8);
        assert_eq!(config.classifier.kind, ClassifierKind::Dummy);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_latency_bounds_are_milliseconds() {
        let config = ClassifierConfig {
            kind: ClassifierKind::Dummy,
            min_latency_ms: 20,
            max_latency_ms: 1_500,
        };
        assert_eq!(config.min_latency(), Duration::from_millis(20));
        assert_eq!(config.max_latency(), Duration::from_millis(1_500));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.detection.risk_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.classifier.min_latency_ms = 500;
        config.classifier.max_latency_ms = 100;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.nats.max_publishers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("txrisk-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(
            &path,
            r#"
[detection]
risk_threshold = 0.65

[classifier]
kind = "dummy"
min_latency_ms = 5
max_latency_ms = 10

[nats]
prefetch = 8
"#,
        )
        .unwrap();

        let config = AppConfig::load_from_path(&path).unwrap();
        assert_eq!(config.detection.risk_threshold, 0.65);
        assert_eq!(config.classifier.max_latency_ms, 10);
        assert_eq!(config.nats.prefetch, 8);
        // untouched sections keep their defaults
        assert_eq!(config.database.port, 5432);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from_path("does/not/exist.toml").unwrap();
        assert_eq!(config.api.bind_addr, "0.0.0.0:8000");
    }
}
