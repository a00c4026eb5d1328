//! Risk classifiers.
//!
//! The worker only sees the [`Classifier`] trait; which implementation runs
//! is decided once at startup from [`ClassifierConfig`].

pub mod dummy;

pub use dummy::DummyClassifier;

use crate::config::{ClassifierConfig, ClassifierKind};
use crate::types::TransactionInput;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

/// Scores a transaction's risk.
///
/// `predict` is synchronous and may block for as long as inference takes;
/// callers run it on a blocking thread. Scores must lie in `[0, 1]`.
pub trait Classifier: Send + Sync {
    fn predict(&self, transaction: &TransactionInput) -> Result<f64>;
}

/// Build the classifier selected by configuration.
///
/// Fails when the trained model is selected, since none ships with this crate.
pub fn build_classifier(config: &ClassifierConfig) -> Result<Arc<dyn Classifier>> {
    match config.kind {
        ClassifierKind::Dummy => {
            info!(
                min_latency_ms = config.min_latency_ms,
                max_latency_ms = config.max_latency_ms,
                "Using dummy classifier"
            );
            Ok(Arc::new(DummyClassifier::new(
                config.min_latency(),
                config.max_latency(),
            )))
        }
        ClassifierKind::Model => anyhow::bail!("Trained risk model classifier is not implemented"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_kind_fails_fast() {
        let config = ClassifierConfig {
            kind: ClassifierKind::Model,
            ..ClassifierConfig::default()
        };
        let err = build_classifier(&config).err().unwrap();
        assert!(err.to_string().contains("not implemented"));
    }

    #[test]
    fn test_dummy_kind_builds() {
        let config = ClassifierConfig {
            kind: ClassifierKind::Dummy,
            min_latency_ms: 0,
            max_latency_ms: 1,
        };
        let classifier = build_classifier(&config).unwrap();
        let score = classifier
            .predict(&crate::types::transaction::fixtures::transaction())
            .unwrap();
        assert!((0.0..=1.0).contains(&score));
    }
}
