//! Worker pipeline: decode, classify, decide, persist.
//!
//! [`TransactionPipeline`] is the [`MessageHandler`] the consumer runs for
//! every delivery. Its result decides how the message is settled:
//!
//! | outcome                              | disposition |
//! |--------------------------------------|-------------|
//! | persisted, duplicate or LOW priority | `Ack`       |
//! | undecodable or invalid payload       | `Reject`    |
//! | classifier failure, timeout, store   | `Requeue`   |

use crate::classifier::Classifier;
use crate::consumer::{Disposition, MessageHandler};
use crate::metrics::PipelineMetrics;
use crate::store::{InsertOutcome, StoreError, TransactionStore};
use crate::types::{ClassificationResult, Priority, TransactionInput, TransactionRecord};
use anyhow::ensure;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Score a transaction and apply the threshold policy.
///
/// Blocks for as long as the classifier does.
pub fn classify(
    classifier: &dyn Classifier,
    tx: &TransactionInput,
    risk_threshold: f64,
) -> anyhow::Result<ClassificationResult> {
    let start = Instant::now();
    let risk_score = classifier.predict(tx)?;
    let elapsed = start.elapsed();

    ensure!(
        (0.0..=1.0).contains(&risk_score),
        "classifier returned score {risk_score} outside [0, 1]"
    );

    Ok(ClassificationResult {
        risk_score,
        inference_time_ms: (elapsed.as_secs_f64() * 1000.0).round().max(1.0),
        priority: Priority::from_score(risk_score, risk_threshold),
    })
}

/// Transient processing failures; the message is redelivered
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("classification did not finish within {0:?}")]
    Timeout(Duration),

    #[error("classifier failed: {0}")]
    Classifier(anyhow::Error),

    #[error("classifier task panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What the pipeline did with a valid transaction
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Persisted(TransactionRecord),
    /// HIGH priority, but already stored by an earlier delivery
    Duplicate(ClassificationResult),
    /// LOW priority, not stored
    Dropped(ClassificationResult),
}

/// Worker pipeline; at most `max_classifications` classifier calls run at
/// once, including calls abandoned after a timeout.
pub struct TransactionPipeline {
    classifier: Arc<dyn Classifier>,
    store: Arc<dyn TransactionStore>,
    risk_threshold: f64,
    processing_timeout: Duration,
    classifier_slots: Arc<Semaphore>,
    metrics: Arc<PipelineMetrics>,
}

impl TransactionPipeline {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        store: Arc<dyn TransactionStore>,
        risk_threshold: f64,
        processing_timeout: Duration,
        max_classifications: usize,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            classifier,
            store,
            risk_threshold,
            processing_timeout,
            classifier_slots: Arc::new(Semaphore::new(max_classifications)),
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Classify on the blocking pool, then persist HIGH-priority results.
    ///
    /// A classifier slot is held by the blocking task itself, so a call that
    /// outlives the timeout still counts against the limit until it returns.
    pub async fn process(&self, tx: TransactionInput) -> Result<Outcome, PipelineError> {
        let classifier = self.classifier.clone();
        let threshold = self.risk_threshold;
        let slots = self.classifier_slots.clone();

        let classification = async move {
            let slot = slots.acquire_owned().await.map_err(|e| {
                PipelineError::Classifier(anyhow::anyhow!("classifier slots closed: {e}"))
            })?;
            tokio::task::spawn_blocking(move || {
                let result = classify(classifier.as_ref(), &tx, threshold);
                drop(slot);
                (tx, result)
            })
            .await
            .map_err(|join_error| PipelineError::Panicked(join_error.to_string()))
        };

        let (tx, result) = match tokio::time::timeout(self.processing_timeout, classification).await
        {
            Err(_) => return Err(PipelineError::Timeout(self.processing_timeout)),
            Ok(joined) => {
                let (tx, result) = joined?;
                (tx, result.map_err(PipelineError::Classifier)?)
            }
        };
        self.metrics
            .record_classification(result.inference_time_ms, result.risk_score);

        if result.priority == Priority::Low {
            return Ok(Outcome::Dropped(result));
        }

        match self.store.insert(&tx, &result).await? {
            InsertOutcome::Inserted(record) => Ok(Outcome::Persisted(record)),
            InsertOutcome::Duplicate { .. } => Ok(Outcome::Duplicate(result)),
        }
    }
}

#[async_trait]
impl MessageHandler for TransactionPipeline {
    async fn handle(&self, payload: &[u8]) -> Disposition {
        self.metrics.record_received();

        let tx: TransactionInput = match serde_json::from_slice(payload) {
            Ok(tx) => tx,
            Err(e) => {
                self.metrics.record_rejected();
                warn!(error = %e, bytes = payload.len(), disposition = "reject", "Malformed message");
                return Disposition::Reject;
            }
        };
        let tx_hash = tx.tx_hash().to_string();

        match self.process(tx).await {
            Ok(Outcome::Persisted(record)) => {
                self.metrics.record_persisted();
                info!(
                    tx_hash = %tx_hash,
                    id = record.id,
                    risk_score = record.risk_score,
                    priority = %record.priority,
                    inference_time_ms = record.inference_time_ms,
                    disposition = "ack",
                    "High-priority transaction persisted"
                );
                Disposition::Ack
            }
            Ok(Outcome::Duplicate(result)) => {
                self.metrics.record_duplicate();
                info!(
                    tx_hash = %tx_hash,
                    risk_score = result.risk_score,
                    disposition = "ack",
                    "Transaction already persisted"
                );
                Disposition::Ack
            }
            Ok(Outcome::Dropped(result)) => {
                self.metrics.record_dropped();
                debug!(
                    tx_hash = %tx_hash,
                    risk_score = result.risk_score,
                    priority = %result.priority,
                    inference_time_ms = result.inference_time_ms,
                    disposition = "ack",
                    "Low-priority transaction dropped"
                );
                Disposition::Ack
            }
            Err(e) => {
                self.metrics.record_requeued();
                error!(tx_hash = %tx_hash, error = %e, disposition = "requeue", "Processing failed");
                Disposition::Requeue
            }
        }
    }
}
