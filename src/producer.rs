//! Durable publisher for submitted transactions

use crate::broker;
use crate::config::NatsConfig;
use crate::types::TransactionInput;
use async_nats::jetstream::{self, Context};
use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use std::ops::Deref;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

/// Why a transaction could not be queued
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to encode transaction: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("no publisher available after waiting {0:?}")]
    PoolExhausted(Duration),

    #[error("transaction is {size} bytes, the broker accepts at most {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("broker did not accept the message: {0}")]
    Broker(#[from] jetstream::context::PublishError),
}

/// Queues transactions for classification.
///
/// The API depends on this trait rather than on NATS directly.
#[async_trait]
pub trait TransactionPublisher: Send + Sync {
    /// Returns once the broker has durably stored the message
    async fn publish(&self, tx: &TransactionInput) -> Result<(), PublishError>;

    /// Whether the target queue exists and the broker answers
    async fn check(&self) -> anyhow::Result<()>;
}

/// Bounded pool of JetStream contexts sharing one connection.
///
/// Each publish holds a context until the broker acknowledges the message,
/// so the pool size caps in-flight publishes. Callers wait for a free slot
/// up to `acquire_timeout`.
pub struct ContextPool {
    client: Client,
    idle: Mutex<Vec<Context>>,
    slots: Semaphore,
    acquire_timeout: Duration,
}

/// A context checked out of the pool; returned on drop
pub struct PooledContext<'a> {
    context: Context,
    pool: &'a ContextPool,
    _permit: SemaphorePermit<'a>,
}

impl ContextPool {
    pub fn new(client: Client, max_size: usize, acquire_timeout: Duration) -> Self {
        Self {
            client,
            idle: Mutex::new(Vec::with_capacity(max_size)),
            slots: Semaphore::new(max_size),
            acquire_timeout,
        }
    }

    pub async fn acquire(&self) -> Result<PooledContext<'_>, PublishError> {
        let permit = tokio::time::timeout(self.acquire_timeout, self.slots.acquire())
            .await
            .ok()
            .and_then(|permit| permit.ok())
            .ok_or(PublishError::PoolExhausted(self.acquire_timeout))?;

        let reused = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        let context = reused.unwrap_or_else(|| broker::jetstream(self.client.clone()));

        Ok(PooledContext {
            context,
            pool: self,
            _permit: permit,
        })
    }

    /// Contexts created so far and currently idle
    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    /// Slots not currently checked out
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

impl Deref for PooledContext<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.context
    }
}

impl Drop for PooledContext<'_> {
    fn drop(&mut self) {
        if let Ok(mut idle) = self.pool.idle.lock() {
            idle.push(self.context.clone());
        }
    }
}

/// Fails when a payload exceeds the broker's limit; `max == 0` means the
/// limit is not known yet.
pub fn check_payload_size(size: usize, max: usize) -> Result<(), PublishError> {
    if max > 0 && size > max {
        return Err(PublishError::PayloadTooLarge { size, max });
    }
    Ok(())
}

/// Publishes transactions to the durable JetStream stream
pub struct TransactionProducer {
    pool: ContextPool,
    config: NatsConfig,
}

impl TransactionProducer {
    pub fn new(client: Client, config: &NatsConfig) -> Self {
        Self {
            pool: ContextPool::new(
                client,
                config.max_publishers,
                Duration::from_millis(config.publish_acquire_timeout_ms),
            ),
            config: config.clone(),
        }
    }

    /// Declare the target stream (idempotent)
    pub async fn declare(&self) -> anyhow::Result<()> {
        let js = self.pool.acquire().await?;
        broker::declare_stream(&js, &self.config).await?;
        Ok(())
    }

    /// Get the subject name
    pub fn subject(&self) -> &str {
        &self.config.subject
    }
}

#[async_trait]
impl TransactionPublisher for TransactionProducer {
    async fn publish(&self, tx: &TransactionInput) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(tx)?;
        check_payload_size(payload.len(), self.pool.client.server_info().max_payload)?;
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", "application/json");

        let js = self.pool.acquire().await?;
        let ack = js
            .publish_with_headers(self.config.subject.clone(), headers, payload.into())
            .await?
            .await?;

        debug!(
            tx_hash = %tx.tx_hash(),
            stream = %ack.stream,
            sequence = ack.sequence,
            "Transaction queued"
        );
        Ok(())
    }

    /// Runs outside the publish pool so a saturated pool does not read as
    /// a broker outage.
    async fn check(&self) -> anyhow::Result<()> {
        let js = broker::jetstream(self.pool.client.clone());
        broker::check_stream(&js, &self.config).await
    }
}
