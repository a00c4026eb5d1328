//! JetStream consumer for queued transactions.
//!
//! Messages are never acknowledged automatically: every delivery is handed
//! to a [`MessageHandler`] whose [`Disposition`] decides whether the message
//! is removed, terminated, or redelivered.

use crate::broker;
use crate::config::NatsConfig;
use anyhow::{anyhow, Result};
use async_nats::jetstream::consumer::{pull, AckPolicy, PullConsumer};
use async_nats::jetstream::{self, AckKind, Context};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::convert::Infallible;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// How a delivered message is settled with the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed; remove from the queue
    Ack,
    /// Permanently unprocessable; remove without redelivery
    Reject,
    /// Transient failure; redeliver later
    Requeue,
}

/// Processes one message payload
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, payload: &[u8]) -> Disposition;
}

/// A message delivered by the broker that must be settled exactly once
#[async_trait]
pub trait Delivery: Send + Sync + 'static {
    fn payload(&self) -> &[u8];

    async fn settle(&self, disposition: Disposition, requeue_delay: Duration) -> Result<()>;
}

#[async_trait]
impl Delivery for jetstream::Message {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    async fn settle(&self, disposition: Disposition, requeue_delay: Duration) -> Result<()> {
        let kind = match disposition {
            Disposition::Ack => AckKind::Ack,
            Disposition::Reject => AckKind::Term,
            Disposition::Requeue => AckKind::Nak(Some(requeue_delay)),
        };
        self.ack_with(kind)
            .await
            .map_err(|e| anyhow!("failed to settle message: {e}"))
    }
}

/// Hand each delivery to `handler` on its own task, holding one of
/// `permits` until the delivery is settled.
///
/// Returns when the delivery stream ends or yields an error.
pub async fn dispatch<S, D, E, H>(
    deliveries: S,
    handler: Arc<H>,
    permits: Arc<Semaphore>,
    requeue_delay: Duration,
) -> Result<()>
where
    S: Stream<Item = std::result::Result<D, E>>,
    D: Delivery,
    E: Display,
    H: MessageHandler,
{
    let mut deliveries = std::pin::pin!(deliveries);

    while let Some(next) = deliveries.next().await {
        let delivery = match next {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!(error = %e, "Delivery stream failed");
                return Ok(());
            }
        };

        let permit = permits.clone().acquire_owned().await?;
        let handler = handler.clone();

        tokio::spawn(async move {
            let disposition = handler.handle(delivery.payload()).await;
            if let Err(e) = delivery.settle(disposition, requeue_delay).await {
                // broker redelivers once the ack wait expires
                error!(error = %e, ?disposition, "Failed to settle message");
            }
            drop(permit);
        });
    }

    debug!("Delivery stream ended");
    Ok(())
}

/// Durable pull consumer settings; `max_ack_pending` is the prefetch limit
pub fn pull_config(config: &NatsConfig) -> pull::Config {
    pull::Config {
        durable_name: Some(config.consumer.clone()),
        filter_subject: config.subject.clone(),
        ack_policy: AckPolicy::Explicit,
        ack_wait: Duration::from_secs(config.ack_wait_secs),
        max_ack_pending: config.prefetch as i64,
        max_deliver: config.max_deliver.unwrap_or(-1),
        ..Default::default()
    }
}

/// Consumer for receiving transactions from JetStream
pub struct TransactionConsumer {
    js: Context,
    config: NatsConfig,
    requeue_delay: Duration,
    permits: Arc<Semaphore>,
}

impl TransactionConsumer {
    /// Create a new transaction consumer
    pub fn new(js: Context, config: &NatsConfig, requeue_delay: Duration) -> Self {
        Self {
            js,
            config: config.clone(),
            requeue_delay,
            permits: Arc::new(Semaphore::new(config.prefetch)),
        }
    }

    async fn subscribe(&self) -> Result<pull::Stream> {
        let stream = broker::declare_stream(&self.js, &self.config).await?;
        let consumer: PullConsumer = stream
            .get_or_create_consumer(&self.config.consumer, pull_config(&self.config))
            .await
            .map_err(|e| anyhow!("failed to create consumer {}: {e}", self.config.consumer))?;
        let messages = consumer
            .messages()
            .await
            .map_err(|e| anyhow!("failed to open message stream: {e}"))?;
        Ok(messages)
    }

    /// Consume forever, resubscribing with backoff whenever the message
    /// stream breaks. Unacknowledged messages are redelivered by the broker.
    pub async fn consume<H: MessageHandler>(&self, handler: Arc<H>) -> Result<Infallible> {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            match self.subscribe().await {
                Ok(messages) => {
                    backoff = INITIAL_BACKOFF;
                    info!(
                        stream = %self.config.stream,
                        consumer = %self.config.consumer,
                        prefetch = self.config.prefetch,
                        "Subscribed to transaction stream"
                    );
                    dispatch(
                        messages,
                        handler.clone(),
                        self.permits.clone(),
                        self.requeue_delay,
                    )
                    .await?;
                    warn!("Message stream interrupted, resubscribing");
                }
                Err(e) => {
                    warn!(error = %e, retry_in_ms = backoff.as_millis() as u64, "Subscription failed");
                }
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Wait for in-flight messages to be settled, up to `timeout`.
    /// Returns false if some were still running.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let all = self.config.prefetch as u32;
        matches!(
            tokio::time::timeout(timeout, self.permits.acquire_many(all)).await,
            Ok(Ok(_))
        )
    }

    /// Get the subject name
    pub fn subject(&self) -> &str {
        &self.config.subject
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Delivery that records how it was settled
    struct FakeDelivery {
        payload: Vec<u8>,
        settled: Arc<Mutex<Vec<(Vec<u8>, Disposition)>>>,
    }

    #[async_trait]
    impl Delivery for FakeDelivery {
        fn payload(&self) -> &[u8] {
            &self.payload
        }

        async fn settle(&self, disposition: Disposition, _: Duration) -> Result<()> {
            self.settled
                .lock()
                .unwrap()
                .push((self.payload.clone(), disposition));
            Ok(())
        }
    }

    /// Handler that tracks peak concurrency and answers by payload
    #[derive(Default)]
    struct SlowHandler {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for SlowHandler {
        async fn handle(&self, payload: &[u8]) -> Disposition {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            match payload {
                b"bad" => Disposition::Reject,
                b"retry" => Disposition::Requeue,
                _ => Disposition::Ack,
            }
        }
    }

    fn deliveries(
        payloads: &[&[u8]],
        settled: &Arc<Mutex<Vec<(Vec<u8>, Disposition)>>>,
    ) -> impl Stream<Item = std::result::Result<FakeDelivery, String>> {
        let items: Vec<_> = payloads
            .iter()
            .map(|p| {
                Ok(FakeDelivery {
                    payload: p.to_vec(),
                    settled: settled.clone(),
                })
            })
            .collect();
        futures::stream::iter(items)
    }

    #[tokio::test]
    async fn test_dispatch_respects_prefetch() {
        let settled = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(SlowHandler::default());
        let permits = Arc::new(Semaphore::new(3));
        let payloads: Vec<&[u8]> = vec![&b"ok"[..]; 20];

        dispatch(
            deliveries(&payloads, &settled),
            handler.clone(),
            permits.clone(),
            Duration::ZERO,
        )
        .await
        .unwrap();
        let _all = permits.acquire_many(3).await.unwrap();

        assert_eq!(settled.lock().unwrap().len(), 20);
        assert!(handler.peak.load(Ordering::SeqCst) <= 3);
        assert!(handler.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_dispatch_settles_with_handler_disposition() {
        let settled = Arc::new(Mutex::new(Vec::new()));
        let permits = Arc::new(Semaphore::new(4));

        dispatch(
            deliveries(&[&b"ok"[..], &b"bad"[..], &b"retry"[..]], &settled),
            Arc::new(SlowHandler::default()),
            permits.clone(),
            Duration::ZERO,
        )
        .await
        .unwrap();
        let _all = permits.acquire_many(4).await.unwrap();

        let settled = settled.lock().unwrap();
        let disposition_of = |p: &[u8]| {
            settled
                .iter()
                .find(|(payload, _)| payload.as_slice() == p)
                .map(|(_, d)| *d)
        };
        assert_eq!(disposition_of(&b"ok"[..]), Some(Disposition::Ack));
        assert_eq!(disposition_of(&b"bad"[..]), Some(Disposition::Reject));
        assert_eq!(disposition_of(&b"retry"[..]), Some(Disposition::Requeue));
    }

    #[tokio::test]
    async fn test_dispatch_stops_on_stream_error() {
        let settled = Arc::new(Mutex::new(Vec::new()));
        let items: Vec<std::result::Result<FakeDelivery, String>> = vec![
            Ok(FakeDelivery {
                payload: b"ok".to_vec(),
                settled: settled.clone(),
            }),
            Err("connection reset".to_string()),
            Ok(FakeDelivery {
                payload: b"after".to_vec(),
                settled: settled.clone(),
            }),
        ];
        let permits = Arc::new(Semaphore::new(2));

        dispatch(
            futures::stream::iter(items),
            Arc::new(SlowHandler::default()),
            permits.clone(),
            Duration::ZERO,
        )
        .await
        .unwrap();
        let _all = permits.acquire_many(2).await.unwrap();

        let settled = settled.lock().unwrap();
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].0, b"ok".to_vec());
    }

    #[test]
    fn test_pull_config_uses_prefetch_as_ack_pending() {
        let config = NatsConfig {
            prefetch: 7,
            max_deliver: Some(5),
            ..NatsConfig::default()
        };
        let pull = pull_config(&config);
        assert_eq!(pull.durable_name.as_deref(), Some("transaction-worker"));
        assert_eq!(pull.ack_policy, AckPolicy::Explicit);
        assert_eq!(pull.max_ack_pending, 7);
        assert_eq!(pull.max_deliver, 5);

        let unlimited = pull_config(&NatsConfig::default());
        assert_eq!(unlimited.max_deliver, -1);
    }
}
