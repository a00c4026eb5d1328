//! End-to-end worker behaviour: consumer dispatch driving the classification
//! pipeline over the in-memory store.

use async_trait::async_trait;
use futures::stream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tx_risk_pipeline::classifier::Classifier;
use tx_risk_pipeline::consumer::{dispatch, Delivery, Disposition};
use tx_risk_pipeline::metrics::PipelineMetrics;
use tx_risk_pipeline::store::MemoryTransactionStore;
use tx_risk_pipeline::{Priority, RawTransaction, TransactionInput, TransactionPipeline};

const THRESHOLD: f64 = 0.8;
const PREFETCH: usize = 8;

type Settled = Arc<Mutex<Vec<(Vec<u8>, Disposition)>>>;

struct RecordingDelivery {
    payload: Vec<u8>,
    settled: Settled,
}

#[async_trait]
impl Delivery for RecordingDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn settle(&self, disposition: Disposition, _: Duration) -> anyhow::Result<()> {
        self.settled
            .lock()
            .unwrap()
            .push((self.payload.clone(), disposition));
        Ok(())
    }
}

/// Scores by transferred value: 100 ETH or more is maximal risk
struct ValueClassifier;

impl Classifier for ValueClassifier {
    fn predict(&self, tx: &TransactionInput) -> anyhow::Result<f64> {
        std::thread::sleep(Duration::from_millis(5));
        Ok((tx.value_eth() / 100.0).min(1.0))
    }
}

fn raw(n: usize, value_eth: f64) -> RawTransaction {
    RawTransaction {
        tx_hash: format!("0x{:064x}", n),
        from_address: format!("0x{}", "1".repeat(40)),
        to_address: format!("0x{}", "2".repeat(40)),
        value_eth,
        gas_price_gwei: 25,
        input_data: "0x".to_string(),
        timestamp: 1_700_000_000 + n as i64,
    }
}

fn pipeline(store: &Arc<MemoryTransactionStore>) -> Arc<TransactionPipeline> {
    Arc::new(TransactionPipeline::new(
        Arc::new(ValueClassifier),
        store.clone(),
        THRESHOLD,
        Duration::from_secs(5),
        PREFETCH,
        Arc::new(PipelineMetrics::new()),
    ))
}

async fn run(
    pipeline: &Arc<TransactionPipeline>,
    payloads: Vec<Vec<u8>>,
) -> Vec<(Vec<u8>, Disposition)> {
    let settled: Settled = Arc::new(Mutex::new(Vec::new()));
    let deliveries: Vec<Result<RecordingDelivery, String>> = payloads
        .into_iter()
        .map(|payload| {
            Ok(RecordingDelivery {
                payload,
                settled: settled.clone(),
            })
        })
        .collect();

    let permits = Arc::new(Semaphore::new(PREFETCH));
    dispatch(
        stream::iter(deliveries),
        pipeline.clone(),
        permits.clone(),
        Duration::ZERO,
    )
    .await
    .unwrap();
    let _all = permits.acquire_many(PREFETCH as u32).await.unwrap();

    let settled = settled.lock().unwrap().clone();
    settled
}

#[tokio::test]
async fn concurrent_messages_are_all_acked_and_split_by_priority() {
    let store = Arc::new(MemoryTransactionStore::new());
    let pipeline = pipeline(&store);

    // every third transaction moves 90 ETH, the rest 10 ETH
    let txs: Vec<RawTransaction> = (0..30)
        .map(|n| raw(n, if n % 3 == 0 { 90.0 } else { 10.0 }))
        .collect();
    let payloads = txs.iter().map(|tx| serde_json::to_vec(tx).unwrap()).collect();

    let settled = run(&pipeline, payloads).await;

    assert_eq!(settled.len(), 30);
    assert!(settled.iter().all(|(_, d)| *d == Disposition::Ack));

    let records = store.records();
    assert_eq!(records.len(), 10);
    assert!(records.iter().all(|r| r.priority == Priority::High));
    assert!(records.iter().all(|r| (r.risk_score - 0.9).abs() < 1e-9));
    assert!(records.iter().all(|r| r.inference_time_ms >= 1.0));

    let metrics = pipeline.metrics();
    assert_eq!(metrics.received.load(Ordering::Relaxed), 30);
    assert_eq!(metrics.persisted.load(Ordering::Relaxed), 10);
    assert_eq!(metrics.dropped.load(Ordering::Relaxed), 20);
}

#[tokio::test]
async fn score_equal_to_threshold_is_not_persisted() {
    let store = Arc::new(MemoryTransactionStore::new());
    let pipeline = pipeline(&store);

    let at_threshold = serde_json::to_vec(&raw(1, THRESHOLD * 100.0)).unwrap();
    let just_above = serde_json::to_vec(&raw(2, 81.0)).unwrap();

    let settled = run(&pipeline, vec![at_threshold, just_above]).await;

    assert!(settled.iter().all(|(_, d)| *d == Disposition::Ack));
    let records = store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].tx_hash, format!("0x{:064x}", 2));
    assert!((records[0].risk_score - 0.81).abs() < 1e-9);
}

#[tokio::test]
async fn bad_messages_do_not_stop_the_worker() {
    let store = Arc::new(MemoryTransactionStore::new());
    let pipeline = pipeline(&store);

    let mut invalid = raw(3, 95.0);
    invalid.gas_price_gwei = 0;

    let payloads = vec![
        b"{\"tx_hash\":".to_vec(),
        serde_json::to_vec(&invalid).unwrap(),
        serde_json::to_vec(&raw(4, 95.0)).unwrap(),
    ];
    let settled = run(&pipeline, payloads).await;

    let rejected = settled
        .iter()
        .filter(|(_, d)| *d == Disposition::Reject)
        .count();
    let acked = settled
        .iter()
        .filter(|(_, d)| *d == Disposition::Ack)
        .count();
    assert_eq!(rejected, 2);
    assert_eq!(acked, 1);
    assert_eq!(store.records().len(), 1);
}

#[tokio::test]
async fn store_outage_requeues_only_high_priority() {
    let store = Arc::new(MemoryTransactionStore::new());
    store.set_unavailable(true);
    let pipeline = pipeline(&store);

    let high = serde_json::to_vec(&raw(5, 99.0)).unwrap();
    let low = serde_json::to_vec(&raw(6, 1.0)).unwrap();
    let settled = run(&pipeline, vec![high.clone(), low.clone()]).await;

    let disposition_of = |payload: &Vec<u8>| {
        settled
            .iter()
            .find(|(p, _)| p == payload)
            .map(|(_, d)| *d)
    };
    assert_eq!(disposition_of(&high), Some(Disposition::Requeue));
    assert_eq!(disposition_of(&low), Some(Disposition::Ack));

    // the redelivery succeeds once the store is back
    store.set_unavailable(false);
    let settled = run(&pipeline, vec![high]).await;
    assert_eq!(settled[0].1, Disposition::Ack);
    assert_eq!(store.records().len(), 1);
}

/// Sleeps far past the processing timeout and tracks overlapping calls
#[derive(Default)]
struct StuckClassifier {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Classifier for StuckClassifier {
    fn predict(&self, _: &TransactionInput) -> anyhow::Result<f64> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(150));
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(0.5)
    }
}

#[tokio::test]
async fn timed_out_classifications_still_count_against_prefetch() {
    const LIMIT: usize = 2;
    let classifier = Arc::new(StuckClassifier::default());
    let pipeline = Arc::new(TransactionPipeline::new(
        classifier.clone(),
        Arc::new(MemoryTransactionStore::new()),
        THRESHOLD,
        Duration::from_millis(10),
        LIMIT,
        Arc::new(PipelineMetrics::new()),
    ));

    let settled: Settled = Arc::new(Mutex::new(Vec::new()));
    let deliveries: Vec<Result<RecordingDelivery, String>> = (0..10)
        .map(|n| {
            Ok(RecordingDelivery {
                payload: serde_json::to_vec(&raw(100 + n, 50.0)).unwrap(),
                settled: settled.clone(),
            })
        })
        .collect();

    let permits = Arc::new(Semaphore::new(LIMIT));
    dispatch(
        stream::iter(deliveries),
        pipeline.clone(),
        permits.clone(),
        Duration::ZERO,
    )
    .await
    .unwrap();
    let _all = permits.acquire_many(LIMIT as u32).await.unwrap();

    // let abandoned calls finish before reading the peak
    while classifier.active.load(Ordering::SeqCst) > 0 {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let settled = settled.lock().unwrap();
    assert_eq!(settled.len(), 10);
    assert!(settled.iter().all(|(_, d)| *d == Disposition::Requeue));
    assert!(classifier.peak.load(Ordering::SeqCst) <= LIMIT);
}
