//! In-process transaction store, used by tests and local runs without PostgreSQL

use super::{InsertOutcome, StoreError, TransactionStore};
use crate::types::{
    ClassificationResult, Priority, TransactionInput, TransactionRecord, TransactionStats,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryTransactionStore {
    records: Mutex<Vec<TransactionRecord>>,
    unavailable: AtomicBool,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every operation fails until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of every stored record in insertion order
    pub fn records(&self) -> Vec<TransactionRecord> {
        self.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<TransactionRecord>>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store marked unavailable".to_string()));
        }
        self.records
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn insert(
        &self,
        tx: &TransactionInput,
        result: &ClassificationResult,
    ) -> Result<InsertOutcome, StoreError> {
        let mut records = self.lock()?;
        if records.iter().any(|r| r.tx_hash == tx.tx_hash()) {
            return Ok(InsertOutcome::Duplicate {
                tx_hash: tx.tx_hash().to_string(),
            });
        }

        let id = records.last().map(|r| r.id + 1).unwrap_or(1);
        let record = TransactionRecord::new(id, tx, result, Utc::now());
        records.push(record.clone());
        Ok(InsertOutcome::Inserted(record))
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<TransactionRecord>, StoreError> {
        let records = self.lock()?;
        Ok(records
            .iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn recent(&self, limit: i64) -> Result<Vec<TransactionRecord>, StoreError> {
        let records = self.lock()?;
        Ok(records
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<TransactionStats, StoreError> {
        let records = self.lock()?;
        if records.is_empty() {
            return Ok(TransactionStats::default());
        }

        let count = records.len() as f64;
        let count_of = |p: Priority| records.iter().filter(|r| r.priority == p).count() as i64;

        Ok(TransactionStats {
            total: records.len() as i64,
            high_priority: count_of(Priority::High),
            low_priority: count_of(Priority::Low),
            avg_risk_score: Some(records.iter().map(|r| r.risk_score).sum::<f64>() / count),
            avg_inference_time_ms: Some(
                records.iter().map(|r| r.inference_time_ms).sum::<f64>() / count,
            ),
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}
