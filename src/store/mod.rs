//! Persistence of classified transactions.
//!
//! Only HIGH-priority results are ever written. Rows are insert-only; the
//! read operations back the API listing endpoints and `tx-risk stats`.

pub mod memory;
pub mod postgres;

pub use memory::MemoryTransactionStore;
pub use postgres::PgTransactionStore;

use crate::types::{ClassificationResult, TransactionInput, TransactionRecord, TransactionStats};
use async_trait::async_trait;

/// Errors raised by a transaction store. All of them are treated as
/// transient by the worker.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// What happened to an insert
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(TransactionRecord),
    /// A row with the same `tx_hash` already exists, typically a redelivery
    /// after a crash between commit and acknowledgement.
    Duplicate { tx_hash: String },
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a transaction with its classification in its own transaction
    async fn insert(
        &self,
        tx: &TransactionInput,
        result: &ClassificationResult,
    ) -> Result<InsertOutcome, StoreError>;

    /// Page of records in insertion order
    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<TransactionRecord>, StoreError>;

    /// Most recently created records first
    async fn recent(&self, limit: i64) -> Result<Vec<TransactionRecord>, StoreError>;

    async fn stats(&self) -> Result<TransactionStats, StoreError>;

    /// Cheap reachability check
    async fn ping(&self) -> Result<(), StoreError>;
}
