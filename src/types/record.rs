//! Persisted classification records and aggregate statistics

use super::{ClassificationResult, Priority, TransactionInput};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A HIGH-priority transaction as stored, with its classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: i64,
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub value_eth: f64,
    pub gas_price_gwei: i64,
    pub input_data: String,
    /// Submission timestamp carried by the transaction
    pub tx_timestamp: i64,
    pub risk_score: f64,
    pub priority: Priority,
    pub inference_time_ms: f64,
    /// Server-assigned insertion time
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Combine a transaction and its classification into a record
    pub fn new(
        id: i64,
        tx: &TransactionInput,
        result: &ClassificationResult,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tx_hash: tx.tx_hash().to_string(),
            from_address: tx.from_address().to_string(),
            to_address: tx.to_address().to_string(),
            value_eth: tx.value_eth(),
            gas_price_gwei: tx.gas_price_gwei(),
            input_data: tx.input_data().to_string(),
            tx_timestamp: tx.timestamp(),
            risk_score: result.risk_score,
            priority: result.priority,
            inference_time_ms: result.inference_time_ms,
            created_at,
        }
    }
}

/// Aggregate view over the stored transactions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionStats {
    pub total: i64,
    pub high_priority: i64,
    pub low_priority: i64,
    pub avg_risk_score: Option<f64>,
    pub avg_inference_time_ms: Option<f64>,
}
