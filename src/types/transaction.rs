//! Transaction submission data structures

use crate::validation::{ValidationError, Validator, ADDRESS_HEX_DIGITS, TX_HASH_HEX_DIGITS};
use serde::{Deserialize, Serialize};

/// Transaction as submitted by a client, before any checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub value_eth: f64,
    pub gas_price_gwei: i64,
    pub input_data: String,
    /// Submission time in unix seconds
    pub timestamp: i64,
}

/// A validated blockchain transaction awaiting risk classification.
///
/// Can only be obtained through [`TransactionInput::try_from`] or by
/// deserializing JSON, which runs the same checks. Fields are read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTransaction")]
pub struct TransactionInput {
    tx_hash: String,
    from_address: String,
    to_address: String,
    value_eth: f64,
    gas_price_gwei: i64,
    input_data: String,
    timestamp: i64,
}

impl TryFrom<RawTransaction> for TransactionInput {
    type Error = ValidationError;

    fn try_from(raw: RawTransaction) -> Result<Self, Self::Error> {
        let mut v = Validator::new();
        v.prefixed_hex("tx_hash", &raw.tx_hash, TX_HASH_HEX_DIGITS);
        v.prefixed_hex("from_address", &raw.from_address, ADDRESS_HEX_DIGITS);
        v.prefixed_hex("to_address", &raw.to_address, ADDRESS_HEX_DIGITS);
        v.non_negative("value_eth", raw.value_eth);
        v.positive("gas_price_gwei", raw.gas_price_gwei);
        v.finish()?;

        Ok(Self {
            tx_hash: raw.tx_hash,
            from_address: raw.from_address,
            to_address: raw.to_address,
            value_eth: raw.value_eth,
            gas_price_gwei: raw.gas_price_gwei,
            input_data: raw.input_data,
            timestamp: raw.timestamp,
        })
    }
}

impl TransactionInput {
    pub fn tx_hash(&self) -> &str {
        &self.tx_hash
    }

    pub fn from_address(&self) -> &str {
        &self.from_address
    }

    pub fn to_address(&self) -> &str {
        &self.to_address
    }

    pub fn value_eth(&self) -> f64 {
        self.value_eth
    }

    pub fn gas_price_gwei(&self) -> i64 {
        self.gas_price_gwei
    }

    pub fn input_data(&self) -> &str {
        &self.input_data
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn raw_transaction() -> RawTransaction {
        RawTransaction {
            tx_hash: format!("0x{}", "a".repeat(64)),
            from_address: format!("0x{}", "b".repeat(40)),
            to_address: format!("0x{}", "c".repeat(40)),
            value_eth: 1.0,
            gas_price_gwei: 10,
            input_data: "0x".to_string(),
            timestamp: 1_700_000_000,
        }
    }

    pub fn transaction() -> TransactionInput {
        TransactionInput::try_from(raw_transaction()).unwrap()
    }
}
