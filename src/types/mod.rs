//! Type definitions for the transaction risk pipeline

pub mod classification;
pub mod record;
pub mod transaction;

pub use classification::{ClassificationResult, Priority};
pub use record::{TransactionRecord, TransactionStats};
pub use transaction::{RawTransaction, TransactionInput};
