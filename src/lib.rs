//! Transaction Risk Pipeline Library
//!
//! Accepts blockchain transactions over HTTP, queues them durably on NATS
//! JetStream, scores them with a pluggable classifier in a single worker with
//! bounded concurrency, and persists the high-priority ones to PostgreSQL.

pub mod api;
pub mod broker;
pub mod classifier;
pub mod config;
pub mod consumer;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod producer;
pub mod store;
pub mod types;
pub mod validation;

pub use classifier::{Classifier, DummyClassifier};
pub use config::AppConfig;
pub use consumer::{Disposition, MessageHandler, TransactionConsumer};
pub use pipeline::TransactionPipeline;
pub use producer::{TransactionProducer, TransactionPublisher};
pub use store::{MemoryTransactionStore, PgTransactionStore, TransactionStore};
pub use types::{
    ClassificationResult, Priority, RawTransaction, TransactionInput, TransactionRecord,
};
