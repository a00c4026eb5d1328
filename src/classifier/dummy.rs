//! Stand-in classifier with simulated inference cost

use super::Classifier;
use crate::types::TransactionInput;
use anyhow::Result;
use rand::Rng;
use std::time::Duration;

/// Sleeps a uniformly random duration, then returns a uniformly random score
#[derive(Debug, Clone)]
pub struct DummyClassifier {
    min_latency: Duration,
    max_latency: Duration,
}

impl DummyClassifier {
    /// Bounds are swapped if given in the wrong order.
    pub fn new(min_latency: Duration, max_latency: Duration) -> Self {
        let (min_latency, max_latency) = if min_latency <= max_latency {
            (min_latency, max_latency)
        } else {
            (max_latency, min_latency)
        };
        Self {
            min_latency,
            max_latency,
        }
    }

    fn simulated_latency(&self) -> Duration {
        if self.min_latency == self.max_latency {
            return self.min_latency;
        }
        rand::thread_rng().gen_range(self.min_latency..=self.max_latency)
    }
}

impl Classifier for DummyClassifier {
    fn predict(&self, _transaction: &TransactionInput) -> Result<f64> {
        std::thread::sleep(self.simulated_latency());
        Ok(rand::thread_rng().gen_range(0.0..=1.0))
    }
}
