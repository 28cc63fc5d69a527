//! Store counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared between the manager task and the handles
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub executed: AtomicU64,
    pub retried: AtomicU64,
    pub connect_attempts: AtomicU64,
    pub connects: AtomicU64,
    pub finds: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StoreMetrics {
        StoreMetrics {
            executed: self.executed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            finds: self.finds.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the store counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreMetrics {
    /// Commands that completed successfully
    pub executed: u64,
    /// Mutating commands kept for another attempt after a failure
    pub retried: u64,
    pub connect_attempts: u64,
    /// Sessions successfully opened
    pub connects: u64,
    /// Find commands answered with a result stream
    pub finds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_bumps() {
        let counters = Counters::default();
        Counters::bump(&counters.executed);
        Counters::bump(&counters.executed);
        Counters::bump(&counters.connect_attempts);

        let metrics = counters.snapshot();
        assert_eq!(metrics.executed, 2);
        assert_eq!(metrics.connect_attempts, 1);
        assert_eq!(metrics.retried, 0);
    }

    #[test]
    fn test_metrics_serialize() {
        let metrics = StoreMetrics {
            executed: 3,
            finds: 1,
            ..Default::default()
        };
        let json = serde_json::to_value(metrics).unwrap();
        assert_eq!(json["executed"], 3);
        assert_eq!(json["finds"], 1);
        assert_eq!(json["connects"], 0);
    }
}
