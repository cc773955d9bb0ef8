//! In-memory auction counters. Nothing here is persisted.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

use crate::auction::types::BidOutcome;

#[derive(Debug, Default)]
pub struct AuctionStats {
    requests: AtomicU64,
    attempts: AtomicU64,
    winners: AtomicU64,
    failures: DashMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub attempts: u64,
    pub winners: u64,
    /// Failure counts keyed by reason string.
    pub failures: BTreeMap<String, u64>,
}

impl AuctionStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one finished request and its outcome.
    pub fn record_outcome(&self, outcome: &BidOutcome) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        match outcome {
            BidOutcome::Winner(_) => {
                self.winners.fetch_add(1, Ordering::Relaxed);
            }
            BidOutcome::Failure(failure) => {
                *self.failures.entry(failure.reason.to_string()).or_insert(0) += 1;
            }
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            winners: self.winners.load(Ordering::Relaxed),
            failures: self
                .failures
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::types::FailureReason;

    #[test]
    fn counts_outcomes_by_reason() {
        let stats = AuctionStats::new();
        stats.record_attempt();
        stats.record_attempt();
        stats.record_outcome(&BidOutcome::failure(FailureReason::NoFill));
        stats.record_outcome(&BidOutcome::failure(FailureReason::NoFill));
        stats.record_outcome(&BidOutcome::failure(FailureReason::ServerStatus(503)));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.requests, 3);
        assert_eq!(snapshot.attempts, 2);
        assert_eq!(snapshot.winners, 0);
        assert_eq!(snapshot.failures.get("no_fill"), Some(&2));
        assert_eq!(snapshot.failures.get("status_503"), Some(&1));
    }
}
