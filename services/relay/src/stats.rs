//! Engine counters and worker health reporting

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Relay-wide counters, updated lock-free from every worker
#[derive(Debug, Default)]
pub struct RelayStats {
    processed_events_total: AtomicU64,
    duplicate_events: AtomicU64,
    failed_events: AtomicU64,
    successful_relays: AtomicU64,
}

/// Wire form of the counters for `/api/stats`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_transactions: u64,
    pub successful_relays: u64,
    pub failed_events: u64,
    pub processed_events_total: u64,
    pub duplicate_events: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_processed(&self) {
        self.processed_events_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicate_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successful_relays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, total_transactions: u64) -> StatsSnapshot {
        StatsSnapshot {
            total_transactions,
            successful_relays: self.successful_relays.load(Ordering::Relaxed),
            failed_events: self.failed_events.load(Ordering::Relaxed),
            processed_events_total: self.processed_events_total.load(Ordering::Relaxed),
            duplicate_events: self.duplicate_events.load(Ordering::Relaxed),
        }
    }
}

/// Health of one worker, keyed by role and chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub chain_id: types::ChainId,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Shared registry the API health endpoint reads
#[derive(Debug, Default)]
pub struct HealthRegistry {
    source_workers: DashMap<types::ChainId, WorkerHealth>,
    destination_workers: DashMap<types::ChainId, WorkerHealth>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_source(&self, chain: types::ChainId, healthy: bool, detail: Option<String>) {
        self.source_workers.insert(
            chain,
            WorkerHealth {
                chain_id: chain,
                healthy,
                detail,
            },
        );
    }

    pub fn set_destination(&self, chain: types::ChainId, healthy: bool, detail: Option<String>) {
        self.destination_workers.insert(
            chain,
            WorkerHealth {
                chain_id: chain,
                healthy,
                detail,
            },
        );
    }

    pub fn source_workers(&self) -> Vec<WorkerHealth> {
        let mut workers: Vec<_> = self
            .source_workers
            .iter()
            .map(|w| w.value().clone())
            .collect();
        workers.sort_by_key(|w| w.chain_id);
        workers
    }

    pub fn destination_workers(&self) -> Vec<WorkerHealth> {
        let mut workers: Vec<_> = self
            .destination_workers
            .iter()
            .map(|w| w.value().clone())
            .collect();
        workers.sort_by_key(|w| w.chain_id);
        workers
    }

    pub fn all_healthy(&self) -> bool {
        self.source_workers.iter().all(|w| w.healthy)
            && self.destination_workers.iter().all(|w| w.healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ChainId;

    #[test]
    fn snapshot_carries_wire_field_names() {
        let stats = RelayStats::new();
        stats.record_processed();
        stats.record_processed();
        stats.record_duplicate();
        stats.record_failed();
        stats.record_success();

        let value = serde_json::to_value(stats.snapshot(5)).unwrap();
        assert_eq!(value["total_transactions"], 5);
        assert_eq!(value["successful_relays"], 1);
        assert_eq!(value["failed_events"], 1);
        assert_eq!(value["processed_events_total"], 2);
        assert_eq!(value["duplicate_events"], 1);
    }

    #[test]
    fn unhealthy_worker_flips_overall_health() {
        let registry = HealthRegistry::new();
        registry.set_source(ChainId::Ethereum, true, None);
        registry.set_destination(ChainId::Internal, true, None);
        assert!(registry.all_healthy());

        registry.set_source(ChainId::Ethereum, false, Some("storage unavailable".to_string()));
        assert!(!registry.all_healthy());
        let workers = registry.source_workers();
        assert_eq!(workers.len(), 1);
        assert!(!workers[0].healthy);
    }
}
