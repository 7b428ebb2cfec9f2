use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free engine counters.
#[derive(Debug, Default)]
pub(crate) struct EngineMetrics {
    handovers: AtomicU64,
    aoi_queries: AtomicU64,
    aoi_entities: AtomicU64,
}

impl EngineMetrics {
    pub(crate) fn record_handovers(&self, n: u64) {
        if n > 0 {
            self.handovers.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_aoi_query(&self, returned: usize) {
        self.aoi_queries.fetch_add(1, Ordering::Relaxed);
        self.aoi_entities.fetch_add(returned as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        let aoi_queries = self.aoi_queries.load(Ordering::Relaxed);
        let aoi_entities_total = self.aoi_entities.load(Ordering::Relaxed);
        MetricsSnapshot {
            handovers: self.handovers.load(Ordering::Relaxed),
            aoi_queries,
            aoi_entities_total,
            aoi_avg_entities: if aoi_queries == 0 {
                0.0
            } else {
                aoi_entities_total as f64 / aoi_queries as f64
            },
        }
    }
}

/// Point-in-time copy of the engine counters, shaped for `/metrics.json`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub handovers: u64,
    pub aoi_queries: u64,
    pub aoi_entities_total: u64,
    pub aoi_avg_entities: f64,
}
