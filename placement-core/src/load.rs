//! Region load history
//!
//! Metrics arrive as "latest value" reports. Each region keeps a bounded
//! FIFO of its most recent samples; the oldest sample is evicted on insert.
//! The store is shared between the metrics reporter (single writer) and
//! balancing cycles (readers), so it sits behind a read-write lock and
//! readers always copy out a whole ring.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::region::RegionIdentity;

/// Number of samples retained per region
pub const LOAD_HISTORY_DEPTH: usize = 15;

/// One metrics report for a region
///
/// Request counters are cumulative; sizes are point-in-time values in MB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionLoadSample {
    pub read_requests: u64,
    pub write_requests: u64,
    pub coprocessor_requests: u64,
    pub store_file_size_mb: u64,
    pub mem_store_size_mb: u64,
}

/// Metric extracted from a [`RegionLoadSample`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMetric {
    ReadRequests,
    WriteRequests,
    CoprocessorRequests,
    StoreFileSize,
    MemStoreSize,
}

impl LoadMetric {
    pub const ALL: [LoadMetric; 5] = [
        LoadMetric::ReadRequests,
        LoadMetric::WriteRequests,
        LoadMetric::CoprocessorRequests,
        LoadMetric::StoreFileSize,
        LoadMetric::MemStoreSize,
    ];

    pub fn value(&self, sample: &RegionLoadSample) -> f64 {
        match self {
            LoadMetric::ReadRequests => sample.read_requests as f64,
            LoadMetric::WriteRequests => sample.write_requests as f64,
            LoadMetric::CoprocessorRequests => sample.coprocessor_requests as f64,
            LoadMetric::StoreFileSize => sample.store_file_size_mb as f64,
            LoadMetric::MemStoreSize => sample.mem_store_size_mb as f64,
        }
    }

    /// Request counters are read as a rate of change, sizes as an average
    pub fn is_rate(&self) -> bool {
        matches!(
            self,
            LoadMetric::ReadRequests | LoadMetric::WriteRequests | LoadMetric::CoprocessorRequests
        )
    }

    /// Collapse a region's retained history into a single load figure
    pub fn region_load(&self, history: &[RegionLoadSample]) -> f64 {
        if self.is_rate() {
            if history.len() < 2 {
                return 0.0;
            }
            let mut delta = 0.0;
            for pair in history.windows(2) {
                delta += self.value(&pair[1]) - self.value(&pair[0]);
            }
            (delta / (history.len() - 1) as f64).max(0.0)
        } else {
            if history.is_empty() {
                return 0.0;
            }
            let total: f64 = history.iter().map(|s| self.value(s)).sum();
            total / history.len() as f64
        }
    }

    /// Metric whose [`name`](Self::name) is `name`
    pub fn from_name(name: &str) -> Option<LoadMetric> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            LoadMetric::ReadRequests => "read_request",
            LoadMetric::WriteRequests => "write_request",
            LoadMetric::CoprocessorRequests => "coprocessor_request",
            LoadMetric::StoreFileSize => "store_file_size",
            LoadMetric::MemStoreSize => "mem_store_size",
        }
    }
}

/// Bounded per-region sample history
pub struct LoadHistoryStore {
    depth: usize,
    loads: RwLock<HashMap<RegionIdentity, VecDeque<RegionLoadSample>>>,
}

impl LoadHistoryStore {
    /// Create a store retaining [`LOAD_HISTORY_DEPTH`] samples per region
    pub fn new() -> Self {
        Self::with_depth(LOAD_HISTORY_DEPTH)
    }

    /// Create a store with a custom retention depth (at least 1)
    pub fn with_depth(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            loads: RwLock::new(HashMap::new()),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Append a sample, evicting the oldest once the ring is full
    pub fn record(&self, region: &RegionIdentity, sample: RegionLoadSample) {
        let mut loads = self.loads.write();
        Self::push(&mut loads, self.depth, region, sample);
    }

    /// Fold a whole report (one sample per region) under a single write lock
    pub fn record_report<'a, I>(&self, report: I)
    where
        I: IntoIterator<Item = (&'a RegionIdentity, RegionLoadSample)>,
    {
        let mut loads = self.loads.write();
        let mut count = 0usize;
        for (region, sample) in report {
            Self::push(&mut loads, self.depth, region, sample);
            count += 1;
        }
        debug!(regions = count, "Recorded load report");
    }

    fn push(
        loads: &mut HashMap<RegionIdentity, VecDeque<RegionLoadSample>>,
        depth: usize,
        region: &RegionIdentity,
        sample: RegionLoadSample,
    ) {
        let ring = loads
            .entry(region.clone())
            .or_insert_with(|| VecDeque::with_capacity(depth));
        if ring.len() == depth {
            ring.pop_front();
        }
        ring.push_back(sample);
    }

    /// Copy of a region's history, oldest first
    pub fn history(&self, region: &RegionIdentity) -> Vec<RegionLoadSample> {
        self.loads
            .read()
            .get(region)
            .map(|ring| ring.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop the history of a region that no longer exists
    pub fn forget(&self, region: &RegionIdentity) -> bool {
        self.loads.write().remove(region).is_some()
    }

    /// Number of regions with at least one sample
    pub fn len(&self) -> usize {
        self.loads.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.loads.read().is_empty()
    }
}

impl Default for LoadHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(value: u64) -> RegionLoadSample {
        RegionLoadSample {
            read_requests: value,
            write_requests: value,
            coprocessor_requests: value,
            store_file_size_mb: value,
            mem_store_size_mb: value,
        }
    }

    #[test]
    fn test_ring_keeps_last_samples_in_order() {
        let store = LoadHistoryStore::new();
        let region = RegionIdentity::new("t", b"", b"");

        for i in 0..20_000u64 {
            store.record(&region, RegionLoadSample {
                store_file_size_mb: i,
                ..Default::default()
            });
        }

        let history = store.history(&region);
        assert_eq!(history.len(), LOAD_HISTORY_DEPTH);
        for (i, s) in history.iter().enumerate() {
            assert_eq!(s.store_file_size_mb, (20_000 - LOAD_HISTORY_DEPTH + i) as u64);
        }
    }

    #[test]
    fn test_rate_and_average() {
        let history: Vec<_> = (1..5).map(sample).collect();

        // counters 1,2,3,4 grow by one per report
        assert!((LoadMetric::ReadRequests.region_load(&history) - 1.0).abs() < 1e-9);
        assert!((LoadMetric::CoprocessorRequests.region_load(&history) - 1.0).abs() < 1e-9);
        assert!((LoadMetric::StoreFileSize.region_load(&history) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_short_histories() {
        assert_eq!(LoadMetric::WriteRequests.region_load(&[]), 0.0);
        assert_eq!(LoadMetric::WriteRequests.region_load(&[sample(7)]), 0.0);
        assert_eq!(LoadMetric::MemStoreSize.region_load(&[]), 0.0);
        assert_eq!(LoadMetric::MemStoreSize.region_load(&[sample(7)]), 7.0);
    }

    #[test]
    fn test_counter_reset_is_not_negative() {
        let history = vec![sample(100), sample(0)];
        assert_eq!(LoadMetric::ReadRequests.region_load(&history), 0.0);
    }

    #[test]
    fn test_record_report_and_forget() {
        let store = LoadHistoryStore::with_depth(2);
        let a = RegionIdentity::new("t", b"a", b"b");
        let b = RegionIdentity::new("t", b"b", b"c");

        store.record_report(vec![(&a, sample(1)), (&b, sample(2))]);
        store.record_report(vec![(&a, sample(3))]);
        store.record_report(vec![(&a, sample(5))]);

        assert_eq!(store.len(), 2);
        assert_eq!(store.history(&a), vec![sample(3), sample(5)]);
        assert!(store.forget(&b));
        assert!(store.history(&b).is_empty());
    }
}
