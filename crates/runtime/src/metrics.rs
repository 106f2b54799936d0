use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Session counters.
///
/// Snapshots are keyed by stable names in sorted order so they can be logged
/// or served as JSON without depending on declaration order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    CyclesStarted,
    CyclesApplied,
    CyclesStale,
    CyclesFailed,
    ResolverCalls,
    CacheHits,
    CacheBusts,
    RecordsDropped,
    AnnotationsCreated,
    AnnotationsMoved,
    AnnotationsRemoved,
}

impl Counter {
    pub const ALL: [Counter; 11] = [
        Counter::CyclesStarted,
        Counter::CyclesApplied,
        Counter::CyclesStale,
        Counter::CyclesFailed,
        Counter::ResolverCalls,
        Counter::CacheHits,
        Counter::CacheBusts,
        Counter::RecordsDropped,
        Counter::AnnotationsCreated,
        Counter::AnnotationsMoved,
        Counter::AnnotationsRemoved,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Counter::CyclesStarted => "cycles_started",
            Counter::CyclesApplied => "cycles_applied",
            Counter::CyclesStale => "cycles_stale",
            Counter::CyclesFailed => "cycles_failed",
            Counter::ResolverCalls => "resolver_calls",
            Counter::CacheHits => "cache_hits",
            Counter::CacheBusts => "cache_busts",
            Counter::RecordsDropped => "records_dropped",
            Counter::AnnotationsCreated => "annotations_created",
            Counter::AnnotationsMoved => "annotations_moved",
            Counter::AnnotationsRemoved => "annotations_removed",
        }
    }
}

#[derive(Debug, Default)]
pub struct Counters {
    values: [AtomicU64; Counter::ALL.len()],
}

pub type CountersSnapshot = BTreeMap<&'static str, u64>;

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, by: u64) {
        if by > 0 {
            self.values[counter as usize].fetch_add(by, Ordering::Relaxed);
        }
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.values[counter as usize].load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        for v in &self.values {
            v.store(0, Ordering::Relaxed);
        }
    }

    /// Returns a stable, name-sorted snapshot suitable for logs and JSON.
    pub fn snapshot(&self) -> CountersSnapshot {
        Counter::ALL
            .iter()
            .map(|c| (c.name(), self.get(*c)))
            .collect()
    }
}
