use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use foundation::{AnnotationId, AnnotationPoint, LocationRecord};
use futures_util::future::join_all;
use geocode::{
    ConfigError, GeoResolver, PendingResolution, Resolution, ResolutionCache, ResolutionContext,
    ResolutionFailure,
};
use runtime::Counter;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BuilderConfig {
    /// Upper bound for one provider call. Local pacing waits do not count.
    pub resolve_timeout: Duration,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            resolve_timeout: Duration::from_secs(8),
        }
    }
}

/// A record left out of the point set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedRecord {
    pub id: AnnotationId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildReport {
    pub points: Vec<AnnotationPoint>,
    /// Records that arrived with a coordinate.
    pub preset: usize,
    /// Records whose coordinate came from resolution.
    pub resolved: usize,
    /// Distinct contexts looked up in this build.
    pub lookups: usize,
    /// Lookups answered by an existing cache entry.
    pub cache_hits: usize,
    pub dropped: Vec<DroppedRecord>,
}

/// Turns location records into annotation points, resolving missing
/// coordinates through the session cache.
pub struct PointSetBuilder {
    resolver: Arc<dyn GeoResolver>,
    cache: Arc<ResolutionCache>,
    config: BuilderConfig,
}

impl PointSetBuilder {
    pub fn new(
        resolver: Arc<dyn GeoResolver>,
        cache: Arc<ResolutionCache>,
        config: BuilderConfig,
    ) -> Self {
        Self {
            resolver,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<ResolutionCache> {
        &self.cache
    }

    pub fn config(&self) -> BuilderConfig {
        self.config
    }

    pub fn readiness(&self) -> Result<(), ConfigError> {
        self.resolver.readiness()
    }

    /// Builds the complete point set for `records`.
    ///
    /// Records sharing a normalized address are resolved once. All lookups
    /// are registered before any is awaited, and the call returns only after
    /// every one of them has settled. Records that cannot be resolved are
    /// dropped and reported; no error leaves this function.
    pub async fn build(&self, records: &[LocationRecord]) -> BuildReport {
        let mut report = BuildReport::default();
        let mut groups: BTreeMap<ResolutionContext, (String, Vec<&LocationRecord>)> =
            BTreeMap::new();

        for record in records {
            if let Some(coordinate) = record.coordinate {
                report
                    .points
                    .push(AnnotationPoint::from_record(record, coordinate));
                report.preset += 1;
                continue;
            }
            if !record.has_address() {
                debug!(id = %record.id, "dropping record without address or coordinate");
                report.dropped.push(DroppedRecord {
                    id: record.id.clone(),
                    reason: "no address".to_string(),
                });
                continue;
            }
            groups
                .entry(ResolutionContext::for_record(record))
                .or_insert_with(|| (record.address.trim().to_string(), Vec::new()))
                .1
                .push(record);
        }

        let lookups: Vec<PendingResolution> = groups
            .iter()
            .map(|(context, (address, _))| {
                if self.cache.contains(context) {
                    report.cache_hits += 1;
                }
                self.lookup(context, address)
            })
            .collect();
        report.lookups = lookups.len();
        let results = join_all(lookups).await;

        for ((context, (_, members)), result) in groups.into_iter().zip(results) {
            let failure = match result {
                Ok(coordinate) if coordinate.is_in_range() => {
                    for record in members {
                        report
                            .points
                            .push(AnnotationPoint::from_record(record, coordinate));
                        report.resolved += 1;
                    }
                    continue;
                }
                Ok(coordinate) => ResolutionFailure::InvalidResponse(format!(
                    "coordinate out of range: {coordinate}"
                )),
                Err(failure) => failure,
            };

            debug!(%context, %failure, records = members.len(), "dropping unresolved records");
            for record in members {
                report.dropped.push(DroppedRecord {
                    id: record.id.clone(),
                    reason: failure.to_string(),
                });
            }
        }

        self.cache
            .counters()
            .add(Counter::RecordsDropped, report.dropped.len() as u64);
        report
    }

    /// Resolves a single address through the cache. `None` for addresses with
    /// nothing to look up.
    pub async fn resolve_address(&self, address: &str) -> Option<Resolution> {
        let context = ResolutionContext::for_address(address)?;
        Some(self.lookup(&context, address.trim()).await)
    }

    fn lookup(&self, context: &ResolutionContext, address: &str) -> PendingResolution {
        let resolver = self.resolver.clone();
        let address = address.to_string();
        let timeout = self.config.resolve_timeout;
        self.cache.get_or_resolve(context, move || async move {
            resolver.resolve_within(&address, timeout).await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use foundation::{AnnotationPoint, Coordinate, LocationRecord};
    use futures_util::future::BoxFuture;
    use geocode::{
        GeoResolver, Resolution, ResolutionCache, ResolutionContext, ResolutionFailure,
        TableResolver, ThrottleConfig, Throttled,
    };
    use pretty_assertions::assert_eq;
    use tokio::sync::Notify;

    use super::{BuilderConfig, PointSetBuilder};

    /// Table lookups that count calls per address.
    struct Counting {
        table: TableResolver,
        calls: AtomicUsize,
    }

    impl Counting {
        fn new(table: TableResolver) -> Arc<Self> {
            Arc::new(Self {
                table,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl GeoResolver for Counting {
        fn resolve<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Resolution> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.table.resolve(address)
        }
    }

    struct Never;

    impl GeoResolver for Never {
        fn resolve<'a>(&'a self, _address: &'a str) -> BoxFuture<'a, Resolution> {
            Box::pin(futures_util::future::pending())
        }
    }

    /// Holds every call until released; counts calls that have started.
    struct Held {
        table: TableResolver,
        expected: usize,
        started: AtomicUsize,
        all_started: Notify,
        release: Notify,
    }

    impl GeoResolver for Held {
        fn resolve<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Resolution> {
            Box::pin(async move {
                let release = self.release.notified();
                if self.started.fetch_add(1, Ordering::SeqCst) + 1 == self.expected {
                    self.all_started.notify_one();
                }
                release.await;
                self.table.resolve(address).await
            })
        }
    }

    fn builder(resolver: Arc<dyn GeoResolver>) -> PointSetBuilder {
        PointSetBuilder::new(
            resolver,
            Arc::new(ResolutionCache::new()),
            BuilderConfig::default(),
        )
    }

    fn by_id(points: &[AnnotationPoint]) -> BTreeMap<String, Coordinate> {
        points
            .iter()
            .map(|p| (p.id.to_string(), p.coordinate))
            .collect()
    }

    #[tokio::test]
    async fn mixed_resolution_scenario() {
        let resolver = Counting::new(TableResolver::new().with_entry("A", Coordinate::new(2.0, 2.0)));
        let b = builder(resolver.clone());
        let records = vec![
            LocationRecord::new("1", "one", "", Some(Coordinate::new(1.0, 1.0))),
            LocationRecord::new("2", "two", "A", None),
            LocationRecord::new("3", "three", "A", None),
        ];

        let report = b.build(&records).await;
        let expected: BTreeMap<String, Coordinate> = [
            ("1".to_string(), Coordinate::new(1.0, 1.0)),
            ("2".to_string(), Coordinate::new(2.0, 2.0)),
            ("3".to_string(), Coordinate::new(2.0, 2.0)),
        ]
        .into_iter()
        .collect();
        assert_eq!(by_id(&report.points), expected);
        assert_eq!(resolver.calls(), 1);
        assert_eq!(report.preset, 1);
        assert_eq!(report.resolved, 2);
        assert_eq!(report.lookups, 1);
    }

    #[tokio::test]
    async fn many_records_one_address_one_call() {
        let resolver = Counting::new(
            TableResolver::new().with_entry("12 Main St", Coordinate::new(40.0, -74.0)),
        );
        let b = builder(resolver.clone());
        let records: Vec<_> = (0..25)
            .map(|i| {
                let address = if i % 2 == 0 { "12 Main St." } else { "12  MAIN st" };
                LocationRecord::new(i.to_string(), "unit", address, None)
            })
            .collect();

        let report = b.build(&records).await;
        assert_eq!(report.points.len(), 25);
        assert_eq!(resolver.calls(), 1);
    }

    #[tokio::test]
    async fn failed_resolution_is_dropped_silently() {
        let resolver = Counting::new(TableResolver::new().with_entry("A", Coordinate::new(2.0, 2.0)));
        let b = builder(resolver.clone());
        let records = vec![
            LocationRecord::new("ok", "", "A", None),
            LocationRecord::new("bad", "", "B", None),
            LocationRecord::new("blank", "", "   ", None),
        ];

        let report = b.build(&records).await;
        assert_eq!(by_id(&report.points).keys().collect::<Vec<_>>(), vec!["ok"]);
        let dropped: Vec<&str> = report.dropped.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(dropped, vec!["blank", "bad"]);
        // Blank addresses never reach the resolver.
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test]
    async fn warm_cache_rebuild_is_idempotent() {
        let resolver = Counting::new(TableResolver::new().with_entry("A", Coordinate::new(2.0, 2.0)));
        let b = builder(resolver.clone());
        let records = vec![
            LocationRecord::new("2", "", "A", None),
            LocationRecord::new("9", "", "nowhere", None),
        ];

        let first = b.build(&records).await;
        let second = b.build(&records).await;
        assert_eq!(first.points, second.points);
        assert_eq!(resolver.calls(), 2);
        assert_eq!(second.cache_hits, 2);
        assert_eq!(second.dropped.len(), 1);
    }

    #[tokio::test]
    async fn busting_a_context_resolves_again() {
        let resolver = Counting::new(TableResolver::new().with_entry("A", Coordinate::new(2.0, 2.0)));
        let b = builder(resolver.clone());
        let records = vec![LocationRecord::new("2", "", "A", None)];

        b.build(&records).await;
        assert!(b.cache().bust(&ResolutionContext::for_address("a").unwrap()));
        b.build(&records).await;
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_resolution_times_out_and_is_cached() {
        let cache = Arc::new(ResolutionCache::new());
        let b = PointSetBuilder::new(
            Arc::new(Never),
            cache.clone(),
            BuilderConfig {
                resolve_timeout: Duration::from_millis(250),
            },
        );
        let report = b.build(&[LocationRecord::new("1", "", "Somewhere", None)]).await;
        assert!(report.points.is_empty());
        assert_eq!(report.dropped[0].reason, ResolutionFailure::TimedOut.to_string());
        assert_eq!(
            cache.settled(&ResolutionContext::for_address("somewhere").unwrap()),
            Some(Err(ResolutionFailure::TimedOut))
        );
    }

    #[tokio::test]
    async fn single_address_shares_the_cache() {
        let resolver = Counting::new(TableResolver::new().with_entry("A", Coordinate::new(2.0, 2.0)));
        let b = builder(resolver.clone());
        assert_eq!(b.resolve_address(" a ").await, Some(Ok(Coordinate::new(2.0, 2.0))));
        assert_eq!(b.resolve_address("...").await, None);
        b.build(&[LocationRecord::new("2", "", "A", None)]).await;
        assert_eq!(resolver.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_addresses_resolve_concurrently() {
        let addresses = ["A", "B", "C", "D"];
        let mut table = TableResolver::new();
        for (i, a) in addresses.iter().enumerate() {
            table.insert(a, Coordinate::new(1.0 + i as f64, 1.0));
        }
        let resolver = Arc::new(Held {
            table,
            expected: addresses.len(),
            started: AtomicUsize::new(0),
            all_started: Notify::new(),
            release: Notify::new(),
        });
        let b = builder(resolver.clone());
        let records: Vec<_> = addresses
            .iter()
            .map(|a| LocationRecord::new(*a, "", *a, None))
            .collect();

        let release_when_all_started = async {
            resolver.all_started.notified().await;
            assert_eq!(resolver.started.load(Ordering::SeqCst), addresses.len());
            resolver.release.notify_waiters();
        };
        let (report, ()) = tokio::time::timeout(
            Duration::from_secs(5),
            async { tokio::join!(b.build(&records), release_when_all_started) },
        )
        .await
        .expect("every lookup should be in flight before any is released");
        assert_eq!(report.points.len(), addresses.len());
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_does_not_time_out_large_batches() {
        let mut table = TableResolver::new();
        for i in 0..12 {
            table.insert(&format!("{i} Depot Lane"), Coordinate::new(10.0 + i as f64, 5.0));
        }
        let cache = Arc::new(ResolutionCache::new());
        let b = PointSetBuilder::new(
            Arc::new(Throttled::new(table, ThrottleConfig::default())),
            cache.clone(),
            BuilderConfig::default(),
        );
        let records: Vec<_> = (0..12)
            .map(|i| LocationRecord::new(i.to_string(), "", format!("{i} Depot Lane"), None))
            .collect();

        let report = b.build(&records).await;
        assert_eq!(report.points.len(), 12);
        assert!(report.dropped.is_empty(), "{:?}", report.dropped);
        assert_eq!(cache.len(), 12);
    }

    #[tokio::test]
    async fn out_of_range_resolution_is_dropped() {
        let resolver = Counting::new(TableResolver::new().with_entry("X", Coordinate::new(95.0, 0.0)));
        let b = builder(resolver);
        let report = b.build(&[LocationRecord::new("x", "", "X", None)]).await;
        assert!(report.points.is_empty());
        assert_eq!(report.dropped.len(), 1);
    }
}
