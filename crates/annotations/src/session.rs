//! Cycle orchestration for one map surface.
//!
//! A [`MarkerSession`] owns the surface, the reconciler and the resolution
//! cache of one map view. Each sync takes a fresh [`CycleToken`]; when a
//! newer cycle has begun by the time a build finishes, the older result is
//! discarded without touching the surface.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use foundation::LocationRecord;
use geocode::{ConfigError, GeoResolver, ResolutionCache, ResolutionContext};
use parking_lot::Mutex;
use runtime::{Counter, Counters, CycleToken, CycleTracker, EventBus, Stamped};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::interaction::{Interaction, InteractionEvent, SurfaceEvent};
use crate::points::{BuildReport, BuilderConfig, PointSetBuilder};
use crate::reconcile::{AnnotationMap, AnnotationReconciler, ReconcileReport};
use crate::source::{RecordSource, SourceError};
use crate::surface::{AnnotationSurface, SurfaceError, SurfaceOp};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Applied,
    /// A newer cycle began first; nothing was applied.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub cycle: CycleToken,
    pub outcome: SyncOutcome,
    pub build: BuildReport,
    /// `None` unless the outcome is `Applied`.
    pub reconcile: Option<ReconcileReport>,
    /// Surface operations applied by this cycle, in order.
    pub operations: Vec<SurfaceOp>,
}

/// Error type for session cycles.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncError {
    Configuration(ConfigError),
    Surface {
        cycle: CycleToken,
        error: SurfaceError,
        /// Operations applied before the failure.
        operations: Vec<SurfaceOp>,
    },
    Source(SourceError),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Configuration(err) => write!(f, "{err}"),
            SyncError::Surface { cycle, error, .. } => write!(f, "{cycle} aborted: {error}"),
            SyncError::Source(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Configuration(err) => Some(err),
            SyncError::Surface { error, .. } => Some(error),
            SyncError::Source(err) => Some(err),
        }
    }
}

impl From<ConfigError> for SyncError {
    fn from(err: ConfigError) -> Self {
        SyncError::Configuration(err)
    }
}

impl From<SourceError> for SyncError {
    fn from(err: SourceError) -> Self {
        SyncError::Source(err)
    }
}

struct SessionState<S> {
    reconciler: AnnotationReconciler,
    surface: S,
    interaction: Interaction,
    events: EventBus<InteractionEvent>,
}

pub struct MarkerSession<S> {
    builder: PointSetBuilder,
    cycles: CycleTracker,
    counters: Arc<Counters>,
    state: Mutex<SessionState<S>>,
    source: Option<Arc<dyn RecordSource>>,
    config_error_logged: AtomicBool,
}

impl<S: AnnotationSurface> MarkerSession<S> {
    pub fn new(resolver: Arc<dyn GeoResolver>, surface: S, config: BuilderConfig) -> Self {
        let counters = Arc::new(Counters::new());
        let cache = Arc::new(ResolutionCache::with_counters(counters.clone()));
        Self {
            builder: PointSetBuilder::new(resolver, cache, config),
            cycles: CycleTracker::new(),
            counters,
            state: Mutex::new(SessionState {
                reconciler: AnnotationReconciler::new(),
                surface,
                interaction: Interaction::default(),
                events: EventBus::new(),
            }),
            source: None,
            config_error_logged: AtomicBool::new(false),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn RecordSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn cache(&self) -> &Arc<ResolutionCache> {
        self.builder.cache()
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    pub fn latest_cycle(&self) -> Option<CycleToken> {
        self.cycles.latest()
    }

    /// Runs `f` with exclusive access to the surface.
    pub fn with_surface<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.state.lock().surface)
    }

    /// Snapshot of the tracked `id -> handle` map.
    pub fn annotations(&self) -> AnnotationMap {
        self.state.lock().reconciler.annotations().clone()
    }

    /// Fails when the resolver or the surface was never initialized.
    ///
    /// The first failure in a row is logged at `error`; repeats only at
    /// `debug`. An unready surface may have lost its markers, so the next
    /// applied cycle re-reads what is live before diffing.
    pub fn check_ready(&self) -> Result<(), ConfigError> {
        let result = self.builder.readiness().and_then(|()| {
            let mut state = self.state.lock();
            let ready = state.surface.readiness();
            if ready.is_err() {
                state.reconciler.request_resync();
            }
            ready
        });
        match &result {
            Ok(()) => self.config_error_logged.store(false, Ordering::Relaxed),
            Err(err) => {
                if self.config_error_logged.swap(true, Ordering::Relaxed) {
                    debug!(%err, "session still not configured");
                } else {
                    error!(%err, "session not configured; cycles will fail");
                }
            }
        }
        result
    }

    /// Builds the point set for `records` and reconciles it onto the surface.
    pub async fn sync(&self, records: &[LocationRecord]) -> Result<SyncReport, SyncError> {
        let cycle = self.begin()?;
        self.run(cycle, records).await
    }

    /// Fetches the records for `context` from the upstream source, then syncs.
    ///
    /// The cycle begins before the fetch, so a slow upstream response cannot
    /// overwrite the result of a later request.
    pub async fn refresh(&self, context: &str) -> Result<SyncReport, SyncError> {
        let Some(source) = self.source.clone() else {
            return Err(SyncError::Configuration(ConfigError::new(
                "record source",
                "no upstream configured",
            )));
        };
        let cycle = self.begin()?;
        let records = match source.fetch(context).await {
            Ok(records) => records,
            Err(err) => {
                warn!(%cycle, context, %err, "record fetch failed");
                self.counters.inc(Counter::CyclesFailed);
                return Err(err.into());
            }
        };
        if self.cycles.is_stale(cycle) {
            return Ok(self.discard(cycle, BuildReport::default()));
        }
        self.run(cycle, &records).await
    }

    /// Routes a surface interaction and returns the resulting state.
    pub fn dispatch(&self, event: &SurfaceEvent) -> Interaction {
        let cycle = self.cycles.latest();
        let mut state = self.state.lock();
        let SessionState {
            reconciler,
            interaction,
            events,
            ..
        } = &mut *state;
        for change in interaction.apply(event, reconciler) {
            events.emit(cycle, change);
        }
        interaction.clone()
    }

    pub fn interaction(&self) -> Interaction {
        self.state.lock().interaction.clone()
    }

    pub fn clear_selection(&self) -> Interaction {
        let cycle = self.cycles.latest();
        let mut state = self.state.lock();
        if let Some(change) = state.interaction.clear_selection() {
            state.events.emit(cycle, change);
        }
        state.interaction.clone()
    }

    pub fn drain_events(&self) -> Vec<Stamped<InteractionEvent>> {
        self.state.lock().events.drain()
    }

    /// Forgets the cached resolution for `address`.
    pub fn bust_address(&self, address: &str) -> bool {
        ResolutionContext::for_address(address).is_some_and(|context| self.cache().bust(&context))
    }

    fn begin(&self) -> Result<CycleToken, SyncError> {
        if let Err(err) = self.check_ready() {
            self.counters.inc(Counter::CyclesFailed);
            return Err(err.into());
        }
        let cycle = self.cycles.begin();
        self.counters.inc(Counter::CyclesStarted);
        debug!(%cycle, "cycle started");
        Ok(cycle)
    }

    async fn run(
        &self,
        cycle: CycleToken,
        records: &[LocationRecord],
    ) -> Result<SyncReport, SyncError> {
        let build = self.builder.build(records).await;

        let mut state = self.state.lock();
        if self.cycles.is_stale(cycle) {
            drop(state);
            return Ok(self.discard(cycle, build));
        }

        let SessionState {
            reconciler,
            surface,
            interaction,
            events,
        } = &mut *state;
        let result = reconciler.reconcile(&build.points, surface);
        let operations = surface.take_applied();
        for change in interaction.retain_live(reconciler) {
            events.emit(Some(cycle), change);
        }

        match result {
            Ok(report) => {
                self.counters.inc(Counter::CyclesApplied);
                self.counters
                    .add(Counter::AnnotationsCreated, report.created.len() as u64);
                self.counters
                    .add(Counter::AnnotationsMoved, report.moved.len() as u64);
                self.counters
                    .add(Counter::AnnotationsRemoved, report.removed.len() as u64);
                info!(
                    %cycle,
                    created = report.created.len(),
                    moved = report.moved.len(),
                    removed = report.removed.len(),
                    dropped = build.dropped.len(),
                    "cycle applied"
                );
                Ok(SyncReport {
                    cycle,
                    outcome: SyncOutcome::Applied,
                    build,
                    reconcile: Some(report),
                    operations,
                })
            }
            Err(error) => {
                self.counters.inc(Counter::CyclesFailed);
                Err(SyncError::Surface {
                    cycle,
                    error,
                    operations,
                })
            }
        }
    }

    fn discard(&self, cycle: CycleToken, build: BuildReport) -> SyncReport {
        self.counters.inc(Counter::CyclesStale);
        debug!(%cycle, latest = ?self.cycles.latest(), "discarding stale cycle");
        SyncReport {
            cycle,
            outcome: SyncOutcome::Stale,
            build,
            reconcile: None,
            operations: Vec::new(),
        }
    }
}
