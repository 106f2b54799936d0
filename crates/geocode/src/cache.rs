use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use runtime::{Counter, Counters};
use tracing::debug;

use crate::context::ResolutionContext;
use crate::resolver::Resolution;

/// A resolution that may still be in flight. Every clone observes the same
/// result.
pub type PendingResolution = Shared<BoxFuture<'static, Resolution>>;

/// Lifecycle of a cache entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResolutionState {
    InFlight,
    Resolved,
    Failed,
}

/// Session-scoped memo of resolution work, keyed by [`ResolutionContext`].
///
/// Guarantees:
/// - At most one resolution per context: concurrent requests share a single
///   underlying future instead of issuing duplicate provider calls.
/// - Failures are remembered like successes, so a bad address is not
///   re-queried on every refresh. Only [`bust`](Self::bust) or
///   [`clear`](Self::clear) force a new attempt.
pub struct ResolutionCache {
    entries: Mutex<HashMap<ResolutionContext, PendingResolution>>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for ResolutionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionCache")
            .field("entries", &self.len())
            .finish()
    }
}

impl Default for ResolutionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::with_counters(Arc::new(Counters::new()))
    }

    pub fn with_counters(counters: Arc<Counters>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            counters,
        }
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn contains(&self, context: &ResolutionContext) -> bool {
        self.entries.lock().contains_key(context)
    }

    /// Returns the shared resolution for `context`, starting it with
    /// `resolve` only when no entry exists yet.
    ///
    /// The entry is registered before this returns, so every later call for
    /// the same context (even before the first one is awaited) joins it.
    pub fn get_or_resolve<F, Fut>(&self, context: &ResolutionContext, resolve: F) -> PendingResolution
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Resolution> + Send + 'static,
    {
        let mut entries = self.entries.lock();
        if let Some(pending) = entries.get(context) {
            debug!(%context, "resolution cache hit");
            self.counters.inc(Counter::CacheHits);
            return pending.clone();
        }

        debug!(%context, "resolution cache miss");
        self.counters.inc(Counter::ResolverCalls);
        let pending = resolve().boxed().shared();
        entries.insert(context.clone(), pending.clone());
        pending
    }

    /// Completed result for `context`, without awaiting anything.
    pub fn settled(&self, context: &ResolutionContext) -> Option<Resolution> {
        self.entries.lock().get(context)?.peek().cloned()
    }

    pub fn state(&self, context: &ResolutionContext) -> Option<ResolutionState> {
        let entries = self.entries.lock();
        let pending = entries.get(context)?;
        Some(match pending.peek() {
            None => ResolutionState::InFlight,
            Some(Ok(_)) => ResolutionState::Resolved,
            Some(Err(_)) => ResolutionState::Failed,
        })
    }

    /// Forgets `context` so the next request resolves it again.
    ///
    /// Callers already awaiting the old entry still receive its result.
    pub fn bust(&self, context: &ResolutionContext) -> bool {
        let removed = self.entries.lock().remove(context).is_some();
        if removed {
            debug!(%context, "resolution cache bust");
            self.counters.inc(Counter::CacheBusts);
        }
        removed
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let n = entries.len();
        entries.clear();
        self.counters.add(Counter::CacheBusts, n as u64);
        n
    }
}
