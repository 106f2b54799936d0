use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use annotations::{BuilderConfig, MarkerSession, MemorySurface, RecordSource};
use dashmap::DashMap;
use geocode::GeoResolver;
use tokio::time::Instant;
use tracing::{info, warn};

/// One remote map client. Operations applied to its surface are journaled and
/// handed back to the client for replay.
pub type Session = MarkerSession<MemorySurface>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RegistryLimits {
    pub max_sessions: usize,
    /// Sessions untouched for this long are dropped by
    /// [`SessionRegistry::evict_idle`]. Zero keeps sessions forever.
    pub idle_timeout: Duration,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self {
            max_sessions: 1024,
            idle_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Returned when a new session would exceed [`RegistryLimits::max_sessions`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RegistryFull {
    pub limit: usize,
}

impl std::fmt::Display for RegistryFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session limit of {} reached", self.limit)
    }
}

impl std::error::Error for RegistryFull {}

struct Entry {
    session: Arc<Session>,
    /// Milliseconds since the registry's epoch.
    touched: AtomicU64,
}

/// Live sessions keyed by client-chosen id. Each session owns its own cache.
pub struct SessionRegistry {
    resolver: Arc<dyn GeoResolver>,
    builder: BuilderConfig,
    source: Option<Arc<dyn RecordSource>>,
    limits: RegistryLimits,
    epoch: Instant,
    sessions: DashMap<String, Entry>,
}

impl SessionRegistry {
    pub fn new(
        resolver: Arc<dyn GeoResolver>,
        builder: BuilderConfig,
        source: Option<Arc<dyn RecordSource>>,
        limits: RegistryLimits,
    ) -> Self {
        Self {
            resolver,
            builder,
            source,
            limits,
            epoch: Instant::now(),
            sessions: DashMap::new(),
        }
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn limits(&self) -> RegistryLimits {
        self.limits
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| {
            entry.touched.store(self.now(), Ordering::Relaxed);
            entry.session.clone()
        })
    }

    /// Idle sessions are swept before a full registry refuses a new id.
    pub fn get_or_create(&self, id: &str) -> Result<Arc<Session>, RegistryFull> {
        if let Some(session) = self.get(id) {
            return Ok(session);
        }
        if self.sessions.len() >= self.limits.max_sessions {
            self.evict_idle();
            if self.sessions.len() >= self.limits.max_sessions {
                warn!(session = id, limit = self.limits.max_sessions, "session refused");
                return Err(RegistryFull {
                    limit: self.limits.max_sessions,
                });
            }
        }
        let now = self.now();
        let entry = self.sessions.entry(id.to_string()).or_insert_with(|| {
            info!(session = id, "session created");
            Entry {
                session: Arc::new(self.open()),
                touched: AtomicU64::new(now),
            }
        });
        Ok(entry.session.clone())
    }

    pub fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            info!(session = id, "session dropped");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Drops sessions idle past the timeout that no request is using.
    ///
    /// Returns the number of sessions dropped.
    pub fn evict_idle(&self) -> usize {
        if self.limits.idle_timeout.is_zero() {
            return 0;
        }
        let idle_ms = self.limits.idle_timeout.as_millis() as u64;
        let now = self.now();
        let before = self.sessions.len();
        self.sessions.retain(|id, entry| {
            let idle = now.saturating_sub(entry.touched.load(Ordering::Relaxed)) >= idle_ms;
            let in_use = Arc::strong_count(&entry.session) > 1;
            if idle && !in_use {
                info!(session = %id, "idle session evicted");
                false
            } else {
                true
            }
        });
        before.saturating_sub(self.sessions.len())
    }

    fn now(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn open(&self) -> Session {
        let session = MarkerSession::new(self.resolver.clone(), MemorySurface::new(), self.builder);
        match &self.source {
            Some(source) => session.with_source(source.clone()),
            None => session,
        }
    }
}
