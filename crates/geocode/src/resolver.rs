use std::sync::Arc;
use std::time::Duration;

use foundation::Coordinate;
use futures_util::future::BoxFuture;

/// Outcome of one resolution attempt.
pub type Resolution = Result<Coordinate, ResolutionFailure>;

/// Recoverable, per-address resolution failure.
///
/// Failures are values, not panics: callers drop the affected record and
/// carry on with the rest of the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionFailure {
    NotFound,
    RateLimited,
    TimedOut,
    Transport(String),
    InvalidResponse(String),
}

impl std::fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionFailure::NotFound => write!(f, "address not found"),
            ResolutionFailure::RateLimited => write!(f, "rate limited by provider"),
            ResolutionFailure::TimedOut => write!(f, "resolution timed out"),
            ResolutionFailure::Transport(msg) => write!(f, "transport error: {msg}"),
            ResolutionFailure::InvalidResponse(msg) => write!(f, "invalid response: {msg}"),
        }
    }
}

impl std::error::Error for ResolutionFailure {}

/// A collaborator that was never initialized.
///
/// Fatal for a cycle: nothing is resolved or reconciled until it is fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub component: &'static str,
    pub reason: String,
}

impl ConfigError {
    pub fn new(component: &'static str, reason: impl Into<String>) -> Self {
        Self {
            component,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} not initialized: {}", self.component, self.reason)
    }
}

impl std::error::Error for ConfigError {}

/// Turns a free-text address into a coordinate.
///
/// Implementations issue exactly one provider call per `resolve` and never
/// retry. `address` is never blank; callers filter those out first.
/// Methods return boxed futures for dyn-compatibility.
pub trait GeoResolver: Send + Sync {
    /// Reports whether the provider is usable at all.
    fn readiness(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn resolve<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Resolution>;

    /// [`resolve`](Self::resolve) with the provider call bounded by `limit`.
    ///
    /// Only the call itself counts toward `limit`. Wrappers that queue work
    /// locally (pacing) override this so the wait happens outside the bound.
    fn resolve_within<'a>(
        &'a self,
        address: &'a str,
        limit: Duration,
    ) -> BoxFuture<'a, Resolution> {
        Box::pin(async move {
            match tokio::time::timeout(limit, self.resolve(address)).await {
                Ok(result) => result,
                Err(_) => Err(ResolutionFailure::TimedOut),
            }
        })
    }
}

impl<R: GeoResolver + ?Sized> GeoResolver for Arc<R> {
    fn readiness(&self) -> Result<(), ConfigError> {
        (**self).readiness()
    }

    fn resolve<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Resolution> {
        (**self).resolve(address)
    }

    fn resolve_within<'a>(
        &'a self,
        address: &'a str,
        limit: Duration,
    ) -> BoxFuture<'a, Resolution> {
        (**self).resolve_within(address, limit)
    }
}
