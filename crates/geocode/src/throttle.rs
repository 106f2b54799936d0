use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::resolver::{ConfigError, GeoResolver, Resolution};

/// Token-bucket pacing for a rate-limited provider.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ThrottleConfig {
    /// Sustained calls per second. Non-positive disables pacing.
    pub rate_per_second: f64,
    /// Calls allowed back to back before pacing kicks in.
    pub burst: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        // Public geocoders commonly allow one request per second.
        Self {
            rate_per_second: 1.0,
            burst: 1,
        }
    }
}

/// Upper bound for a single pacing wait, whatever the configured rate.
const MAX_WAIT: Duration = Duration::from_secs(3600);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

/// Paces calls to the wrapped resolver.
///
/// Each call reserves a slot up front; when the bucket is empty the call
/// waits for its slot instead of failing, so pacing never produces a
/// [`ResolutionFailure`](crate::ResolutionFailure). Reservations are taken in
/// call order.
#[derive(Debug)]
pub struct Throttled<R> {
    inner: R,
    config: ThrottleConfig,
    bucket: Mutex<Bucket>,
}

impl<R> Throttled<R> {
    pub fn new(inner: R, config: ThrottleConfig) -> Self {
        Self {
            inner,
            config,
            bucket: Mutex::new(Bucket {
                tokens: config.burst.max(1) as f64,
                last_update: Instant::now(),
            }),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn config(&self) -> ThrottleConfig {
        self.config
    }

    /// Takes one token and returns how long the caller must wait for it.
    fn reserve(&self) -> Option<Duration> {
        let rate = self.config.rate_per_second;
        if !(rate.is_finite() && rate > 0.0) {
            return None;
        }
        let capacity = self.config.burst.max(1) as f64;

        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_update).as_secs_f64();
        bucket.last_update = now;
        bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity) - 1.0;

        if bucket.tokens >= 0.0 {
            None
        } else {
            let wait = Duration::try_from_secs_f64(-bucket.tokens / rate).unwrap_or(MAX_WAIT);
            Some(wait.min(MAX_WAIT))
        }
    }

    async fn pace(&self) {
        if let Some(wait) = self.reserve() {
            debug!(wait_ms = wait.as_millis() as u64, "throttling resolution");
            tokio::time::sleep(wait).await;
        }
    }
}

impl<R: GeoResolver> GeoResolver for Throttled<R> {
    fn readiness(&self) -> Result<(), ConfigError> {
        self.inner.readiness()
    }

    fn resolve<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Resolution> {
        Box::pin(async move {
            self.pace().await;
            self.inner.resolve(address).await
        })
    }

    /// The pacing wait is not part of `limit`; only the wrapped call is.
    fn resolve_within<'a>(
        &'a self,
        address: &'a str,
        limit: Duration,
    ) -> BoxFuture<'a, Resolution> {
        Box::pin(async move {
            self.pace().await;
            self.inner.resolve_within(address, limit).await
        })
    }
}
