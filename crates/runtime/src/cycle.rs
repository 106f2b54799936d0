use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Identifies one sync cycle.
///
/// Tokens are issued in strictly increasing order by a [`CycleTracker`]; the
/// first token is `1`.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CycleToken(u64);

impl CycleToken {
    pub fn index(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CycleToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cycle#{}", self.0)
    }
}

/// Monotonic generation counter used for staleness detection.
///
/// Every new cycle takes a token with [`begin`](Self::begin). A cycle whose
/// work completes after a newer one has begun is stale, even when both
/// cycles were started for the same location context.
#[derive(Debug, Default)]
pub struct CycleTracker {
    latest: AtomicU64,
}

impl CycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> CycleToken {
        CycleToken(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// The most recently issued token, if any.
    pub fn latest(&self) -> Option<CycleToken> {
        match self.latest.load(Ordering::SeqCst) {
            0 => None,
            n => Some(CycleToken(n)),
        }
    }

    pub fn is_current(&self, token: CycleToken) -> bool {
        self.latest.load(Ordering::SeqCst) == token.0
    }

    pub fn is_stale(&self, token: CycleToken) -> bool {
        !self.is_current(token)
    }
}
