//! Mockable time source for the pool's background loops (§5: "internal
//! health/TTL loops use a time source that is mockable"). Timestamps are
//! milliseconds on an arbitrary monotonic origin — never wall-clock — so
//! tests can advance a `FakeClock` instantly instead of sleeping in real time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Real wall/monotonic time, anchored to process start.
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// A clock tests advance explicitly, so hibernation/TTL logic can be
/// exercised without real sleeps.
#[derive(Default)]
pub struct FakeClock {
    millis: AtomicU64,
}

impl FakeClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { millis: AtomicU64::new(0) })
    }

    pub fn advance(&self, d: Duration) {
        self.millis.fetch_add(d.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}
