//! Injectable wall-clock capability, so store-metadata timestamps are testable.

use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Real wall clock backed by `SystemTime`.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Fixed clock for deterministic tests.
#[cfg(any(test, feature = "test-util"))]
pub struct FixedClock(pub std::sync::atomic::AtomicI64);

#[cfg(any(test, feature = "test-util"))]
impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}
