//! Time source for recency and decay decisions
//!
//! The engine never calls `Utc::now()` directly; it reads an injected
//! [`Clock`] so tier transitions can be driven deterministically in tests.

use chrono::{DateTime, Utc};

/// Supplies the current wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
