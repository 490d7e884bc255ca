//! Time source abstraction.
//!
//! Every TTL decision and relative date-range resolution reads the current
//! time through a [`Clock`], so that expiry and "day D vs day D+2" behaviour
//! can be driven deterministically in tests.

use std::fmt::Debug;
use std::sync::Arc;

use crate::Timestamp;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Timestamp;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now()
    }
}

/// Shared clock handle passed to services at construction time.
pub type SharedClock = Arc<dyn Clock>;

/// Convenience constructor for the system clock handle.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
