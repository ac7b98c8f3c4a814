//! Wall clock abstraction, so window arithmetic can be driven by tests.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of the current time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        millis(since_epoch)
    }
}

#[cfg(any(test, feature = "test-helpers"))]
pub use manual::ManualClock;

#[cfg(any(test, feature = "test-helpers"))]
mod manual {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use super::{Clock, millis};

    /// A clock that only moves when told to.
    #[derive(Debug, Clone, Default)]
    pub struct ManualClock {
        millis: Arc<AtomicU64>,
    }

    impl ManualClock {
        /// Creates a clock frozen at the given epoch milliseconds.
        pub fn new(start_millis: u64) -> Self {
            Self {
                millis: Arc::new(AtomicU64::new(start_millis)),
            }
        }

        /// Moves the clock forward.
        pub fn advance(&self, by: Duration) {
            self.millis.fetch_add(millis(by), Ordering::SeqCst);
        }

        /// Jumps to an absolute epoch millisecond value.
        pub fn set(&self, epoch_millis: u64) {
            self.millis.store(epoch_millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.millis.load(Ordering::SeqCst)
        }
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Epoch milliseconds rounded up to whole seconds.
pub(crate) fn ceil_secs(epoch_millis: u64) -> u64 {
    epoch_millis.div_ceil(1000)
}
