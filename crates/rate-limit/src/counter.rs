//! Sliding window log counter.

use std::sync::Arc;
use std::time::Duration;

use config::CounterStrategy;

use crate::clock::{Clock, ceil_secs, millis};
use crate::storage::{Admission, StorageError, WindowStore, decide};
use crate::{EvaluationResult, Identifier, LimitType};

/// Storage key of the sustained window for a category.
pub fn window_key(identifier: &Identifier, category: &str) -> String {
    format!("{identifier}:{category}")
}

/// Storage key of the burst window for a category.
pub fn burst_key(identifier: &Identifier, category: &str) -> String {
    format!("{identifier}:{category}:burst")
}

/// Result of one window check.
#[derive(Debug)]
pub enum CheckOutcome {
    /// The request fit and was recorded.
    Admitted(EvaluationResult),
    /// The window was full. Nothing was recorded.
    Rejected(EvaluationResult),
    /// The store could not be read or written, so no decision was made.
    Indeterminate(StorageError),
}

/// Checks and records requests against window logs in a [`WindowStore`].
pub struct SlidingWindowCounter<S> {
    storage: Arc<S>,
    clock: Arc<dyn Clock>,
    strategy: CounterStrategy,
    ttl_buffer: Duration,
}

impl<S: WindowStore> SlidingWindowCounter<S> {
    /// Creates a counter. Stored logs expire `ttl_buffer` after their window.
    pub fn new(storage: Arc<S>, clock: Arc<dyn Clock>, strategy: CounterStrategy, ttl_buffer: Duration) -> Self {
        Self {
            storage,
            clock,
            strategy,
            ttl_buffer,
        }
    }

    /// Checks the sustained window of `category` for `identifier`, recording the request
    /// when it fits.
    pub async fn check_and_record(
        &self,
        identifier: &Identifier,
        category: &str,
        limit: u32,
        window: Duration,
    ) -> CheckOutcome {
        let key = window_key(identifier, category);
        self.check_key(&key, category, LimitType::Sustained, limit, window).await
    }

    pub(crate) async fn check_key(
        &self,
        key: &str,
        category: &str,
        limit_type: LimitType,
        limit: u32,
        window: Duration,
    ) -> CheckOutcome {
        let now = self.clock.now_millis();
        let window_ms = millis(window);
        let ttl = window + self.ttl_buffer;

        let admission = match self.strategy {
            CounterStrategy::ReadModifyWrite => self.read_modify_write(key, now, window_ms, limit, ttl).await,
            CounterStrategy::Atomic => self.storage.admit_atomic(key, now, window_ms, limit, ttl).await,
        };

        let result = |allowed, remaining, reset_ms: u64, retry_after| EvaluationResult {
            allowed,
            limit,
            remaining,
            reset_time: ceil_secs(reset_ms),
            window,
            retry_after,
            category: category.to_string(),
            limit_type,
        };

        match admission {
            Ok(Admission::Admitted { count }) => {
                let count = u32::try_from(count).unwrap_or(u32::MAX);
                CheckOutcome::Admitted(result(true, limit.saturating_sub(count), now + window_ms, None))
            }
            Ok(Admission::Rejected { oldest }) => {
                let reset_ms = oldest + window_ms;
                let retry_after = Duration::from_millis(reset_ms.saturating_sub(now));

                log::debug!("Window '{key}' is full, next slot frees up in {retry_after:?}");

                CheckOutcome::Rejected(result(false, 0, reset_ms, Some(retry_after)))
            }
            Err(error) => CheckOutcome::Indeterminate(error),
        }
    }

    async fn read_modify_write(
        &self,
        key: &str,
        now: u64,
        window_ms: u64,
        limit: u32,
        ttl: Duration,
    ) -> Result<Admission, StorageError> {
        let stored = self.storage.read(key).await?;
        let (admission, updated) = decide(stored, now, window_ms, limit);

        if let Some(timestamps) = updated {
            self.storage.write(key, &timestamps, ttl).await?;
        }

        Ok(admission)
    }

    pub(crate) fn storage(&self) -> &S {
        &self.storage
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }
}
