//! Operator view of stored windows.

use std::sync::Arc;

use serde::Serialize;

use crate::clock::{ceil_secs, millis};
use crate::counter::{SlidingWindowCounter, burst_key, window_key};
use crate::storage::{WindowStore, prune};
use crate::{Identifier, LimitType, Policy, PolicyCatalog, RateLimitError};

/// Current usage of one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    /// Policy category.
    pub category: String,
    /// Which budget of the policy.
    pub limit_type: LimitType,
    /// Requests permitted per window.
    pub limit: u32,
    /// Requests counted in the current window.
    pub used: u32,
    /// Requests still available.
    pub remaining: u32,
    /// Window length in seconds.
    pub window: u64,
    /// When the oldest counted request leaves the window, epoch seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<u64>,
}

/// Read and reset stored windows for one identifier. Storage errors are returned, never
/// swallowed.
pub struct AdminOps<'a, S> {
    catalog: &'a PolicyCatalog,
    counter: &'a SlidingWindowCounter<S>,
}

impl<'a, S: WindowStore> AdminOps<'a, S> {
    pub(crate) fn new(catalog: &'a PolicyCatalog, counter: &'a SlidingWindowCounter<S>) -> Self {
        Self { catalog, counter }
    }

    /// Usage of every configured and ephemeral window for the identifier, without
    /// recording anything.
    pub async fn status(&self, identifier: &Identifier) -> Result<Vec<UsageSnapshot>, RateLimitError> {
        let mut snapshots = Vec::new();
        let ephemeral = self.catalog.ephemeral();

        for policy in self.catalog.policies().chain(ephemeral.iter().map(Arc::as_ref)) {
            let key = window_key(identifier, policy.name());
            snapshots.push(self.snapshot(&key, policy, LimitType::Sustained).await?);

            if let Some(burst) = policy.burst() {
                let key = burst_key(identifier, policy.name());
                snapshots.push(self.snapshot(&key, burst, LimitType::Burst).await?);
            }
        }

        Ok(snapshots)
    }

    /// Clears the identifier's windows for one category, or for every configured and
    /// ephemeral category.
    /// Returns how many stored windows existed.
    pub async fn reset(&self, identifier: &Identifier, category: Option<&str>) -> Result<usize, RateLimitError> {
        let categories: Vec<String> = match category {
            Some(category) => vec![self.catalog.get(category)?.name().to_string()],
            None => self
                .catalog
                .names()
                .map(str::to_string)
                .chain(self.catalog.ephemeral().iter().map(|policy| policy.name().to_string()))
                .collect(),
        };

        let storage = self.counter.storage();
        let mut deleted = 0;

        for category in &categories {
            for key in [window_key(identifier, category), burst_key(identifier, category)] {
                if storage.delete(&key).await? {
                    deleted += 1;
                }
            }
        }

        log::info!("Reset {deleted} rate limit windows for {identifier}");

        Ok(deleted)
    }

    async fn snapshot(&self, key: &str, policy: &Policy, limit_type: LimitType) -> Result<UsageSnapshot, RateLimitError> {
        let now = self.counter.clock().now_millis();
        let window_ms = millis(policy.window());

        let timestamps = prune(self.counter.storage().read(key).await?, now, window_ms);
        let used = u32::try_from(timestamps.len()).unwrap_or(u32::MAX);

        Ok(UsageSnapshot {
            category: policy.name().to_string(),
            limit_type,
            limit: policy.requests(),
            used,
            remaining: policy.requests().saturating_sub(used),
            window: policy.window().as_secs(),
            reset_time: timestamps.iter().min().map(|oldest| ceil_secs(oldest + window_ms)),
        })
    }
}
