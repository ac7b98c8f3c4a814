//! Turns requests into verdicts.

use std::sync::Arc;
use std::time::Duration;

use config::{FailureMode, RateLimitConfig};

use crate::counter::{CheckOutcome, SlidingWindowCounter, burst_key, window_key};
use crate::storage::{Storage, WindowStore};
use crate::{
    AdminOps, CategoryResolver, Clock, EvaluationResult, Identifier, IdentifierResolver, LimitType, Policy,
    PolicyCatalog, RateLimitError, RateLimitRequest, SystemClock, Verdict,
};

/// Evaluates requests against the configured policies.
///
/// Categories are checked in order, each with its sustained window first and its burst
/// window second. The first full window denies the request; windows checked before it
/// keep the request recorded.
pub struct RateLimitEvaluator<S = Storage> {
    enabled: bool,
    failure_mode: FailureMode,
    catalog: PolicyCatalog,
    identifiers: IdentifierResolver,
    categories: CategoryResolver,
    counter: SlidingWindowCounter<S>,
    longest_window: Duration,
}

impl RateLimitEvaluator<Storage> {
    /// Create an evaluator with the configured storage backend and the system clock.
    pub async fn new(config: &RateLimitConfig) -> Result<Self, RateLimitError> {
        let catalog = PolicyCatalog::from_config(config)?;
        let storage = Storage::from_config(config, catalog.ttl_ceiling(config.window_buffer)).await?;

        Ok(Self::assemble(config, catalog, Arc::new(storage), Arc::new(SystemClock)))
    }
}

impl<S: WindowStore> RateLimitEvaluator<S> {
    /// Create an evaluator over an existing store and clock.
    pub fn with_storage(
        config: &RateLimitConfig,
        storage: Arc<S>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RateLimitError> {
        let catalog = PolicyCatalog::from_config(config)?;
        Ok(Self::assemble(config, catalog, storage, clock))
    }

    fn assemble(config: &RateLimitConfig, catalog: PolicyCatalog, storage: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        let longest_window = catalog.ttl_ceiling(Duration::ZERO);

        log::debug!(
            "Rate limiting {} with {} policies, failing {:?}, counter strategy {:?}",
            if config.enabled { "enabled" } else { "disabled" },
            catalog.names().count(),
            config.failure_mode,
            config.counter,
        );

        Self {
            enabled: config.enabled,
            failure_mode: config.failure_mode,
            identifiers: IdentifierResolver::new(config.trust_forwarded_for),
            categories: CategoryResolver::from_config(config),
            counter: SlidingWindowCounter::new(storage, clock, config.counter, config.window_buffer),
            catalog,
            longest_window,
        }
    }

    /// Whether limits are enforced at all.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The policies in effect.
    pub fn catalog(&self) -> &PolicyCatalog {
        &self.catalog
    }

    /// Resolves who a request is counted against.
    pub fn identify(&self, request: &RateLimitRequest) -> Identifier {
        self.identifiers
            .resolve(&request.auth, request.ip, request.forwarded_for.as_deref())
    }

    /// Evaluates a request by its path and caller.
    pub async fn evaluate_request(&self, request: &RateLimitRequest) -> Result<Verdict, RateLimitError> {
        if !self.enabled {
            return Ok(Verdict::Unrestricted);
        }

        let categories = self.categories.resolve(&request.path, request.auth.is_authenticated());

        if categories.is_empty() {
            log::debug!("Path '{}' is not rate limited", request.path);
            return Ok(Verdict::Unrestricted);
        }

        let identifier = self.identify(request);
        self.evaluate(&identifier, &categories).await
    }

    /// Evaluates explicit categories for an identifier. Unknown categories are skipped.
    ///
    /// Only fails when a store error meets [`FailureMode::Closed`].
    pub async fn evaluate(
        &self,
        identifier: &Identifier,
        categories: &[impl AsRef<str>],
    ) -> Result<Verdict, RateLimitError> {
        if !self.enabled {
            return Ok(Verdict::Unrestricted);
        }

        let mut passed = Vec::with_capacity(categories.len() * 2);

        for category in categories {
            let category = category.as_ref();

            let policy = match self.catalog.get(category) {
                Ok(policy) => policy,
                Err(error) => {
                    log::warn!("{error}, skipping it for {identifier}");
                    continue;
                }
            };

            let mut windows = vec![(window_key(identifier, category), policy.as_ref(), LimitType::Sustained)];

            if let Some(burst) = policy.burst() {
                windows.push((burst_key(identifier, category), burst, LimitType::Burst));
            }

            for (key, budget, limit_type) in windows {
                let outcome = self
                    .counter
                    .check_key(&key, category, limit_type, budget.requests(), budget.window())
                    .await;

                match self.settle(identifier, outcome)? {
                    Some(result) if !result.allowed => {
                        log::warn!(
                            "Rate limit exceeded for {identifier} in category '{category}' ({} limit of {} per {:?})",
                            limit_type.as_str(),
                            result.limit,
                            result.window,
                        );

                        return Ok(Verdict::Denied(result));
                    }
                    Some(result) => passed.push(result),
                    None => {}
                }
            }
        }

        Ok(aggregate(passed))
    }

    /// Evaluates a one-off budget that is not part of the configured catalog, such as a
    /// limit chosen by a handler at runtime. Calls with the same scope and budget share a
    /// window.
    pub async fn evaluate_ad_hoc(
        &self,
        identifier: &Identifier,
        scope: &str,
        requests: u32,
        window: Duration,
    ) -> Result<Verdict, RateLimitError> {
        if window > self.longest_window {
            return Err(RateLimitError::misconfigured(
                format!("{}:{scope}", crate::EPHEMERAL_NAMESPACE),
                format!(
                    "ad hoc window {window:?} is longer than the longest configured window {:?}",
                    self.longest_window
                ),
            ));
        }

        let policy: Arc<Policy> = self.catalog.register_ephemeral(scope, requests, window)?;
        self.evaluate(identifier, &[policy.name()]).await
    }

    /// Operator access to stored windows.
    pub fn admin(&self) -> AdminOps<'_, S> {
        AdminOps::new(&self.catalog, &self.counter)
    }

    fn settle(&self, identifier: &Identifier, outcome: CheckOutcome) -> Result<Option<EvaluationResult>, RateLimitError> {
        match outcome {
            CheckOutcome::Admitted(result) | CheckOutcome::Rejected(result) => Ok(Some(result)),
            CheckOutcome::Indeterminate(error) => match self.failure_mode {
                FailureMode::Open => {
                    log::error!("Rate limit storage failed for {identifier}, allowing the request: {error}");
                    Ok(None)
                }
                FailureMode::Closed => {
                    log::error!("Rate limit storage failed for {identifier}, rejecting the request: {error}");
                    Err(error.into())
                }
            },
        }
    }
}

/// Combines passing windows into the view reported to the caller: the largest limit,
/// the smallest remaining count and the latest reset. Category and limit type come from
/// the window with the least headroom.
fn aggregate(passed: Vec<EvaluationResult>) -> Verdict {
    let Some(tightest) = passed.iter().min_by_key(|result| result.remaining) else {
        return Verdict::Unrestricted;
    };

    let mut combined = EvaluationResult {
        allowed: true,
        retry_after: None,
        ..tightest.clone()
    };

    for result in &passed {
        combined.limit = combined.limit.max(result.limit);
        combined.reset_time = combined.reset_time.max(result.reset_time);
        combined.window = combined.window.max(result.window);
    }

    Verdict::Allowed(combined)
}
