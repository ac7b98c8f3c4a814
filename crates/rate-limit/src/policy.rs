//! Named rate limit policies and the catalog that holds them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use config::RateLimitConfig;
use dashmap::DashMap;

use crate::RateLimitError;

/// Namespace of policies registered at runtime through [`PolicyCatalog::register_ephemeral`].
pub const EPHEMERAL_NAMESPACE: &str = "adhoc";

/// A request budget over a sliding window, optionally paired with a shorter burst budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    name: String,
    requests: u32,
    window: Duration,
    burst: Option<Box<Policy>>,
}

impl Policy {
    /// Creates a policy, rejecting budgets that can never admit a request.
    pub fn new(name: impl Into<String>, requests: u32, window: Duration) -> Result<Self, RateLimitError> {
        let name = name.into();

        if name.is_empty() {
            return Err(RateLimitError::misconfigured(name, "policy name must not be empty"));
        }

        if requests == 0 {
            return Err(RateLimitError::misconfigured(name, "requests must be greater than zero"));
        }

        if window.as_millis() == 0 {
            return Err(RateLimitError::misconfigured(name, "window must be at least one millisecond"));
        }

        Ok(Self {
            name,
            requests,
            window,
            burst: None,
        })
    }

    /// Attaches a burst limit, checked after the sustained limit under the same category.
    pub fn with_burst(mut self, requests: u32, window: Duration) -> Result<Self, RateLimitError> {
        let burst = Policy::new(self.name.clone(), requests, window).map_err(|error| match error {
            RateLimitError::MisconfiguredPolicy { name, reason } => {
                RateLimitError::misconfigured(name, format!("burst {reason}"))
            }
            other => other,
        })?;

        if window > self.window {
            return Err(RateLimitError::misconfigured(
                &self.name,
                "burst window must not be longer than the policy window",
            ));
        }

        self.burst = Some(Box::new(burst));
        Ok(self)
    }

    /// The category this policy is registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requests admitted per window.
    pub fn requests(&self) -> u32 {
        self.requests
    }

    /// Length of the sliding window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// The burst sub-policy, if any.
    pub fn burst(&self) -> Option<&Policy> {
        self.burst.as_deref()
    }
}

/// Read-mostly registry of policies by category name.
///
/// Configured policies are fixed at construction. Ephemeral policies for ad hoc checks are
/// added on demand and never replace a configured one.
#[derive(Debug)]
pub struct PolicyCatalog {
    policies: BTreeMap<String, Arc<Policy>>,
    ephemeral: DashMap<String, Arc<Policy>>,
}

impl PolicyCatalog {
    /// Builds a catalog from a set of policies. Duplicate and namespaced names are rejected.
    pub fn new(policies: impl IntoIterator<Item = Policy>) -> Result<Self, RateLimitError> {
        let mut catalog = BTreeMap::new();

        for policy in policies {
            if policy.name.contains(':') {
                return Err(RateLimitError::misconfigured(&policy.name, "policy names must not contain ':'"));
            }

            if catalog.contains_key(&policy.name) {
                return Err(RateLimitError::misconfigured(&policy.name, "policy is defined more than once"));
            }

            catalog.insert(policy.name.clone(), Arc::new(policy));
        }

        Ok(Self {
            policies: catalog,
            ephemeral: DashMap::new(),
        })
    }

    /// Builds the catalog for the configured mode.
    pub fn from_config(config: &RateLimitConfig) -> Result<Self, RateLimitError> {
        let mut policies = Vec::new();

        for (name, definition) in config.effective_policies() {
            let mut policy = Policy::new(name, definition.requests, definition.window)?;

            if let Some(burst) = definition.burst {
                policy = policy.with_burst(burst.requests, burst.window)?;
            }

            policies.push(policy);
        }

        Self::new(policies)
    }

    /// Looks up a configured or ephemeral policy.
    pub fn get(&self, category: &str) -> Result<Arc<Policy>, RateLimitError> {
        if let Some(policy) = self.policies.get(category) {
            return Ok(policy.clone());
        }

        self.ephemeral
            .get(category)
            .map(|policy| policy.value().clone())
            .ok_or_else(|| RateLimitError::PolicyNotFound(category.to_string()))
    }

    /// Configured category names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    /// Configured policies, sorted by name.
    pub fn policies(&self) -> impl Iterator<Item = &Policy> {
        self.policies.values().map(Arc::as_ref)
    }

    /// Ephemeral policies registered so far, sorted by name.
    pub fn ephemeral(&self) -> Vec<Arc<Policy>> {
        let mut policies: Vec<_> = self.ephemeral.iter().map(|entry| entry.value().clone()).collect();
        policies.sort_by(|a, b| a.name.cmp(&b.name));

        policies
    }

    /// Longest configured window plus the given buffer. Bounds how long a window record
    /// can usefully live in storage.
    pub fn ttl_ceiling(&self, buffer: Duration) -> Duration {
        let longest = self.policies.values().map(|policy| policy.window).max().unwrap_or_default();
        longest + buffer
    }

    /// Returns the policy for an ad hoc budget, registering it on first use.
    ///
    /// The policy is named `adhoc:<scope>:<requests>:<window_ms>`, so two callers using the
    /// same scope and budget share one window while differing budgets stay isolated.
    ///
    /// Registered policies are kept for the life of the catalog, one entry per distinct
    /// scope and budget. Scopes must come from a fixed set chosen in code, never from
    /// request data.
    pub fn register_ephemeral(
        &self,
        scope: &str,
        requests: u32,
        window: Duration,
    ) -> Result<Arc<Policy>, RateLimitError> {
        if scope.is_empty() {
            return Err(RateLimitError::misconfigured(EPHEMERAL_NAMESPACE, "ad hoc scope must not be empty"));
        }

        let name = format!("{EPHEMERAL_NAMESPACE}:{scope}:{requests}:{}", window.as_millis());

        if let Some(policy) = self.ephemeral.get(&name) {
            return Ok(policy.value().clone());
        }

        let policy = Arc::new(Policy::new(name.clone(), requests, window)?);
        log::debug!("Registered ephemeral rate limit policy '{name}'");

        Ok(self.ephemeral.entry(name).or_insert(policy).value().clone())
    }
}
