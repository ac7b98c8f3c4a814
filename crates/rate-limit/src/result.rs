//! Outcomes of limit checks.

use std::time::Duration;

use serde::Serialize;

/// Which budget of a policy produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitType {
    /// The policy's main window.
    Sustained,
    /// The policy's short burst window.
    Burst,
}

impl LimitType {
    /// Lowercase name, as reported to callers.
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitType::Sustained => "sustained",
            LimitType::Burst => "burst",
        }
    }
}

/// Result of checking one window, or the aggregate over all windows of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationResult {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests permitted per window.
    pub limit: u32,
    /// Requests still available in the window after this one.
    pub remaining: u32,
    /// When the window frees up again, epoch seconds.
    pub reset_time: u64,
    /// Length of the window.
    pub window: Duration,
    /// How long a rejected caller should wait.
    pub retry_after: Option<Duration>,
    /// Category that produced this result.
    pub category: String,
    /// Budget that produced this result.
    pub limit_type: LimitType,
}

impl EvaluationResult {
    /// Retry delay in whole seconds, rounded up.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after
            .map(|delay| u64::try_from(delay.as_millis().div_ceil(1000)).unwrap_or(u64::MAX))
    }
}

/// The decision for a whole request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// No limit applied: the path is exempt, limiting is disabled, or no window could be
    /// read. The request proceeds without rate limit headers.
    Unrestricted,
    /// Every window admitted the request. Carries the most constrained view.
    Allowed(EvaluationResult),
    /// A window rejected the request. Carries that window's result.
    Denied(EvaluationResult),
}

impl Verdict {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Verdict::Denied(_))
    }

    /// The result to report, if any limit applied.
    pub fn result(&self) -> Option<&EvaluationResult> {
        match self {
            Verdict::Unrestricted => None,
            Verdict::Allowed(result) | Verdict::Denied(result) => Some(result),
        }
    }
}
