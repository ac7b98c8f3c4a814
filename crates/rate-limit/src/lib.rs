//! Per-caller rate limiting over a shared window store.
//!
//! A request is mapped to an [`Identifier`] (account id, else client address) and to the
//! ordered list of policy categories that apply to its path. Each category is checked with
//! a sliding window log kept in the store, sustained limit first and burst limit second.
//! The first rejection decides the request; otherwise the most constrained category
//! decides the reported headroom.
//!
//! Storage failures never block traffic unless strict enforcement is configured.

#![deny(missing_docs)]

mod admin;
mod category;
mod clock;
mod counter;
mod error;
mod evaluator;
mod identifier;
mod policy;
mod request;
mod result;
mod storage;

pub use admin::{AdminOps, UsageSnapshot};
pub use category::CategoryResolver;
#[cfg(any(test, feature = "test-helpers"))]
pub use clock::ManualClock;
pub use clock::{Clock, SystemClock};
pub use counter::{CheckOutcome, SlidingWindowCounter, burst_key, window_key};
pub use error::RateLimitError;
pub use evaluator::RateLimitEvaluator;
pub use identifier::{AuthState, Identifier, IdentifierResolver};
pub use policy::{EPHEMERAL_NAMESPACE, Policy, PolicyCatalog};
pub use request::{RateLimitRequest, RateLimitRequestBuilder};
pub use result::{EvaluationResult, LimitType, Verdict};
pub use storage::{Admission, InMemoryStorage, RedisStorage, Storage, StorageError, WindowStore};
