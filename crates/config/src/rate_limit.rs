//! Rate limiting configuration structures.

use std::{collections::BTreeMap, time::Duration};

use duration_str::{deserialize_duration, deserialize_option_duration};
use serde::Deserialize;

/// Name of the category every protected request is charged against.
pub const GENERAL_CATEGORY: &str = "general";
/// Category added for anonymous callers on regular paths.
pub const GENERAL_ANONYMOUS_CATEGORY: &str = "general-anonymous";
/// Category added for anonymous callers on sensitive paths.
pub const STRICT_ANONYMOUS_CATEGORY: &str = "strict-anonymous";

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled.
    pub enabled: bool,
    /// Which policy table is active.
    pub mode: PolicyMode,
    /// What to do when the backing store cannot be reached.
    pub failure_mode: FailureMode,
    /// How the sliding window counter talks to the store.
    pub counter: CounterStrategy,
    /// Added to the window to get the time-to-live of stored records.
    #[serde(deserialize_with = "deserialize_duration")]
    pub window_buffer: Duration,
    /// Whether the first `X-Forwarded-For` entry is preferred over the peer address.
    ///
    /// Without a proxy in front that overwrites the header, anonymous callers can pick
    /// a fresh identity per request by sending their own header value.
    pub trust_forwarded_for: bool,
    /// Only paths below this prefix are rate limited.
    pub protected_prefix: String,
    /// Path prefixes that are never rate limited.
    pub exempt_paths: Vec<String>,
    /// Path prefixes where anonymous callers get the strict anonymous policy.
    pub sensitive_paths: Vec<String>,
    /// Storage backend configuration.
    pub storage: StorageConfig,
    /// Overrides merged on top of the built-in standard policy table.
    pub policies: BTreeMap<String, PolicyConfig>,
    /// Overrides merged on top of the built-in permissive policy table.
    pub permissive_policies: BTreeMap<String, PolicyConfig>,
    /// Path prefix to category mapping.
    pub endpoints: Vec<EndpointConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: PolicyMode::default(),
            failure_mode: FailureMode::default(),
            counter: CounterStrategy::default(),
            window_buffer: Duration::from_secs(60),
            trust_forwarded_for: true,
            protected_prefix: "/api/".to_string(),
            exempt_paths: vec!["/api/health".to_string()],
            sensitive_paths: vec!["/api/auth/".to_string()],
            storage: StorageConfig::default(),
            policies: BTreeMap::new(),
            permissive_policies: BTreeMap::new(),
            endpoints: default_endpoints(),
        }
    }
}

impl RateLimitConfig {
    /// The policy table in effect: built-in defaults for the active mode, with the
    /// overrides for that mode applied by name.
    ///
    /// Permissive mode replaces the standard table entirely.
    pub fn effective_policies(&self) -> BTreeMap<String, PolicyConfig> {
        let (mut table, overrides) = match self.mode {
            PolicyMode::Standard => (standard_policies(), &self.policies),
            PolicyMode::Permissive => (permissive_policies(), &self.permissive_policies),
        };

        for (name, policy) in overrides {
            table.insert(name.clone(), policy.clone());
        }

        table
    }
}

/// Selects the policy table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Production limits.
    #[default]
    Standard,
    /// Relaxed limits for lower-stakes environments.
    Permissive,
}

/// Behaviour when the store errors or times out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Let the request through and log the failure.
    #[default]
    Open,
    /// Refuse the request with a server error.
    Closed,
}

/// Counter update strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterStrategy {
    /// Read, prune and write back as separate store operations. Concurrent hits on the
    /// same key may over-admit slightly.
    #[default]
    ReadModifyWrite,
    /// Run the whole check as one atomic store operation.
    Atomic,
}

/// A named limit: `requests` admissions per sliding `window`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Maximum admissions inside the window.
    pub requests: u32,
    /// Length of the sliding window.
    #[serde(deserialize_with = "deserialize_duration")]
    pub window: Duration,
    /// Tighter limit over a shorter window, checked after the sustained one.
    #[serde(default)]
    pub burst: Option<BurstConfig>,
}

impl PolicyConfig {
    /// Creates a policy without a burst limit.
    pub fn new(requests: u32, window: Duration) -> Self {
        Self {
            requests,
            window,
            burst: None,
        }
    }

    /// Adds a burst limit.
    pub fn with_burst(mut self, requests: u32, window: Duration) -> Self {
        self.burst = Some(BurstConfig { requests, window });
        self
    }
}

/// Burst sub-policy of a category.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BurstConfig {
    /// Maximum admissions inside the burst window.
    pub requests: u32,
    /// Length of the burst window.
    #[serde(deserialize_with = "deserialize_duration")]
    pub window: Duration,
}

/// Maps a path prefix to a policy category.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    /// Path prefix, matched against the request path.
    pub prefix: String,
    /// Category charged for matching requests.
    pub category: String,
}

impl EndpointConfig {
    fn new(prefix: &str, category: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            category: category.to_string(),
        }
    }
}

const HOUR: Duration = Duration::from_secs(3600);
const MINUTE: Duration = Duration::from_secs(60);

/// Built-in production policy table.
pub fn standard_policies() -> BTreeMap<String, PolicyConfig> {
    BTreeMap::from([
        (
            GENERAL_CATEGORY.to_string(),
            PolicyConfig::new(1000, HOUR).with_burst(30, MINUTE),
        ),
        (GENERAL_ANONYMOUS_CATEGORY.to_string(), PolicyConfig::new(100, HOUR)),
        (STRICT_ANONYMOUS_CATEGORY.to_string(), PolicyConfig::new(20, HOUR)),
        ("auth".to_string(), PolicyConfig::new(10, 5 * MINUTE)),
        ("upload".to_string(), PolicyConfig::new(50, HOUR).with_burst(5, MINUTE)),
        ("chat".to_string(), PolicyConfig::new(100, HOUR).with_burst(10, MINUTE)),
        ("export".to_string(), PolicyConfig::new(20, HOUR)),
    ])
}

/// Built-in permissive table: the standard categories at ten times the volume, no bursts.
pub fn permissive_policies() -> BTreeMap<String, PolicyConfig> {
    standard_policies()
        .into_iter()
        .map(|(name, policy)| (name, PolicyConfig::new(policy.requests.saturating_mul(10), policy.window)))
        .collect()
}

fn default_endpoints() -> Vec<EndpointConfig> {
    vec![
        EndpointConfig::new("/api/auth/", "auth"),
        EndpointConfig::new("/api/upload/", "upload"),
        EndpointConfig::new("/api/chat/", "chat"),
        EndpointConfig::new("/api/export/", "export"),
    ]
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-process storage. Only correct for a single instance.
    Memory(MemoryConfig),
    /// Redis storage shared by all instances.
    Redis(Box<RedisConfig>),
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory(MemoryConfig::default())
    }
}

/// In-memory storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryConfig {
    /// Maximum number of window records kept in memory.
    pub max_capacity: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { max_capacity: 100_000 }
    }
}

/// Redis storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Redis connection URL (redis:// or rediss:// for TLS).
    pub url: String,
    /// Connection pool configuration.
    #[serde(default)]
    pub pool: RedisPoolConfig,
    /// TLS configuration.
    pub tls: Option<RedisTlsConfig>,
    /// Key prefix for all rate limit keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Response timeout for Redis commands.
    #[serde(default = "default_response_timeout", deserialize_with = "deserialize_duration")]
    pub response_timeout: Duration,
}

fn default_key_prefix() -> String {
    "turnstile:rate_limit:".to_string()
}

fn default_response_timeout() -> Duration {
    Duration::from_secs(1)
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            pool: RedisPoolConfig::default(),
            tls: None,
            key_prefix: default_key_prefix(),
            response_timeout: default_response_timeout(),
        }
    }
}

/// Redis connection pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisPoolConfig {
    /// Maximum number of connections.
    pub max_size: Option<usize>,
    /// Timeout for creating connections.
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub timeout_create: Option<Duration>,
    /// Timeout for waiting for a connection.
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub timeout_wait: Option<Duration>,
    /// Timeout for recycling idle connections.
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub timeout_recycle: Option<Duration>,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            max_size: Some(16),
            timeout_create: Some(Duration::from_secs(1)),
            timeout_wait: Some(Duration::from_secs(1)),
            timeout_recycle: Some(Duration::from_secs(300)),
        }
    }
}

/// Redis TLS configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisTlsConfig {
    /// Path to CA certificate file.
    pub ca_cert_path: Option<String>,
    /// Path to client certificate file (for mutual TLS).
    pub client_cert_path: Option<String>,
    /// Path to client key file (for mutual TLS).
    pub client_key_path: Option<String>,
}
