//! Who a request is counted against.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::RateLimitError;

const MAX_FORWARDED_ENTRY_LENGTH: usize = 64;
const UNKNOWN_ADDRESS: &str = "unknown";

/// The subject a window is kept for: an account when the caller is authenticated,
/// otherwise the client address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    /// An authenticated account, rendered as `user:<id>`.
    User(String),
    /// A client address, rendered as `ip:<address>`.
    Ip(String),
}

impl Identifier {
    /// Identifier for an account.
    pub fn user(account_id: impl Into<String>) -> Self {
        Self::User(account_id.into())
    }

    /// Identifier for a client address.
    pub fn ip(address: impl fmt::Display) -> Self {
        Self::Ip(address.to_string())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::User(id) => write!(f, "user:{id}"),
            Identifier::Ip(address) => write!(f, "ip:{address}"),
        }
    }
}

impl FromStr for Identifier {
    type Err = RateLimitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("user", id)) if !id.is_empty() => Ok(Self::User(id.to_string())),
            Some(("ip", address)) if !address.is_empty() => Ok(Self::Ip(address.to_string())),
            _ => Err(RateLimitError::InvalidIdentifier(s.to_string())),
        }
    }
}

/// Authentication state of a request, as established by whatever sits in front of us.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    /// No caller identity is known.
    #[default]
    Anonymous,
    /// The caller is signed in.
    Authenticated {
        /// Stable account id.
        account_id: String,
    },
}

impl AuthState {
    /// An authenticated caller.
    pub fn authenticated(account_id: impl Into<String>) -> Self {
        Self::Authenticated {
            account_id: account_id.into(),
        }
    }

    /// Whether an account id is known. An empty id counts as anonymous.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { account_id } if !account_id.is_empty())
    }
}

/// Maps authentication state and transport details to an [`Identifier`].
#[derive(Debug, Clone, Copy)]
pub struct IdentifierResolver {
    trust_forwarded_for: bool,
}

impl IdentifierResolver {
    /// Creates a resolver. With `trust_forwarded_for`, the first `X-Forwarded-For` entry
    /// wins over the socket address.
    pub fn new(trust_forwarded_for: bool) -> Self {
        Self { trust_forwarded_for }
    }

    /// Resolves the identifier for a request. Never fails: without any usable address the
    /// caller is counted as `ip:unknown`.
    pub fn resolve(&self, auth: &AuthState, source_ip: Option<IpAddr>, forwarded_for: Option<&str>) -> Identifier {
        if let AuthState::Authenticated { account_id } = auth
            && !account_id.is_empty()
        {
            return Identifier::User(account_id.clone());
        }

        if self.trust_forwarded_for
            && let Some(address) = forwarded_for.and_then(first_forwarded_entry)
        {
            return Identifier::Ip(address);
        }

        match source_ip {
            Some(ip) => Identifier::ip(ip),
            None => Identifier::Ip(UNKNOWN_ADDRESS.to_string()),
        }
    }
}

fn first_forwarded_entry(header: &str) -> Option<String> {
    let entry = header.split(',').next()?.trim();

    if entry.is_empty() {
        return None;
    }

    Some(entry.chars().take(MAX_FORWARDED_ENTRY_LENGTH).collect())
}
