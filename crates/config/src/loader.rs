use std::path::Path;

use anyhow::{anyhow, bail};

use crate::{
    BurstConfig, Config, GENERAL_ANONYMOUS_CATEGORY, GENERAL_CATEGORY, PolicyConfig, STRICT_ANONYMOUS_CATEGORY,
    StorageConfig,
};

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();

    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("Failed to read configuration file {}: {e}", path.display()))?;

    let config: Config = toml::from_str(&content)?;
    let warnings = validate(&config)?;

    for warning in warnings {
        log::warn!("{warning}");
    }

    Ok(config)
}

/// Fails on anything that would make a policy unusable, and collects warnings for
/// configuration that only weakens limiting.
pub(crate) fn validate(config: &Config) -> anyhow::Result<Vec<String>> {
    let mut warnings = Vec::new();
    let rate_limits = &config.rate_limits;
    let policies = rate_limits.effective_policies();

    for (name, policy) in &policies {
        validate_policy(name, policy)?;
    }

    if !rate_limits.protected_prefix.starts_with('/') {
        bail!(
            "rate_limits.protected_prefix must start with '/', got '{}'",
            rate_limits.protected_prefix
        );
    }

    for endpoint in &rate_limits.endpoints {
        if !endpoint.prefix.starts_with('/') {
            bail!("Endpoint prefix '{}' must start with '/'", endpoint.prefix);
        }

        if !endpoint.prefix.starts_with(rate_limits.protected_prefix.as_str()) {
            warnings.push(format!(
                "Endpoint prefix '{}' is outside the protected prefix '{}' and will never be rate limited",
                endpoint.prefix, rate_limits.protected_prefix
            ));
        }

        if !policies.contains_key(&endpoint.category) {
            warnings.push(format!(
                "Endpoint prefix '{}' maps to unknown category '{}', requests will not be limited by it",
                endpoint.prefix, endpoint.category
            ));
        }
    }

    for category in [GENERAL_CATEGORY, GENERAL_ANONYMOUS_CATEGORY, STRICT_ANONYMOUS_CATEGORY] {
        if !policies.contains_key(category) {
            warnings.push(format!(
                "No policy named '{category}' is configured, requests will not be limited by it"
            ));
        }
    }

    if let StorageConfig::Redis(redis) = &rate_limits.storage
        && redis.response_timeout.is_zero()
    {
        bail!("rate_limits.storage.response_timeout must be greater than zero");
    }

    if config.admin.enabled && !config.admin.path.starts_with('/') {
        bail!("admin.path must start with '/', got '{}'", config.admin.path);
    }

    Ok(warnings)
}

fn validate_policy(name: &str, policy: &PolicyConfig) -> anyhow::Result<()> {
    if name.is_empty() || name.contains(':') {
        bail!("Invalid rate limit category name '{name}': names must be non-empty and must not contain ':'");
    }

    if policy.requests == 0 {
        bail!("Rate limit policy '{name}' must allow at least one request");
    }

    if policy.window.as_millis() == 0 {
        bail!("Rate limit policy '{name}' must have a window of at least one millisecond");
    }

    let Some(BurstConfig { requests, window }) = &policy.burst else {
        return Ok(());
    };

    if *requests == 0 {
        bail!("Burst limit of policy '{name}' must allow at least one request");
    }

    if window.as_millis() == 0 {
        bail!("Burst limit of policy '{name}' must have a window of at least one millisecond");
    }

    if *window > policy.window {
        bail!(
            "Burst window of policy '{name}' ({window:?}) must not be longer than the policy window ({:?})",
            policy.window
        );
    }

    Ok(())
}
