// Provider configuration
// Cache expiry tiers, dial timeout and pool sizing, loaded from JSON or environment

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ProviderError, ProviderResult};

pub const DEFAULT_APPLICATION_NAME: &str = "terraform-provider-azuresql";

/// Expiry windows of the connection cache.
///
/// An entry unused for `expire_after` is evicted and redialed on next use.
/// An entry not validated for `refresh_after` is pinged before it is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(with = "duration_secs")]
    pub expire_after: Duration,
    #[serde(with = "duration_secs")]
    pub refresh_after: Duration,
}

impl CacheConfig {
    pub fn production() -> Self {
        Self {
            expire_after: Duration::from_secs(30 * 60),
            refresh_after: Duration::from_secs(5 * 60),
        }
    }

    /// Short windows so acceptance runs exercise eviction and revalidation
    pub fn testing() -> Self {
        Self {
            expire_after: Duration::from_secs(60),
            refresh_after: Duration::from_secs(5),
        }
    }

    pub fn validate(&self) -> ProviderResult<()> {
        if self.expire_after.is_zero() {
            return Err(ProviderError::Config(
                "cache expire_after must be greater than zero".to_string(),
            ));
        }
        if self.refresh_after > self.expire_after {
            return Err(ProviderError::Config(format!(
                "cache refresh_after ({:?}) must not exceed expire_after ({:?})",
                self.refresh_after, self.expire_after
            )));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::production()
    }
}

/// Provider-wide settings, created once per provider instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub cache: CacheConfig,
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
    pub pool_max_size: u32,
    pub application_name: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::production(),
            connect_timeout: Duration::from_secs(30),
            pool_max_size: 1,
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
        }
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> ProviderResult<()> {
        self.cache.validate()?;
        if self.pool_max_size == 0 {
            return Err(ProviderError::Config(
                "pool_max_size must be at least 1".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(ProviderError::Config(
                "connect_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON document; missing fields take their defaults
    pub fn from_json(raw: &str) -> ProviderResult<Self> {
        let config: ProviderConfig = serde_json::from_str(raw)
            .map_err(|e| ProviderError::Config(format!("invalid provider config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Build the configuration from `AZURESQL_*` environment variables
    pub fn from_env() -> ProviderResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> ProviderResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ProviderConfig::default();

        if let Some(flag) = lookup("AZURESQL_TEST_MODE") {
            if parse_flag(&flag) {
                config.cache = CacheConfig::testing();
            }
        }
        if let Some(secs) = lookup_secs(&lookup, "AZURESQL_CACHE_EXPIRE_SECS")? {
            config.cache.expire_after = secs;
        }
        if let Some(secs) = lookup_secs(&lookup, "AZURESQL_CACHE_REFRESH_SECS")? {
            config.cache.refresh_after = secs;
        }
        if let Some(secs) = lookup_secs(&lookup, "AZURESQL_CONNECT_TIMEOUT_SECS")? {
            config.connect_timeout = secs;
        }
        if let Some(raw) = lookup("AZURESQL_POOL_MAX_SIZE") {
            config.pool_max_size = raw.trim().parse().map_err(|_| {
                ProviderError::Config(format!("AZURESQL_POOL_MAX_SIZE is not a number: '{}'", raw))
            })?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

fn lookup_secs<F>(lookup: &F, key: &str) -> ProviderResult<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| ProviderError::Config(format!("{} is not a number of seconds: '{}'", key, raw))),
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
