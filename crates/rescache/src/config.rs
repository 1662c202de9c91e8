use std::time::Duration;

use serde::Deserialize;

/// Configuration for a [`ResourceCache`](crate::ResourceCache).
///
/// All fields have defaults, so partial configuration files work:
///
/// ```yaml
/// name: plugin-settings
/// fetch_timeout: 5s
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Name of the cache, used to tag log lines and metrics.
    pub name: String,

    /// Maximum time a single fetch attempt may take.
    ///
    /// When exceeded, the attempt is abandoned and the cache transitions to
    /// `Failed` with [`CacheError::Timeout`](crate::CacheError::Timeout).
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "resource".into(),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

impl CacheConfig {
    /// Creates a default configuration with the given cache name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.name, "resource");
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_parse_partial_yaml() {
        let config: CacheConfig = serde_yaml::from_str("fetch_timeout: 5s").unwrap();
        assert_eq!(config.fetch_timeout, Duration::from_secs(5));
        assert_eq!(config.name, "resource");

        let config: CacheConfig = serde_yaml::from_str("name: dashboards").unwrap();
        assert_eq!(config.name, "dashboards");
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
    }
}
