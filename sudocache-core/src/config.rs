//! Configuration types

use std::path::PathBuf;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::{ConfigError, SudoFilterFlags, SudoResult};

/// Settings for one cached sudo rule collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SudoCacheConfig {
    /// Domain whose rules are cached; scopes every stored key.
    pub domain: String,
    /// Directory holding the LMDB environment.
    pub cache_path: PathBuf,
    /// Maximum LMDB map size in megabytes.
    pub map_size_mb: usize,
    /// Interval between full refreshes, in seconds.
    #[serde(with = "duration_secs")]
    pub full_refresh_interval: Duration,
    /// Whether user lookups also match netgroup-owned rules.
    pub include_netgroups: bool,
}

impl SudoCacheConfig {
    /// Reasonable settings for `domain`, caching under `cache_path`.
    pub fn for_domain(domain: impl Into<String>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            domain: domain.into(),
            cache_path: cache_path.into(),
            map_size_mb: 64,
            full_refresh_interval: Duration::from_secs(6 * 3600),
            include_netgroups: true,
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> SudoResult<Self> {
        let config: SudoCacheConfig = toml::from_str(text).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - domain is non-empty
    /// - cache_path is non-empty
    /// - map_size_mb > 0
    /// - 0 < full_refresh_interval, within the representable time range
    pub fn validate(&self) -> SudoResult<()> {
        if self.domain.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "domain".to_string(),
            }
            .into());
        }
        if self.cache_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "cache_path".to_string(),
            }
            .into());
        }
        if self.map_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "map_size_mb".to_string(),
                value: self.map_size_mb.to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        if self.full_refresh_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "full_refresh_interval".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        if TimeDelta::from_std(self.full_refresh_interval).is_err() {
            return Err(ConfigError::InvalidValue {
                field: "full_refresh_interval".to_string(),
                value: self.full_refresh_interval.as_secs().to_string(),
                reason: "exceeds the representable time range".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Flags for user rule lookups under this configuration.
    pub fn lookup_flags(&self) -> SudoFilterFlags {
        let mut flags = SudoFilterFlags::user_lookup();
        if !self.include_netgroups {
            flags.remove(SudoFilterFlags::NETGROUPS);
        }
        flags
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SudoCacheError;

    #[test]
    fn test_for_domain_is_valid() {
        let config = SudoCacheConfig::for_domain("example.com", "/var/lib/sudocache");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = SudoCacheConfig::from_toml_str(
            r#"
            domain = "ipa.test"
            cache_path = "/tmp/sudo"
            map_size_mb = 16
            full_refresh_interval = 3600
            include_netgroups = false
            "#,
        )
        .unwrap();
        assert_eq!(config.domain, "ipa.test");
        assert_eq!(config.map_size_mb, 16);
        assert_eq!(config.full_refresh_interval, Duration::from_secs(3600));
        assert!(!config.include_netgroups);
    }

    #[test]
    fn test_from_toml_reports_parse_errors() {
        let err = SudoCacheConfig::from_toml_str("domain = 5").unwrap_err();
        assert!(matches!(err, SudoCacheError::Config(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SudoCacheConfig::for_domain("", "/tmp");
        assert!(matches!(
            config.validate(),
            Err(SudoCacheError::Config(ConfigError::MissingRequired { .. }))
        ));

        config.domain = "ok".to_string();
        config.map_size_mb = 0;
        assert!(matches!(
            config.validate(),
            Err(SudoCacheError::Config(ConfigError::InvalidValue { .. }))
        ));

        config.map_size_mb = 1;
        config.full_refresh_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        config.full_refresh_interval = Duration::from_secs(u64::MAX);
        assert!(matches!(
            config.validate(),
            Err(SudoCacheError::Config(ConfigError::InvalidValue { .. }))
        ));

        config.full_refresh_interval = Duration::from_secs(1);
        config.cache_path = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lookup_flags_follow_netgroup_setting() {
        let mut config = SudoCacheConfig::for_domain("ipa.test", "/tmp");
        assert_eq!(config.lookup_flags(), SudoFilterFlags::user_lookup());

        config.include_netgroups = false;
        let flags = config.lookup_flags();
        assert!(!flags.contains(SudoFilterFlags::NETGROUPS));
        assert!(flags.contains(SudoFilterFlags::USERNAME | SudoFilterFlags::GROUPS));
    }
}
