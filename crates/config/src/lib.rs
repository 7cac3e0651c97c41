//! Resource manager configuration, read from YAML through the `config` crate.
//!
//! # Sample Config
//! ```yaml
//! logging:
//!   max_level: INFO
//! resource_manager:
//!   default_pool_size: 128
//!   monitor:
//!     poll_interval_ms: 1000
//!     max_polls: 180
//! cloud_accounts:
//!   - name: lab
//!     account_type: mock
//!     options:
//!       images: "ubuntu-22.04"
//!     pools:
//!       - name: edge-links
//!         pool_type: static
//!         resource_type: network
//!         resources: ["vl-edge-0"]
//! ```

use std::{collections::HashMap, path::Path, time::Duration};

use models::{AccountType, CloudAccount, ResourcePoolInfo, DEFAULT_POOL_SIZE};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;

pub use config_rs::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "config_data/config.yaml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ResMgrConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub resource_manager: ResourceManagerConfig,

    #[serde(default)]
    pub cloud_accounts: Vec<CloudAccountConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResourceManagerConfig {
    /// Size of the two dynamic pools seeded for every cloud account
    #[serde(default = "default_pool_size")]
    pub default_pool_size: usize,

    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Default for ResourceManagerConfig {
    fn default() -> Self {
        Self {
            default_pool_size: DEFAULT_POOL_SIZE,
            monitor: MonitorConfig::default(),
        }
    }
}

/// Readiness polling for freshly created compute resources.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Polls before the resource is reported failed
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
        }
    }
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_polls() -> u32 {
    180
}

/// A cloud account together with the pools to register on it at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct CloudAccountConfig {
    pub name: String,
    pub account_type: AccountType,

    /// Handed to the adapter untouched
    #[serde(default)]
    pub options: HashMap<String, String>,

    #[serde(default)]
    pub pools: Vec<ResourcePoolInfo>,
}

impl CloudAccountConfig {
    pub fn account(&self) -> CloudAccount {
        CloudAccount {
            name: self.name.clone(),
            account_type: self.account_type,
            options: self.options.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoggingLevel {
    ERROR,
    WARN,
    #[default]
    INFO,
    DEBUG,
    TRACE,
    OFF,
}

impl<'de> Deserialize<'de> for LoggingLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = String::deserialize(deserializer)?;

        Ok(match v.to_ascii_uppercase().as_str() {
            "ERROR" => Self::ERROR,
            "WARN" => Self::WARN,
            "INFO" => Self::INFO,
            "DEBUG" => Self::DEBUG,
            "TRACE" => Self::TRACE,
            "OFF" => Self::OFF,
            other => Err(serde::de::Error::custom(format!(
                "Bad logging level {other}"
            )))?,
        })
    }
}

impl From<LoggingLevel> for LevelFilter {
    fn from(value: LoggingLevel) -> Self {
        match value {
            LoggingLevel::ERROR => LevelFilter::ERROR,
            LoggingLevel::WARN => LevelFilter::WARN,
            LoggingLevel::INFO => LevelFilter::INFO,
            LoggingLevel::DEBUG => LevelFilter::DEBUG,
            LoggingLevel::TRACE => LevelFilter::TRACE,
            LoggingLevel::OFF => LevelFilter::OFF,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub log_file: Option<String>,

    #[serde(default)]
    pub max_level: LoggingLevel,
}

pub fn load(path: impl AsRef<Path>) -> Result<ResMgrConfig, ConfigError> {
    config_rs::Config::builder()
        .add_source(config_rs::File::from(path.as_ref()))
        .build()?
        .try_deserialize()
}

pub fn from_yaml_str(yaml: &str) -> Result<ResMgrConfig, ConfigError> {
    config_rs::Config::builder()
        .add_source(config_rs::File::from_str(yaml, config_rs::FileFormat::Yaml))
        .build()?
        .try_deserialize()
}

static CONFIG: OnceCell<ResMgrConfig> = OnceCell::new();

/// Loads `path` as the process wide configuration. Later calls return the first one loaded.
pub fn init_settings(path: impl AsRef<Path>) -> Result<&'static ResMgrConfig, ConfigError> {
    if let Some(existing) = CONFIG.get() {
        return Ok(existing);
    }
    let loaded = load(path)?;
    Ok(CONFIG.get_or_init(|| loaded))
}

/// The process wide configuration, read from [`DEFAULT_CONFIG_PATH`] if nothing was loaded yet.
pub fn settings() -> &'static ResMgrConfig {
    CONFIG.get_or_init(|| load(DEFAULT_CONFIG_PATH).expect("couldn't load config file"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::{PoolType, ResourceType};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = from_yaml_str("cloud_accounts: []").unwrap();

        assert_eq!(config.resource_manager.default_pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(config.resource_manager.monitor, MonitorConfig::default());
        assert_eq!(
            config.resource_manager.monitor.poll_interval(),
            Duration::from_secs(1)
        );
        assert_eq!(config.logging.max_level, LoggingLevel::INFO);
    }

    #[test]
    fn test_accounts_and_pools() {
        let config = from_yaml_str(
            r#"
logging:
  max_level: debug
resource_manager:
  default_pool_size: 4
  monitor:
    poll_interval_ms: 50
    max_polls: 3
cloud_accounts:
  - name: acct1
    account_type: mock
    options:
      images: "ubuntu"
    pools:
      - name: e1
        pool_type: static
        resource_type: network
        max_size: 2
        resources: ["vl-1", "vl-2"]
"#,
        )
        .unwrap();

        assert_eq!(config.logging.max_level, LoggingLevel::DEBUG);
        assert_eq!(config.resource_manager.default_pool_size, 4);
        assert_eq!(config.resource_manager.monitor.max_polls, 3);

        let account = &config.cloud_accounts[0];
        assert_eq!(account.account().account_type, AccountType::Mock);
        assert_eq!(account.options.get("images").map(String::as_str), Some("ubuntu"));

        let pool = &account.pools[0];
        assert_eq!(pool.name, "e1");
        assert_eq!(pool.pool_type, PoolType::Static);
        assert_eq!(pool.resource_type, ResourceType::Network);
        assert_eq!(pool.resources, vec!["vl-1".to_owned(), "vl-2".to_owned()]);
    }

    #[test]
    fn test_bad_logging_level() {
        assert!(from_yaml_str("logging:\n  max_level: LOUD\n").is_err());
    }
}
