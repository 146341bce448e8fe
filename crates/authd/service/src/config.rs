//! Service configuration

use crate::error::{ServiceError, ServiceResult};
use authd_engine::EngineConfig;
use authd_rules::BusyPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Service configuration, read from `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Policy document imported at start instead of the bundled one
    pub policy_path: Option<PathBuf>,

    /// Import a policy when the store has never been populated
    pub import_on_start: bool,

    pub store: StoreSettings,

    pub engine: EngineConfig,

    /// Default tracing filter when `RUST_LOG` is unset
    pub log_filter: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            policy_path: None,
            import_on_start: true,
            store: StoreSettings::default(),
            engine: EngineConfig::default(),
            log_filter: None,
        }
    }
}

/// Lock contention budget of the rule store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub busy_timeout_ms: u64,
    pub busy_retries: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        let busy = BusyPolicy::default();
        Self {
            busy_timeout_ms: busy.timeout.as_millis() as u64,
            busy_retries: busy.retries,
        }
    }
}

impl StoreSettings {
    pub fn busy_policy(&self) -> BusyPolicy {
        BusyPolicy {
            timeout: Duration::from_millis(self.busy_timeout_ms),
            retries: self.busy_retries,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from `path`, or from the default location.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> ServiceResult<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&contents)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(contents: &str) -> ServiceResult<Self> {
        toml::from_str(contents).map_err(|e| ServiceError::Config(e.to_string()))
    }

    /// `<config dir>/authd/config.toml`
    pub fn default_path() -> ServiceResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ServiceError::Config("Cannot find config directory".into()))?;
        Ok(config_dir.join("authd").join("config.toml"))
    }
}
