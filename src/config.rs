use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::coordination::{
    HealthConfig, DEFAULT_GRACE_WINDOW_SECS, DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_TASKS,
    DEFAULT_PROBE_INTERVAL_SECS, DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_STALENESS_SECS,
    DEFAULT_WINDOW_SECS,
};
use crate::core::queue::DEFAULT_MAX_DEPTH;
use crate::core::task::Domain;
use crate::{tlog_debug, Error, Result};

/// Default worker count per domain.
pub const DEFAULT_WORKERS: usize = 4;

/// Per-domain tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainSettings {
    /// Queue capacity.
    pub max_depth: usize,
    /// Concurrent task capacity used for the overload ratio.
    pub max_tasks: usize,
    /// Workers spawned for this domain.
    pub workers: usize,
    /// Seconds of sustained overload before reporting it.
    pub grace_window_secs: u64,
}

impl Default for DomainSettings {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_tasks: DEFAULT_MAX_TASKS,
            workers: DEFAULT_WORKERS,
            grace_window_secs: DEFAULT_GRACE_WINDOW_SECS,
        }
    }
}

impl DomainSettings {
    pub fn grace_window(&self) -> Duration {
        Duration::from_secs(self.grace_window_secs)
    }
}

/// Health monitor tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub probe_interval_secs: u64,
    pub probe_timeout_ms: u64,
    pub staleness_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            probe_interval_secs: DEFAULT_PROBE_INTERVAL_SECS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            staleness_secs: DEFAULT_STALENESS_SECS,
        }
    }
}

impl HealthSettings {
    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            probe_interval: Duration::from_secs(self.probe_interval_secs),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            staleness_threshold: Duration::from_secs(self.staleness_secs),
        }
    }
}

/// Metrics aggregation tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub window_secs: u64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
        }
    }
}

impl MetricsSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Bridge tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Terminal records retained for audit before pruning.
    pub history_limit: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub business: DomainSettings,
    pub technical: DomainSettings,
    pub health: HealthSettings,
    pub metrics: MetricsSettings,
    pub bridge: BridgeSettings,
}

impl Config {
    pub fn trestle_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".trestle"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::trestle_dir()?.join("trestle.toml"))
    }

    pub fn domain(&self, domain: Domain) -> &DomainSettings {
        match domain {
            Domain::Business => &self.business,
            Domain::Technical => &self.technical,
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        tlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            tlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::trestle_dir()?;
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        tlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn ensure_dirs() -> Result<()> {
        let dir = Self::trestle_dir()?;
        if !dir.exists() {
            tlog_debug!("Creating trestle directory: {}", dir.display());
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}
