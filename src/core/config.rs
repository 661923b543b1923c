//! Configuration management

use crate::core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub subsystem: SubsystemConfig,
    #[serde(default = "default_counters")]
    pub counters: Vec<CounterConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            subsystem: SubsystemConfig::default(),
            counters: default_counters(),
        }
    }
}

impl Config {
    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

        let app_config_dir = config_dir.join("perfcounter-watcher");

        if !app_config_dir.exists() {
            fs::create_dir_all(&app_config_dir)?;
        }

        Ok(app_config_dir.join("config.toml"))
    }

    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            let config = Self::default();
            config.save_to(&path)?;
            return Ok(config);
        }

        Self::load_from(&path)
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the watcher cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.general.collect_interval_ms == 0 {
            return Err(Error::Config("collect_interval_ms must be positive".to_string()));
        }
        if self.general.report_interval_ms == 0 {
            return Err(Error::Config("report_interval_ms must be positive".to_string()));
        }

        let mut names = HashSet::new();
        for counter in &self.counters {
            if counter.path.trim().is_empty() {
                return Err(Error::Config(format!("counter '{}' has an empty path", counter.name)));
            }
            if counter.instance.is_empty() {
                return Err(Error::Config(format!(
                    "counter '{}' has an empty instance selector",
                    counter.name
                )));
            }
            if counter.interval_ms == Some(0) {
                return Err(Error::Config(format!(
                    "counter '{}' has a zero interval",
                    counter.name
                )));
            }
            if !names.insert(counter.name.as_str()) {
                return Err(Error::Config(format!("duplicate counter name '{}'", counter.name)));
            }
        }

        Ok(())
    }

    /// Collection interval for a counter, falling back to the global one
    pub fn collect_interval(&self, counter: &CounterConfig) -> Duration {
        Duration::from_millis(counter.interval_ms.unwrap_or(self.general.collect_interval_ms))
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.general.report_interval_ms)
    }
}

/// General agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Background collection interval in milliseconds
    #[serde(default = "default_collect_interval")]
    pub collect_interval_ms: u64,
    /// How often samples are emitted, in milliseconds
    #[serde(default = "default_report_interval")]
    pub report_interval_ms: u64,
    /// Default log filter, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_collect_interval() -> u64 { 1000 }
fn default_report_interval() -> u64 { 5000 }
fn default_log_level() -> String { "info".to_string() }

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            collect_interval_ms: default_collect_interval(),
            report_interval_ms: default_report_interval(),
            log_level: default_log_level(),
        }
    }
}

/// Which counter subsystem backs the queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// PDH on Windows, emulation elsewhere
    Auto,
    Pdh,
    Emulated,
}

/// Subsystem settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsystemConfig {
    #[serde(default = "default_backend")]
    pub backend: Backend,
}

fn default_backend() -> Backend { Backend::Auto }

impl Default for SubsystemConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
        }
    }
}

/// A counter the agent should watch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterConfig {
    /// Metric name used in emitted samples
    pub name: String,
    /// Full counter path, e.g. `\Processor(_Total)\% Processor Time`
    pub path: String,
    /// Instance selector: `*`, `total`, an exact name, or `name#N`
    #[serde(default = "default_instance")]
    pub instance: String,
    /// Per-counter collection interval override
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

fn default_instance() -> String { "*".to_string() }

fn default_counters() -> Vec<CounterConfig> {
    vec![
        CounterConfig { name: "cpu_total".to_string(), path: "\\Processor(_Total)\\% Processor Time".to_string(), instance: "_Total".to_string(), interval_ms: None },
        CounterConfig { name: "memory_available_mb".to_string(), path: "\\Memory\\Available MBytes".to_string(), instance: "*".to_string(), interval_ms: None },
        CounterConfig { name: "process_count".to_string(), path: "\\System\\Processes".to_string(), instance: "*".to_string(), interval_ms: Some(5000) },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.general.collect_interval_ms, 1000);
        assert_eq!(config.subsystem.backend, Backend::Auto);
        assert!(!config.counters.is_empty());
    }

    #[test]
    fn test_parse_partial_file() {
        let content = r#"
            [subsystem]
            backend = "emulated"

            [[counters]]
            name = "w3wp_cpu"
            path = '\Process(w3wp)\% Processor Time'
            interval_ms = 250
        "#;
        let config: Config = toml::from_str(content).unwrap();

        assert_eq!(config.subsystem.backend, Backend::Emulated);
        assert_eq!(config.general.report_interval_ms, 5000);
        assert_eq!(config.counters.len(), 1);
        assert_eq!(config.counters[0].instance, "*");
        assert_eq!(
            config.collect_interval(&config.counters[0]),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_validate_rejects_bad_counters() {
        let mut config = Config::default();
        config.counters.push(config.counters[0].clone());
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.counters[0].path = "  ".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.general.collect_interval_ms = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_save_and_load_from() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.general.report_interval_ms = 750;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.general.report_interval_ms, 750);
        assert_eq!(loaded.counters.len(), config.counters.len());
        assert_eq!(loaded.counters[0].path, config.counters[0].path);
    }

    #[test]
    fn test_load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[general\ncollect_interval_ms = ").unwrap();

        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }
}
