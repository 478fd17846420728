use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level daemon configuration, loaded from a TOML file.
///
/// `source_collectors` and `host_modifiers` are ordered maps so that plugin
/// loading happens in a stable order.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub zac: ZacSettings,
    pub zabbix: ZabbixSettings,
    #[serde(default)]
    pub source_collectors: BTreeMap<String, SourceCollectorSettings>,
    #[serde(default)]
    pub host_modifiers: BTreeMap<String, HostModifierSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZacSettings {
    pub source_collector_dir: PathBuf,
    pub host_modifier_dir: PathBuf,
    pub db_uri: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub health_file: Option<PathBuf>,
    #[serde(default)]
    pub failsafe_ok_file: Option<PathBuf>,
    #[serde(default)]
    pub failsafe_ok_file_strict: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZabbixSettings {
    pub map_dir: PathBuf,
    pub url: String,
    pub username: String,
    pub password: String,
    pub dryrun: bool,
    #[serde(default = "default_tags_prefix")]
    pub tags_prefix: String,
    #[serde(default)]
    pub managed_inventory: Vec<String>,
    #[serde(default = "default_failsafe")]
    pub failsafe: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceCollectorSettings {
    pub module_name: String,
    /// Seconds between collection runs.
    pub update_interval: u64,
    #[serde(default = "default_error_tolerance")]
    pub error_tolerance: u32,
    /// Seconds of rolling error window. Defaults to
    /// `update_interval * error_tolerance`.
    #[serde(default)]
    pub error_duration: Option<u64>,
    /// Collector-specific settings, passed through to the plugin.
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

impl SourceCollectorSettings {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval)
    }

    pub fn error_window(&self) -> Duration {
        let secs = self
            .error_duration
            .unwrap_or(self.update_interval * u64::from(self.error_tolerance));
        Duration::from_secs(secs.max(1))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostModifierSettings {
    /// Registry entry to use. Defaults to the configuration key.
    #[serde(default)]
    pub module_name: Option<String>,
    /// Modifier-specific settings, passed through to the plugin.
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

impl Settings {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path: &Path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
        Ok(settings)
    }

    /// The largest configured collector interval, used to delay the first
    /// merge until every collector has had a chance to report.
    pub fn max_collector_interval(&self) -> Duration {
        self.source_collectors
            .values()
            .map(SourceCollectorSettings::update_interval)
            .max()
            .unwrap_or(Duration::ZERO)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_tags_prefix() -> String {
    "zac_".to_string()
}

fn default_failsafe() -> usize {
    20
}

fn default_error_tolerance() -> u32 {
    5
}
