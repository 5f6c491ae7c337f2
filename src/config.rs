//! Configuration for callkeeper.
//!
//! All settings come from a single YAML file (default `config.yaml` in the
//! working directory). Only `radio.frequency` and `radio.gain` are required;
//! everything else has a sensible default so a minimal config stays minimal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0} (create it from config.yaml.example)")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("missing required field: {0} (update your config.yaml)")]
    MissingField(&'static str),
}

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    radio: RadioSection,
    #[serde(default)]
    watchdog: WatchdogSection,
    #[serde(default)]
    ingest: IngestSection,
    #[serde(default)]
    notifications: NotificationsSection,
    #[serde(default)]
    units: HashMap<u32, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RadioSection {
    frequency: Option<f64>,
    gain: Option<f64>,
    #[serde(default)]
    device_index: u32,
    program: Option<String>,
    decode_log: Option<PathBuf>,
    event_log: Option<PathBuf>,
    stderr_log: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
struct WatchdogSection {
    #[serde(default = "default_restart_interval")]
    restart_interval_secs: u64,
    #[serde(default = "default_frozen_check_interval")]
    frozen_check_interval_secs: u64,
    #[serde(default = "default_frozen_timeout")]
    frozen_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct IngestSection {
    #[serde(default = "default_staging_dir")]
    staging_dir: PathBuf,
    #[serde(default = "default_store_dir")]
    store_dir: PathBuf,
    #[serde(default = "default_dedup_window")]
    dedup_window_secs: u64,
    #[serde(default)]
    recursive: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct NotificationsSection {
    #[serde(default)]
    enabled: bool,
    webhook_url: Option<String>,
}

fn default_restart_interval() -> u64 {
    3600
}

fn default_frozen_check_interval() -> u64 {
    30
}

fn default_frozen_timeout() -> u64 {
    300
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("temp")
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("files")
}

fn default_dedup_window() -> u64 {
    2
}

impl Default for WatchdogSection {
    fn default() -> Self {
        Self {
            restart_interval_secs: default_restart_interval(),
            frozen_check_interval_secs: default_frozen_check_interval(),
            frozen_timeout_secs: default_frozen_timeout(),
        }
    }
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            store_dir: default_store_dir(),
            dedup_window_secs: default_dedup_window(),
            recursive: false,
        }
    }
}

/// Validated capture-process settings
#[derive(Debug, Clone)]
pub struct RadioConfig {
    /// Decoder binary to launch (default `dsd-fme`)
    pub program: String,
    /// Tuner frequency in MHz
    pub frequency: f64,
    /// Tuner gain
    pub gain: f64,
    /// RTL-SDR device index
    pub device_index: u32,
    /// Structured decode log written by the decoder (`-Q`)
    pub decode_log: PathBuf,
    /// Event log written by the decoder (`-J`)
    pub event_log: PathBuf,
    /// File the decoder's stderr is appended to; doubles as the health signal
    pub stderr_log: PathBuf,
}

/// Restart and freeze-detection policy values
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub restart_interval_secs: u64,
    pub frozen_check_interval_secs: u64,
    pub frozen_timeout_secs: u64,
}

/// File ingestion settings
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Directory the decoder drops per-call recordings into
    pub staging_dir: PathBuf,
    /// Root of the date-bucketed store
    pub store_dir: PathBuf,
    /// Window for suppressing duplicate filesystem events
    pub dedup_window_secs: u64,
    /// Scan and watch the staging directory recursively
    pub recursive: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NotificationsConfig {
    pub enabled: bool,
    pub webhook_url: Option<String>,
}

/// Fully validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub radio: RadioConfig,
    pub watchdog: WatchdogConfig,
    pub ingest: IngestConfig,
    pub notifications: NotificationsConfig,
    pub units: HashMap<u32, String>,
}

impl Config {
    /// Load and validate configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let raw: ConfigFile = serde_yaml::from_str(content)?;

        let frequency = raw
            .radio
            .frequency
            .ok_or(ConfigError::MissingField("radio.frequency"))?;
        let gain = raw
            .radio
            .gain
            .ok_or(ConfigError::MissingField("radio.gain"))?;

        Ok(Self {
            radio: RadioConfig {
                program: raw.radio.program.unwrap_or_else(|| "dsd-fme".to_string()),
                frequency,
                gain,
                device_index: raw.radio.device_index,
                decode_log: raw
                    .radio
                    .decode_log
                    .unwrap_or_else(|| PathBuf::from("dmr_log.jsonl")),
                event_log: raw
                    .radio
                    .event_log
                    .unwrap_or_else(|| PathBuf::from("events.txt")),
                stderr_log: raw
                    .radio
                    .stderr_log
                    .unwrap_or_else(|| PathBuf::from("dsd-fme.jsonl")),
            },
            watchdog: WatchdogConfig {
                restart_interval_secs: raw.watchdog.restart_interval_secs,
                frozen_check_interval_secs: raw.watchdog.frozen_check_interval_secs,
                frozen_timeout_secs: raw.watchdog.frozen_timeout_secs,
            },
            ingest: IngestConfig {
                staging_dir: raw.ingest.staging_dir,
                store_dir: raw.ingest.store_dir,
                dedup_window_secs: raw.ingest.dedup_window_secs,
                recursive: raw.ingest.recursive,
            },
            notifications: NotificationsConfig {
                enabled: raw.notifications.enabled,
                webhook_url: raw.notifications.webhook_url,
            },
            units: raw.units,
        })
    }

    /// Map a radio unit ID to its configured display name
    pub fn unit_name(&self, unit_id: u32) -> String {
        self.units
            .get(&unit_id)
            .cloned()
            .unwrap_or_else(|| format!("Unknown. Radio ID: {unit_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "radio:\n  frequency: 461.375\n  gain: 32\n";

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();

        assert_eq!(config.radio.frequency, 461.375);
        assert_eq!(config.radio.gain, 32.0);
        assert_eq!(config.radio.device_index, 0);
        assert_eq!(config.radio.program, "dsd-fme");
        assert_eq!(config.radio.stderr_log, PathBuf::from("dsd-fme.jsonl"));

        assert_eq!(config.watchdog.restart_interval_secs, 3600);
        assert_eq!(config.watchdog.frozen_check_interval_secs, 30);
        assert_eq!(config.watchdog.frozen_timeout_secs, 300);

        assert_eq!(config.ingest.staging_dir, PathBuf::from("temp"));
        assert_eq!(config.ingest.store_dir, PathBuf::from("files"));
        assert_eq!(config.ingest.dedup_window_secs, 2);
        assert!(!config.ingest.recursive);

        assert!(!config.notifications.enabled);
        assert!(config.units.is_empty());
    }

    #[test]
    fn test_missing_frequency_is_fatal() {
        let err = Config::from_yaml("radio:\n  gain: 32\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("radio.frequency")));
    }

    #[test]
    fn test_missing_gain_is_fatal() {
        let err = Config::from_yaml("radio:\n  frequency: 461.375\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("radio.gain")));
    }

    #[test]
    fn test_empty_config_is_fatal() {
        let err = Config::from_yaml("{}").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
radio:
  frequency: 154.28
  gain: 40
  device_index: 1
  program: /opt/dsd-fme/dsd-fme
watchdog:
  restart_interval_secs: 7200
  frozen_check_interval_secs: 10
  frozen_timeout_secs: 120
ingest:
  staging_dir: /var/spool/callkeeper/temp
  store_dir: /var/spool/callkeeper/files
  dedup_window_secs: 5
  recursive: true
notifications:
  enabled: true
  webhook_url: https://example.invalid/hook
units:
  26522: "Engine 1"
  31001: "Ladder 2"
"#;
        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.radio.device_index, 1);
        assert_eq!(config.radio.program, "/opt/dsd-fme/dsd-fme");
        assert_eq!(config.watchdog.restart_interval_secs, 7200);
        assert_eq!(config.ingest.dedup_window_secs, 5);
        assert!(config.ingest.recursive);
        assert_eq!(
            config.notifications.webhook_url.as_deref(),
            Some("https://example.invalid/hook")
        );
        assert_eq!(config.units.get(&26522).unwrap(), "Engine 1");
    }

    #[test]
    fn test_unit_name_fallback() {
        let mut config = Config::from_yaml(MINIMAL).unwrap();
        config.units.insert(26522, "Engine 1".to_string());

        assert_eq!(config.unit_name(26522), "Engine 1");
        assert_eq!(config.unit_name(999), "Unknown. Radio ID: 999");
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_invalid_yaml() {
        let err = Config::from_yaml("radio: [not: a: mapping").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }
}
