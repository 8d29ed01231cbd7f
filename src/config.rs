//! ==============================================================================
//! config.rs - runtime configuration loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `bridge.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - BridgeEndpoint: where the bridge lives (command + data ports, timeouts).
//!     - SamplingConfig: sensor names, sample types, plot buffer size.
//!     - StorageConfig: data directory and which artifacts to write on save.
//!     - ExportConfig: device metadata stamped into the ingestion json.
//!     - UploadConfig: ingestion endpoint and api key.
//!     - PlotConfig: external plot program and its scripts.
//!     - DashboardConfig / LoggingConfig: ambient knobs.
//!
//! every section is optional in the file; missing ones take the defaults below.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::NUM_CHANNELS;
use crate::error::{BridgeError, Result};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BridgeConfig {
    #[serde(default)]
    pub bridge: BridgeEndpoint,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub plot: PlotConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// file this config was read from, `None` when running on defaults
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BridgeEndpoint {
    pub host: String,
    pub command_port: u16,
    pub data_port: u16,
    pub command_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SamplingConfig {
    pub sensor_names: Vec<String>,
    pub sample_types: Vec<String>,
    pub update_interval_ms: u64,
    pub max_plot_points: usize,
    /// serial port the bridge should open on `record`, e.g. "COM3" or "/dev/ttyACM0"
    pub serial_port: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub write_json: bool,
    pub generate_previews: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExportConfig {
    pub device_name: String,
    pub device_type: String,
    pub units: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UploadConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub disallow_duplicates: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PlotConfig {
    pub program: String,
    pub png_script: PathBuf,
    pub interactive_script: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl BridgeEndpoint {
    pub fn command_addr(&self) -> String {
        format!("{}:{}", self.host, self.command_port)
    }

    pub fn data_addr(&self) -> String {
        format!("{}:{}", self.host, self.data_port)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl BridgeConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        let mut config: BridgeConfig = toml::from_str(&content).map_err(|e| {
            BridgeError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        config.source = Some(path.to_path_buf());

        Ok(config)
    }

    /// Load with default fallback
    ///
    /// tries `config/bridge.toml`, then `../config/bridge.toml`.
    pub fn load_or_default() -> Self {
        Self::load_first(&[
            PathBuf::from("config").join("bridge.toml"),
            PathBuf::from("..").join("config").join("bridge.toml"),
        ])
    }

    /// First candidate that loads, or the defaults.
    ///
    /// a file that exists but fails to load is skipped with a warning; the
    /// caller can tell what happened from `source`.
    pub fn load_first<P: AsRef<Path>>(candidates: &[P]) -> Self {
        for path in candidates {
            let path = path.as_ref();
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        eprintln!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        eprintln!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        eprintln!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Reject values the rest of the client cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.bridge.host.trim().is_empty() {
            return Err(BridgeError::Config("bridge.host is empty".into()));
        }
        if self.bridge.command_port == 0 || self.bridge.data_port == 0 {
            return Err(BridgeError::Config("bridge ports must be non-zero".into()));
        }
        if self.bridge.retry_delay_ms == 0 {
            return Err(BridgeError::Config("bridge.retry_delay_ms must be non-zero".into()));
        }
        let sensors = self.sampling.sensor_names.len();
        if sensors == 0 || sensors > NUM_CHANNELS {
            return Err(BridgeError::Config(format!(
                "sampling.sensor_names must list 1..={} sensors, got {}",
                NUM_CHANNELS, sensors
            )));
        }
        if self.sampling.sample_types.is_empty() {
            return Err(BridgeError::Config("sampling.sample_types is empty".into()));
        }
        if self.sampling.max_plot_points == 0 {
            return Err(BridgeError::Config("sampling.max_plot_points must be non-zero".into()));
        }
        Ok(())
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let source = self
            .source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "defaults".to_string());
        println!("┌─────────────────────────────────────────┐");
        println!("│          BRIDGE CONFIGURATION           │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Source: {}", source);
        println!("│ Commands: {}", self.bridge.command_addr());
        println!("│ Data Stream: {}", self.bridge.data_addr());
        println!("│ Retry Delay: {} ms", self.bridge.retry_delay_ms);
        println!("│ Sensors: {}", self.sampling.sensor_names.len());
        println!("│ Data Dir: {}", self.storage.data_dir.display());
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}

impl Default for BridgeEndpoint {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            command_port: 8082,
            data_port: 8083,
            command_timeout_ms: 2000,
            connect_timeout_ms: 5000,
            retry_delay_ms: 2000,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sensor_names: [
                "GM-NO2 (Nitrogen Dioxide)",
                "GM-C2H5OH (Ethanol)",
                "GM-VOC (Volatile Org)",
                "GM-CO (Carbon Monoxide)",
                "MiCS-CO (Approximation)",
                "MiCS-Ethanol (Approximation)",
                "MiCS-VOC (Approximation)",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            sample_types: ["Bunga Kenanga", "Bunga Melati", "Bunga Mawar", "Bunga Sedap Malam"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            update_interval_ms: 250,
            max_plot_points: 20_000,
            serial_port: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            write_json: true,
            generate_previews: false,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            device_name: "ENose-UnoR4".to_string(),
            device_type: "ELECTRONIC_NOSE".to_string(),
            units: "V".to_string(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: crate::upload::DEFAULT_INGESTION_URL.to_string(),
            api_key: None,
            disallow_duplicates: true,
        }
    }
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            program: "gnuplot".to_string(),
            png_script: PathBuf::from("plot_config.plt"),
            interactive_script: PathBuf::from("plot_interactive.plt"),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_sensor_data: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_bridge_ports() {
        let config = BridgeConfig::default();
        assert_eq!(config.bridge.command_addr(), "127.0.0.1:8082");
        assert_eq!(config.bridge.data_addr(), "127.0.0.1:8083");
        assert_eq!(config.bridge.retry_delay(), Duration::from_secs(2));
        assert_eq!(config.sampling.sensor_names.len(), NUM_CHANNELS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: BridgeConfig = toml::from_str(
            r#"
            [bridge]
            host = "192.168.1.20"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.bridge.host, "192.168.1.20");
        assert_eq!(config.bridge.data_port, 8083);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.show_sensor_data);
        assert_eq!(config.storage.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn rejects_too_many_sensors() {
        let mut config = BridgeConfig::default();
        config.sampling.sensor_names.push("extra".into());
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn rejects_zero_retry_delay() {
        let mut config = BridgeConfig::default();
        config.bridge.retry_delay_ms = 0;
        assert!(config.validate().is_err());
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("enose-config-{}-{}-{}", name, std::process::id(), nanos))
    }

    #[test]
    fn no_config_file_falls_back_to_defaults() {
        let dir = scratch_dir("none");
        let config = BridgeConfig::load_first(&[dir.join("bridge.toml"), dir.join("other.toml")]);
        assert!(config.source.is_none());
        assert_eq!(config.bridge.data_port, 8083);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn broken_candidate_is_skipped_for_the_next() {
        let dir = scratch_dir("candidates");
        std::fs::create_dir_all(&dir).unwrap();
        let broken = dir.join("broken.toml");
        let good = dir.join("good.toml");
        std::fs::write(&broken, "[bridge\nhost = ").unwrap();
        std::fs::write(&good, "[bridge]\ndata_port = 9083\n").unwrap();

        let config = BridgeConfig::load_first(&[&broken, &good]);
        assert_eq!(config.source.as_deref(), Some(good.as_path()));
        assert_eq!(config.bridge.data_port, 9083);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = BridgeConfig::load("does/not/exist.toml").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }
}
