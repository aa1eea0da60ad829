//! Configuration management for the USB MIDI host
//!
//! Handles loading, parsing and validating the YAML configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::decoder::rpn::ParameterNumberMode;
use crate::decoder::PACKET_SIZE;
use crate::host::HostOptions;
use crate::input::InputOptions;
use crate::usb::DeviceFilter;
use crate::watcher::WatcherOptions;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    pub watcher: WatcherConfig,
    pub input: InputConfig,
    pub rpn: RpnConfig,
    pub logging: LoggingConfig,
    /// Vendor-specific devices to treat as MIDI-capable
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub device_filters: Vec<DeviceFilter>,
}

/// Connection watcher configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WatcherConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

/// Bulk-IN reader configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InputConfig {
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

/// RPN/NRPN decoding configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RpnConfig {
    #[serde(default)]
    pub parameter_number: ParameterNumberMode,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self { poll_interval_ms: default_poll_interval() }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_read_timeout(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl HostConfig {
    /// Load and validate configuration from file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml_str(&contents).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        // An empty document means "all defaults"
        let config: HostConfig = if yaml.trim().is_empty() {
            HostConfig::default()
        } else {
            serde_yaml::from_str(yaml).context("Failed to parse YAML config")?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the default file if it exists, else built-in defaults
    pub async fn resolve(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path).await;
        }
        match default_path() {
            Some(path) if fs::try_exists(&path).await.unwrap_or(false) => Self::load(&path).await,
            _ => Ok(Self::default()),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.watcher.poll_interval_ms == 0 {
            anyhow::bail!("watcher.poll_interval_ms must be greater than 0");
        }
        if self.input.read_timeout_ms == 0 {
            anyhow::bail!("input.read_timeout_ms must be greater than 0");
        }
        if self.input.buffer_size == 0 || self.input.buffer_size % PACKET_SIZE != 0 {
            anyhow::bail!(
                "input.buffer_size must be a non-zero multiple of {} (got {})",
                PACKET_SIZE,
                self.input.buffer_size
            );
        }
        for (idx, filter) in self.device_filters.iter().enumerate() {
            if filter.is_empty() {
                anyhow::bail!("device_filters[{}] must set at least one field", idx);
            }
        }
        Ok(())
    }

    pub fn watcher_options(&self) -> WatcherOptions {
        WatcherOptions {
            poll_interval: Duration::from_millis(self.watcher.poll_interval_ms),
            filters: self.device_filters.clone(),
        }
    }

    pub fn input_options(&self) -> InputOptions {
        InputOptions {
            read_timeout: Duration::from_millis(self.input.read_timeout_ms),
            buffer_size: self.input.buffer_size,
        }
    }

    pub fn host_options(&self) -> HostOptions {
        HostOptions {
            watcher: self.watcher_options(),
            input: self.input_options(),
            parameter_mode: self.rpn.parameter_number,
        }
    }
}

/// `<config dir>/usb-midi-host/config.yaml`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("usb-midi-host").join("config.yaml"))
}

// Default value functions
fn default_poll_interval() -> u64 { 1000 }
fn default_read_timeout() -> u64 { 100 }
fn default_buffer_size() -> usize { 64 }
fn default_log_level() -> String { "info".to_string() }
