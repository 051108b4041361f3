//! Configuration for the Rx/Tx synchronization loop.
//!
//! All values have defaults matching a stock SDRangel setup with the
//! reference receiver on device set 0 and the transmitter plus the receiver
//! to align on device set 1. An optional `.rxtxsync.toml` overrides them.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = ".rxtxsync.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// A device set plus one of its channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRef {
    pub device_set: u32,
    #[serde(default)]
    pub channel: u32,
}

/// A device set without channel (only device settings are touched).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRef {
    pub device_set: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Host of the SDRangel REST API
    #[serde(default = "default_host")]
    pub host: String,
    /// Port of the SDRangel REST API
    #[serde(default = "default_port")]
    pub port: u16,
    /// First path segment of every API URL
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Rx demodulator whose offset is mirrored, its device is the frequency reference
    #[serde(default = "default_reference_rx")]
    pub reference_rx: ChannelRef,
    /// Rx device whose center frequency follows the reference device
    #[serde(default = "default_align_rx")]
    pub align_rx: DeviceRef,
    /// Tx modulator receiving the mirrored offset
    #[serde(default = "default_tx")]
    pub tx: ChannelRef,
    /// Fixed shift in Hz added to the Rx offset before it is applied to Tx
    #[serde(default)]
    pub offset_hz: i64,
    /// Seconds between two sync iterations
    #[serde(default = "default_delay")]
    pub delay: f64,
    /// Seconds to wait after a failed iteration
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: f64,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: f64,
    /// Channel kind the demodulator/modulator blocks must have
    #[serde(default = "default_kind_hint")]
    pub kind_hint: String,
    /// Run a single iteration and exit
    #[serde(skip)]
    pub once: bool,
    /// Print a line per iteration
    #[serde(skip)]
    pub verbose: bool,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8091
}

fn default_api_base() -> String {
    "sdrangel".to_string()
}

fn default_reference_rx() -> ChannelRef {
    ChannelRef { device_set: 0, channel: 0 }
}

fn default_align_rx() -> DeviceRef {
    DeviceRef { device_set: 1 }
}

fn default_tx() -> ChannelRef {
    ChannelRef { device_set: 1, channel: 0 }
}

fn default_delay() -> f64 {
    0.3
}

fn default_reconnect_delay() -> f64 {
    10.0
}

fn default_request_timeout() -> f64 {
    5.0
}

fn default_kind_hint() -> String {
    "SSB".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_base: default_api_base(),
            reference_rx: default_reference_rx(),
            align_rx: default_align_rx(),
            tx: default_tx(),
            offset_hz: 0,
            delay: default_delay(),
            reconnect_delay: default_reconnect_delay(),
            request_timeout: default_request_timeout(),
            kind_hint: default_kind_hint(),
            once: false,
            verbose: false,
        }
    }
}

impl SyncConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: SyncConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads `.rxtxsync.toml` from `dir`, falls back to defaults if there is none.
    pub fn load_from_dir(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must not be 0".to_string()));
        }
        if self.api_base.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid("api_base must not be empty".to_string()));
        }
        for (name, value) in [
            ("delay", self.delay),
            ("reconnect_delay", self.reconnect_delay),
            ("request_timeout", self.request_timeout),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a non-negative number of seconds, got {value}"
                )));
            }
            if Duration::try_from_secs_f64(value).is_err() {
                return Err(ConfigError::Invalid(format!("{name} is too large, got {value} seconds")));
            }
        }
        if self.request_timeout == 0.0 {
            return Err(ConfigError::Invalid("request_timeout must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// Base URL without trailing slash, e.g. `http://localhost:8091/sdrangel`.
    pub fn base_url(&self) -> String {
        format!(
            "http://{}:{}/{}",
            self.host,
            self.port,
            self.api_base.trim_matches('/')
        )
    }

    pub fn delay_duration(&self) -> Duration {
        seconds(self.delay)
    }

    pub fn reconnect_duration(&self) -> Duration {
        seconds(self.reconnect_delay)
    }

    pub fn request_timeout_duration(&self) -> Duration {
        seconds(self.request_timeout)
    }
}

/// Saturiert statt zu paniken, falls die Config nicht validiert wurde.
fn seconds(value: f64) -> Duration {
    match Duration::try_from_secs_f64(value) {
        Ok(duration) => duration,
        Err(_) if value > 0.0 => Duration::MAX,
        Err(_) => Duration::ZERO,
    }
}
