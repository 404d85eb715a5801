//! Configuration file management for ais-bridge.
//!
//! Reads/writes `~/.ais-bridge/config.toml`. Every key is optional; missing
//! sections fall back to defaults so a fresh install runs with no file.

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::types::{AisError, Mmsi, Position, Result};

/// Full configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub filter: FilterConfig,
    pub local: LocalConfig,
    pub cloud: CloudConfig,
    pub vesselfinder: VesselFinderConfig,
    pub debug: DebugConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub tcp_port: u16,
    pub update_interval_secs: u64,
    /// 0 disables periodic resend of unchanged vessels.
    pub tcp_resend_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            tcp_port: 10113,
            update_interval_secs: 15,
            tcp_resend_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub skip_without_callsign: bool,
    pub skip_stale_data: bool,
    pub stale_data_threshold_minutes: u64,
    /// m/s
    pub min_alarm_sog: f64,
    /// 0 disables.
    pub sog_decay_threshold_minutes: u64,
    /// 0 disables.
    pub name_suffix_threshold_minutes: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            skip_without_callsign: false,
            skip_stale_data: true,
            stale_data_threshold_minutes: 60,
            min_alarm_sog: 0.2,
            sog_decay_threshold_minutes: 0,
            name_suffix_threshold_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub own_mmsi: Option<Mmsi>,
    /// Fallback own position when the registry does not report one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub own_lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub own_lon: Option<f64>,
    pub timeout_secs: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        LocalConfig {
            url: "http://localhost:3000/signalk/v1/api/vessels".into(),
            own_mmsi: None,
            own_lat: None,
            own_lon: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub radius_nm: f64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        CloudConfig {
            enabled: false,
            url: None,
            api_key: None,
            radius_nm: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VesselFinderConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub update_rate_secs: u64,
}

impl Default for VesselFinderConfig {
    fn default() -> Self {
        VesselFinderConfig {
            enabled: false,
            host: None,
            port: None,
            update_rate_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub enabled: bool,
    /// Log every step for this one vessel at info level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mmsi: Option<Mmsi>,
}

fn minutes(n: u64) -> Option<Duration> {
    (n > 0).then(|| Duration::minutes(n as i64))
}

fn seconds(n: u64) -> Option<Duration> {
    (n > 0).then(|| Duration::seconds(n as i64))
}

impl Config {
    pub fn update_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.server.update_interval_secs.max(1))
    }

    pub fn resend_interval(&self) -> Option<Duration> {
        seconds(self.server.tcp_resend_interval_secs)
    }

    pub fn stale_threshold(&self) -> Option<Duration> {
        if self.filter.skip_stale_data {
            minutes(self.filter.stale_data_threshold_minutes)
        } else {
            None
        }
    }

    pub fn sog_decay_threshold(&self) -> Option<Duration> {
        minutes(self.filter.sog_decay_threshold_minutes)
    }

    pub fn name_suffix_threshold(&self) -> Option<Duration> {
        minutes(self.filter.name_suffix_threshold_minutes)
    }

    /// `None` when VesselFinder forwarding is off.
    pub fn vesselfinder_interval(&self) -> Option<Duration> {
        if self.vesselfinder.enabled {
            seconds(self.vesselfinder.update_rate_secs)
        } else {
            None
        }
    }

    pub fn own_fallback_position(&self) -> Option<Position> {
        match (self.local.own_lat, self.local.own_lon) {
            (Some(lat), Some(lon)) => Some(Position::new(lat, lon)).filter(Position::is_valid),
            _ => None,
        }
    }

    /// Reject combinations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.update_interval_secs == 0 {
            return Err(AisError::Config("server.update_interval_secs must be > 0".into()));
        }
        if self.cloud.enabled && self.cloud.url.as_deref().unwrap_or_default().is_empty() {
            return Err(AisError::Config("cloud.enabled requires cloud.url".into()));
        }
        if self.vesselfinder.enabled {
            if self.vesselfinder.host.as_deref().unwrap_or_default().is_empty() {
                return Err(AisError::Config(
                    "vesselfinder.enabled requires vesselfinder.host".into(),
                ));
            }
            if self.vesselfinder.port.is_none() {
                return Err(AisError::Config(
                    "vesselfinder.enabled requires vesselfinder.port".into(),
                ));
            }
        }
        if self.local.own_lat.is_some() != self.local.own_lon.is_some() {
            return Err(AisError::Config("own_lat and own_lon must be set together".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File handling
// ---------------------------------------------------------------------------

/// Get the config directory path (`~/.ais-bridge/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".ais-bridge")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.ais-bridge/config.toml`.
///
/// Returns default config if the file doesn't exist.
pub fn load_config() -> Result<Config> {
    load_config_from(&config_file())
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)?;
    tracing::debug!(path = %path.display(), "loading config");
    parse_config(&text)
}

pub fn parse_config(text: &str) -> Result<Config> {
    toml::from_str(text).map_err(|e| AisError::Config(e.to_string()))
}

pub fn serialize_config(config: &Config) -> Result<String> {
    let body = toml::to_string_pretty(config).map_err(|e| AisError::Config(e.to_string()))?;
    Ok(format!("# ais-bridge configuration\n\n{body}"))
}

/// Save config to `~/.ais-bridge/config.toml`.
pub fn save_config(config: &Config) -> Result<PathBuf> {
    let path = config_file();
    save_config_to(config, &path)?;
    Ok(path)
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, serialize_config(config)?)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
