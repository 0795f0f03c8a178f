//! Configuration loading for the kartwatch services
//!
//! Resolution priority order:
//! 1. Environment variables (highest priority)
//! 2. TOML config file (`KARTWATCH_CONFIG`, then the platform config dir)
//! 3. Compiled defaults

use crate::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_TIMING_URL: &str =
    "https://kart-timer.com/drivers/ajax.php?p=livescreen&track=110&target=updaterace";
const DEFAULT_WEATHER_URL: &str = "https://api.weatherapi.com/v1/current.json";

/// Service configuration, deserialized from TOML with per-field defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file path
    pub database_path: PathBuf,
    /// Upstream live-timing endpoint
    pub timing_url: String,
    /// Weather API endpoint (current conditions)
    pub weather_url: String,
    /// Weather API key, required for the weather poller
    pub weather_api_key: Option<String>,
    /// Location query passed to the weather API
    pub weather_location: String,
    /// Normal telemetry poll interval in seconds
    pub poll_interval_secs: u64,
    /// Poll interval while the track day has ended
    pub idle_poll_interval_secs: u64,
    /// Weather poll interval in seconds
    pub weather_interval_secs: u64,
    /// First hour (UTC) of the track's operating window
    pub track_open_hour_utc: u32,
    /// First hour (UTC) past the track's operating window
    pub track_close_hour_utc: u32,
    /// Telemetry silence (seconds) required before the day is considered ended
    pub stale_telemetry_secs: u64,
    /// Hard upper bound on a recordable lap time, in seconds
    pub max_lap_seconds: f64,
    /// Laps at or below this time are flagged invalid
    pub invalid_lap_below_secs: f64,
    /// Laps at or above this time are flagged invalid
    pub invalid_lap_above_secs: f64,
    /// HTTP timeout for upstream fetches; must stay below the poll interval
    pub http_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            timing_url: DEFAULT_TIMING_URL.to_string(),
            weather_url: DEFAULT_WEATHER_URL.to_string(),
            weather_api_key: None,
            weather_location: "Batumi".to_string(),
            poll_interval_secs: 3,
            idle_poll_interval_secs: 300,
            weather_interval_secs: 60,
            track_open_hour_utc: 5,
            track_close_hour_utc: 19,
            stale_telemetry_secs: 5400,
            max_lap_seconds: 600.0,
            invalid_lap_below_secs: 20.0,
            invalid_lap_above_secs: 90.0,
            http_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load configuration: config file first, then environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match find_config_file() {
            Some(path) => {
                let content = std::fs::read_to_string(&path)?;
                toml::from_str(&content)
                    .map_err(|e| Error::Config(format!("Invalid config file {:?}: {}", path, e)))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("KARTWATCH_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Ok(url) = std::env::var("KARTWATCH_TIMING_URL") {
            self.timing_url = url;
        }
        if let Ok(key) = std::env::var("KARTWATCH_WEATHER_API_KEY") {
            self.weather_api_key = Some(key);
        }
        if let Ok(location) = std::env::var("KARTWATCH_WEATHER_LOCATION") {
            self.weather_location = location;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.track_open_hour_utc >= 24 || self.track_close_hour_utc > 24 {
            return Err(Error::Config(
                "Operating hours must fall within a day".to_string(),
            ));
        }
        if self.http_timeout_secs >= self.idle_poll_interval_secs {
            return Err(Error::Config(
                "HTTP timeout must be shorter than the idle poll interval".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_secs(self.idle_poll_interval_secs)
    }

    pub fn weather_interval(&self) -> Duration {
        Duration::from_secs(self.weather_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Locate the config file: `KARTWATCH_CONFIG` env var, then the platform
/// config directory, then `/etc/kartwatch/config.toml` on Linux.
fn find_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("KARTWATCH_CONFIG") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    if let Some(dir) = dirs::config_dir() {
        let path = dir.join("kartwatch").join("config.toml");
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let path = PathBuf::from("/etc/kartwatch/config.toml");
        if path.exists() {
            return Some(path);
        }
    }

    None
}

/// OS-dependent default database location
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("kartwatch").join("kartwatch.db"))
        .unwrap_or_else(|| PathBuf::from("kartwatch.db"))
}
