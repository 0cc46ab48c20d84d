//! Application configuration management.
//!
//! Configuration is stored at `~/.config/examguard/config.json`. Every field
//! has a default, so a missing or partial file is fine. A handful of
//! environment variables override the file after it is loaded:
//!
//! - `USE_MOCK_DATA`: `true` forces the mock authentication backend
//! - `VERBOSE_LOGGING`: `true` raises the default log level to debug
//! - `EXAMGUARD_BACKEND`: `mock`, `http` or `ipc`
//! - `EXAMGUARD_API_URL`: base URL for the HTTP backend
//! - `EXAMGUARD_DESKTOP`: `true` starts the host-process guard set

use std::path::PathBuf;

use anyhow::Result;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "examguard";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_URL: &str = "http://localhost:3001/api";

/// Which authentication backend the gateway talks to. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Mock,
    Http,
    Ipc,
}

impl BackendKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Some(BackendKind::Mock),
            "http" => Some(BackendKind::Http),
            "ipc" => Some(BackendKind::Ipc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendKind,
    pub api_base_url: String,
    pub verbose_logging: bool,
    /// Run with the host-process guard set (desktop shell mode)
    pub desktop: bool,

    pub inactivity_timeout_minutes: i64,
    pub remember_me_days: i64,
    pub max_offline_days: i64,
    pub expiry_warning_minutes: i64,
    pub host_timeout_minutes: i64,
    pub activity_throttle_ms: u64,
    pub request_timeout_secs: u64,
    /// How often to ping the backend; 0 disables probing
    pub connectivity_probe_secs: u64,

    /// Origins the host lets content navigate to
    pub allowed_origins: Vec<String>,
    /// Permissions the host grants when asked (camera, microphone, screen)
    pub grantable_permissions: Vec<String>,

    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::Mock,
            api_base_url: DEFAULT_API_URL.to_string(),
            verbose_logging: false,
            desktop: false,
            inactivity_timeout_minutes: 30,
            remember_me_days: 30,
            max_offline_days: 7,
            expiry_warning_minutes: 5,
            host_timeout_minutes: 30,
            activity_throttle_ms: 1000,
            request_timeout_secs: 30,
            connectivity_probe_secs: 30,
            allowed_origins: vec!["http://localhost:3001".to_string()],
            grantable_permissions: vec!["camera".to_string(), "microphone".to_string()],
            last_username: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply environment overrides using the given lookup function.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("EXAMGUARD_BACKEND") {
            match BackendKind::parse(&value) {
                Some(kind) => self.backend = kind,
                None => warn!(value = %value, "Unknown EXAMGUARD_BACKEND, keeping configured backend"),
            }
        }
        // USE_MOCK_DATA wins over EXAMGUARD_BACKEND
        if let Some(value) = lookup("USE_MOCK_DATA") {
            if parse_flag(&value) {
                self.backend = BackendKind::Mock;
            } else if self.backend == BackendKind::Mock {
                self.backend = BackendKind::Http;
            }
        }
        if let Some(value) = lookup("VERBOSE_LOGGING") {
            self.verbose_logging = parse_flag(&value);
        }
        if let Some(value) = lookup("EXAMGUARD_API_URL") {
            self.api_base_url = value.trim_end_matches('/').to_string();
        }
        if let Some(value) = lookup("EXAMGUARD_DESKTOP") {
            self.desktop = parse_flag(&value);
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::minutes(self.inactivity_timeout_minutes.max(1))
    }

    pub fn remember_me_duration(&self) -> Duration {
        Duration::days(self.remember_me_days.max(1))
    }

    pub fn max_offline_age(&self) -> Duration {
        Duration::days(self.max_offline_days.max(0))
    }

    pub fn expiry_warning(&self) -> Duration {
        Duration::minutes(self.expiry_warning_minutes.max(0))
    }

    pub fn host_timeout(&self) -> Duration {
        Duration::minutes(self.host_timeout_minutes.max(1))
    }

    pub fn activity_throttle(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.activity_throttle_ms)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn connectivity_probe_interval(&self) -> Option<std::time::Duration> {
        if self.connectivity_probe_secs == 0 {
            None
        } else {
            Some(std::time::Duration::from_secs(self.connectivity_probe_secs))
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
