//! Layered configuration (SPEC_FULL §12), in the style of the teacher's
//! `spark-core::configuration`: defaults, overridden by a TOML file,
//! overridden by environment variables — each layer's presence is
//! optional, priority is fixed.

use std::path::Path;

use serde::Deserialize;

use crate::error::{codes, BusError};

const APP_NAME_ENV: &str = "FDB_CONFIG_APP_NAME";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app_name: Option<String>,
    pub bind_retries: u32,
    pub connect_retries: u32,
    pub connect_retry_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub watchdog_interval_ms: u64,
    pub watchdog_max_missed: u32,
    pub event_cache_enabled: bool,
    /// Maximum number of distinct `(code, topic)` entries an endpoint's
    /// event cache retains; `0` means unbounded. Once full, `offer`ing a
    /// new key evicts the oldest one (spec §4.7 only guarantees the *last*
    /// payload per key survives, not that every key survives forever).
    pub event_cache_capacity: usize,
    pub nameserver_reconnect_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            app_name: None,
            bind_retries: 3,
            connect_retries: 3,
            connect_retry_interval_ms: 500,
            connect_timeout_ms: 3_000,
            watchdog_interval_ms: 5_000,
            watchdog_max_missed: 3,
            event_cache_enabled: true,
            event_cache_capacity: 4_096,
            nameserver_reconnect_interval_ms: 2_000,
        }
    }
}

impl Config {
    /// Builds the layered configuration: compiled-in defaults, then an
    /// optional TOML file (silently absent is fine, a malformed file is
    /// not), then the `FDB_CONFIG_APP_NAME` environment override (spec §6).
    pub fn load(file_path: Option<&Path>) -> Result<Self, BusError> {
        let mut config = Config::default();

        if let Some(path) = file_path {
            if path.exists() {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| BusError::resource(codes::RESOURCE_ALLOC, e.to_string()))?;
                config = toml::from_str(&text)
                    .map_err(|e| BusError::resource(codes::RESOURCE_ALLOC, e.to_string()))?;
            }
        }

        if let Ok(name) = std::env::var(APP_NAME_ENV) {
            if !name.is_empty() {
                config.app_name = Some(name);
            }
        }

        Ok(config)
    }

    pub fn app_name_or(&self, fallback: &str) -> String {
        self.app_name.clone().unwrap_or_else(|| fallback.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_used_when_no_file_or_env_present() {
        std::env::remove_var(APP_NAME_ENV);
        let config = Config::load(None).unwrap();
        assert_eq!(config.bind_retries, 3);
        assert_eq!(config.event_cache_capacity, 4_096);
        assert!(config.app_name.is_none());
    }

    #[test]
    fn event_cache_capacity_is_overridable_from_file() {
        std::env::remove_var(APP_NAME_ENV);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busline.toml");
        std::fs::write(&path, "event_cache_capacity = 64\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.event_cache_capacity, 64);
    }

    #[test]
    fn env_override_wins_over_file_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busline.toml");
        std::fs::write(&path, "app_name = \"from-file\"\nbind_retries = 9\n").unwrap();
        std::env::set_var(APP_NAME_ENV, "from-env");
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.app_name.as_deref(), Some("from-env"));
        assert_eq!(config.bind_retries, 9);
        std::env::remove_var(APP_NAME_ENV);
    }
}
