// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::bluetooth::{
    CoordinatorSettings, RescanPolicy, ServiceId, DEFAULT_RFCOMM_CHANNEL, SPP_UUID,
};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// Scan settings.
    pub scan: ScanConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Adapter to use, e.g. "hci0". The default adapter when unset.
    pub adapter: Option<String>,

    /// Length of one discovery window in seconds.
    pub discovery_window_secs: u64,

    /// RFCOMM channel of the serial port service.
    pub rfcomm_channel: u8,

    /// Service UUID connections are made to.
    pub service_uuid: Uuid,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            discovery_window_secs: 12,
            rfcomm_channel: DEFAULT_RFCOMM_CHANNEL,
            service_uuid: SPP_UUID,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Restart behaviour when a discovery window ends.
    pub rescan: RescanPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is not set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bluelink")
            .join("config.toml")
    }

    /// Load configuration from the default location, creating it if missing.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, writing defaults there if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn discovery_window(&self) -> Duration {
        Duration::from_secs(self.bluetooth.discovery_window_secs.max(1))
    }

    /// Settings for the coordinator.
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            service: ServiceId {
                uuid: self.bluetooth.service_uuid,
                channel: self.bluetooth.rfcomm_channel,
            },
            rescan: self.scan.rescan,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.bluetooth.rfcomm_channel, 1);
        assert_eq!(config.bluetooth.service_uuid, SPP_UUID);
        assert_eq!(config.scan.rescan, RescanPolicy::Continuous);

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.bluetooth.discovery_window_secs, 12);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[bluetooth]\nadapter = \"hci1\"\nrfcomm_channel = 3\n\n[scan.rescan]\nmode = \"limited\"\nmax_restarts = 5\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.bluetooth.adapter.as_deref(), Some("hci1"));
        assert_eq!(config.bluetooth.discovery_window_secs, 12);
        assert_eq!(config.logging.level, "info");

        let settings = config.coordinator_settings();
        assert_eq!(settings.service.channel, 3);
        assert_eq!(settings.rescan, RescanPolicy::Limited { max_restarts: 5 });
    }

    #[test]
    fn test_zero_window_is_clamped() {
        let mut config = Config::default();
        config.bluetooth.discovery_window_secs = 0;
        assert_eq!(config.discovery_window(), Duration::from_secs(1));
    }
}
