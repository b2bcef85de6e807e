//! Server configuration with persistence
//!
//! Read from `~/.config/realm/server.toml` unless a path is given. Missing
//! keys take their defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use realm_store::FileStore;
use realm_stream::StreamConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::EngineError;
use crate::manager::ManagerConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum worlds resident at once
    pub max_concurrent: usize,
    /// Seconds an unobserved world stays resident
    pub unload_delay_secs: u64,
    /// Seconds between autosaves of a world with unsaved changes
    pub auto_save_interval_secs: u64,
    /// Lifecycle scheduler period
    pub tick_interval_ms: u64,
    /// Streaming pump period
    pub stream_interval_ms: u64,
    pub view_radius: u32,
    pub unload_radius: u32,
    pub max_chunks_per_tick: usize,
    /// Extent of every world, in chunks from the origin
    pub world_radius: u32,
    pub echo_mutations: bool,
    /// Where world records live; the platform data dir when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    pub listen_addr: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            unload_delay_secs: 30,
            auto_save_interval_secs: 300,
            tick_interval_ms: 1000,
            stream_interval_ms: 50,
            view_radius: 4,
            unload_radius: 5,
            max_chunks_per_tick: 8,
            world_radius: 64,
            echo_mutations: false,
            data_dir: None,
            listen_addr: "127.0.0.1:7878".to_string(),
        }
    }
}

impl EngineConfig {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("realm"))
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("server.toml"))
    }

    /// Load from the default location, or return defaults if not found
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("Could not determine config directory");
                Self::default()
            }
        }
    }

    /// Load from `path`. A missing or unreadable file yields the defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            info!("No config file at {:?}, using defaults", path);
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    info!("Loaded config from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read config file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), EngineError> {
        let fail = |msg: &str| Err(EngineError::Config(msg.to_string()));
        if self.max_concurrent == 0 {
            return fail("max_concurrent must be at least 1");
        }
        if self.tick_interval_ms == 0 || self.stream_interval_ms == 0 {
            return fail("scheduler intervals must be non-zero");
        }
        if self.max_chunks_per_tick == 0 {
            return fail("max_chunks_per_tick must be at least 1");
        }
        if self.unload_radius < self.view_radius {
            return fail("unload_radius must not be smaller than view_radius");
        }
        if self.world_radius == 0 {
            return fail("world_radius must be at least 1");
        }
        if self.listen_addr.trim().is_empty() {
            return fail("listen_addr must be set");
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(FileStore::default_root)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn stream_interval(&self) -> Duration {
        Duration::from_millis(self.stream_interval_ms)
    }

    pub fn manager(&self) -> ManagerConfig {
        ManagerConfig {
            max_concurrent: self.max_concurrent,
            unload_delay: Duration::from_secs(self.unload_delay_secs),
            auto_save_interval: Duration::from_secs(self.auto_save_interval_secs),
            world_radius: self.world_radius,
        }
    }

    pub fn stream(&self) -> StreamConfig {
        StreamConfig {
            view_radius: self.view_radius,
            unload_radius: self.unload_radius,
            max_chunks_per_tick: self.max_chunks_per_tick,
            echo_mutations: self.echo_mutations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.manager().unload_delay, Duration::from_secs(30));
        assert_eq!(config.manager().auto_save_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        fs::write(&path, "max_concurrent = 2\nview_radius = 2\n").unwrap();

        let config = EngineConfig::load_from(&path);
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.view_radius, 2);
        assert_eq!(config.unload_delay_secs, 30);
    }

    #[test]
    fn test_bad_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        fs::write(&path, "max_concurrent = \"lots\"").unwrap();
        assert_eq!(EngineConfig::load_from(&path), EngineConfig::default());
        assert_eq!(
            EngineConfig::load_from(&dir.path().join("missing.toml")),
            EngineConfig::default()
        );
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("server.toml");
        let config = EngineConfig {
            data_dir: Some(dir.path().join("worlds")),
            echo_mutations: true,
            ..EngineConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(EngineConfig::load_from(&path), config);
    }

    #[test]
    fn test_validate_rejects_inconsistent_radii() {
        let config = EngineConfig {
            view_radius: 6,
            unload_radius: 5,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
        let config = EngineConfig {
            max_concurrent: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
