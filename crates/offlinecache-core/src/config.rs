//! Cache configuration.
//!
//! Stored as JSON at `<config_dir>/offlinecache/config.json`; every field has
//! a default, so a missing file or a partial one is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierRules;
use crate::push::PushDefaults;
use crate::strategy::DEFAULT_NETWORK_TIMEOUT_MS;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "offlinecache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Prefix of every bucket name
    pub cache_name: String,
    pub classifier: ClassifierRules,
    /// Bound on the network-first primary attempt
    pub network_timeout_ms: u64,
    /// Overall timeout of the HTTP client
    pub request_timeout_secs: u64,
    /// Request headers that split one URL into distinct cache entries
    pub vary_headers: Vec<String>,
    /// Capacity of the background revalidation result channel
    pub revalidation_buffer: usize,
    pub push: PushDefaults,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_name: APP_NAME.to_string(),
            classifier: ClassifierRules::default(),
            network_timeout_ms: DEFAULT_NETWORK_TIMEOUT_MS,
            request_timeout_secs: 30,
            vary_headers: vec!["accept".to_string()],
            revalidation_buffer: 64,
            push: PushDefaults::default(),
        }
    }
}

impl CacheConfig {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid config in {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Default root for the on-disk store.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join(&self.cache_name))
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, CacheConfig::default());
        assert_eq!(config.network_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"cache_name":"dash","network_timeout_ms":1500}"#).unwrap();

        let config = CacheConfig::load_from(&path).unwrap();
        assert_eq!(config.cache_name, "dash");
        assert_eq!(config.network_timeout(), Duration::from_millis(1500));
        assert_eq!(config.vary_headers, vec!["accept"]);
        assert_eq!(config.classifier, ClassifierRules::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = CacheConfig::default();
        config.vary_headers.push("accept-language".to_string());
        config.save_to(&path).unwrap();
        assert_eq!(CacheConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{").unwrap();
        assert!(CacheConfig::load_from(&path).is_err());
    }
}
