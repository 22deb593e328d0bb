//! Application configuration management.
//!
//! Configuration is stored at `~/.config/memvault/config.json`. The remote
//! endpoint and key can also come from the environment (`MEMVAULT_API_URL`,
//! `MEMVAULT_API_KEY`, `MEMVAULT_APP_URL`), which wins over the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "memvault";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_API_URL: &str = "MEMVAULT_API_URL";
pub const ENV_API_KEY: &str = "MEMVAULT_API_KEY";
pub const ENV_APP_URL: &str = "MEMVAULT_APP_URL";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Base URL of the remote data source
    pub api_url: Option<String>,
    /// Public API key sent with every remote request
    pub api_key: Option<String>,
    /// Origin of the web application whose assets are cached
    pub app_url: Option<String>,
    /// Signed-in user
    pub user_id: Option<String>,
    /// Treat the device as offline regardless of connectivity
    pub offline_mode: bool,
    /// Release version embedded in the asset cache bucket name
    pub app_version: Option<String>,
}

impl Config {
    /// Load from the default location and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Invalid config at {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config at {}", path.display()))?;
        Ok(())
    }

    /// Override file values with non-empty environment values.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = get(ENV_API_URL) {
            self.api_url = Some(url);
        }
        if let Some(key) = get(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Some(url) = get(ENV_APP_URL) {
            self.app_url = Some(url);
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Per-user cache directory; the replica and asset buckets live here.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(Self::cache_dir_under(&cache_dir, self.user_id.as_deref()))
    }

    fn cache_dir_under(base: &Path, user_id: Option<&str>) -> PathBuf {
        let mut path = base.join(APP_NAME);
        if let Some(user) = user_id {
            path = path.join(user);
        }
        path
    }

    pub fn require_api_url(&self) -> Result<&str> {
        self.api_url
            .as_deref()
            .context("No API URL configured (set MEMVAULT_API_URL or api_url in config.json)")
    }

    pub fn require_user(&self) -> Result<&str> {
        self.user_id
            .as_deref()
            .context("Not signed in. Run `memvault login <user-id>` first")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
        assert!(!config.offline_mode);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            api_url: Some("https://db.example.com".into()),
            user_id: Some("user-1".into()),
            offline_mode: true,
            ..Default::default()
        };

        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"user_id":"u9"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.user_id.as_deref(), Some("u9"));
        assert!(config.api_url.is_none());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let env: HashMap<&str, &str> = [(ENV_API_URL, "https://env.example.com"), (ENV_API_KEY, "  ")]
            .into_iter()
            .collect();
        let mut config = Config {
            api_url: Some("https://file.example.com".into()),
            api_key: Some("file-key".into()),
            ..Default::default()
        };

        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.api_url.as_deref(), Some("https://env.example.com"));
        // blank env values are ignored
        assert_eq!(config.api_key.as_deref(), Some("file-key"));
        assert!(config.app_url.is_none());
    }

    #[test]
    fn test_cache_dir_is_per_user() {
        let base = Path::new("/tmp/cache");
        assert_eq!(Config::cache_dir_under(base, None), base.join("memvault"));
        assert_eq!(
            Config::cache_dir_under(base, Some("user-1")),
            base.join("memvault").join("user-1")
        );
    }

    #[test]
    fn test_require_user() {
        assert!(Config::default().require_user().is_err());
    }
}
