use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::eyre::{ContextCompat, Result, WrapErr, eyre};
use serde::{Deserialize, Serialize};

use crate::rate_limit::RateLimitSettings;
use crate::spotify::client::DEFAULT_API_BASE_URL;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root directory for synced collections
    output_directory: String,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub spotify: SpotifyConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
    #[serde(default = "default_retry_after_seconds")]
    pub retry_after_seconds: u64,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_inter_request_delay_ms")]
    pub inter_request_delay_ms: u64,
}

fn default_rate_limit_per_minute() -> u32 {
    30
}

fn default_burst_size() -> u32 {
    5
}

fn default_retry_after_seconds() -> u64 {
    30
}

fn default_max_concurrent_requests() -> usize {
    200
}

fn default_batch_size() -> u32 {
    50
}

fn default_inter_request_delay_ms() -> u64 {
    100
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: default_rate_limit_per_minute(),
            burst_size: default_burst_size(),
            retry_after_seconds: default_retry_after_seconds(),
            max_concurrent_requests: default_max_concurrent_requests(),
            batch_size: default_batch_size(),
            inter_request_delay_ms: default_inter_request_delay_ms(),
        }
    }
}

impl SyncSettings {
    pub fn rate_limit_settings(&self) -> Result<RateLimitSettings> {
        Ok(RateLimitSettings {
            per_minute: NonZeroU32::new(self.rate_limit_per_minute)
                .context("rate_limit_per_minute must be greater than zero")?,
            burst_size: NonZeroU32::new(self.burst_size)
                .context("burst_size must be greater than zero")?,
            retry_after: Duration::from_secs(self.retry_after_seconds),
        })
    }

    pub fn inter_request_delay(&self) -> Duration {
        Duration::from_millis(self.inter_request_delay_ms)
    }

    /// Reject settings the fetchers can't run with.
    pub fn validate(&self) -> Result<()> {
        self.rate_limit_settings()?;
        if self.batch_size == 0 {
            return Err(eyre!("batch_size must be greater than zero"));
        }
        if self.max_concurrent_requests == 0 {
            return Err(eyre!("max_concurrent_requests must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackend {
    /// Process-local bucket
    #[default]
    Memory,
    /// Process-local bucket refilled in whole 60 second windows
    Window,
    /// Bucket in a SQLite file shared by every process using it
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub backend: RateLimitBackend,
    /// SQLite file for the shared backend
    #[serde(default = "default_store_path")]
    store_path: String,
}

fn default_store_path() -> String {
    dirs::data_dir()
        .map(|path| path.join("spotify-sync").join("rate_limit.sqlite"))
        .unwrap_or_else(|| PathBuf::from("rate_limit.sqlite"))
        .to_string_lossy()
        .to_string()
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend: RateLimitBackend::default(),
            store_path: default_store_path(),
        }
    }
}

impl RateLimitConfig {
    pub fn store_path(&self) -> PathBuf {
        expand_path(&self.store_path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotifyConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl SpotifyConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_directory: "~/Music/spotify-sync".to_string(),
            sync: SyncSettings::default(),
            rate_limit: RateLimitConfig::default(),
            spotify: SpotifyConfig::default(),
        }
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .wrap_err_with(|| format!("Failed to parse config file: {}", path.display()))?;
        config.sync.validate()?;
        Ok(config)
    }

    /// Default config file location
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join("spotify-sync").join("config.toml"))
    }

    /// Load the config from its default location
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path().ok_or_else(|| eyre!("Config file not found"))?;

        Self::from_file(&config_path)
    }

    /// Write the default config, unless a file already exists
    pub fn create_default() -> Result<PathBuf> {
        let path = Self::config_path().ok_or_else(|| eyre!("No config directory available"))?;
        Self::default().write_if_absent(&path)?;
        Ok(path)
    }

    fn write_if_absent(&self, path: &Path) -> Result<bool> {
        if path.exists() {
            log::info!("Config already exists at: {}", path.display());
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self).wrap_err("Failed to serialize config")?;
        std::fs::write(path, contents)
            .wrap_err_with(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(true)
    }

    /// Get expanded output directory path
    pub fn output_directory(&self) -> PathBuf {
        expand_path(&self.output_directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = toml::from_str(r#"output_directory = "/tmp/spotify""#).unwrap();

        assert_eq!(config.output_directory(), PathBuf::from("/tmp/spotify"));
        assert_eq!(config.sync, SyncSettings::default());
        assert_eq!(config.sync.rate_limit_per_minute, 30);
        assert_eq!(config.sync.burst_size, 5);
        assert_eq!(config.sync.retry_after_seconds, 30);
        assert_eq!(config.sync.max_concurrent_requests, 200);
        assert_eq!(config.sync.batch_size, 50);
        assert_eq!(config.sync.inter_request_delay_ms, 100);
        assert_eq!(config.rate_limit.backend, RateLimitBackend::Memory);
        assert_eq!(config.spotify.api_base_url, DEFAULT_API_BASE_URL);
    }

    #[test]
    fn test_full_config() {
        let config: Config = toml::from_str(
            r#"
            output_directory = "/data/spotify"

            [sync]
            rate_limit_per_minute = 120
            burst_size = 20
            batch_size = 25

            [rate_limit]
            backend = "sqlite"
            store_path = "/var/lib/spotify-sync/limits.sqlite"

            [spotify]
            request_timeout_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.sync.rate_limit_per_minute, 120);
        assert_eq!(config.sync.retry_after_seconds, 30);
        assert_eq!(config.rate_limit.backend, RateLimitBackend::Sqlite);
        assert_eq!(
            config.rate_limit.store_path(),
            PathBuf::from("/var/lib/spotify-sync/limits.sqlite")
        );
        assert_eq!(config.spotify.request_timeout(), Duration::from_secs(5));

        let settings = config.sync.rate_limit_settings().unwrap();
        assert_eq!(settings.per_minute.get(), 120);
        assert_eq!(settings.burst_size.get(), 20);
        assert_eq!(settings.retry_after, Duration::from_secs(30));
    }

    #[test]
    fn test_zero_burst_is_rejected() {
        let settings = SyncSettings {
            burst_size: 0,
            ..SyncSettings::default()
        };

        assert!(settings.rate_limit_settings().is_err());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_from_file_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "output_directory = \"/tmp\"\n[sync]\nbatch_size = 0\n").unwrap();

        let err = Config::from_file(&path).unwrap_err();

        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_default_config_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        assert!(Config::default().write_if_absent(&path).unwrap());
        assert!(!Config::default().write_if_absent(&path).unwrap());

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn test_expand_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/Music"), home.join("Music"));
        }
        assert_eq!(expand_path("/abs/path"), PathBuf::from("/abs/path"));
    }
}
