//! Configuration management for vigil.
//!
//! Loads configuration from ${VIGIL_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use url::Url;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub feed: FeedConfig,
    pub timing: TimingConfig,
    pub reconnect: ReconnectConfig,
}

/// Activity feed endpoint configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// WebSocket endpoint of the activity feed (ws:// or wss://).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Auth token. `VIGIL_FEED_TOKEN` is used when unset here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Animation timing knobs, in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Floor on how long an agent appears active, so fast operations still
    /// visibly pulse.
    pub min_glow_ms: u64,
    /// Post-end fade window before a session is dropped.
    pub fade_ms: u64,
    /// Ceiling on a session that never receives an `end` event.
    pub safety_timeout_ms: u64,
    /// Heartbeat ping cadence while connected.
    pub ping_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            min_glow_ms: 5_000,
            fade_ms: 3_000,
            safety_timeout_ms: 120_000,
            ping_interval_ms: 30_000,
        }
    }
}

impl TimingConfig {
    pub fn min_glow(&self) -> Duration {
        Duration::from_millis(self.min_glow_ms)
    }

    pub fn fade(&self) -> Duration {
        Duration::from_millis(self.fade_ms)
    }

    pub fn safety_timeout(&self) -> Duration {
        Duration::from_millis(self.safety_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

/// Reconnect backoff policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_ms: u64,
    pub cap_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            cap_ms: 30_000,
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    pub fn base(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }

    pub fn cap(&self) -> Duration {
        Duration::from_millis(self.cap_ms)
    }
}

impl Config {
    /// Loads the config from the default location, or defaults when absent.
    pub fn load() -> Result<Config> {
        Self::load_from(&paths::config_path())
    }

    /// Loads the config from an explicit path, or defaults when absent.
    pub fn load_from(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read config at {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parse config at {}", path.display()))
    }

    /// Writes a commented starter config. Fails if the file already exists.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            bail!("config already exists at {}", path.display());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config directory {}", parent.display()))?;
        }
        fs::write(path, Self::template())
            .with_context(|| format!("write config at {}", path.display()))
    }

    fn template() -> &'static str {
        r#"# vigil configuration

[feed]
# url = "wss://feed.example.com/ws/activity"
# token = "..."            # or set VIGIL_FEED_TOKEN

[timing]
# min_glow_ms = 5000
# fade_ms = 3000
# safety_timeout_ms = 120000
# ping_interval_ms = 30000

[reconnect]
# base_ms = 1000
# cap_ms = 30000
# max_attempts = 10
"#
    }
}

/// Resolved feed connection settings (config merged with flag overrides and
/// the `VIGIL_FEED_TOKEN` env fallback).
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub url: Url,
    pub token: String,
}

impl FeedSettings {
    pub fn resolve(
        config: &Config,
        url_override: Option<&str>,
        token_override: Option<&str>,
    ) -> Result<Self> {
        let raw_url = url_override
            .map(str::to_string)
            .or_else(|| config.feed.url.clone())
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        let Some(raw_url) = raw_url else {
            bail!("feed.url or --url is required");
        };

        let url = Url::parse(&raw_url).with_context(|| format!("parse feed url '{raw_url}'"))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            bail!("feed url must use ws:// or wss://, got '{url}'");
        }

        let token = token_override
            .map(str::to_string)
            .or_else(|| config.feed.token.clone())
            .or_else(|| std::env::var("VIGIL_FEED_TOKEN").ok())
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        let Some(token) = token else {
            bail!("feed.token, --token, or VIGIL_FEED_TOKEN is required");
        };

        Ok(Self { url, token })
    }
}

pub mod paths {
    //! Path resolution for vigil configuration and data directories.
    //!
    //! VIGIL_HOME resolution order:
    //! 1. VIGIL_HOME environment variable (if set)
    //! 2. ~/.config/vigil (default)

    use std::path::PathBuf;

    /// Returns the vigil home directory.
    pub fn vigil_home() -> PathBuf {
        if let Ok(home) = std::env::var("VIGIL_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir()
            .map(|h| h.join(".config").join("vigil"))
            .expect("Could not determine home directory")
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        vigil_home().join("config.toml")
    }

    /// Returns the directory monitor-mode logs are appended to.
    pub fn logs_dir() -> PathBuf {
        vigil_home().join("logs")
    }
}
