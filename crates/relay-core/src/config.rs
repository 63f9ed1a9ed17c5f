//! Configuration management for the relay.

use crate::{ChatClass, CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default Bot-API endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://api.telegram.org";

/// Main relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Dispatch loop tuning.
    pub dispatch: DispatchConfig,
    /// Outbound messaging API.
    pub transport: TransportConfig,
    /// Ingestion side settings.
    pub ingest: IngestConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            dispatch: DispatchConfig::default(),
            transport: TransportConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from `<base_dir>/config.json`, falling back to
    /// defaults, then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) -> CoreResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Recognised keys: `RELAY_LOG_LEVEL`, `RELAY_API_BASE_URL`,
    /// `RELAY_BOT_TOKEN`, `RELAY_GLOBAL_CEILING`. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(log_level) = get("RELAY_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(base_url) = get("RELAY_API_BASE_URL") {
            self.transport.api_base_url = base_url;
        }
        if let Some(token) = get("RELAY_BOT_TOKEN") {
            self.transport.bot_token = Some(token);
        }
        if let Some(raw) = get("RELAY_GLOBAL_CEILING") {
            self.dispatch.global_ceiling = raw.parse().map_err(|_| {
                CoreError::Config(format!("RELAY_GLOBAL_CEILING is not a number: {raw}"))
            })?;
        }
        Ok(())
    }
}

/// How deferred messages are pushed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeferralPolicy {
    /// Every deferred message moves forward by one tick.
    #[default]
    Fixed,
    /// The k-th deferred message of a chat moves forward by `1 + k / ceiling`
    /// ticks so a backlog drains across ticks instead of re-contending.
    Staggered,
}

/// Immutable tuning for the dispatch loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Messages per chat per tick, keyed by chat class. A class that is
    /// absent here gets a ceiling of zero.
    pub chat_ceilings: HashMap<ChatClass, u32>,
    /// Messages per tick across all chats.
    pub global_ceiling: u32,
    /// Tick length.
    pub tick_interval_ms: u64,
    /// Wall-clock budget of one invocation.
    pub run_window_ms: u64,
    /// Upper bound on the retry delay.
    pub backoff_cap_minutes: u64,
    pub deferral: DeferralPolicy,
    /// Upper bound on one transport send.
    pub send_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            chat_ceilings: HashMap::from([
                (ChatClass::Direct, 1),
                (ChatClass::Group, 1),
                (ChatClass::Channel, 20),
            ]),
            global_ceiling: 30,
            tick_interval_ms: 1_000,
            run_window_ms: 59_000,
            backoff_cap_minutes: 256,
            deferral: DeferralPolicy::Fixed,
            send_timeout_ms: 30_000,
        }
    }
}

impl DispatchConfig {
    /// Reject values the loop cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.global_ceiling == 0 {
            return Err(CoreError::Config(
                "global_ceiling must be greater than zero".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(CoreError::Config(
                "tick_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.send_timeout_ms == 0 {
            return Err(CoreError::Config(
                "send_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-tick ceiling for a chat class; zero when not configured.
    pub fn ceiling_for(&self, class: ChatClass) -> u32 {
        self.chat_ceilings.get(&class).copied().unwrap_or(0)
    }

    /// Whether the class has an explicit ceiling entry.
    pub fn has_ceiling(&self, class: ChatClass) -> bool {
        self.chat_ceilings.contains_key(&class)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn run_window(&self) -> Duration {
        Duration::from_millis(self.run_window_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Outbound messaging API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Base URL of the Bot-API style endpoint.
    pub api_base_url: String,
    /// Bot token. Required by the HTTP transport.
    pub bot_token: Option<String>,
    /// Client-level request timeout.
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            bot_token: None,
            timeout_secs: 30,
        }
    }
}

impl TransportConfig {
    /// Get the API base URL as a parsed URL.
    pub fn api_base_url(&self) -> CoreResult<Url> {
        Url::parse(&self.api_base_url).map_err(CoreError::from)
    }
}

/// Ingestion side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Time between insertion and the message becoming ready.
    pub preparation_delay_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            preparation_delay_ms: 1_000,
        }
    }
}
