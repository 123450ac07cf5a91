//! Configuration management for Outreach

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};

/// Lowest inter-send gap the engine will accept, in seconds
pub const MIN_DELAY_FLOOR_SECS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub responder: ResponderConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for sessions, ledger and target lists
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Lower bound of the jittered inter-send delay, per account
    pub delay_min_secs: u64,
    /// Upper bound of the jittered inter-send delay, per account
    pub delay_max_secs: u64,
    /// Accounts allowed to be mid-send at the same instant
    pub max_concurrent_sends: usize,
    /// Attempts per target before a retryable failure becomes final
    pub send_retry_attempts: u32,
    /// Ceiling on the escalating rate-limit penalty, in seconds
    pub backoff_ceiling_secs: u64,
    /// Optional per-account send budget for one campaign run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_account: Option<usize>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            delay_min_secs: 10,
            delay_max_secs: 15,
            max_concurrent_sends: 3,
            send_retry_attempts: 3,
            backoff_ceiling_secs: 300,
            max_per_account: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderConfig {
    /// Seconds between inbox sweeps for each account
    pub poll_interval_secs: u64,
    /// Unread threads examined per sweep
    pub threads_per_sweep: usize,
    /// Canned reply sent when no template matches
    pub fallback_reply: String,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        ResponderConfig {
            poll_interval_secs: 60,
            threads_per_sweep: 10,
            fallback_reply: "Thanks for reaching out! I'll get back to you soon.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Fallback proxy template for accounts without their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_url: Option<String>,
    /// How long a sticky session id stays pinned before rotation
    pub sticky_minutes: u64,
    /// Probe timeout in seconds
    pub probe_timeout_secs: u64,
    /// When true, a failed probe blocks the account instead of
    /// falling back to a direct connection
    pub required: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            default_url: None,
            sticky_minutes: 30,
            probe_timeout_secs: 10,
            required: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            storage: StorageConfig {
                data_dir: "~/.local/share/outreach".to_string(),
            },
            dispatch: DispatchConfig::default(),
            responder: ResponderConfig::default(),
            proxy: ProxyConfig::default(),
        }
    }

    /// Reject delay windows the engine cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.delay_min_secs < MIN_DELAY_FLOOR_SECS {
            return Err(ConfigError::Invalid(format!(
                "delay_min_secs must be at least {}",
                MIN_DELAY_FLOOR_SECS
            ))
            .into());
        }
        if self.dispatch.delay_min_secs > self.dispatch.delay_max_secs {
            return Err(ConfigError::Invalid(
                "delay_min_secs must not exceed delay_max_secs".to_string(),
            )
            .into());
        }
        if self.dispatch.max_concurrent_sends == 0 {
            return Err(
                ConfigError::Invalid("max_concurrent_sends must be at least 1".to_string()).into(),
            );
        }
        if self.dispatch.backoff_ceiling_secs < self.dispatch.delay_max_secs {
            return Err(ConfigError::Invalid(
                "backoff_ceiling_secs must be at least delay_max_secs".to_string(),
            )
            .into());
        }
        Ok(())
    }

    /// Expanded data directory
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.storage.data_dir).to_string())
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("OUTREACH_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("outreach").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir =
        dirs::data_dir().ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("outreach"))
}
