//! Configuration schema definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration for cfwm
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Bot behaviour
    #[serde(default)]
    pub bot: BotConfig,
    /// Channel configuration
    #[serde(default)]
    pub channels: ChannelsConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Bot behaviour settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Chat ID of the single admin who approves registrations
    #[serde(default, deserialize_with = "string_or_number")]
    pub admin_id: String,
    /// Only accept `approve_user` callbacks sent by the admin
    #[serde(default = "default_true")]
    pub enforce_admin_approval: bool,
}

fn default_true() -> bool {
    true
}

/// Telegram IDs are numeric; accept them with or without quotes
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            admin_id: String::new(),
            enforce_admin_approval: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Directory for log files
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Module-specific overrides
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            dir: default_log_dir(),
            overrides: HashMap::new(),
        }
    }
}

/// Channel configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// Telegram channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub token: String,
    /// Sender IDs or usernames allowed to talk to the bot (empty = everyone)
    #[serde(default)]
    pub allow_from: Vec<String>,
    #[serde(default)]
    pub proxy: Option<String>,
    /// Webhook delivery; long polling is used when disabled
    #[serde(default)]
    pub webhook: WebhookConfig,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token: String::new(),
            allow_from: Vec::new(),
            proxy: None,
            webhook: WebhookConfig::default(),
        }
    }
}

/// Telegram webhook settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Public HTTPS URL Telegram posts updates to
    #[serde(default)]
    pub url: String,
    /// Local address the webhook server binds
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_listen_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            listen_addr: default_listen_addr(),
            port: default_port(),
        }
    }
}
