//! Configuration loading and management

use super::schema::Config;
use super::validate::validate_config;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";
const ENV_PREFIX: &str = "CFWM__";

/// Environment variables understood for compatibility with plain bot
/// deployments, mapped onto config paths. `true` marks values that are
/// parsed (numbers, booleans) instead of taken as strings.
const ENV_ALIASES: [(&str, &str, bool); 4] = [
    ("TELEGRAM_BOT_TOKEN", "channels.telegram.token", false),
    ("ADMIN_ID", "bot.admin_id", false),
    ("WEBHOOK_URL", "channels.telegram.webhook.url", false),
    ("PORT", "channels.telegram.webhook.port", true),
];

const WEBHOOK_URL_ENV: &str = "WEBHOOK_URL";
const WEBHOOK_ENABLED_PATH: &str = "channels.telegram.webhook.enabled";

/// Configuration loader
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// Create a new config loader with the default config directory (`~/.cfwm`)
    pub fn new() -> Self {
        let config_dir = dirs::home_dir()
            .map(|h| h.join(".cfwm"))
            .unwrap_or_else(|| PathBuf::from(".cfwm"));

        Self { config_dir }
    }

    /// Create a new config loader with a custom config directory
    pub fn with_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            config_dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Load configuration from file and environment, then validate it
    pub fn load(&self) -> crate::Result<Config> {
        let config = self.load_unvalidated()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration without validation (for status reporting)
    pub fn load_unvalidated(&self) -> crate::Result<Config> {
        let config_path = self.config_path();
        let mut merged = serde_json::to_value(Config::default())?;

        if config_path.exists() {
            tracing::debug!("Loading config from {}", config_path.display());
            let content = std::fs::read_to_string(&config_path)?;
            let file_value: Value = serde_json::from_str(&content)?;
            merge_values(&mut merged, file_value);
        }

        apply_alias_overrides(&mut merged);
        apply_path_overrides(&mut merged);

        Ok(serde_json::from_value(merged)?)
    }

    /// Save configuration to file
    pub fn save(&self, config: &Config) -> crate::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(self.config_path(), content)?;
        Ok(())
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Get the config file path
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if let Some(existing) = base_map.get_mut(&key) {
                    merge_values(existing, value);
                } else {
                    base_map.insert(key, value);
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value;
        }
    }
}

fn parse_env_value(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(v) = raw.parse::<i64>() {
        return Value::Number(v.into());
    }
    if let Ok(v) = serde_json::from_str::<Value>(raw) {
        if v.is_array() || v.is_object() {
            return v;
        }
    }
    Value::String(raw.to_string())
}

fn set_path_value(root: &mut Value, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        *root = value;
        return;
    };

    let mut current = root;
    for segment in parents {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Some(map) = current.as_object_mut() else {
            return;
        };
        current = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Some(map) = current.as_object_mut() {
        map.insert(last.clone(), value);
    }
}

fn apply_alias_overrides(config: &mut Value) {
    for (env_key, target_path, parsed) in ENV_ALIASES {
        if let Ok(raw) = std::env::var(env_key) {
            let path: Vec<String> = target_path.split('.').map(ToString::to_string).collect();
            let value = if parsed {
                parse_env_value(&raw)
            } else {
                Value::String(raw)
            };
            set_path_value(config, &path, value);
        }
    }

    // A public URL only makes sense with webhook delivery
    if std::env::var(WEBHOOK_URL_ENV).is_ok_and(|url| !url.trim().is_empty()) {
        tracing::info!("{} is set, enabling webhook delivery", WEBHOOK_URL_ENV);
        let path: Vec<String> = WEBHOOK_ENABLED_PATH
            .split('.')
            .map(ToString::to_string)
            .collect();
        set_path_value(config, &path, Value::Bool(true));
    }
}

fn apply_path_overrides(config: &mut Value) {
    for (key, value) in std::env::vars() {
        let Some(suffix) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let segments: Vec<String> = suffix
            .split("__")
            .filter(|s| !s.is_empty())
            .map(|s| s.to_ascii_lowercase())
            .collect();
        if segments.is_empty() {
            continue;
        }
        set_path_value(config, &segments, parse_env_value(&value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::{Mutex, MutexGuard};
    use tempfile::TempDir;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    struct EnvVarGuard {
        key: String,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &str, value: &str) -> Self {
            let original = std::env::var(key).ok();
            // SAFETY: tests serialize env mutations with ENV_LOCK.
            unsafe { std::env::set_var(key, value) };
            Self {
                key: key.to_string(),
                original,
            }
        }

        fn unset(key: &str) -> Self {
            let original = std::env::var(key).ok();
            // SAFETY: tests serialize env mutations with ENV_LOCK.
            unsafe { std::env::remove_var(key) };
            Self {
                key: key.to_string(),
                original,
            }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.original {
                // SAFETY: tests serialize env mutations with ENV_LOCK.
                unsafe { std::env::set_var(&self.key, value) };
            } else {
                // SAFETY: tests serialize env mutations with ENV_LOCK.
                unsafe { std::env::remove_var(&self.key) };
            }
        }
    }

    fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Clear the aliases so the host environment cannot leak into a test
    fn clear_aliases() -> Vec<EnvVarGuard> {
        ENV_ALIASES
            .iter()
            .map(|(key, _, _)| EnvVarGuard::unset(key))
            .collect()
    }

    #[test]
    fn test_load_unvalidated_defaults() {
        let _lock = lock_env();
        let _aliases = clear_aliases();
        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_dir(temp_dir.path());
        let config = loader.load_unvalidated().unwrap();

        assert!(config.channels.telegram.token.is_empty());
        assert_eq!(config.channels.telegram.webhook.port, 3000);
    }

    #[test]
    fn test_load_requires_token() {
        let _lock = lock_env();
        let _aliases = clear_aliases();
        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_dir(temp_dir.path());

        let err = loader.load().unwrap_err();
        assert!(err.to_string().contains("channels.telegram.token"));
    }

    #[test]
    fn test_save_and_load_config() {
        let _lock = lock_env();
        let _aliases = clear_aliases();
        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_dir(temp_dir.path());

        let mut config = Config::default();
        config.channels.telegram.token = "123:abc".to_string();
        config.bot.admin_id = "42".to_string();

        loader.save(&config).unwrap();
        let loaded = loader.load().unwrap();

        assert_eq!(loaded.channels.telegram.token, "123:abc");
        assert_eq!(loaded.bot.admin_id, "42");
    }

    #[test]
    fn test_load_applies_alias_env_overrides() {
        let _lock = lock_env();
        let _aliases = clear_aliases();
        let _token = EnvVarGuard::set("TELEGRAM_BOT_TOKEN", "999:from-env");
        let _admin = EnvVarGuard::set("ADMIN_ID", "555");
        let _port = EnvVarGuard::set("PORT", "8080");

        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_dir(temp_dir.path());
        let config = loader.load().unwrap();

        assert_eq!(config.channels.telegram.token, "999:from-env");
        assert_eq!(config.bot.admin_id, "555");
        assert_eq!(config.channels.telegram.webhook.port, 8080);
        assert!(!config.channels.telegram.webhook.enabled);
    }

    #[test]
    fn test_webhook_url_alias_enables_webhook() {
        let _lock = lock_env();
        let _aliases = clear_aliases();
        let _token = EnvVarGuard::set("TELEGRAM_BOT_TOKEN", "999:from-env");
        let _url = EnvVarGuard::set("WEBHOOK_URL", "https://bot.example.com/hook");
        let _port = EnvVarGuard::set("PORT", "8443");

        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_dir(temp_dir.path());
        let config = loader.load().unwrap();

        let webhook = &config.channels.telegram.webhook;
        assert!(webhook.enabled);
        assert_eq!(webhook.url, "https://bot.example.com/hook");
        assert_eq!(webhook.port, 8443);
    }

    #[test]
    fn test_empty_webhook_url_keeps_polling() {
        let _lock = lock_env();
        let _aliases = clear_aliases();
        let _url = EnvVarGuard::set("WEBHOOK_URL", " ");

        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_dir(temp_dir.path());
        let config = loader.load_unvalidated().unwrap();
        assert!(!config.channels.telegram.webhook.enabled);
    }

    #[test]
    fn test_load_applies_path_env_overrides() {
        let _lock = lock_env();
        let _aliases = clear_aliases();
        let _token = EnvVarGuard::set("CFWM__CHANNELS__TELEGRAM__TOKEN", "tg-token");
        let _admin = EnvVarGuard::set("CFWM__BOT__ADMIN_ID", "777");
        let _enforce = EnvVarGuard::set("CFWM__BOT__ENFORCE_ADMIN_APPROVAL", "false");
        let _level = EnvVarGuard::set("CFWM__LOGGING__LEVEL", "debug");

        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_dir(temp_dir.path());
        let config = loader.load().unwrap();

        assert_eq!(config.channels.telegram.token, "tg-token");
        assert_eq!(config.bot.admin_id, "777");
        assert!(!config.bot.enforce_admin_approval);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_path_env_overrides_alias_and_file() {
        let _lock = lock_env();
        let _aliases = clear_aliases();
        let _alias = EnvVarGuard::set("TELEGRAM_BOT_TOKEN", "alias-token");
        let _path = EnvVarGuard::set("CFWM__CHANNELS__TELEGRAM__TOKEN", "path-token");

        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_dir(temp_dir.path());
        std::fs::write(
            loader.config_path(),
            r#"{"channels":{"telegram":{"token":"file-token"}}}"#,
        )
        .unwrap();

        let config = loader.load().unwrap();
        assert_eq!(config.channels.telegram.token, "path-token");
    }

    #[test]
    fn test_file_values_merge_over_defaults() {
        let _lock = lock_env();
        let _aliases = clear_aliases();
        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_dir(temp_dir.path());
        std::fs::write(
            loader.config_path(),
            r#"{
  "bot": {"admin_id": 1234},
  "channels": {"telegram": {"token": "t", "webhook": {"enabled": true, "url": "https://example.com/bot"}}}
}"#,
        )
        .unwrap();

        let config = loader.load().unwrap();
        assert_eq!(config.bot.admin_id, "1234");
        assert!(config.channels.telegram.webhook.enabled);
        assert_eq!(config.channels.telegram.webhook.listen_addr, "0.0.0.0");
        assert_eq!(config.channels.telegram.webhook.port, 3000);
    }

    #[test]
    fn test_parse_env_value() {
        assert_eq!(parse_env_value("true"), Value::Bool(true));
        assert_eq!(parse_env_value("42"), Value::Number(42.into()));
        assert_eq!(
            parse_env_value(r#"["1","2"]"#),
            serde_json::json!(["1", "2"])
        );
        assert_eq!(parse_env_value("hello"), Value::String("hello".to_string()));
    }
}
