//! Configuration validation rules.

use super::schema::Config;

/// Validate configuration and return aggregated validation errors.
pub fn validate_config(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    let admin_id = config.bot.admin_id.trim();
    if !admin_id.is_empty() && admin_id.parse::<i64>().is_err() {
        errors.push("bot.admin_id must be a numeric Telegram chat id".to_string());
    }

    let telegram = &config.channels.telegram;
    if telegram.enabled && telegram.token.trim().is_empty() {
        errors.push("channels.telegram.token is required when telegram is enabled".to_string());
    }
    if telegram.webhook.enabled {
        let url = telegram.webhook.url.trim();
        if url.is_empty() {
            errors.push(
                "channels.telegram.webhook.url is required when the webhook is enabled".to_string(),
            );
        } else if reqwest::Url::parse(url).is_err() {
            errors.push(format!(
                "channels.telegram.webhook.url is not a valid URL: {}",
                url
            ));
        }
        if telegram.webhook.port == 0 {
            errors.push("channels.telegram.webhook.port must be > 0".to_string());
        }
        if telegram
            .webhook
            .listen_addr
            .parse::<std::net::IpAddr>()
            .is_err()
        {
            errors.push(format!(
                "channels.telegram.webhook.listen_addr is not an IP address: {}",
                telegram.webhook.listen_addr
            ));
        }
    }

    if !matches!(config.logging.format.to_lowercase().as_str(), "text" | "json") {
        errors.push("logging.format must be one of: text, json".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Validation(errors.join("; ")))
    }
}
