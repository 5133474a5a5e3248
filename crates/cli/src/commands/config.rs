use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use leadflow_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let webhook_token = match &config.transport.webhook_token {
        Some(token) => redact_token(token.expose_secret()),
        None => "<unset>".to_string(),
    };

    let fields: Vec<(&str, String, &str)> = vec![
        ("database.url", config.database.url.clone(), "LEADFLOW_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "LEADFLOW_DATABASE_MAX_CONNECTIONS",
        ),
        ("database.timeout_secs", config.database.timeout_secs.to_string(), "LEADFLOW_DATABASE_TIMEOUT_SECS"),
        (
            "routing.dedup_window_days",
            config.routing.dedup_window_days.to_string(),
            "LEADFLOW_ROUTING_DEDUP_WINDOW_DAYS",
        ),
        (
            "routing.double_submit_window_secs",
            config.routing.double_submit_window_secs.to_string(),
            "LEADFLOW_ROUTING_DOUBLE_SUBMIT_WINDOW_SECS",
        ),
        ("routing.week_start", config.routing.week_start.to_string(), "LEADFLOW_ROUTING_WEEK_START"),
        (
            "routing.week_utc_offset_minutes",
            config.routing.week_utc_offset_minutes.to_string(),
            "LEADFLOW_ROUTING_WEEK_UTC_OFFSET_MINUTES",
        ),
        (
            "routing.lb_fallback_to_regular",
            config.routing.lb_fallback_to_regular.to_string(),
            "LEADFLOW_ROUTING_LB_FALLBACK_TO_REGULAR",
        ),
        (
            "routing.mid_week_quota",
            format!("{:?}", config.routing.mid_week_quota),
            "LEADFLOW_ROUTING_MID_WEEK_QUOTA",
        ),
        (
            "routing.reevaluation_batch_size",
            config.routing.reevaluation_batch_size.to_string(),
            "LEADFLOW_ROUTING_REEVALUATION_BATCH_SIZE",
        ),
        ("delivery.max_batch_size", config.delivery.max_batch_size.to_string(), "LEADFLOW_DELIVERY_MAX_BATCH_SIZE"),
        (
            "delivery.max_send_attempts",
            config.delivery.max_send_attempts.to_string(),
            "LEADFLOW_DELIVERY_MAX_SEND_ATTEMPTS",
        ),
        (
            "delivery.sending_timeout_secs",
            config.delivery.sending_timeout_secs.to_string(),
            "LEADFLOW_DELIVERY_SENDING_TIMEOUT_SECS",
        ),
        (
            "delivery.retry_backoff_secs",
            config.delivery.retry_backoff_secs.to_string(),
            "LEADFLOW_DELIVERY_RETRY_BACKOFF_SECS",
        ),
        (
            "delivery.transport_timeout_secs",
            config.delivery.transport_timeout_secs.to_string(),
            "LEADFLOW_DELIVERY_TRANSPORT_TIMEOUT_SECS",
        ),
        ("transport.webhook_token", webhook_token, "LEADFLOW_TRANSPORT_WEBHOOK_TOKEN"),
        ("transport.user_agent", config.transport.user_agent.clone(), "LEADFLOW_TRANSPORT_USER_AGENT"),
        ("server.bind_address", config.server.bind_address.clone(), "LEADFLOW_SERVER_BIND_ADDRESS"),
        ("server.port", config.server.port.to_string(), "LEADFLOW_SERVER_PORT"),
        (
            "server.scheduler_interval_secs",
            config.server.scheduler_interval_secs.to_string(),
            "LEADFLOW_SERVER_SCHEDULER_INTERVAL_SECS",
        ),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            "LEADFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS",
        ),
        ("logging.level", config.logging.level.clone(), "LEADFLOW_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "LEADFLOW_LOGGING_FORMAT"),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in &fields {
        let source = field_source(key, Some(env_key), config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, value, source));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    ["leadflow.toml", "config/leadflow.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps at most a four-character prefix of a secret.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.char_indices().nth(4) {
        Some((cut, _)) if trimmed.len() > 8 => format!("{}***", &trimmed[..cut]),
        _ => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, field_source, redact_token};

    #[test]
    fn tokens_keep_only_a_short_prefix() {
        assert_eq!(redact_token("whsec-0123456789"), "whse***");
        assert_eq!(redact_token("short"), "<redacted>");
        assert_eq!(redact_token("   "), "<empty>");
    }

    #[test]
    fn file_values_are_attributed_to_the_file() {
        let doc: Value = "[routing]\nweek_start = \"Mon\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "routing.week_start"));
        assert!(!contains_path(&doc, "routing.dedup_window_days"));

        let source = field_source("routing.week_start", None, Some(&doc), None);
        assert_eq!(source, "file (config file)");
        assert_eq!(field_source("server.port", None, Some(&doc), None), "default");
    }
}
