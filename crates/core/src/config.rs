use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Weekday;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::quota::{MidWeekQuota, WeekBoundary};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub routing: RoutingConfig,
    pub delivery: DeliveryConfig,
    pub transport: TransportConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RoutingConfig {
    pub dedup_window_days: u32,
    pub double_submit_window_secs: u64,
    pub week_start: Weekday,
    pub week_utc_offset_minutes: i32,
    pub lb_fallback_to_regular: bool,
    pub mid_week_quota: MidWeekQuota,
    pub reevaluation_batch_size: u32,
}

impl RoutingConfig {
    pub fn week_boundary(&self) -> WeekBoundary {
        WeekBoundary { start: self.week_start, utc_offset_minutes: self.week_utc_offset_minutes }
    }
}

#[derive(Clone, Debug)]
pub struct DeliveryConfig {
    pub max_batch_size: u32,
    pub max_send_attempts: u32,
    pub sending_timeout_secs: u64,
    pub retry_backoff_secs: u64,
    pub transport_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub webhook_token: Option<SecretString>,
    pub user_agent: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub scheduler_interval_secs: u64,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub lb_fallback_to_regular: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://leadflow.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            routing: RoutingConfig {
                dedup_window_days: 30,
                double_submit_window_secs: 5,
                week_start: Weekday::Mon,
                week_utc_offset_minutes: 0,
                lb_fallback_to_regular: false,
                mid_week_quota: MidWeekQuota::Full,
                reevaluation_batch_size: 500,
            },
            delivery: DeliveryConfig {
                max_batch_size: 25,
                max_send_attempts: 3,
                sending_timeout_secs: 120,
                retry_backoff_secs: 60,
                transport_timeout_secs: 20,
            },
            transport: TransportConfig {
                webhook_token: None,
                user_agent: concat!("leadflow/", env!("CARGO_PKG_VERSION")).to_string(),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                scheduler_interval_secs: 30,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("leadflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(routing) = patch.routing {
            if let Some(days) = routing.dedup_window_days {
                self.routing.dedup_window_days = days;
            }
            if let Some(secs) = routing.double_submit_window_secs {
                self.routing.double_submit_window_secs = secs;
            }
            if let Some(week_start) = routing.week_start {
                self.routing.week_start = parse_weekday("routing.week_start", &week_start)?;
            }
            if let Some(offset) = routing.week_utc_offset_minutes {
                self.routing.week_utc_offset_minutes = offset;
            }
            if let Some(fallback) = routing.lb_fallback_to_regular {
                self.routing.lb_fallback_to_regular = fallback;
            }
            if let Some(policy) = routing.mid_week_quota {
                self.routing.mid_week_quota = policy;
            }
            if let Some(batch) = routing.reevaluation_batch_size {
                self.routing.reevaluation_batch_size = batch;
            }
        }

        if let Some(delivery) = patch.delivery {
            if let Some(max_batch_size) = delivery.max_batch_size {
                self.delivery.max_batch_size = max_batch_size;
            }
            if let Some(max_send_attempts) = delivery.max_send_attempts {
                self.delivery.max_send_attempts = max_send_attempts;
            }
            if let Some(secs) = delivery.sending_timeout_secs {
                self.delivery.sending_timeout_secs = secs;
            }
            if let Some(secs) = delivery.retry_backoff_secs {
                self.delivery.retry_backoff_secs = secs;
            }
            if let Some(secs) = delivery.transport_timeout_secs {
                self.delivery.transport_timeout_secs = secs;
            }
        }

        if let Some(transport) = patch.transport {
            if let Some(webhook_token_value) = transport.webhook_token {
                self.transport.webhook_token = Some(SecretString::from(webhook_token_value));
            }
            if let Some(user_agent) = transport.user_agent {
                self.transport.user_agent = user_agent;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(secs) = server.scheduler_interval_secs {
                self.server.scheduler_interval_secs = secs;
            }
            if let Some(secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LEADFLOW_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("LEADFLOW_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("LEADFLOW_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("LEADFLOW_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADFLOW_ROUTING_DEDUP_WINDOW_DAYS") {
            self.routing.dedup_window_days =
                parse_u32("LEADFLOW_ROUTING_DEDUP_WINDOW_DAYS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_ROUTING_DOUBLE_SUBMIT_WINDOW_SECS") {
            self.routing.double_submit_window_secs =
                parse_u64("LEADFLOW_ROUTING_DOUBLE_SUBMIT_WINDOW_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_ROUTING_WEEK_START") {
            self.routing.week_start = parse_weekday("LEADFLOW_ROUTING_WEEK_START", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_ROUTING_WEEK_UTC_OFFSET_MINUTES") {
            self.routing.week_utc_offset_minutes = value.trim().parse::<i32>().map_err(|_| {
                ConfigError::InvalidEnvOverride {
                    key: "LEADFLOW_ROUTING_WEEK_UTC_OFFSET_MINUTES".to_string(),
                    value: value.clone(),
                }
            })?;
        }
        if let Some(value) = read_env("LEADFLOW_ROUTING_LB_FALLBACK_TO_REGULAR") {
            self.routing.lb_fallback_to_regular =
                parse_bool("LEADFLOW_ROUTING_LB_FALLBACK_TO_REGULAR", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_ROUTING_MID_WEEK_QUOTA") {
            self.routing.mid_week_quota = value.parse().map_err(|_| {
                ConfigError::InvalidEnvOverride {
                    key: "LEADFLOW_ROUTING_MID_WEEK_QUOTA".to_string(),
                    value: value.clone(),
                }
            })?;
        }
        if let Some(value) = read_env("LEADFLOW_ROUTING_REEVALUATION_BATCH_SIZE") {
            self.routing.reevaluation_batch_size =
                parse_u32("LEADFLOW_ROUTING_REEVALUATION_BATCH_SIZE", &value)?;
        }

        if let Some(value) = read_env("LEADFLOW_DELIVERY_MAX_BATCH_SIZE") {
            self.delivery.max_batch_size = parse_u32("LEADFLOW_DELIVERY_MAX_BATCH_SIZE", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_DELIVERY_MAX_SEND_ATTEMPTS") {
            self.delivery.max_send_attempts =
                parse_u32("LEADFLOW_DELIVERY_MAX_SEND_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_DELIVERY_SENDING_TIMEOUT_SECS") {
            self.delivery.sending_timeout_secs =
                parse_u64("LEADFLOW_DELIVERY_SENDING_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_DELIVERY_RETRY_BACKOFF_SECS") {
            self.delivery.retry_backoff_secs =
                parse_u64("LEADFLOW_DELIVERY_RETRY_BACKOFF_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_DELIVERY_TRANSPORT_TIMEOUT_SECS") {
            self.delivery.transport_timeout_secs =
                parse_u64("LEADFLOW_DELIVERY_TRANSPORT_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADFLOW_TRANSPORT_WEBHOOK_TOKEN") {
            self.transport.webhook_token = Some(SecretString::from(value));
        }
        if let Some(value) = read_env("LEADFLOW_TRANSPORT_USER_AGENT") {
            self.transport.user_agent = value;
        }

        if let Some(value) = read_env("LEADFLOW_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("LEADFLOW_SERVER_PORT") {
            self.server.port = parse_u16("LEADFLOW_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_SERVER_SCHEDULER_INTERVAL_SECS") {
            self.server.scheduler_interval_secs =
                parse_u64("LEADFLOW_SERVER_SCHEDULER_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("LEADFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("LEADFLOW_LOGGING_LEVEL").or_else(|| read_env("LEADFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEADFLOW_LOGGING_FORMAT").or_else(|| read_env("LEADFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(fallback) = overrides.lb_fallback_to_regular {
            self.routing.lb_fallback_to_regular = fallback;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_routing(&self.routing)?;
        validate_delivery(&self.delivery)?;
        validate_transport(&self.transport)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }

    /// Flattened view safe to print: secrets are reduced to presence flags.
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "database": {
                "url": self.database.url,
                "max_connections": self.database.max_connections,
                "timeout_secs": self.database.timeout_secs,
            },
            "routing": {
                "dedup_window_days": self.routing.dedup_window_days,
                "double_submit_window_secs": self.routing.double_submit_window_secs,
                "week_start": self.routing.week_start.to_string(),
                "week_utc_offset_minutes": self.routing.week_utc_offset_minutes,
                "lb_fallback_to_regular": self.routing.lb_fallback_to_regular,
                "mid_week_quota": self.routing.mid_week_quota,
                "reevaluation_batch_size": self.routing.reevaluation_batch_size,
            },
            "delivery": {
                "max_batch_size": self.delivery.max_batch_size,
                "max_send_attempts": self.delivery.max_send_attempts,
                "sending_timeout_secs": self.delivery.sending_timeout_secs,
                "retry_backoff_secs": self.delivery.retry_backoff_secs,
                "transport_timeout_secs": self.delivery.transport_timeout_secs,
            },
            "transport": {
                "webhook_token_configured": self.transport.webhook_token.is_some(),
                "user_agent": self.transport.user_agent,
            },
            "server": {
                "bind_address": self.server.bind_address,
                "port": self.server.port,
                "scheduler_interval_secs": self.server.scheduler_interval_secs,
                "graceful_shutdown_secs": self.server.graceful_shutdown_secs,
            },
            "logging": {
                "level": self.logging.level,
                "format": self.logging.format,
            },
        })
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("leadflow.toml"), PathBuf::from("config/leadflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_routing(routing: &RoutingConfig) -> Result<(), ConfigError> {
    if routing.dedup_window_days == 0 {
        return Err(ConfigError::Validation(
            "routing.dedup_window_days must be greater than zero".to_string(),
        ));
    }

    if routing.double_submit_window_secs > 3_600 {
        return Err(ConfigError::Validation(
            "routing.double_submit_window_secs must be at most 3600; longer windows belong to duplicate detection".to_string(),
        ));
    }

    // UTC-12:00 .. UTC+14:00
    if !(-720..=840).contains(&routing.week_utc_offset_minutes) {
        return Err(ConfigError::Validation(
            "routing.week_utc_offset_minutes must be in range -720..=840".to_string(),
        ));
    }

    if routing.reevaluation_batch_size == 0 {
        return Err(ConfigError::Validation(
            "routing.reevaluation_batch_size must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_delivery(delivery: &DeliveryConfig) -> Result<(), ConfigError> {
    if delivery.max_batch_size == 0 {
        return Err(ConfigError::Validation(
            "delivery.max_batch_size must be greater than zero".to_string(),
        ));
    }

    if delivery.max_send_attempts == 0 {
        return Err(ConfigError::Validation(
            "delivery.max_send_attempts must be greater than zero".to_string(),
        ));
    }

    if delivery.transport_timeout_secs == 0 || delivery.transport_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "delivery.transport_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if delivery.sending_timeout_secs <= delivery.transport_timeout_secs {
        return Err(ConfigError::Validation(format!(
            "delivery.sending_timeout_secs ({}) must exceed delivery.transport_timeout_secs ({}) so in-flight sends are not swept",
            delivery.sending_timeout_secs, delivery.transport_timeout_secs
        )));
    }

    Ok(())
}

fn validate_transport(transport: &TransportConfig) -> Result<(), ConfigError> {
    if let Some(token) = &transport.webhook_token {
        if token.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "transport.webhook_token is set but empty; remove it or provide a value"
                    .to_string(),
            ));
        }
    }

    if transport.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation("transport.user_agent cannot be empty".to_string()));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.scheduler_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "server.scheduler_interval_secs must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_weekday(key: &str, value: &str) -> Result<Weekday, ConfigError> {
    value.trim().parse::<Weekday>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    routing: Option<RoutingPatch>,
    delivery: Option<DeliveryPatch>,
    transport: Option<TransportPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutingPatch {
    dedup_window_days: Option<u32>,
    double_submit_window_secs: Option<u64>,
    week_start: Option<String>,
    week_utc_offset_minutes: Option<i32>,
    lb_fallback_to_regular: Option<bool>,
    mid_week_quota: Option<MidWeekQuota>,
    reevaluation_batch_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct DeliveryPatch {
    max_batch_size: Option<u32>,
    max_send_attempts: Option<u32>,
    sending_timeout_secs: Option<u64>,
    retry_backoff_secs: Option<u64>,
    transport_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TransportPatch {
    webhook_token: Option<String>,
    user_agent: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    scheduler_interval_secs: Option<u64>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use chrono::Weekday;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
    use crate::domain::quota::MidWeekQuota;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_validate() -> Result<(), String> {
        let config = AppConfig::default();
        config.validate().map_err(|err| err.to_string())?;
        ensure(config.routing.dedup_window_days == 30, "dedup window defaults to 30 days")?;
        ensure(!config.routing.lb_fallback_to_regular, "lb fallback is off by default")?;
        ensure(config.delivery.max_send_attempts == 3, "three send attempts by default")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_LEADFLOW_WEBHOOK_TOKEN", "tok-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("leadflow.toml");
            fs::write(
                &path,
                r#"
[transport]
webhook_token = "${TEST_LEADFLOW_WEBHOOK_TOKEN}"

[routing]
week_start = "saturday"
mid_week_quota = "pro_rated"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.transport.webhook_token.as_ref().map(|token| token.expose_secret())
                    == Some("tok-from-env"),
                "webhook token should be interpolated from environment",
            )?;
            ensure(config.routing.week_start == Weekday::Sat, "week start should be saturday")?;
            ensure(
                config.routing.mid_week_quota == MidWeekQuota::ProRated,
                "pro-rated policy should be read from file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_LEADFLOW_WEBHOOK_TOKEN"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADFLOW_LOG_LEVEL", "warn");
        env::set_var("LEADFLOW_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["LEADFLOW_LOG_LEVEL", "LEADFLOW_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADFLOW_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("LEADFLOW_DELIVERY_MAX_BATCH_SIZE", "10");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("leadflow.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[delivery]
max_batch_size = 50
max_send_attempts = 5

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.delivery.max_batch_size == 10, "env batch size should win over file")?;
            ensure(config.delivery.max_send_attempts == 5, "file value should win over default")?;
            Ok(())
        })();

        clear_vars(&["LEADFLOW_DATABASE_URL", "LEADFLOW_DELIVERY_MAX_BATCH_SIZE"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADFLOW_DELIVERY_SENDING_TIMEOUT_SECS", "10");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("delivery.sending_timeout_secs")
            );
            ensure(has_message, "validation failure should mention delivery.sending_timeout_secs")
        })();

        clear_vars(&["LEADFLOW_DELIVERY_SENDING_TIMEOUT_SECS"]);
        result
    }

    #[test]
    fn malformed_env_override_is_reported_with_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADFLOW_ROUTING_WEEK_START", "someday");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected override failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::InvalidEnvOverride { ref key, .. } if key == "LEADFLOW_ROUTING_WEEK_START"),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["LEADFLOW_ROUTING_WEEK_START"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug_or_summary() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADFLOW_TRANSPORT_WEBHOOK_TOKEN", "tok-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");
            let summary = config.redacted_summary().to_string();

            ensure(!debug.contains("tok-secret-value"), "debug output should not contain token")?;
            ensure(!summary.contains("tok-secret-value"), "summary should not contain token")?;
            ensure(
                summary.contains("\"webhook_token_configured\":true"),
                "summary should flag the configured token",
            )?;
            Ok(())
        })();

        clear_vars(&["LEADFLOW_TRANSPORT_WEBHOOK_TOKEN"]);
        result
    }
}
