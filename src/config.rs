use shuttle_runtime::SecretStore;
use std::{str::FromStr, sync::OnceLock};

use crate::error::{BotError, BotResult};

static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing secret: {0}")]
    MissingSecret(String),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub telegram: TelegramConfig,
    pub turso: TursoConfig,
    pub funnel: FunnelConfig,
    pub runtime: RuntimeConfig,
}

impl AppConfig {
    pub fn set_global(config: AppConfig) -> BotResult<()> {
        APP_CONFIG
            .set(config)
            .map_err(|_| BotError::AppStateError("Failed to set global app config".to_string()))
    }

    pub fn get() -> BotResult<&'static AppConfig> {
        APP_CONFIG
            .get()
            .ok_or_else(|| BotError::AppStateError("App config not initialized".to_string()))
    }
}

#[derive(Clone, Debug)]
pub struct TelegramConfig(pub String);

#[derive(Clone, Debug)]
pub struct TursoConfig {
    /// `libsql://` or `https://` for a remote database, a file path otherwise.
    pub url: String,
    pub token: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunnelConfig {
    /// A repeated /start within this window is ignored.
    pub debounce_secs: i64,
    pub send_retry_backoff_secs: u64,
    pub max_send_retries: u32,
    pub follow_up_days: i64,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            debounce_secs: 30,
            send_retry_backoff_secs: 30,
            max_send_retries: 3,
            follow_up_days: 7,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    /// A job whose handler keeps failing is marked failed after this many tries.
    pub max_job_retries: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            batch_size: 32,
            max_job_retries: 5,
        }
    }
}

pub fn build_config(secret_store: &SecretStore) -> Result<AppConfig, ConfigError> {
    build_config_from(|key| secret_store.get(key))
}

fn build_config_from<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    info!("Building AppConfig...");

    let required = |key: &str| lookup(key).ok_or_else(|| ConfigError::MissingSecret(key.to_string()));

    let funnel_defaults = FunnelConfig::default();
    let runtime_defaults = RuntimeConfig::default();

    let config = AppConfig {
        telegram: TelegramConfig(required("TELEGRAM_BOT_TOKEN")?),
        turso: TursoConfig {
            url: required("TURSO_URL")?,
            token: lookup("TURSO_TOKEN").unwrap_or_default(),
        },
        funnel: FunnelConfig {
            debounce_secs: parse_or(&lookup, "FUNNEL_DEBOUNCE_SECS", funnel_defaults.debounce_secs)?,
            send_retry_backoff_secs: parse_or(
                &lookup,
                "FUNNEL_SEND_RETRY_BACKOFF_SECS",
                funnel_defaults.send_retry_backoff_secs,
            )?,
            max_send_retries: parse_or(&lookup, "FUNNEL_MAX_SEND_RETRIES", funnel_defaults.max_send_retries)?,
            follow_up_days: parse_or(&lookup, "FUNNEL_FOLLOW_UP_DAYS", funnel_defaults.follow_up_days)?,
        },
        runtime: RuntimeConfig {
            poll_interval_ms: parse_or(&lookup, "RUNTIME_POLL_INTERVAL_MS", runtime_defaults.poll_interval_ms)?,
            batch_size: parse_or(&lookup, "RUNTIME_BATCH_SIZE", runtime_defaults.batch_size)?,
            max_job_retries: parse_or(&lookup, "RUNTIME_MAX_JOB_RETRIES", runtime_defaults.max_job_retries)?,
        },
    };
    info!("AppConfig built");

    Ok(config)
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) => value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
pub fn new_test_config() -> AppConfig {
    AppConfig {
        telegram: TelegramConfig("test_token".to_string()),
        turso: TursoConfig {
            url: ":memory:".to_string(),
            token: String::new(),
        },
        funnel: FunnelConfig::default(),
        runtime: RuntimeConfig::default(),
    }
}
