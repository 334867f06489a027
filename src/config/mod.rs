//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or malformed.
//! Connection strings are wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::queue::ChannelNames;
use crate::retry::RetryPolicy;
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub redis_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub db_max_connections: u32,
    pub channels: ChannelNames,
    /// Fixed time-to-live of the per-task execution lock. Not renewed.
    pub lock_ttl: Duration,
    /// Bound on a whole worker invocation. `None` runs until shutdown.
    pub worker_timeout: Option<Duration>,
    pub poll_interval: Duration,
    /// Simulated work duration of the built-in executors.
    pub executor_delay: Duration,
    pub retry: RetryPolicy,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = RetryPolicy::default();
        let default_channels = ChannelNames::default();

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            redis_url: SecretString::from(required_var("REDIS_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_max_connections: parsed_var("DB_MAX_CONNECTIONS", 10)?,
            channels: ChannelNames {
                high: std::env::var("HIGH_PRIORITY_JOBS_QUEUE_NAME")
                    .unwrap_or(default_channels.high),
                normal: std::env::var("NORMAL_PRIORITY_JOBS_QUEUE_NAME")
                    .unwrap_or(default_channels.normal),
                low: std::env::var("LOW_PRIORITY_JOBS_QUEUE_NAME")
                    .unwrap_or(default_channels.low),
            },
            lock_ttl: Duration::from_secs(parsed_var("LOCK_TTL_SECONDS", 10)?),
            worker_timeout: optional_var::<u64>("WORKER_TIMEOUT_SECONDS")?
                .map(Duration::from_secs),
            poll_interval: Duration::from_millis(parsed_var("POLL_INTERVAL_MS", 500)?),
            executor_delay: Duration::from_millis(parsed_var("EXECUTOR_DELAY_MS", 3000)?),
            retry: RetryPolicy {
                max_attempts: parsed_var("RETRY_MAX_ATTEMPTS", defaults.max_attempts)?,
                initial_interval: Duration::from_millis(parsed_var(
                    "RETRY_INITIAL_INTERVAL_MS",
                    defaults.initial_interval.as_millis() as u64,
                )?),
                multiplier: finite_var("RETRY_MULTIPLIER", defaults.multiplier)?,
                max_interval: Duration::from_millis(parsed_var(
                    "RETRY_MAX_INTERVAL_MS",
                    defaults.max_interval.as_millis() as u64,
                )?),
                jitter: finite_var("RETRY_JITTER", defaults.jitter)?,
            },
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn optional_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("environment variable {name} has invalid value '{raw}'"))),
        Err(_) => Ok(None),
    }
}

fn parsed_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    Ok(optional_var(name)?.unwrap_or(default))
}

/// Like [`parsed_var`], but `NaN` and infinities are rejected too.
fn finite_var(name: &str, default: f64) -> Result<f64> {
    let value = parsed_var(name, default)?;
    if !value.is_finite() {
        return Err(Error::Config(format!(
            "environment variable {name} must be a finite number, got {value}"
        )));
    }
    Ok(value)
}
