//! Worker configuration, read from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `DATABASE_URL` | required |
//! | `DATABASE_MAX_CONNECTIONS` | 5 |
//! | `REDIS_URL` | `redis://localhost:6379` |
//! | `PRODUCTS_QUEUE_URL` | required |
//! | `SALES_QUEUE_URL` | required |
//! | `QUEUE_BATCH_SIZE` | 10 |
//! | `QUEUE_WAIT_SECS` | 10 |
//! | `QUEUE_RETRY_DELAY_SECS` | 5 |
//! | `QUEUE_VISIBILITY_TIMEOUT_SECS` | 30 |
//! | `QUEUE_MAX_RECEIVE_COUNT` | unset (5 when a dead-letter queue is set) |
//! | `DEAD_LETTER_QUEUE_URL` | unset |
//! | `LOW_STOCK_THRESHOLD` | 10 |
//! | `CONSUMER_GROUP` | `watchstore` |
//! | `CONSUMER_NAME` | `worker-<uuid>` |
//! | `SALE_LEDGER_ENABLED` | `true` |

use std::str::FromStr;
use std::time::Duration;

use uuid::Uuid;

use watchstore_events::ReceiveOptions;
use watchstore_products::DEFAULT_LOW_STOCK_THRESHOLD;

use crate::workers::{DeadLetterPolicy, DEFAULT_MAX_RECEIVE_COUNT, QueuePollerConfig};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub redis_url: String,
    pub products_queue: String,
    pub sales_queue: String,
    pub receive: ReceiveOptions,
    pub retry_delay: Duration,
    pub visibility_timeout: Duration,
    pub dead_letter: Option<DeadLetterPolicy>,
    pub low_stock_threshold: u32,
    pub consumer_group: String,
    pub consumer_name: String,
    /// Skip already-applied line items when a `sale.created` is redelivered.
    pub sale_ledger_enabled: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through `lookup`, which returns the raw value of a variable.
    /// Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let batch_size: usize = parse_or(&get, "QUEUE_BATCH_SIZE", 10)?;
        if batch_size == 0 {
            return Err(invalid("QUEUE_BATCH_SIZE", "0", "must be at least 1"));
        }

        let max_receive_count: Option<u32> = parse_opt(&get, "QUEUE_MAX_RECEIVE_COUNT")?;
        if max_receive_count == Some(0) {
            return Err(invalid("QUEUE_MAX_RECEIVE_COUNT", "0", "must be at least 1"));
        }
        let dead_letter = match (get("DEAD_LETTER_QUEUE_URL"), max_receive_count) {
            (Some(queue), max) => Some(
                DeadLetterPolicy::new(queue)
                    .with_max_receive_count(max.unwrap_or(DEFAULT_MAX_RECEIVE_COUNT)),
            ),
            (None, Some(_)) => return Err(ConfigError::Missing("DEAD_LETTER_QUEUE_URL")),
            (None, None) => None,
        };

        Ok(Self {
            database_url: require("DATABASE_URL")?,
            database_max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 5)?,
            redis_url: get("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
            products_queue: require("PRODUCTS_QUEUE_URL")?,
            sales_queue: require("SALES_QUEUE_URL")?,
            receive: ReceiveOptions {
                max_messages: batch_size,
                wait_time: Duration::from_secs(parse_or(&get, "QUEUE_WAIT_SECS", 10)?),
            },
            retry_delay: Duration::from_secs(parse_or(&get, "QUEUE_RETRY_DELAY_SECS", 5)?),
            visibility_timeout: Duration::from_secs(parse_or(
                &get,
                "QUEUE_VISIBILITY_TIMEOUT_SECS",
                30,
            )?),
            dead_letter,
            low_stock_threshold: parse_or(
                &get,
                "LOW_STOCK_THRESHOLD",
                DEFAULT_LOW_STOCK_THRESHOLD,
            )?,
            consumer_group: get("CONSUMER_GROUP").unwrap_or_else(|| "watchstore".to_string()),
            consumer_name: get("CONSUMER_NAME")
                .unwrap_or_else(|| format!("worker-{}", Uuid::now_v7())),
            sale_ledger_enabled: parse_bool_or(&get, "SALE_LEDGER_ENABLED", true)?,
        })
    }

    /// Poller settings for `queue`, sharing this config's receive, retry and
    /// dead-letter settings.
    pub fn poller_config(&self, name: &str, queue: &str) -> QueuePollerConfig {
        let config = QueuePollerConfig::new(name, queue)
            .with_receive_options(self.receive)
            .with_retry_delay(self.retry_delay);
        match &self.dead_letter {
            Some(policy) => config.with_dead_letter(policy.clone()),
            None => config,
        }
    }
}

fn invalid(key: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_opt<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| raw.parse::<T>().map_err(|e| invalid(key, &raw, e)))
        .transpose()
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(get, key)?.unwrap_or(default))
}

fn parse_bool_or<G>(get: &G, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(invalid(key, &raw, "expected true or false")),
        },
    }
}
