//! Process configuration read from the environment.
//!
//! Submitters and workers share one `CourierConfig`; unset variables fall
//! back to `Default`, and malformed ones fail with `ConfigError::Invalid`.

use std::time::Duration;

use thiserror::Error;

use crate::app::{WaiterConfig, WorkerConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Deployment settings shared by the submitter and worker processes.
#[derive(Debug, Clone, PartialEq)]
pub struct CourierConfig {
    /// Redis host (`REDIS_IP`).
    pub redis_host: String,
    /// Redis port (`REDIS_PORT`).
    pub redis_port: u16,
    /// Redis logical database (`REDIS_DB_ID`).
    pub redis_db: u32,
    /// Queue list key; also the prefix of every other key (`REDIS_QUEUE`).
    pub queue: String,
    /// Submitter poll interval (`API_SLEEP`, seconds).
    pub poll_interval: Duration,
    /// Worker sleep after each job (`SERVER_SLEEP`, seconds). Zero disables.
    pub worker_throttle: Duration,
    /// Result expiry (`COURIER_RESULT_TTL_SECS`). `None` keeps results forever.
    pub result_ttl: Option<Duration>,
    /// Age after which an unacked claim is re-delivered
    /// (`COURIER_VISIBILITY_TIMEOUT_SECS`).
    pub visibility_timeout: Duration,
    /// Worker tasks per process (`COURIER_WORKERS`).
    pub workers: usize,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            redis_host: "localhost".to_string(),
            redis_port: 6379,
            redis_db: 0,
            queue: "service_queue".to_string(),
            poll_interval: Duration::from_millis(50),
            worker_throttle: Duration::from_millis(50),
            result_ttl: Some(Duration::from_secs(3600)),
            visibility_timeout: Duration::from_secs(300),
            workers: 1,
        }
    }
}

impl CourierConfig {
    /// Read settings from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`CourierConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(host) = lookup("REDIS_IP") {
            cfg.redis_host = host;
        }
        if let Some(raw) = lookup("REDIS_PORT") {
            cfg.redis_port = parse("REDIS_PORT", &raw)?;
        }
        if let Some(raw) = lookup("REDIS_DB_ID") {
            cfg.redis_db = parse("REDIS_DB_ID", &raw)?;
        }
        if let Some(queue) = lookup("REDIS_QUEUE") {
            if queue.is_empty() {
                return Err(invalid("REDIS_QUEUE", &queue, "must not be empty"));
            }
            cfg.queue = queue;
        }
        if let Some(raw) = lookup("API_SLEEP") {
            cfg.poll_interval = parse_secs("API_SLEEP", &raw)?;
        }
        if let Some(raw) = lookup("SERVER_SLEEP") {
            cfg.worker_throttle = parse_secs("SERVER_SLEEP", &raw)?;
        }
        if let Some(raw) = lookup("COURIER_RESULT_TTL_SECS") {
            let secs: u64 = parse("COURIER_RESULT_TTL_SECS", &raw)?;
            cfg.result_ttl = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(raw) = lookup("COURIER_VISIBILITY_TIMEOUT_SECS") {
            let secs: u64 = parse("COURIER_VISIBILITY_TIMEOUT_SECS", &raw)?;
            if secs == 0 {
                return Err(invalid("COURIER_VISIBILITY_TIMEOUT_SECS", &raw, "must be positive"));
            }
            cfg.visibility_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("COURIER_WORKERS") {
            let workers: usize = parse("COURIER_WORKERS", &raw)?;
            if workers == 0 {
                return Err(invalid("COURIER_WORKERS", &raw, "must be at least 1"));
            }
            cfg.workers = workers;
        }

        Ok(cfg)
    }

    pub fn with_redis(mut self, host: impl Into<String>, port: u16, db: u32) -> Self {
        self.redis_host = host.into();
        self.redis_port = port;
        self.redis_db = db;
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_result_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.result_ttl = ttl;
        self
    }

    pub fn redis_url(&self) -> String {
        format!(
            "redis://{}:{}/{}",
            self.redis_host, self.redis_port, self.redis_db
        )
    }

    pub fn waiter_config(&self) -> WaiterConfig {
        WaiterConfig {
            poll_interval: self.poll_interval,
            ..WaiterConfig::default()
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            throttle: (!self.worker_throttle.is_zero()).then_some(self.worker_throttle),
            ..WorkerConfig::default()
        }
    }
}

fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| invalid(var, raw, e.to_string()))
}

/// Fractional seconds, e.g. `0.05`.
fn parse_secs(var: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = parse(var, raw)?;
    Duration::try_from_secs_f64(secs).map_err(|e| invalid(var, raw, e.to_string()))
}
