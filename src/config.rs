//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Worker service configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Time between reconciliation cycles.
    pub poll_interval: Duration,
    /// Time between units of work inside a single worker.
    pub work_period: Duration,
    /// How long `stop` waits for a worker to acknowledge cancellation before aborting it.
    pub stop_timeout: Duration,
    /// Maximum number of live workers. Starts beyond this fail and are retried next cycle.
    pub max_workers: usize,
    /// Path to the libSQL database file.
    pub db_path: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            work_period: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(10),
            max_workers: 256,
            db_path: PathBuf::from("./data/account-workers.db"),
        }
    }
}

impl WorkerConfig {
    /// Build a config from `ACCOUNT_WORKERS_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let poll_interval = secs_var(&lookup, "ACCOUNT_WORKERS_POLL_INTERVAL_SECS")?
            .unwrap_or(defaults.poll_interval);
        let work_period = secs_var(&lookup, "ACCOUNT_WORKERS_WORK_PERIOD_SECS")?
            .unwrap_or(defaults.work_period);
        let stop_timeout = secs_var(&lookup, "ACCOUNT_WORKERS_STOP_TIMEOUT_SECS")?
            .unwrap_or(defaults.stop_timeout);

        let max_workers = match lookup("ACCOUNT_WORKERS_MAX_WORKERS") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(0) => {
                    return Err(ConfigError::InvalidValue {
                        key: "ACCOUNT_WORKERS_MAX_WORKERS".to_string(),
                        message: "must be at least 1".to_string(),
                    });
                }
                Ok(n) => n,
                Err(e) => {
                    return Err(ConfigError::InvalidValue {
                        key: "ACCOUNT_WORKERS_MAX_WORKERS".to_string(),
                        message: e.to_string(),
                    });
                }
            },
            None => defaults.max_workers,
        };

        let db_path = lookup("ACCOUNT_WORKERS_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        Ok(Self {
            poll_interval,
            work_period,
            stop_timeout,
            max_workers,
            db_path,
        })
    }
}

/// Parse a positive whole-seconds duration.
fn secs_var<F>(lookup: &F, key: &str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let secs: u64 = raw.trim().parse().map_err(|e: std::num::ParseIntError| {
        ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }
    })?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(Some(Duration::from_secs(secs)))
}
