use std::{env, time::Duration};

use crate::error::{Error, Result};

/// Settings read once at startup (§10.3). Passed explicitly into [`crate::Worker::new`]
/// rather than re-read from a global; a `structopt` CLI layer may override any of these
/// fields before construction.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub redis_url: Option<String>,
    pub redis_namespace: Option<String>,
    pub queues: Vec<String>,
    pub interval: Duration,
    pub timeout: Duration,
    pub blocking: bool,
    pub memory_limit_mb: u64,
    pub default_expiry_secs: i64,
    pub cleanup_cycle_secs: u64,
}

const DEFAULT_INTERVAL_SECS: u64 = 5;
const DEFAULT_TIMEOUT_SECS: u64 = 3600;
const DEFAULT_MEMORY_LIMIT_MB: u64 = 512;
const DEFAULT_EXPIRY_SECS: i64 = 86_400;
const DEFAULT_CLEANUP_CYCLE_SECS: u64 = 120;

impl WorkerConfig {
    pub fn from_env() -> Result<WorkerConfig> {
        let queues = env::var("QUEUES").unwrap_or_else(|_| "*".to_string());
        let queues = queues
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let interval = env_u64("QUEUE_INTERVAL", DEFAULT_INTERVAL_SECS)?;
        let timeout = env_u64("QUEUE_TIMEOUT", DEFAULT_TIMEOUT_SECS)?;
        let blocking = env::var("QUEUE_BLOCKING")
            .map(|v| v != "0" && v.to_lowercase() != "false")
            .unwrap_or(true);
        let memory_limit_mb = env_u64("MEMORY_LIMIT_MB", DEFAULT_MEMORY_LIMIT_MB)?;
        let default_expiry_secs = env_i64("DEFAULT_EXPIRY_SECS", DEFAULT_EXPIRY_SECS)?;
        let cleanup_cycle_secs = env_u64("CLEANUP_CYCLE_SECS", DEFAULT_CLEANUP_CYCLE_SECS)?;

        Ok(WorkerConfig {
            redis_url: env::var("REDIS_URL").ok(),
            redis_namespace: env::var("REDIS_NAMESPACE").ok(),
            queues,
            interval: Duration::from_secs(interval),
            timeout: Duration::from_secs(timeout),
            blocking,
            memory_limit_mb,
            default_expiry_secs,
            cleanup_cycle_secs,
        })
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| Error::ConfigError(format!("{} must be an integer, got {:?}", key, v))),
        Err(_) => Ok(default),
    }
}

fn env_i64(key: &str, default: i64) -> Result<i64> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| Error::ConfigError(format!("{} must be an integer, got {:?}", key, v))),
        Err(_) => Ok(default),
    }
}
