use thiserror::Error;

/// Infrastructure errors: Redis, (de)serialization, pool exhaustion. Convertible with
/// `?` from every fallible call the worker runtime makes.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Redis error {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Redis connection error {0}")]
    RedisPoolError(#[from] deadpool::managed::PoolError<::redis::RedisError>),

    #[error(transparent)]
    DatabaseError(#[from] rjob_database::Error),

    #[error(transparent)]
    QueueError(#[from] rjob_queues::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("no handler registered for class {0}")]
    UnknownClass(String),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Domain control-flow raised by a job handler (§7). Kept distinct from [`Error`]:
/// this is the outcome vocabulary the state machine dispatches on, not a thing
/// returned by infrastructure calls.
#[derive(Debug, Error)]
pub enum PerformError {
    #[error("cancelled: {0}")]
    Cancel(String),

    /// `delay` uses the same relative/absolute heuristic as every other delay value
    /// (see [`rjob_queues::resolve_retry_delay`]). Bypasses the retry threshold.
    #[error("retry requested with delay {delay_secs}s: {message}")]
    Retry { delay_secs: i64, message: String },

    /// The child exited non-zero, or exited zero while the job was still RUNNING.
    #[error("dirty exit: {0}")]
    Dirty(String),

    /// Raised by the garbage collector against an orphaned `running` entry, never by
    /// a handler itself.
    #[error("zombie: worker no longer registered")]
    Zombie,

    #[error("{0}")]
    Unexpected(String),

    /// Eager, at construction / instance lookup time. Never enters a queue.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl PerformError {
    pub fn message(&self) -> String {
        match self {
            PerformError::Cancel(m) => m.clone(),
            PerformError::Retry { message, .. } => message.clone(),
            PerformError::Dirty(m) => m.clone(),
            PerformError::Zombie => "worker no longer registered".to_string(),
            PerformError::Unexpected(m) => m.clone(),
            PerformError::InvalidInput(m) => m.clone(),
        }
    }
}
