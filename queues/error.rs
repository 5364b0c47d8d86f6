use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Redis error {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Redis connection error {0}")]
    RedisPoolError(#[from] deadpool::managed::PoolError<::redis::RedisError>),

    #[error(transparent)]
    DatabaseError(#[from] rjob_database::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    #[error(transparent)]
    ParseIntError(#[from] std::num::ParseIntError),

    #[error("job {0} not found")]
    JobNotFound(String),

    #[error("queue is empty: {0}")]
    InvalidInput(String),

    #[error("a Lua script returned an unexpected shape: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, Error>;
