use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Database Configuration Error: {0}")]
    ConfigError(String),

    #[error("Redis error {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Redis connection error {0}")]
    RedisPoolError(#[from] deadpool::managed::PoolError<::redis::RedisError>),

    #[error("Redis pool creation error {0}")]
    RedisPoolCreationError(#[from] deadpool_redis::CreatePoolError),
}

pub type Result<T> = std::result::Result<T, Error>;
