use std::{env, ops::Deref, sync::Arc};

use crate::error::{Error, Result};

/// A shared, cloneable Redis connection pool with an optional key namespace.
///
/// The namespace lets multiple independent deployments share one Redis instance
/// without key collisions; every caller that builds a key is expected to go through
/// [`RedisPool::key`] rather than formatting raw strings.
#[derive(Clone)]
pub struct RedisPool(Arc<RedisPoolInner>);

struct RedisPoolInner {
    pool: deadpool_redis::Pool,
    namespace: Option<String>,
}

impl Deref for RedisPool {
    type Target = deadpool_redis::Pool;

    fn deref(&self) -> &Self::Target {
        &self.0.pool
    }
}

impl RedisPool {
    /// Build a pool from an explicit URL, or fall back to the `REDIS_URL` environment
    /// variable when `url` is `None`.
    pub fn new(url: Option<String>, namespace: Option<String>) -> Result<RedisPool> {
        let redis_url = url
            .or_else(|| env::var("REDIS_URL").ok())
            .ok_or_else(|| Error::ConfigError("REDIS_URL is required".to_string()))?;

        let pool = deadpool_redis::Config {
            url: Some(redis_url),
            connection: None,
            pool: None,
        }
        .create_pool()?;

        Ok(RedisPool(Arc::new(RedisPoolInner { pool, namespace })))
    }

    pub fn pool(&self) -> &deadpool_redis::Pool {
        &self.0.pool
    }

    pub fn namespace(&self) -> Option<&str> {
        self.0.namespace.as_deref()
    }

    /// Prefix a bare key name with the configured namespace, if any.
    pub fn key(&self, name: &str) -> String {
        match &self.0.namespace {
            Some(ns) => format!("{}:{}", ns, name),
            None => name.to_string(),
        }
    }

    pub async fn get(&self) -> Result<deadpool_redis::Connection> {
        self.0.pool.get().await.map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_without_namespace() {
        let pool = RedisPool::new(Some("redis://127.0.0.1/".to_string()), None).unwrap();
        assert_eq!(pool.key("queues"), "queues");
    }

    #[test]
    fn key_with_namespace() {
        let pool = RedisPool::new(
            Some("redis://127.0.0.1/".to_string()),
            Some("myapp".to_string()),
        )
        .unwrap();
        assert_eq!(pool.key("queues"), "myapp:queues");
    }
}
