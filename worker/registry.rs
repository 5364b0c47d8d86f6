//! Host Registry (§3 "Host", §4.4 step 1, §4.7 "Worker pruning").

use chrono::Utc;
use redis::AsyncCommands;
use rjob_database::RedisPool;

use crate::error::Result;
use crate::identity::hostname;

#[derive(Debug, Clone, Default)]
pub struct Heartbeat {
    pub memory_mb: u64,
    pub job_id: Option<String>,
    pub job_pid: Option<u32>,
    pub job_load: Option<f32>,
    pub job_started: Option<i64>,
}

pub struct HostRegistry {
    pool: RedisPool,
    workers_set: String,
    hosts_set: String,
    host_key: String,
    worker_id: String,
    worker_key: String,
    hostname: String,
}

impl HostRegistry {
    pub fn new(pool: RedisPool, worker_id: String, queues: &[String]) -> HostRegistry {
        let hostname = hostname();
        let workers_set = pool.key(rjob_queues::WORKERS_SET);
        let hosts_set = pool.key(rjob_queues::HOSTS_SET);
        let host_key = pool.key(&rjob_queues::host_key(&hostname));
        let worker_key = pool.key(&rjob_queues::worker_key(&worker_id));
        let _ = queues;

        HostRegistry {
            pool,
            workers_set,
            hosts_set,
            host_key,
            worker_id,
            worker_key,
            hostname,
        }
    }

    pub fn worker_key(&self) -> &str {
        &self.worker_key
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Register this worker's presence: add to the global `workers`/`hosts` sets, this
    /// host's worker set, and write the worker's descriptive hash.
    pub async fn register(&self, queues: &[String]) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let mut pipe = redis::pipe();
        pipe.sadd(&self.workers_set, &self.worker_id).ignore();
        pipe.sadd(&self.hosts_set, &self.hostname).ignore();
        pipe.sadd(&self.host_key, &self.worker_id).ignore();
        pipe.hset_multiple(
            &self.worker_key,
            &[
                ("status", "running"),
                ("host", self.hostname.as_str()),
                ("queues", &queues.join(",")),
                ("registered", &Utc::now().timestamp_millis().to_string()),
            ],
        )
        .ignore();
        pipe.query_async(&mut conn).await?;
        Ok(())
    }

    pub async fn unregister(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let mut pipe = redis::pipe();
        pipe.srem(&self.workers_set, &self.worker_id).ignore();
        pipe.srem(&self.host_key, &self.worker_id).ignore();
        pipe.del(&self.worker_key).ignore();
        pipe.query_async(&mut conn).await?;
        Ok(())
    }

    pub async fn set_status(&self, status: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        conn.hset(&self.worker_key, "status", status).await?;
        Ok(())
    }

    pub async fn heartbeat(&self, beat: &Heartbeat) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let mut pipe = redis::pipe();
        pipe.hset(&self.worker_key, "memory", beat.memory_mb).ignore();
        pipe.hset(
            &self.worker_key,
            "job_id",
            beat.job_id.as_deref().unwrap_or(""),
        )
        .ignore();
        pipe.hset(
            &self.worker_key,
            "job_pid",
            beat.job_pid.map(|p| p.to_string()).unwrap_or_default(),
        )
        .ignore();
        pipe.hset(
            &self.worker_key,
            "job_load",
            beat.job_load.map(|l| l.to_string()).unwrap_or_default(),
        )
        .ignore();
        pipe.hset(
            &self.worker_key,
            "job_started",
            beat.job_started.map(|t| t.to_string()).unwrap_or_default(),
        )
        .ignore();
        pipe.query_async(&mut conn).await?;
        Ok(())
    }

    pub async fn record_last_g_signal(&self, signal: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        conn.hset(&self.worker_key, "last_g_signal", signal).await?;
        Ok(())
    }

    /// Own sanity check (§4.4 step 5): is this worker still present in the global set
    /// with a non-empty hash?
    pub async fn self_check(&self) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let is_member: bool = conn.sismember(&self.workers_set, &self.worker_id).await?;
        if !is_member {
            return Ok(false);
        }
        let hash_len: usize = conn.hlen(&self.worker_key).await?;
        Ok(hash_len > 0)
    }

    pub fn workers_set_key(&self) -> &str {
        &self.workers_set
    }

    pub fn hosts_set_key(&self) -> &str {
        &self.hosts_set
    }

    pub fn host_key_for(&self, host: &str) -> String {
        self.pool.key(&rjob_queues::host_key(host))
    }

    pub fn worker_key_for(&self, id: &str) -> String {
        self.pool.key(&rjob_queues::worker_key(id))
    }
}
