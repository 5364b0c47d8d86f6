//! Garbage Collector (§4.7): zombie job recovery, worker pruning, queue cleanup.

use chrono::{Duration as ChronoDuration, Utc};
use redis::AsyncCommands;
use rjob_database::RedisPool;
use rjob_queues::Queue;
use tracing::{event, Level};

use crate::error::Result;
use crate::registry::HostRegistry;

pub struct GarbageCollector {
    pool: RedisPool,
    default_expiry_secs: i64,
}

impl GarbageCollector {
    pub fn new(pool: RedisPool, default_expiry_secs: i64) -> GarbageCollector {
        GarbageCollector {
            pool,
            default_expiry_secs,
        }
    }

    /// For each queue: sweep `running` entries with no live owning worker to FAILED,
    /// and trim `processed` entries older than the configured expiry.
    pub async fn sweep_queues(&self, queues: &[Queue], registry: &HostRegistry) -> Result<()> {
        let now = Utc::now();
        let expiry = now - ChronoDuration::seconds(self.default_expiry_secs);

        for queue in queues {
            let candidates = queue.running_before(now).await?;
            for (job_id, started_at) in candidates {
                let job = match queue.job(&job_id).await? {
                    Some(j) => j,
                    None => continue,
                };
                if job.status.is_terminal() {
                    continue;
                }
                let owner = job.worker.as_deref().unwrap_or("");
                let alive = !owner.is_empty() && self.worker_is_live(registry, owner).await?;
                if !alive {
                    queue.fail_zombie(&job_id, started_at).await?;
                }
            }

            let removed = queue.trim_processed_before(expiry).await?;
            if removed > 0 {
                event!(Level::INFO, queue = %queue.name(), removed = %removed, "Trimmed processed archive");
            }
        }

        Ok(())
    }

    async fn worker_is_live(&self, registry: &HostRegistry, worker_id: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let is_member: bool = conn.sismember(registry.workers_set_key(), worker_id).await?;
        Ok(is_member)
    }

    /// Worker pruning (§4.7): drop any registered worker whose host is alive but whose
    /// own host-set entry is missing, or whose pid is gone on our own host.
    pub async fn prune_workers(&self, registry: &HostRegistry) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let workers: Vec<String> = conn.smembers(registry.workers_set_key()).await?;
        let hosts: Vec<String> = conn.smembers(registry.hosts_set_key()).await?;
        let our_host = registry.hostname();

        for worker in workers {
            let mut parts = worker.splitn(3, ':');
            let host = match parts.next() {
                Some(h) => h,
                None => continue,
            };
            let pid_str = parts.next();

            let dead = if host == our_host {
                match pid_str.and_then(|p| p.parse::<i32>().ok()) {
                    Some(pid) => !pid_is_alive(pid),
                    None => true,
                }
            } else if hosts.iter().any(|h| h == host) {
                let host_key = registry.host_key_for(host);
                let member: bool = conn.sismember(&host_key, &worker).await?;
                !member
            } else {
                // Host itself isn't registered any more; its workers are orphans too.
                true
            };

            if dead {
                event!(Level::WARN, worker = %worker, "Pruning dead worker");
                let mut pipe = redis::pipe();
                pipe.srem(registry.workers_set_key(), &worker).ignore();
                pipe.srem(registry.host_key_for(host), &worker).ignore();
                pipe.del(registry.worker_key_for(&worker)).ignore();
                pipe.query_async(&mut conn).await?;
            }
        }

        Ok(())
    }

    /// Queue cleanup (§4.7 `cleanupQueue`): drain this worker's `processing_list` on
    /// every known queue back into that queue's waiting list. Run at startup (to
    /// recover from our own prior crash) and on graceful unregister.
    pub async fn cleanup_own_processing_lists(&self, queues: &[Queue], worker_id: &str) -> Result<()> {
        for queue in queues {
            let moved = queue.cleanup_processing_list(worker_id).await?;
            if moved > 0 {
                event!(Level::INFO, queue = %queue.name(), moved = %moved, "Recovered in-flight payloads");
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn pid_is_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: i32) -> bool {
    true
}
