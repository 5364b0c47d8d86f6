//! Canonical Redis key names (§6 of the keyspace table). Every key here is bare;
//! [`crate::Queue::new`] runs each of them through [`rjob_database::RedisPool::key`]
//! once at construction so callers never format a raw string themselves.

pub const QUEUES_SET: &str = "queues";
pub const GLOBAL_STATS: &str = "stats";
pub const DUPLICATES_LIST: &str = "duplicates";
pub const GLOBAL_HASH: &str = "global";
pub const WORKERS_SET: &str = "workers";
pub const HOSTS_SET: &str = "hosts";

#[derive(Debug, Clone)]
pub struct QueueKeys {
    pub name: String,
    pub waiting: String,
    pub delayed: String,
    pub running: String,
    pub processed: String,
    pub cancelled: String,
    pub failed: String,
    pub fail_retried: String,
    pub stats: String,
}

impl QueueKeys {
    pub fn new(queue: &str) -> QueueKeys {
        QueueKeys {
            name: queue.to_string(),
            waiting: format!("queue:{}", queue),
            delayed: format!("queue:{}:delayed", queue),
            running: format!("queue:{}:running", queue),
            processed: format!("queue:{}:processed", queue),
            cancelled: format!("queue:{}:cancelled", queue),
            failed: format!("queue:{}:failed", queue),
            fail_retried: format!("queue:{}:fail_retried", queue),
            stats: format!("queue:{}:stats", queue),
        }
    }

    pub fn processing_list(&self, worker_id: &str) -> String {
        format!("{}:{}:processing_list", self.waiting, worker_id)
    }
}

pub fn job_key(id: &str) -> String {
    format!("job:{}", id)
}

pub fn job_output_key(id: &str) -> String {
    format!("job:{}:output", id)
}

pub fn unique_key(signature: &str) -> String {
    format!("unique:job:{}", signature)
}

pub fn worker_key(id: &str) -> String {
    format!("worker:{}", id)
}

pub fn host_key(name: &str) -> String {
    format!("host:{}", name)
}

pub fn job_subject_pending_key(subject: &str) -> String {
    format!("jobsubject:pending:{}", subject)
}

pub fn job_subject_done_key(subject: &str) -> String {
    format!("jobsubject:done:{}", subject)
}

pub fn job_series_key(series_id: &str) -> String {
    format!("jobseries:{}", series_id)
}
