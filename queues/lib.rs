mod cancel_script;
mod claim_script;
mod complete_script;
mod drain_delayed_script;
mod error;
mod event;
mod fail_script;
mod job;
mod keyspace;
mod queue;
mod retry;
mod uniqueness;

pub use cancel_script::CancelOutcome;
pub use error::{Error, Result};
pub use event::{EventBus, EventKind, EventSubject};
pub use fail_script::FailAction;
pub use job::{
    Job, JobException, JobStatus, NewJob, Payload, DEFAULT_RETRY_THRESHOLD,
    MAX_EXCEPTION_HISTORY, UNLIMITED_RETRY_THRESHOLD,
};
pub use keyspace::{
    host_key, job_key, job_output_key, job_series_key, job_subject_done_key,
    job_subject_pending_key, unique_key, worker_key, QueueKeys, GLOBAL_HASH, GLOBAL_STATS,
    HOSTS_SET, QUEUES_SET, WORKERS_SET,
};
pub use queue::{Queue, QueueStatus};
pub use retry::{
    decide as decide_retry, jittered_backoff_secs, resolve_retry_delay, FailureKind,
    RetryDecision, MAX_BACKOFF_SECS, RETRY_DELAY_ABSOLUTE_BOUNDARY_SECS,
};
pub use uniqueness::{DUPLICATES_LIST_CAP, UNIQUENESS_LOCK_TTL_SECS};
