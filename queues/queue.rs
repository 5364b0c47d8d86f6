use std::{
    sync::Mutex,
    time::Duration as StdDuration,
};

use chrono::{DateTime, TimeZone, Utc};
use redis::AsyncCommands;
use rjob_database::RedisPool;
use rjob_graceful_shutdown::GracefulShutdownConsumer;
use serde::Serialize;
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{event, Level};

use crate::{
    cancel_script::{CancelOutcome, CancelScript},
    claim_script::ClaimScript,
    complete_script::CompleteScript,
    drain_delayed_script::DrainDelayedScript,
    error::{Error, Result},
    event::{EventBus, EventKind, EventSubject},
    fail_script::{FailAction, FailScript},
    job::{Job, JobException, NewJob, Payload},
    keyspace::{self, QueueKeys},
    retry::{self, FailureKind, RetryDecision},
    uniqueness::{AcquireSignatureScript, DUPLICATES_LIST_CAP},
};

pub struct Queue(std::sync::Arc<QueueInner>);

struct QueueInner {
    pool: RedisPool,
    events: EventBus,
    keys: QueueKeys,
    job_key_prefix: String,
    duplicates_key: String,
    global_stats_key: String,
    queues_set_key: String,

    claim_script: ClaimScript,
    complete_script: CompleteScript,
    fail_script: FailScript,
    cancel_script: CancelScript,
    drain_delayed_script: DrainDelayedScript,
    uniqueness_script: AcquireSignatureScript,

    delayed_drain_task: Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue").field("name", &self.0.keys.name).finish()
    }
}

impl Clone for Queue {
    fn clone(&self) -> Self {
        Queue(self.0.clone())
    }
}

#[derive(Debug, Default, Serialize)]
pub struct QueueStatus {
    pub waiting: usize,
    pub delayed: usize,
    pub running: usize,
    pub queued_total: u64,
    pub processed_total: u64,
    pub cancelled_total: u64,
    pub failed_total: u64,
    pub fail_retried_total: u64,
}

impl Queue {
    pub fn new(pool: RedisPool, queue_name: impl Into<String>, events: EventBus) -> Queue {
        let name = queue_name.into();
        let mut keys = QueueKeys::new(&name);
        keys.waiting = pool.key(&keys.waiting);
        keys.delayed = pool.key(&keys.delayed);
        keys.running = pool.key(&keys.running);
        keys.processed = pool.key(&keys.processed);
        keys.cancelled = pool.key(&keys.cancelled);
        keys.failed = pool.key(&keys.failed);
        keys.fail_retried = pool.key(&keys.fail_retried);
        keys.stats = pool.key(&keys.stats);

        let job_key_prefix = pool.key("job:");
        let duplicates_key = pool.key(keyspace::DUPLICATES_LIST);
        let global_stats_key = pool.key(keyspace::GLOBAL_STATS);
        let queues_set_key = pool.key(keyspace::QUEUES_SET);

        Queue(std::sync::Arc::new(QueueInner {
            pool,
            events,
            keys,
            job_key_prefix,
            duplicates_key,
            global_stats_key,
            queues_set_key,
            claim_script: ClaimScript::new(),
            complete_script: CompleteScript::new(),
            fail_script: FailScript::new(),
            cancel_script: CancelScript::new(),
            drain_delayed_script: DrainDelayedScript::new(),
            uniqueness_script: AcquireSignatureScript::new(),
            delayed_drain_task: Mutex::new(None),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.keys.name
    }

    pub fn events(&self) -> &EventBus {
        &self.0.events
    }

    fn job_key(&self, id: &str) -> String {
        format!("{}{}", self.0.job_key_prefix, id)
    }

    /// Admits a job onto this queue. Returns `Ok(None)` (not an error) when a
    /// `signature` is set and uniqueness admission rejects it (§4.3): the rejected
    /// payload is appended to the capped `duplicates` list instead.
    pub async fn enqueue(&self, new_job: &NewJob) -> Result<Option<Job>> {
        let now = Utc::now();
        let run_at_millis = new_job.run_at.map(|t| t.timestamp_millis()).unwrap_or(0);
        let id = rjob_database::generate_job_id(
            &self.0.keys.name,
            &new_job.class,
            &serde_json::to_vec(&new_job.data)?,
            run_at_millis,
        );

        let job = Job::new(id.clone(), self.0.keys.name.clone(), new_job, now);
        self.0.events.publish(EventKind::JobInstance, EventSubject::Job(job.clone()));

        let queue_veto_kind = if new_job.run_at.is_some() {
            EventKind::JobQueueDelayed
        } else {
            EventKind::JobQueue
        };
        if !self.0.events.publish(queue_veto_kind, EventSubject::Job(job.clone())) {
            return Err(Error::InvalidInput(format!(
                "enqueue of job {} vetoed by a listener",
                job.id
            )));
        }

        if let Some(signature) = &new_job.signature {
            if !self.acquire_uniqueness(&id, signature).await? {
                self.reject_duplicate(&job.payload()).await?;
                return Ok(None);
            }
        }

        let mut pipe = redis::pipe();
        pipe.sadd(&self.0.queues_set_key, &self.0.keys.name).ignore();
        pipe.hset_multiple(self.job_key(&id), &job.to_hash_fields()?).ignore();

        if let Some(run_at) = new_job.run_at {
            pipe.zadd(&self.0.keys.delayed, &id, run_at.timestamp_millis()).ignore();
            pipe.hincr(&self.0.keys.stats, "delayed", 1).ignore();
        } else {
            pipe.lpush(&self.0.keys.waiting, &id).ignore();
            pipe.hincr(&self.0.keys.stats, "queued", 1).ignore();
        }
        pipe.hincr(&self.0.global_stats_key, "total", 1).ignore();

        if let Some(series_id) = &new_job.series_id {
            pipe.zadd(self.0.pool.key(&keyspace::job_series_key(series_id)), &id, now.timestamp_millis())
                .ignore();
            pipe.zadd(
                self.0.pool.key(&keyspace::job_subject_pending_key(series_id)),
                &id,
                now.timestamp_millis(),
            )
            .ignore();
        }

        let mut conn = self.0.pool.get().await?;
        pipe.query_async(&mut conn).await?;

        let kind = if new_job.run_at.is_some() {
            EventKind::JobQueuedDelayed
        } else {
            EventKind::JobQueued
        };
        self.0.events.publish(kind, EventSubject::Job(job.clone()));

        Ok(Some(job))
    }

    /// Enqueues each job in order, collecting `None` for any rejected by uniqueness
    /// admission rather than aborting the batch.
    pub async fn enqueue_multiple(&self, jobs: &[NewJob]) -> Result<Vec<Option<Job>>> {
        let mut results = Vec::with_capacity(jobs.len());
        for job in jobs {
            results.push(self.enqueue(job).await?);
        }
        Ok(results)
    }

    /// Block for up to `timeout` waiting for a payload on this queue's waiting list,
    /// then atomically move it into `worker_id`'s processing list and stamp it
    /// RUNNING. Returns `None` on timeout.
    pub async fn claim(&self, worker_id: &str, timeout: StdDuration) -> Result<Option<Job>> {
        let processing_list = self.0.pool.key(&self.0.keys.processing_list(worker_id));
        let mut conn = self.0.pool.get().await?;
        let popped: Option<String> = conn
            .brpoplpush(&self.0.keys.waiting, &processing_list, timeout.as_secs() as usize)
            .await?;

        self.finish_claim(&mut conn, worker_id, popped).await
    }

    /// Non-blocking variant used when the worker's `blocking` config is false.
    pub async fn claim_nonblocking(&self, worker_id: &str) -> Result<Option<Job>> {
        let processing_list = self.0.pool.key(&self.0.keys.processing_list(worker_id));
        let mut conn = self.0.pool.get().await?;
        let popped: Option<String> = conn
            .rpoplpush(&self.0.keys.waiting, &processing_list)
            .await?;

        self.finish_claim(&mut conn, worker_id, popped).await
    }

    async fn finish_claim(
        &self,
        conn: &mut deadpool_redis::Connection,
        worker_id: &str,
        popped: Option<String>,
    ) -> Result<Option<Job>> {
        let id = match popped {
            Some(id) => id,
            None => return Ok(None),
        };

        let now = Utc::now();
        let job_key = self.job_key(&id);
        self.0
            .claim_script
            .run(
                conn,
                &self.0.keys.running,
                &job_key,
                &self.0.keys.stats,
                &id,
                now.timestamp_millis(),
                worker_id,
            )
            .await?;

        let job = self.load(conn, &id).await?;
        if let Some(job) = &job {
            self.0
                .events
                .publish(EventKind::JobRunning, EventSubject::Job(job.clone()));
        }
        Ok(job)
    }

    async fn load(&self, conn: &mut deadpool_redis::Connection, id: &str) -> Result<Option<Job>> {
        let map: std::collections::HashMap<String, String> =
            conn.hgetall(self.job_key(id)).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(Job::from_hash(id, &self.0.keys.name, map)?))
    }

    pub async fn job(&self, id: &str) -> Result<Option<Job>> {
        let mut conn = self.0.pool.get().await?;
        self.load(&mut conn, id).await
    }

    /// Mark a claimed job complete. `started_at` must be the `started` timestamp
    /// observed when the job was claimed; it is the guard that prevents a completion
    /// racing a GC zombie sweep that already reclaimed the job.
    pub async fn complete(&self, job_id: &str, worker_id: &str, started_at: DateTime<Utc>) -> Result<bool> {
        let processing_list = self.0.pool.key(&self.0.keys.processing_list(worker_id));
        let mut conn = self.0.pool.get().await?;
        let applied = self
            .0
            .complete_script
            .run(
                &mut conn,
                &self.0.keys.running,
                &processing_list,
                &self.0.keys.processed,
                &self.job_key(job_id),
                &self.0.keys.stats,
                job_id,
                Utc::now().timestamp_millis(),
                started_at.timestamp_millis(),
            )
            .await?;

        if applied {
            if let Some(job) = self.load(&mut conn, job_id).await? {
                if let Some(series_id) = &job.series_id {
                    self.mark_subject_done(&mut conn, series_id, job_id).await?;
                }
                self.0.events.publish(EventKind::JobComplete, EventSubject::Job(job));
            }
        }
        Ok(applied)
    }

    /// §10.6 per-subject indexing: a job's `series_id` doubles as its subject. Moves
    /// its id from `jobsubject:pending:<series_id>` to `jobsubject:done:<series_id>`
    /// on any terminal transition (complete, cancel, exhausted retries).
    /// `jobseries:<series_id>` is never pruned; it is the permanent group roster.
    async fn mark_subject_done(
        &self,
        conn: &mut deadpool_redis::Connection,
        series_id: &str,
        job_id: &str,
    ) -> Result<()> {
        let pending_key = self.0.pool.key(&keyspace::job_subject_pending_key(series_id));
        let done_key = self.0.pool.key(&keyspace::job_subject_done_key(series_id));
        let mut pipe = redis::pipe();
        pipe.zrem(pending_key, job_id).ignore();
        pipe.zadd(done_key, job_id, Utc::now().timestamp_millis()).ignore();
        pipe.query_async(conn).await?;
        Ok(())
    }

    /// Apply the retry policy (§4.1) to a job that failed or raised `Retry(delay)`.
    /// Returns the decision that was (if the guard held) applied.
    pub async fn fail(
        &self,
        job_id: &str,
        worker_id: &str,
        started_at: DateTime<Utc>,
        kind: FailureKind,
        message: String,
    ) -> Result<RetryDecision> {
        let mut conn = self.0.pool.get().await?;
        let existing = self.load(&mut conn, job_id).await?;
        let (failed_count, threshold, mut history) = match &existing {
            Some(job) => (job.failed_count, job.retry_threshold, job.exception.clone()),
            None => (0, crate::job::DEFAULT_RETRY_THRESHOLD, Vec::new()),
        };

        let now = Utc::now();
        let decision = retry::decide(&kind, failed_count + 1, threshold, now);

        crate::job::push_exception_history(
            &mut history,
            JobException { message, at: now },
        );
        let exception_json = serde_json::to_string(&history)?;

        if let RetryDecision::Delay(_) = &decision {
            let subject = existing
                .clone()
                .map(EventSubject::Job)
                .unwrap_or_else(|| EventSubject::JobId(job_id.to_string()));
            if !self.0.events.publish(EventKind::JobDelay, subject) {
                return Err(Error::InvalidInput(format!(
                    "delay of job {} vetoed by a listener",
                    job_id
                )));
            }
        }

        let (action, delay_at) = match &decision {
            RetryDecision::RequeueWaiting => (FailAction::RequeueWaiting, None),
            RetryDecision::Delay(at) => (FailAction::Delay, Some(at.timestamp_millis())),
            RetryDecision::Failed => (FailAction::Failed, None),
        };

        let processing_list = self.0.pool.key(&self.0.keys.processing_list(worker_id));
        let applied = self
            .0
            .fail_script
            .run(
                &mut conn,
                &self.0.keys.running,
                &processing_list,
                &self.0.keys.waiting,
                &self.0.keys.delayed,
                &self.0.keys.failed,
                &self.job_key(job_id),
                &self.0.keys.stats,
                job_id,
                now.timestamp_millis(),
                started_at.timestamp_millis(),
                action,
                delay_at,
                &exception_json,
            )
            .await?;

        if applied {
            let kind = match decision {
                RetryDecision::Failed => EventKind::JobFailure,
                _ => EventKind::JobDelayed,
            };
            if let Some(job) = self.load(&mut conn, job_id).await? {
                if matches!(decision, RetryDecision::Failed) {
                    if let Some(series_id) = &job.series_id {
                        self.mark_subject_done(&mut conn, series_id, job_id).await?;
                    }
                }
                self.0.events.publish(kind, EventSubject::Job(job));
            }
        }

        Ok(decision)
    }

    /// Unconditionally fail a job found orphaned by the garbage collector: its
    /// `running` entry is stamped with a worker id that is no longer registered.
    /// Bypasses the retry threshold entirely, per §4.1's "any non-terminal | worker is
    /// zombie (GC) | FAILED".
    pub async fn fail_zombie(&self, job_id: &str, started_at: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.0.pool.get().await?;
        let existing = self.load(&mut conn, job_id).await?;
        let mut history = existing.map(|j| j.exception).unwrap_or_default();
        let now = Utc::now();
        crate::job::push_exception_history(
            &mut history,
            JobException {
                message: "Zombie: worker no longer registered".to_string(),
                at: now,
            },
        );
        let exception_json = serde_json::to_string(&history)?;

        // The processing list is unknown (the worker that owned it is gone); there is
        // nothing left to LREM there, so point the script at a key that cannot exist.
        let dead_processing_list = format!("{}:gone:processing_list", self.0.keys.waiting);

        let applied = self
            .0
            .fail_script
            .run(
                &mut conn,
                &self.0.keys.running,
                &dead_processing_list,
                &self.0.keys.waiting,
                &self.0.keys.delayed,
                &self.0.keys.failed,
                &self.job_key(job_id),
                &self.0.keys.stats,
                job_id,
                now.timestamp_millis(),
                started_at.timestamp_millis(),
                FailAction::Failed,
                None,
                &exception_json,
            )
            .await?;

        if applied {
            event!(Level::WARN, job_id = %job_id, queue = %self.0.keys.name, "Reaped zombie job");
            if let Some(job) = self.load(&mut conn, job_id).await? {
                if let Some(series_id) = &job.series_id {
                    self.mark_subject_done(&mut conn, series_id, job_id).await?;
                }
                self.0.events.publish(EventKind::JobFailure, EventSubject::Job(job));
            }
        }

        Ok(applied)
    }

    pub async fn cancel(&self, job_id: &str, reason: &str) -> Result<CancelOutcome> {
        let mut conn = self.0.pool.get().await?;
        let existing = self.load(&mut conn, job_id).await?;
        let processing_list = match existing.as_ref().and_then(|j| j.worker.as_deref()) {
            Some(worker_id) => self.0.pool.key(&self.0.keys.processing_list(worker_id)),
            // No owning worker on record (job is waiting/delayed, never claimed): point
            // at a key that cannot exist so the script's LREM is a harmless no-op.
            None => format!("{}:none:processing_list", self.0.keys.waiting),
        };
        let outcome = self
            .0
            .cancel_script
            .run(
                &mut conn,
                &self.0.keys.waiting,
                &self.0.keys.delayed,
                &self.0.keys.running,
                &processing_list,
                &self.0.keys.cancelled,
                &self.job_key(job_id),
                &self.0.keys.stats,
                job_id,
                Utc::now().timestamp_millis(),
                reason,
            )
            .await?;

        if outcome == CancelOutcome::Cancelled {
            if let Some(job) = self.load(&mut conn, job_id).await? {
                if let Some(series_id) = &job.series_id {
                    self.mark_subject_done(&mut conn, series_id, job_id).await?;
                }
                self.0
                    .events
                    .publish(EventKind::JobCancelled, EventSubject::Job(job));
            }
        }

        Ok(outcome)
    }

    pub async fn drain_delayed(&self) -> Result<u32> {
        let mut conn = self.0.pool.get().await?;
        self.0
            .drain_delayed_script
            .run(
                &mut conn,
                &self.0.keys.delayed,
                &self.0.keys.waiting,
                &self.0.keys.stats,
                Utc::now().timestamp_millis(),
                1000,
                &self.0.job_key_prefix,
            )
            .await
    }

    /// Recover a crashed worker's in-flight payload: drain its `processing_list` back
    /// onto this queue's waiting list (§4.7 "Queue cleanup").
    pub async fn cleanup_processing_list(&self, worker_id: &str) -> Result<u32> {
        let processing_list = self.0.pool.key(&self.0.keys.processing_list(worker_id));
        let mut conn = self.0.pool.get().await?;
        let mut moved = 0u32;
        loop {
            let id: Option<String> = conn
                .rpoplpush(&processing_list, &self.0.keys.waiting)
                .await?;
            match id {
                Some(_) => moved += 1,
                None => break,
            }
        }
        if moved > 0 {
            let mut pipe = redis::pipe();
            pipe.hincr(&self.0.keys.stats, "running", -(moved as i64)).ignore();
            pipe.hincr(&self.0.keys.stats, "queued", moved as i64).ignore();
            pipe.query_async(&mut conn).await?;
        }
        Ok(moved)
    }

    pub async fn acquire_uniqueness(&self, job_id: &str, signature: &str) -> Result<bool> {
        let lock_key = self.0.pool.key(&keyspace::unique_key(signature));
        let mut conn = self.0.pool.get().await?;
        self.0
            .uniqueness_script
            .run(&mut conn, &lock_key, job_id, &self.0.job_key_prefix)
            .await
    }

    pub async fn reject_duplicate(&self, payload: &Payload) -> Result<()> {
        let mut conn = self.0.pool.get().await?;
        let mut pipe = redis::pipe();
        pipe.lpush(&self.0.duplicates_key, payload.encode()?).ignore();
        pipe.ltrim(&self.0.duplicates_key, 0, DUPLICATES_LIST_CAP - 1).ignore();
        pipe.query_async(&mut conn).await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<QueueStatus> {
        let mut conn = self.0.pool.get().await?;
        let (waiting, delayed, running, stats): (
            usize,
            usize,
            usize,
            std::collections::HashMap<String, u64>,
        ) = redis::pipe()
            .llen(&self.0.keys.waiting)
            .zcard(&self.0.keys.delayed)
            .zcard(&self.0.keys.running)
            .hgetall(&self.0.keys.stats)
            .query_async(&mut conn)
            .await?;

        Ok(QueueStatus {
            waiting,
            delayed,
            running,
            queued_total: stats.get("queued").copied().unwrap_or(0),
            processed_total: stats.get("processed").copied().unwrap_or(0),
            cancelled_total: stats.get("cancelled").copied().unwrap_or(0),
            failed_total: stats.get("failed").copied().unwrap_or(0),
            fail_retried_total: stats.get("fail_retried").copied().unwrap_or(0),
        })
    }

    /// Entries currently in the `running` zset with a start score at or before `now`,
    /// i.e. candidates the garbage collector should check for an orphaned worker.
    pub async fn running_before(&self, now: DateTime<Utc>) -> Result<Vec<(String, DateTime<Utc>)>> {
        let mut conn = self.0.pool.get().await?;
        let flat: Vec<String> = conn
            .zrangebyscore_withscores(&self.0.keys.running, 0, now.timestamp_millis())
            .await?;

        let mut entries = Vec::with_capacity(flat.len() / 2);
        let mut iter = flat.into_iter();
        while let (Some(id), Some(score)) = (iter.next(), iter.next()) {
            entries.push((id, Utc.timestamp_millis(score.parse::<i64>()?)));
        }
        Ok(entries)
    }

    /// Delete `processed` entries older than `expiry`. Run on the garbage collector's
    /// cycle (§4.7).
    pub async fn trim_processed_before(&self, expiry: DateTime<Utc>) -> Result<u32> {
        let mut conn = self.0.pool.get().await?;
        let removed: u32 = conn
            .zrembyscore(&self.0.keys.processed, 0, expiry.timestamp_millis())
            .await?;
        Ok(removed)
    }

    /// Start a background task that drains due delayed jobs on a 1-second interval,
    /// independent of the worker's own claim loop, until `close` signals shutdown or
    /// [`Queue::stop_delayed_drain`] is called.
    pub fn start_delayed_drain(&self, mut close: GracefulShutdownConsumer) {
        if self.0.delayed_drain_task.lock().unwrap().is_some() {
            return;
        }

        let queue = self.clone();
        let (closer_tx, closer_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let shutdown_fut = close.wait_for_shutdown();
            tokio::pin!(shutdown_fut);
            tokio::pin!(closer_rx);

            let mut interval = tokio::time::interval(StdDuration::from_millis(1000));
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_fut => break,
                    _ = &mut closer_rx => break,
                    _ = interval.tick() => {},
                };

                match queue.drain_delayed().await {
                    Ok(count) if count > 0 => {
                        event!(Level::INFO, queue = %queue.0.keys.name, count = %count, "Promoted delayed jobs");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        event!(Level::ERROR, queue = %queue.0.keys.name, error = %e, "Error draining delayed jobs");
                    }
                }
            }
        });

        *self.0.delayed_drain_task.lock().unwrap() = Some((closer_tx, task));
    }

    pub fn stop_delayed_drain(&self) -> Option<JoinHandle<()>> {
        let (_, handle) = self.0.delayed_drain_task.lock().unwrap().take()?;
        Some(handle)
    }
}

#[cfg(all(test, feature = "test-redis"))]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::panic::AssertUnwindSafe;
    use std::time::Duration;

    async fn run_queue_test<T, Fut, E>(test: T)
    where
        T: Send + Sync + FnOnce(Queue) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<(), E>>,
        E: std::fmt::Debug,
    {
        dotenv::dotenv().ok();
        let queue_name = format!("test-{}", uuid::Uuid::new_v4());
        let pool = RedisPool::new(None, None).expect("creating connection pool");
        let queue = Queue::new(pool.clone(), queue_name.clone(), EventBus::new());

        let result = AssertUnwindSafe(test(queue)).catch_unwind().await;

        let mut conn = pool.get().await.expect("cleanup: acquiring connection");
        let key_pattern = format!("queue:{}*", queue_name);
        let mut cmd = redis::cmd("SCAN");
        let mut iter: redis::AsyncIter<String> = cmd
            .cursor_arg(0)
            .arg("MATCH")
            .arg(&key_pattern)
            .arg("COUNT")
            .arg(100)
            .clone()
            .iter_async(&mut *conn)
            .await
            .expect("cleanup: scanning keyspace");

        let mut del_cmd = redis::cmd("DEL");
        let mut any = false;
        while let Some(key) = iter.next_item().await {
            del_cmd.arg(&key);
            any = true;
        }
        if any {
            del_cmd
                .query_async::<_, ()>(&mut conn)
                .await
                .expect("cleanup: deleting keys");
        }

        result.expect("panicked").expect("error");
    }

    #[tokio::test]
    async fn happy_path_completes() {
        run_queue_test(|queue| async move {
            let job = queue
                .enqueue(&NewJob::new("Echo", serde_json::json!({"x": 1})))
                .await?
                .unwrap();

            let claimed = queue
                .claim("worker-1", Duration::from_secs(1))
                .await?
                .expect("job should be claimable");
            assert_eq!(claimed.id, job.id);
            assert_eq!(claimed.status, JobStatus::Running);

            let applied = queue
                .complete(&claimed.id, "worker-1", claimed.started.unwrap())
                .await?;
            assert!(applied);

            let status = queue.status().await?;
            assert_eq!(status.processed_total, 1);

            Ok::<(), Error>(())
        })
        .await;
    }

    #[tokio::test]
    async fn delayed_job_is_not_claimable_until_due() {
        run_queue_test(|queue| async move {
            let run_at = Utc::now() + chrono::Duration::seconds(5);
            queue
                .enqueue(&NewJob::new("Echo", serde_json::json!({})).run_at(run_at))
                .await?;

            assert!(queue.claim_nonblocking("worker-1").await?.is_none());

            let status = queue.status().await?;
            assert_eq!(status.delayed, 1);
            assert_eq!(status.waiting, 0);

            Ok::<(), Error>(())
        })
        .await;
    }

    #[tokio::test]
    async fn first_failure_requeues_then_threshold_fails() {
        run_queue_test(|queue| async move {
            let job = queue
                .enqueue(&NewJob::new("Echo", serde_json::json!({})).retry_threshold(2))
                .await?
                .unwrap();

            let claimed = queue
                .claim("worker-1", Duration::from_secs(1))
                .await?
                .unwrap();
            let decision = queue
                .fail(
                    &claimed.id,
                    "worker-1",
                    claimed.started.unwrap(),
                    FailureKind::Unexpected,
                    "boom".to_string(),
                )
                .await?;
            assert_eq!(decision, RetryDecision::RequeueWaiting);

            let claimed = queue
                .claim("worker-1", Duration::from_secs(1))
                .await?
                .unwrap();
            assert_eq!(claimed.id, job.id);
            let decision = queue
                .fail(
                    &claimed.id,
                    "worker-1",
                    claimed.started.unwrap(),
                    FailureKind::Unexpected,
                    "boom again".to_string(),
                )
                .await?;
            assert_eq!(decision, RetryDecision::Failed);

            Ok::<(), Error>(())
        })
        .await;
    }

    #[tokio::test]
    async fn cancel_removes_from_waiting() {
        run_queue_test(|queue| async move {
            let job = queue
                .enqueue(&NewJob::new("Echo", serde_json::json!({})))
                .await?
                .unwrap();

            let outcome = queue.cancel(&job.id, "operator requested").await?;
            assert_eq!(outcome, CancelOutcome::Cancelled);

            assert!(queue.claim_nonblocking("worker-1").await?.is_none());

            Ok::<(), Error>(())
        })
        .await;
    }

    #[tokio::test]
    async fn uniqueness_blocks_a_second_concurrent_job() {
        run_queue_test(|queue| async move {
            let first = queue
                .enqueue(&NewJob::new("Echo", serde_json::json!({})))
                .await?
                .unwrap();
            let second = queue
                .enqueue(&NewJob::new("Echo", serde_json::json!({})))
                .await?
                .unwrap();

            assert!(queue.acquire_uniqueness(&first.id, "shared-signature").await?);
            assert!(!queue.acquire_uniqueness(&second.id, "shared-signature").await?);

            let first_job = queue.job(&first.id).await?.unwrap();
            let mut done = first_job.clone();
            done.status = JobStatus::Complete;
            let claimed = queue.claim("worker-1", Duration::from_secs(1)).await?.unwrap();
            queue
                .complete(&claimed.id, "worker-1", claimed.started.unwrap())
                .await?;

            assert!(queue.acquire_uniqueness(&second.id, "shared-signature").await?);

            Ok::<(), Error>(())
        })
        .await;
    }
}
