//! Job execution on the child side (§4.6). This is what the re-exec'd binary's hidden
//! `job-runner` subcommand calls: a fresh [`RedisPool`] (never the parent's shared
//! connection), the full setUp/perform/tearDown sequence, output capture, and mapping
//! the handler's outcome onto the retry state machine.

use std::time::Duration;

use chrono::Utc;
use redis::AsyncCommands;
use rjob_database::RedisPool;
use rjob_queues::{EventBus, EventKind, EventSubject, FailureKind, JobStatus, Queue, RetryDecision};
use tracing::{event, Level};

use crate::context::JobContext;
use crate::error::{PerformError, Result};
use crate::handler::HandlerRegistry;
use crate::signals;
use crate::stats::StatsRecorder;

pub struct ChildConfig {
    pub queue_name: String,
    pub job_id: String,
    pub worker_id: String,
    pub timeout: Duration,
    pub redis_url: Option<String>,
    pub redis_namespace: Option<String>,
}

/// Runs one job to a terminal (or re-delayed) state and returns. Errors returned from
/// here mean the job's outcome could *not* be persisted (a genuine infrastructure
/// failure); the caller (the `job-runner` binary) should exit non-zero in that case so
/// the parent's "Dirty" detection (§4.4 step 10) catches it.
pub async fn run_job(handlers: &HandlerRegistry, cfg: ChildConfig) -> Result<()> {
    let pool = RedisPool::new(cfg.redis_url.clone(), cfg.redis_namespace.clone())?;
    let queue = Queue::new(pool.clone(), cfg.queue_name.clone(), EventBus::new());
    queue
        .events()
        .publish(EventKind::WorkerForkChild, EventSubject::WorkerId(cfg.worker_id.clone()));

    let job = queue
        .job(&cfg.job_id)
        .await?
        .ok_or_else(|| rjob_queues::Error::JobNotFound(cfg.job_id.clone()))?;
    let started_at = job.started.unwrap_or_else(Utc::now);
    let job_key = pool.key(&rjob_queues::job_key(&cfg.job_id));

    {
        let mut conn = pool.get().await?;
        let _: std::result::Result<(), redis::RedisError> =
            redis::cmd("CLIENT").arg("SETNAME").arg(&cfg.worker_id).query_async(&mut conn).await;
        if let Some(reason) = signals::job_override_cancel(&mut conn, &job_key).await? {
            event!(Level::INFO, job_id = %cfg.job_id, "Observed remote cancel override at perform start");
            queue.cancel(&cfg.job_id, &reason).await?;
            return Ok(());
        }
    }

    let handler = match handlers.get(&job.class) {
        Some(h) => h,
        None => {
            let decision = queue
                .fail(
                    &cfg.job_id,
                    &cfg.worker_id,
                    started_at,
                    FailureKind::Unexpected,
                    format!("no handler registered for class {}", job.class),
                )
                .await?;
            event!(Level::ERROR, job_id = %cfg.job_id, class = %job.class, decision = ?decision, "Unknown handler class");
            return Ok(());
        }
    };

    if !queue.events().publish(EventKind::JobPerform, EventSubject::Job(job.clone())) {
        event!(Level::INFO, job_id = %cfg.job_id, "Perform vetoed by a listener");
        queue.cancel(&cfg.job_id, "perform vetoed by a listener").await?;
        return Ok(());
    }
    queue.events().publish(EventKind::JobPerforming, EventSubject::Job(job.clone()));

    if let Some(signature) = handler.signature(&job.data) {
        let acquired = queue.acquire_uniqueness(&cfg.job_id, &signature).await?;
        if !acquired {
            event!(Level::INFO, job_id = %cfg.job_id, signature = %signature, "Uniqueness conflict at perform time");
            queue.cancel(&cfg.job_id, "uniqueness conflict at perform time").await?;
            return Ok(());
        }
    }

    let output_key = pool.key(&rjob_queues::job_output_key(&cfg.job_id));
    let mut ctx = JobContext::new(pool.clone(), job_key.clone(), output_key, handler.get_channel());

    let outcome = run_handler(handler.as_ref(), &job.data, &mut ctx, cfg.timeout).await;

    {
        let mut conn = pool.get().await?;
        let _: () = conn.hset(&job_key, "output", ctx.aggregated_output()).await?;
    }

    let duration_secs = (Utc::now() - started_at).num_milliseconds().max(0) as f64 / 1000.0;
    let stats = StatsRecorder::new(pool.clone());
    let presentation = handler.presentation();

    match outcome {
        Ok(()) => {
            queue.complete(&cfg.job_id, &cfg.worker_id, started_at).await?;
            let _ = stats.record(&presentation, JobStatus::Complete, duration_secs).await;
        }
        Err(PerformError::Cancel(reason)) => {
            queue.cancel(&cfg.job_id, &reason).await?;
            let _ = stats.record(&presentation, JobStatus::Cancelled, duration_secs).await;
        }
        Err(PerformError::Retry { delay_secs, message }) => {
            let decision = queue
                .fail(
                    &cfg.job_id,
                    &cfg.worker_id,
                    started_at,
                    FailureKind::Retry { delay_secs },
                    message,
                )
                .await?;
            let status = retry_decision_status(&decision);
            let _ = stats.record(&presentation, status, duration_secs).await;
        }
        Err(other) => {
            let decision = queue
                .fail(
                    &cfg.job_id,
                    &cfg.worker_id,
                    started_at,
                    FailureKind::Unexpected,
                    other.message(),
                )
                .await?;
            let status = retry_decision_status(&decision);
            let _ = stats.record(&presentation, status, duration_secs).await;
        }
    }

    queue.events().publish(EventKind::JobDone, EventSubject::JobId(cfg.job_id.clone()));

    Ok(())
}

async fn run_handler(
    handler: &(dyn crate::handler::JobHandler),
    data: &serde_json::Value,
    ctx: &mut JobContext,
    timeout: Duration,
) -> std::result::Result<(), PerformError> {
    let run = async {
        handler.set_up(data).await?;
        handler.perform(data, ctx).await?;
        handler.tear_down().await?;
        Ok::<(), PerformError>(())
    };

    match tokio::time::timeout(timeout, run).await {
        Ok(result) => result,
        Err(_) => Err(PerformError::Unexpected(format!(
            "job exceeded wall-clock timeout of {:?}",
            timeout
        ))),
    }
}

fn retry_decision_status(decision: &RetryDecision) -> JobStatus {
    match decision {
        RetryDecision::RequeueWaiting => JobStatus::Waiting,
        RetryDecision::Delay(_) => JobStatus::Delayed,
        RetryDecision::Failed => JobStatus::Failed,
    }
}
