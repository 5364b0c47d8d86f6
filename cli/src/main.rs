use std::str::FromStr;

use chrono::{DateTime, Utc};
use rjob_database::RedisPool;
use rjob_graceful_shutdown::GracefulShutdown;
use rjob_queues::{EventBus, NewJob, Queue};
use rjob_worker::{run_job, ChildConfig, HandlerRegistry, Worker, WorkerConfig};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "rjob", about = "Redis-backed background job processor")]
struct Args {
    #[structopt(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, StructOpt)]
enum Cmd {
    /// Run the worker loop, claiming and forking jobs until shut down.
    Work {
        #[structopt(long, use_delimiter = true, help = "Queues to watch, or * for all")]
        queues: Option<Vec<String>>,
    },
    /// Enqueue a single job.
    Enqueue {
        queue: String,
        class: String,
        #[structopt(help = "JSON payload, defaults to {}")]
        data: Option<String>,
        #[structopt(long, help = "RFC3339 timestamp to delay the job until")]
        run_at: Option<String>,
        #[structopt(long)]
        retry_threshold: Option<i32>,
        #[structopt(long, help = "Uniqueness signature; a second job with the same value is rejected")]
        signature: Option<String>,
    },
    /// Print a queue's current waiting/running/delayed counts.
    Status { queue: String },
    /// Internal: runs exactly one job in its own process. Invoked by the worker's
    /// own re-exec isolation mechanism, not meant to be run by hand.
    #[structopt(name = "job-runner")]
    JobRunner {
        #[structopt(long)]
        queue: String,
        #[structopt(long)]
        job_id: String,
        #[structopt(long)]
        worker_id: String,
    },
}

#[tokio::main]
async fn main() -> rjob_worker::Result<()> {
    dotenv::dotenv().ok();
    rjob_tracing_config::configure("rjob");

    let args = Args::from_args();

    match args.cmd {
        Cmd::Work { queues } => run_worker(queues).await,
        Cmd::Enqueue {
            queue,
            class,
            data,
            run_at,
            retry_threshold,
            signature,
        } => run_enqueue(queue, class, data, run_at, retry_threshold, signature).await,
        Cmd::Status { queue } => run_status(queue).await,
        Cmd::JobRunner {
            queue,
            job_id,
            worker_id,
        } => run_job_runner(queue, job_id, worker_id).await,
    }
}

async fn run_worker(queues_override: Option<Vec<String>>) -> rjob_worker::Result<()> {
    let mut config = WorkerConfig::from_env()?;
    if let Some(queues) = queues_override {
        config.queues = queues;
    }

    let pool = RedisPool::new(config.redis_url.clone(), config.redis_namespace.clone())?;
    let handlers = HandlerRegistry::new();

    let shutdown = GracefulShutdown::new();
    let mut worker = Worker::new(pool, config, handlers)?;
    worker.work(shutdown.consumer()).await
}

async fn run_enqueue(
    queue_name: String,
    class: String,
    data: Option<String>,
    run_at: Option<String>,
    retry_threshold: Option<i32>,
    signature: Option<String>,
) -> rjob_worker::Result<()> {
    let pool = RedisPool::new(None, std::env::var("REDIS_NAMESPACE").ok())?;
    let queue = Queue::new(pool, queue_name, EventBus::new());

    let data = match data {
        Some(raw) => serde_json::from_str(&raw)?,
        None => serde_json::json!({}),
    };

    let mut new_job = NewJob::new(class, data);
    if let Some(run_at) = run_at {
        let at = DateTime::<Utc>::from_str(&run_at)
            .map_err(|e| rjob_worker::Error::ConfigError(format!("invalid --run-at timestamp: {}", e)))?;
        new_job = new_job.run_at(at);
    }
    if let Some(threshold) = retry_threshold {
        new_job = new_job.retry_threshold(threshold);
    }
    if let Some(signature) = signature {
        new_job = new_job.signature(signature);
    }

    match queue.enqueue(&new_job).await? {
        Some(job) => println!("enqueued {}", job.id),
        None => println!("rejected: duplicate uniqueness signature"),
    }
    Ok(())
}

async fn run_status(queue_name: String) -> rjob_worker::Result<()> {
    let pool = RedisPool::new(None, std::env::var("REDIS_NAMESPACE").ok())?;
    let queue = Queue::new(pool, queue_name, EventBus::new());
    let status = queue.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn run_job_runner(queue: String, job_id: String, worker_id: String) -> rjob_worker::Result<()> {
    let config = WorkerConfig::from_env()?;
    let handlers = HandlerRegistry::new();

    let cfg = ChildConfig {
        queue_name: queue,
        job_id,
        worker_id,
        timeout: config.timeout,
        redis_url: config.redis_url,
        redis_namespace: config.redis_namespace,
    };

    run_job(&handlers, cfg).await
}
