//! Worker Runtime main loop (§4.4).

use std::{path::PathBuf, sync::Arc, time::Duration as StdDuration};

use chrono::Utc;
use redis::AsyncCommands;
use rjob_database::RedisPool;
use rjob_graceful_shutdown::GracefulShutdownConsumer;
use rjob_queues::{EventBus, EventKind, EventSubject, Queue};
use tokio::sync::{mpsc, Mutex};
use tracing::{event, Level};

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::gc::GarbageCollector;
use crate::handler::HandlerRegistry;
use crate::identity;
use crate::memory::MemoryWatchdog;
use crate::registry::{Heartbeat, HostRegistry};
use crate::runner::ChildProcess;
use crate::signals::{self, Command, RemoteSignals};

const HARD_WALL_CAP: StdDuration = StdDuration::from_secs(3600);
const HEARTBEAT_INTERVAL: StdDuration = StdDuration::from_secs(5);

pub struct Worker {
    pool: RedisPool,
    config: WorkerConfig,
    worker_id: String,
    registry: HostRegistry,
    gc: GarbageCollector,
    queues: Vec<Queue>,
    handlers: HandlerRegistry,
    events: EventBus,
    global_key: String,
    current_exe: PathBuf,
    paused: Arc<Mutex<bool>>,
}

impl Worker {
    pub fn new(pool: RedisPool, config: WorkerConfig, handlers: HandlerRegistry) -> Result<Worker> {
        let worker_id = identity::worker_id();
        let events = EventBus::new();
        let registry = HostRegistry::new(pool.clone(), worker_id.clone(), &config.queues);
        let gc = GarbageCollector::new(pool.clone(), config.default_expiry_secs);
        let global_key = pool.key(rjob_queues::GLOBAL_HASH);
        let current_exe = std::env::current_exe()?;

        events.publish(EventKind::WorkerInstance, EventSubject::WorkerId(worker_id.clone()));

        Ok(Worker {
            pool,
            config,
            worker_id,
            registry,
            gc,
            queues: Vec::new(),
            handlers,
            events,
            global_key,
            current_exe,
            paused: Arc::new(Mutex::new(false)),
        })
    }

    /// Resolves the configured queue patterns against live state: `*` expands to
    /// every name currently in the global `queues` set (§4.1 "Tie-breaks": ascending
    /// lexicographic order once expanded).
    async fn resolve_queues(&mut self) -> Result<()> {
        let mut names: Vec<String> = self
            .config
            .queues
            .iter()
            .filter(|q| q.as_str() != "*")
            .cloned()
            .collect();

        if self.config.queues.iter().any(|q| q == "*") {
            let mut conn = self.pool.get().await?;
            let known: Vec<String> = conn.smembers(self.pool.key(rjob_queues::QUEUES_SET)).await?;
            for q in known {
                if !names.contains(&q) {
                    names.push(q);
                }
            }
        }

        names.sort();
        self.queues = names
            .into_iter()
            .map(|name| Queue::new(self.pool.clone(), name, self.events.clone()))
            .collect();
        Ok(())
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Runs until `shutdown` fires or a local/remote signal requests a stop (§4.4,
    /// §4.5, §10.4). Always leaves the registry in a consistent state on exit.
    pub async fn work(&mut self, mut shutdown: GracefulShutdownConsumer) -> Result<()> {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
        #[cfg(unix)]
        signals::install_os_signal_handlers(cmd_tx.clone())?;

        let mut remote = RemoteSignals::new(self.global_key.clone(), self.registry.worker_key().to_string());

        self.events
            .publish(EventKind::WorkerStartup, EventSubject::WorkerId(self.worker_id.clone()));

        self.resolve_queues().await?;

        // Step 1: startup cleanup, then register.
        self.gc.prune_workers(&self.registry).await?;
        self.gc.sweep_queues(&self.queues, &self.registry).await?;
        self.gc
            .cleanup_own_processing_lists(&self.queues, &self.worker_id)
            .await?;
        self.registry.register(&self.config.queues).await?;
        self.events
            .publish(EventKind::WorkerRegister, EventSubject::WorkerId(self.worker_id.clone()));
        event!(Level::INFO, worker_id = %self.worker_id, "Worker registered");

        let mut memory = MemoryWatchdog::new(self.config.memory_limit_mb);
        let mut last_cleanup = Utc::now();
        let mut force_shutdown = false;

        self.events
            .publish(EventKind::WorkerWork, EventSubject::WorkerId(self.worker_id.clone()));

        'main: loop {
            if shutdown.shutting_down() {
                event!(Level::INFO, worker_id = %self.worker_id, "Graceful shutdown observed, finishing loop");
                self.events
                    .publish(EventKind::WorkerShutdown, EventSubject::WorkerId(self.worker_id.clone()));
                break;
            }

            while let Ok(cmd) = cmd_rx.try_recv() {
                match cmd {
                    Command::ForceShutdown => {
                        force_shutdown = true;
                        self.events.publish(
                            EventKind::WorkerForceShutdown,
                            EventSubject::WorkerId(self.worker_id.clone()),
                        );
                        break 'main;
                    }
                    Command::Shutdown => {
                        self.events
                            .publish(EventKind::WorkerShutdown, EventSubject::WorkerId(self.worker_id.clone()));
                        break 'main;
                    }
                    Command::Pause => {
                        *self.paused.lock().await = true;
                        self.events
                            .publish(EventKind::WorkerPause, EventSubject::WorkerId(self.worker_id.clone()));
                    }
                    Command::Resume => {
                        *self.paused.lock().await = false;
                        self.events
                            .publish(EventKind::WorkerResume, EventSubject::WorkerId(self.worker_id.clone()));
                    }
                    Command::Cancel => {}
                    Command::Wakeup => {
                        self.events
                            .publish(EventKind::WorkerWakeup, EventSubject::WorkerId(self.worker_id.clone()));
                    }
                }
            }

            // Step 2: periodic cleanup cycle.
            let cleanup_cycle = chrono::Duration::seconds(self.config.cleanup_cycle_secs as i64);
            if Utc::now() - last_cleanup >= cleanup_cycle {
                self.events
                    .publish(EventKind::WorkerCleanup, EventSubject::WorkerId(self.worker_id.clone()));
                self.gc.prune_workers(&self.registry).await?;
                self.gc.sweep_queues(&self.queues, &self.registry).await?;
                last_cleanup = Utc::now();

                if identity::hostname() != self.registry.hostname() {
                    event!(Level::WARN, worker_id = %self.worker_id, "Hostname changed, shutting down");
                    break;
                }
            }

            // Step 3: remote signals.
            {
                let mut conn = self.pool.get().await?;
                if let Some(cmd) = remote.poll(&mut conn).await? {
                    if let Some(sig) = remote_signal_label(cmd) {
                        self.registry.record_last_g_signal(sig).await?;
                    }
                    match cmd {
                        Command::ForceShutdown => {
                            force_shutdown = true;
                            self.events.publish(
                                EventKind::WorkerForceShutdown,
                                EventSubject::WorkerId(self.worker_id.clone()),
                            );
                            break;
                        }
                        Command::Shutdown => {
                            self.events.publish(
                                EventKind::WorkerShutdown,
                                EventSubject::WorkerId(self.worker_id.clone()),
                            );
                            break;
                        }
                        Command::Pause => {
                            *self.paused.lock().await = true;
                            self.events.publish(
                                EventKind::WorkerPause,
                                EventSubject::WorkerId(self.worker_id.clone()),
                            );
                        }
                        Command::Resume => {
                            *self.paused.lock().await = false;
                            self.events.publish(
                                EventKind::WorkerResume,
                                EventSubject::WorkerId(self.worker_id.clone()),
                            );
                        }
                        Command::Cancel => {}
                        Command::Wakeup => {
                            self.events.publish(
                                EventKind::WorkerWakeup,
                                EventSubject::WorkerId(self.worker_id.clone()),
                            );
                        }
                    }
                }

                if let Some(dedicated) = remote.dedicated_worker(&mut conn).await? {
                    let is_dedicated = dedicated == self.worker_id;
                    *self.paused.lock().await = !is_dedicated;
                }
            }

            // Step 4: memory watchdog.
            if memory.check() {
                self.events
                    .publish(EventKind::WorkerLowMemory, EventSubject::WorkerId(self.worker_id.clone()));
                break;
            }

            // Step 5: sanity check.
            if !self.registry.self_check().await? {
                event!(Level::ERROR, worker_id = %self.worker_id, "Failed self-check, shutting down");
                self.events
                    .publish(EventKind::WorkerCorrupt, EventSubject::WorkerId(self.worker_id.clone()));
                break;
            }

            // Step 6: paused?
            if *self.paused.lock().await {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.interval) => {}
                    _ = shutdown.wait_for_shutdown() => break,
                }
                continue;
            }

            // Step 7: drain due delayed jobs.
            for queue in &self.queues {
                queue.drain_delayed().await?;
            }

            // Step 8: attempt to claim a job.
            let claimed = self.claim_any().await?;
            let (queue, job) = match claimed {
                Some(pair) => pair,
                None => {
                    if !self.config.blocking {
                        tokio::select! {
                            _ = tokio::time::sleep(self.config.interval) => {}
                            _ = shutdown.wait_for_shutdown() => break,
                        }
                    }
                    continue;
                }
            };

            event!(Level::INFO, worker_id = %self.worker_id, job_id = %job.id, queue = %queue.name(), "Claimed job");
            self.events
                .publish(EventKind::WorkerWorkingOn, EventSubject::Job(job.clone()));

            // Steps 9-10: fork and wait.
            self.events
                .publish(EventKind::WorkerFork, EventSubject::Job(job.clone()));
            match ChildProcess::spawn(&self.current_exe, queue.name(), &job.id, &self.worker_id) {
                Ok(mut child) => {
                    self.events
                        .publish(EventKind::WorkerForkParent, EventSubject::Job(job.clone()));
                    self.registry
                        .heartbeat(&Heartbeat {
                            memory_mb: 0,
                            job_id: Some(job.id.clone()),
                            job_pid: Some(child.pid()),
                            job_load: None,
                            job_started: job.started.map(|t| t.timestamp_millis()),
                        })
                        .await?;

                    self.wait_for_child(&mut child, &queue, &job.id, job.started.unwrap_or_else(Utc::now), &mut cmd_rx)
                        .await?;
                    self.events
                        .publish(EventKind::WorkerDoneWorking, EventSubject::Job(job.clone()));
                }
                Err(e) => {
                    event!(Level::ERROR, worker_id = %self.worker_id, error = %e, "Failed to fork job-runner child");
                    self.events.publish(
                        EventKind::WorkerForkError,
                        EventSubject::Message(e.to_string()),
                    );
                    queue.cleanup_processing_list(&self.worker_id).await?;
                    break;
                }
            }

            // Step 12: clear in-flight metadata.
            self.registry
                .heartbeat(&Heartbeat {
                    memory_mb: 0,
                    job_id: None,
                    job_pid: None,
                    job_load: None,
                    job_started: None,
                })
                .await?;
        }

        self.gc
            .cleanup_own_processing_lists(&self.queues, &self.worker_id)
            .await?;
        self.registry.unregister().await?;
        self.events
            .publish(EventKind::WorkerUnregister, EventSubject::WorkerId(self.worker_id.clone()));
        event!(Level::INFO, worker_id = %self.worker_id, forced = force_shutdown, "Worker unregistered, exiting");

        Ok(())
    }

    async fn claim_any(&self) -> Result<Option<(Queue, rjob_queues::Job)>> {
        for queue in &self.queues {
            if let Some(job) = queue.claim_nonblocking(&self.worker_id).await? {
                return Ok(Some((queue.clone(), job)));
            }
        }

        if self.config.blocking {
            if let Some(queue) = self.queues.first() {
                if let Some(job) = queue.claim(&self.worker_id, self.config.interval).await? {
                    return Ok(Some((queue.clone(), job)));
                }
            }
        }

        Ok(None)
    }

    /// Parent-side wait (§4.4 step 10): heartbeats every ~5s, a 1-hour hard wall cap,
    /// and forwarding of `Cancel`/`ForceShutdown` commands to the child as signals.
    async fn wait_for_child(
        &self,
        child: &mut ChildProcess,
        queue: &Queue,
        job_id: &str,
        started_at: chrono::DateTime<Utc>,
        cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Result<()> {
        let deadline = tokio::time::Instant::now() + HARD_WALL_CAP;
        let mut heartbeat_interval = tokio::time::interval(HEARTBEAT_INTERVAL);

        loop {
            tokio::select! {
                biased;

                status = child.wait() => {
                    let status = status?;
                    self.reconcile_child_exit(queue, job_id, started_at, status).await?;
                    return Ok(());
                }

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Cancel) => {
                            event!(Level::INFO, job_id = %job_id, "Forwarding cancel to child");
                            child.signal(libc::SIGUSR1).ok();
                        }
                        Some(Command::ForceShutdown) => {
                            event!(Level::WARN, job_id = %job_id, "Force shutdown, killing child");
                            self.events.publish(
                                EventKind::WorkerKillChild,
                                EventSubject::JobId(job_id.to_string()),
                            );
                            child.signal(libc::SIGKILL).ok();
                        }
                        Some(_) | None => {}
                    }
                }

                _ = tokio::time::sleep_until(deadline) => {
                    event!(Level::ERROR, job_id = %job_id, "Job exceeded 1-hour hard wall cap, killing child");
                    self.events
                        .publish(EventKind::WorkerKillChild, EventSubject::JobId(job_id.to_string()));
                    child.signal(libc::SIGKILL).ok();
                    let _ = child.wait().await;
                    queue
                        .fail(
                            job_id,
                            &self.worker_id,
                            started_at,
                            rjob_queues::FailureKind::Unexpected,
                            "exceeded 1-hour per-loop wall cap".to_string(),
                        )
                        .await?;
                    return Ok(());
                }

                _ = heartbeat_interval.tick() => {
                    self.registry
                        .heartbeat(&Heartbeat {
                            memory_mb: 0,
                            job_id: Some(job_id.to_string()),
                            job_pid: Some(child.pid()),
                            job_load: None,
                            job_started: Some(started_at.timestamp_millis()),
                        })
                        .await?;

                    // §4.1/§4.5: remote override cancel is checked at perform start
                    // (child.rs) and every parent heartbeat.
                    let job_key = self.pool.key(&rjob_queues::job_key(job_id));
                    let mut conn = self.pool.get().await?;
                    if let Some(reason) = signals::job_override_cancel(&mut conn, &job_key).await? {
                        event!(Level::INFO, job_id = %job_id, reason = %reason, "Observed remote cancel override at heartbeat, forwarding to child");
                        child.signal(libc::SIGUSR1).ok();
                    }
                }
            }
        }
    }

    /// §4.4 step 10's exit reconciliation: the child must have left the job in a
    /// terminal (or re-delayed) state. If it didn't (crashed, or lied about success),
    /// that's a Dirty failure.
    async fn reconcile_child_exit(
        &self,
        queue: &Queue,
        job_id: &str,
        started_at: chrono::DateTime<Utc>,
        status: std::process::ExitStatus,
    ) -> Result<()> {
        let job = queue.job(job_id).await?;
        let still_running = matches!(job.as_ref().map(|j| j.status), Some(rjob_queues::JobStatus::Running));

        if !status.success() || still_running {
            event!(
                Level::ERROR,
                job_id = %job_id,
                exit_status = ?status,
                still_running = still_running,
                "Dirty child exit"
            );
            self.events
                .publish(EventKind::WorkerCorrupt, EventSubject::JobId(job_id.to_string()));
            queue
                .fail(
                    job_id,
                    &self.worker_id,
                    started_at,
                    rjob_queues::FailureKind::Unexpected,
                    format!("dirty exit: status={:?} still_running={}", status, still_running),
                )
                .await?;
        }

        Ok(())
    }
}

fn remote_signal_label(cmd: Command) -> Option<&'static str> {
    match cmd {
        Command::ForceShutdown => Some("FORCESHUTDOWN"),
        Command::Shutdown => Some("QUIT"),
        Command::Cancel => Some("CANCEL"),
        Command::Pause => Some("PAUSE"),
        Command::Resume => Some("RESUME"),
        Command::Wakeup => None,
    }
}
