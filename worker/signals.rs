//! Typed signal command and the two sources that feed it: OS signal handlers (parent
//! process only) and remote Redis-polled signals (§4.5, §9 "Signals").

use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{event, Level};

use crate::error::Result;

/// The main loop only ever reacts to this enum; OS signals and remote polling are two
/// independent producers feeding the same single-consumer channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ForceShutdown,
    Shutdown,
    Cancel,
    Pause,
    Resume,
    Wakeup,
}

impl Command {
    /// Maps a remote textual command (as stored in `global.signal` / `worker:<id>.signal`)
    /// to its local-signal equivalent.
    fn from_remote(s: &str) -> Option<Command> {
        match s {
            "FORCESHUTDOWN" => Some(Command::ForceShutdown),
            "QUIT" => Some(Command::Shutdown),
            "CANCEL" => Some(Command::Cancel),
            "PAUSE" => Some(Command::Pause),
            "RESUME" => Some(Command::Resume),
            _ => None,
        }
    }
}

/// Installs `tokio::signal::unix` listeners and forwards each one, mapped, into `tx`.
/// Lives for the lifetime of the worker process; dropped (and its tasks aborted) when
/// the worker's `GracefulShutdown` finishes.
#[cfg(unix)]
pub fn install_os_signal_handlers(tx: mpsc::UnboundedSender<Command>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mappings = [
        (SignalKind::terminate(), Command::ForceShutdown),
        (SignalKind::interrupt(), Command::ForceShutdown),
        (SignalKind::quit(), Command::Shutdown),
        (SignalKind::user_defined1(), Command::Cancel),
        (SignalKind::user_defined2(), Command::Pause),
        (SignalKind::from_raw(libc::SIGCONT), Command::Resume),
        (SignalKind::pipe(), Command::Wakeup),
    ];

    for (kind, command) in mappings {
        let mut stream = signal(kind)?;
        let tx = tx.clone();
        tokio::spawn(async move {
            loop {
                if stream.recv().await.is_none() {
                    break;
                }
                event!(Level::INFO, command = ?command, "Received OS signal");
                if tx.send(command).is_err() {
                    break;
                }
            }
        });
    }

    Ok(())
}

/// Polls the three remote-signal slots described in §4.5. Call once per main-loop
/// iteration.
pub struct RemoteSignals {
    global_key: String,
    worker_key: String,
    last_g_signal: Option<String>,
}

impl RemoteSignals {
    pub fn new(global_key: String, worker_key: String) -> RemoteSignals {
        RemoteSignals {
            global_key,
            worker_key,
            last_g_signal: None,
        }
    }

    /// Checks, in order: the global signal (only if it changed since last observed),
    /// then the per-worker signal (deleted on read). Does not look at the current
    /// job's `override_status`; callers check that separately via
    /// [`job_override_cancel`] once they know which job is in flight.
    pub async fn poll(&mut self, conn: &mut deadpool_redis::Connection) -> Result<Option<Command>> {
        let global_signal: Option<String> = conn.hget(&self.global_key, "signal").await?;
        if let Some(sig) = &global_signal {
            if self.last_g_signal.as_deref() != Some(sig.as_str()) {
                self.last_g_signal = Some(sig.clone());
                if let Some(cmd) = Command::from_remote(sig) {
                    return Ok(Some(cmd));
                }
            }
        } else {
            self.last_g_signal = None;
        }

        let worker_signal: Option<String> = conn.hget(&self.worker_key, "signal").await?;
        if let Some(sig) = worker_signal {
            let _: () = conn.hdel(&self.worker_key, "signal").await?;
            if let Some(cmd) = Command::from_remote(&sig) {
                return Ok(Some(cmd));
            }
        }

        Ok(None)
    }

    /// The `dedicated` field of the global hash: when set, only the named worker id
    /// may execute jobs. All others self-pause.
    pub async fn dedicated_worker(
        &self,
        conn: &mut deadpool_redis::Connection,
    ) -> Result<Option<String>> {
        let dedicated: Option<String> = conn.hget(&self.global_key, "dedicated").await?;
        Ok(dedicated.filter(|s| !s.is_empty()))
    }
}

/// Checks a job hash's `override_status`/`override_reason` pair for an observed remote
/// cancel (§4.1 "override_status == CANCELLED observed").
pub async fn job_override_cancel(
    conn: &mut deadpool_redis::Connection,
    job_key: &str,
) -> Result<Option<String>> {
    let (status, reason): (Option<String>, Option<String>) = redis::pipe()
        .hget(job_key, "override_status")
        .hget(job_key, "override_reason")
        .query_async(conn)
        .await?;

    match status.as_deref() {
        Some("cancelled") => Ok(Some(reason.unwrap_or_else(|| "remote override".to_string()))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_command_mapping() {
        assert_eq!(Command::from_remote("FORCESHUTDOWN"), Some(Command::ForceShutdown));
        assert_eq!(Command::from_remote("QUIT"), Some(Command::Shutdown));
        assert_eq!(Command::from_remote("CANCEL"), Some(Command::Cancel));
        assert_eq!(Command::from_remote("PAUSE"), Some(Command::Pause));
        assert_eq!(Command::from_remote("RESUME"), Some(Command::Resume));
        assert_eq!(Command::from_remote("nonsense"), None);
    }
}
