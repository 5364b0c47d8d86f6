//! Memory watchdog (§4.4 step 4), grounded on `sysinfo`'s process-table snapshot
//! approach (the same crate the pack's `co8-cctelegram` uses in
//! `src/utils/performance.rs` to sample a process's RSS and CPU usage).

use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};
use tracing::{event, Level};

/// Warn once per crossed tenth-percentile threshold (§4.4: "log warnings crossing
/// tenth-percentile thresholds"), then shut down outright past 99.9%.
const SHUTDOWN_FRACTION: f64 = 0.999;

pub struct MemoryWatchdog {
    system: System,
    pid: Pid,
    limit_bytes: u64,
    last_decile_logged: u8,
}

impl MemoryWatchdog {
    pub fn new(limit_mb: u64) -> MemoryWatchdog {
        MemoryWatchdog {
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
            limit_bytes: limit_mb * 1024 * 1024,
            last_decile_logged: 0,
        }
    }

    /// Refreshes the process sample and returns `true` if the worker should shut down.
    pub fn check(&mut self) -> bool {
        self.system.refresh_process(self.pid);
        let used_bytes = match self.system.process(self.pid) {
            Some(p) => p.memory() * 1024,
            None => return false,
        };

        if self.limit_bytes == 0 {
            return false;
        }

        let fraction = used_bytes as f64 / self.limit_bytes as f64;
        let decile = (fraction * 10.0).floor() as u8;
        if decile > self.last_decile_logged && decile < 10 {
            self.last_decile_logged = decile;
            event!(
                Level::WARN,
                used_mb = used_bytes / (1024 * 1024),
                limit_mb = self.limit_bytes / (1024 * 1024),
                fraction = %format!("{:.1}%", fraction * 100.0),
                "Memory usage crossed threshold"
            );
        }

        if fraction > SHUTDOWN_FRACTION {
            event!(
                Level::ERROR,
                used_mb = used_bytes / (1024 * 1024),
                limit_mb = self.limit_bytes / (1024 * 1024),
                "Memory limit exceeded, shutting down"
            );
            true
        } else {
            false
        }
    }
}
