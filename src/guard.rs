//! Cross-invocation resource guard: an advisory lock file and a wall-clock
//! budget.
//!
//! The lock is cooperative, not kernel-enforced. Acquisition is an atomic
//! exclusive create (never read-then-write), so two racing acquirers cannot
//! both win. Staleness is decided solely by whether the recorded owner PID is
//! alive. Timestamps are recorded for diagnostics but never trusted for
//! staleness, since clock skew makes them unreliable.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

const RETRY_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockPayload {
    pub owner_pid: u32,
    pub acquired_at: DateTime<Utc>,
}

/// Held for the duration of a cleanup run; releases the lock file on drop,
/// but only if this process still owns it.
pub struct LockGuard {
    path: PathBuf,
    owner_pid: u32,
}

impl LockGuard {
    pub fn owner_pid(&self) -> u32 {
        self.owner_pid
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match read_holder(&self.path) {
            Some(pid) if pid == self.owner_pid => {
                let _ = std::fs::remove_file(&self.path);
            }
            _ => {}
        }
    }
}

/// Acquire the cleanup lock, reclaiming it from a dead holder, waiting out a
/// live one up to `timeout`.
pub fn acquire(path: &Path, timeout: Duration) -> Result<LockGuard> {
    let started = Instant::now();
    let owner_pid = std::process::id();

    loop {
        match try_create(path, owner_pid) {
            Ok(()) => {
                debug!(lock = %path.display(), pid = owner_pid, "cleanup lock acquired");
                return Ok(LockGuard {
                    path: path.to_path_buf(),
                    owner_pid,
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                match read_holder(path) {
                    Some(holder) if pid_alive(holder) => {
                        let waited = started.elapsed();
                        if waited >= timeout {
                            return Err(Error::LockTimeout { waited });
                        }
                        debug!(holder, "cleanup lock busy, retrying");
                        std::thread::sleep(RETRY_DELAY.min(timeout.saturating_sub(waited)));
                    }
                    holder => {
                        // Dead owner or unreadable payload: the previous run
                        // was killed. Remove and go back through the atomic
                        // create; a racing reclaimer simply loses that race.
                        warn!(
                            lock = %path.display(),
                            holder = holder.unwrap_or(0),
                            "reclaiming stale cleanup lock"
                        );
                        let _ = std::fs::remove_file(path);
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn try_create(path: &Path, owner_pid: u32) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let payload = LockPayload {
        owner_pid,
        acquired_at: Utc::now(),
    };
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    let json = serde_json::to_string(&payload).map_err(std::io::Error::other)?;
    file.write_all(json.as_bytes())
}

fn read_holder(path: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str::<LockPayload>(&content)
        .ok()
        .map(|payload| payload.owner_pid)
}

/// Is the given PID a live process? Signal 0 probes without delivering;
/// EPERM still means alive.
pub fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Race `fut` against a wall-clock budget. A timer win is a distinct
/// [`Error::BudgetExceeded`], not a failure of the underlying work.
pub async fn with_budget<T, F>(budget: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::BudgetExceeded { budget }),
    }
}
