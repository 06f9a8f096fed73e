//! The managed worker child process.
//!
//! The worker is opaque: it is launched with a fixed argument set, its
//! stdout/stderr are inherited for diagnostics (never parsed for control),
//! and the only control channel is POSIX signals plus the exit status. The
//! child gets its own process group so graceful and forced termination reach
//! any grandchildren it spawns.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

pub struct Worker {
    child: Child,
    /// PID snapshot at spawn; `Child::id` goes away once the child is reaped
    /// but group signalling still needs the number.
    pid: u32,
}

impl Worker {
    pub fn spawn(config: &Config) -> Result<Self> {
        let mut cmd = Command::new(&config.worker_program);
        cmd.args(&config.worker_args)
            .current_dir(&config.workspace_root)
            .stdin(Stdio::null());
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| {
            Error::Startup(format!(
                "failed to launch worker {:?}: {e}",
                config.worker_program
            ))
        })?;
        let pid = child
            .id()
            .ok_or_else(|| Error::Startup("worker exited before it could be tracked".into()))?;

        info!(pid, program = %config.worker_program, "worker launched");
        Ok(Self { child, pid })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Wait for the worker to exit. Cancel-safe, so it can sit in a select
    /// loop alongside signal streams.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Graceful-then-forced termination: SIGTERM to the process group, wait
    /// out the grace window, SIGKILL whatever remains. Returns the exit
    /// status when the child could still be reaped.
    pub async fn shutdown(&mut self, grace: Duration) -> Option<ExitStatus> {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Some(status);
        }

        debug!(pid = self.pid, "sending SIGTERM to worker process group");
        self.signal_group(nix::sys::signal::Signal::SIGTERM);

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(pid = self.pid, "worker exited within grace window");
                Some(status)
            }
            Ok(Err(e)) => {
                warn!(pid = self.pid, "error reaping worker: {e}");
                None
            }
            Err(_) => {
                warn!(pid = self.pid, grace_secs = grace.as_secs(), "worker outlived grace window, sending SIGKILL");
                self.signal_group(nix::sys::signal::Signal::SIGKILL);
                self.child.wait().await.ok()
            }
        }
    }

    fn signal_group(&self, signal: nix::sys::signal::Signal) {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        // Negative PID addresses the whole process group.
        let pgid = Pid::from_raw(-(self.pid as i32));
        if let Err(e) = kill(pgid, signal) {
            debug!(pid = self.pid, ?signal, "group signal not delivered: {e}");
        }
    }
}

/// Map a worker exit status to the container exit code: the child's own code,
/// or the conventional 128+signal when it was signalled.
pub fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or_else(|| {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return 128 + signal;
            }
        }
        1
    })
}
