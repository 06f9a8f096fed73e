//! Service quiescence.
//!
//! Best-effort graceful-then-forced termination of cooperating auxiliary
//! processes (helper daemons, in-flight downloaders) before destructive
//! cleanup runs, so their open file handles are released first; deleting a
//! still-open file frees no space. A target that is not running is skipped,
//! never an error. Never signals this process or PID 1.

use std::time::{Duration, Instant};

use sysinfo::{Signal, System};
use tracing::{debug, info, warn};

use crate::guard::pid_alive;

const GRACE: Duration = Duration::from_secs(3);
const POLL: Duration = Duration::from_millis(200);

/// Stop every process whose name or command line contains one of the target
/// fragments. Returns the number of processes signalled.
pub fn quiesce(targets: &[String]) -> usize {
    if targets.is_empty() {
        return 0;
    }

    let mut system = System::new_all();
    system.refresh_all();
    let self_pid = std::process::id();

    let mut signalled: Vec<(u32, String)> = Vec::new();
    for (pid, process) in system.processes() {
        let pid = pid.as_u32();
        if pid <= 1 || pid == self_pid {
            continue;
        }
        let name = process.name().to_string_lossy().into_owned();
        let cmdline = process
            .cmd()
            .iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        if !targets
            .iter()
            .any(|t| name.contains(t.as_str()) || cmdline.contains(t.as_str()))
        {
            continue;
        }

        debug!(pid, name = %name, "quiescing auxiliary process");
        if process.kill_with(Signal::Term).is_none() {
            warn!(pid, "platform cannot deliver SIGTERM via sysinfo, skipping");
            continue;
        }
        signalled.push((pid, name));
    }

    if signalled.is_empty() {
        debug!("no auxiliary processes matched quiesce targets");
        return 0;
    }

    // Wait out the grace window, then force-kill stragglers.
    let deadline = Instant::now() + GRACE;
    while Instant::now() < deadline {
        if signalled.iter().all(|(pid, _)| !pid_alive(*pid)) {
            break;
        }
        std::thread::sleep(POLL);
    }

    for (pid, name) in &signalled {
        if pid_alive(*pid) {
            warn!(pid, name = %name, "still alive after grace window, sending SIGKILL");
            use nix::sys::signal::{kill, Signal as NixSignal};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(*pid as i32), NixSignal::SIGKILL);
        }
    }

    info!(stopped = signalled.len(), "service quiescence finished");
    signalled.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_targets_is_a_no_op() {
        assert_eq!(quiesce(&[]), 0);
    }

    #[test]
    fn missing_target_is_skipped() {
        assert_eq!(quiesce(&["ember-test-no-such-process".to_string()]), 0);
    }

    #[test]
    fn matching_process_is_terminated() {
        // A sleep with a distinctive duration so no unrelated process matches.
        let mut child = std::process::Command::new("sleep")
            .arg("30.7317")
            .spawn()
            .expect("spawn sleep");
        std::thread::sleep(Duration::from_millis(200));

        let stopped = quiesce(&["30.7317".to_string()]);
        assert_eq!(stopped, 1);

        let status = child.wait().expect("wait");
        assert!(!status.success(), "child should have been signalled");
        assert!(!pid_alive(child.id()));
    }
}
