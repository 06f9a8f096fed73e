//! The supervisor state machine.
//!
//! One supervisory control flow per container: `Starting → Running →
//! ShuttingDown → Cleaning → Terminated`. The supervisor owns the worker
//! child, turns termination signals into structured cancellation of the wait
//! loop (signal streams feeding `select!`, never logic inside a handler
//! context), and drives quiescence and the cleanup engine before exiting.
//! The transition into `Cleaning` is one-shot: a second signal while shutdown
//! is already in progress is drained and logged, never acted on.

pub mod worker;

use std::path::Path;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use crate::cleanup::engine;
use crate::cleanup::CleanupTier;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::guard;
use crate::quiesce::quiesce;
use crate::session::{PriorSession, SessionMarker};

use worker::{exit_code, Worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Starting,
    Running,
    ShuttingDown,
    Cleaning,
    Terminated,
}

enum ShutdownCause {
    ChildExited(std::process::ExitStatus),
    Signalled(&'static str),
    /// The liveness poll found the worker gone before the reaper did.
    ChildVanished,
}

pub struct Supervisor {
    config: Config,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the full lifecycle. Returns the process exit code: 0 for a
    /// signal-driven shutdown, otherwise the worker's own exit code.
    pub async fn run(self) -> Result<i32> {
        let mut state = State::Starting;
        info!(?state, exit_tier = %self.config.exit_tier, "supervisor starting");

        self.validate_environment()?;

        match SessionMarker::inspect(&self.config.marker_path) {
            PriorSession::Active { owner_pid } => {
                return Err(Error::Startup(format!(
                    "another supervisor (pid {owner_pid}) already owns this container"
                )));
            }
            PriorSession::Crashed { owner_pid } => {
                warn!(
                    ?owner_pid,
                    "previous lifecycle crashed mid-run, running deferred enhanced cleanup"
                );
                self.recovery_cleanup().await;
            }
            PriorSession::Clean => {}
        }
        let marker = SessionMarker::engage(&self.config.marker_path)?;

        let mut worker = Worker::spawn(&self.config)?;
        let worker_pid = worker.pid();

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sighup = signal(SignalKind::hangup())?;
        let mut poll = tokio::time::interval(self.config.liveness_poll);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        state = State::Running;
        info!(?state, worker_pid, "worker running");

        let cause = loop {
            tokio::select! {
                status = worker.wait() => break ShutdownCause::ChildExited(status?),
                _ = sigterm.recv() => break ShutdownCause::Signalled("SIGTERM"),
                _ = sigint.recv() => break ShutdownCause::Signalled("SIGINT"),
                _ = sighup.recv() => break ShutdownCause::Signalled("SIGHUP"),
                _ = poll.tick() => {
                    if !guard::pid_alive(worker_pid) {
                        break ShutdownCause::ChildVanished;
                    }
                }
            }
        };

        state = State::ShuttingDown;
        let worker_status = match &cause {
            ShutdownCause::ChildExited(status) => {
                info!(?state, %status, "worker exited on its own");
                Some(*status)
            }
            ShutdownCause::Signalled(sig) => {
                info!(?state, signal = sig, "termination signal received, stopping worker");
                worker.shutdown(self.config.worker_grace).await
            }
            ShutdownCause::ChildVanished => {
                warn!(?state, "worker died between polls, collecting status");
                worker.shutdown(self.config.worker_grace).await
            }
        };

        state = State::Cleaning;
        info!(?state, "running exit cleanup");
        // One-shot latch into Cleaning: the cleanup future runs exactly once
        // while any further signals are drained here.
        let cleanup = self.exit_cleanup();
        tokio::pin!(cleanup);
        loop {
            tokio::select! {
                _ = &mut cleanup => break,
                _ = sigterm.recv() => info!("signal ignored, shutdown already in progress"),
                _ = sigint.recv() => info!("signal ignored, shutdown already in progress"),
                _ = sighup.recv() => info!("signal ignored, shutdown already in progress"),
            }
        }

        marker.disengage();
        state = State::Terminated;

        let code = match cause {
            ShutdownCause::Signalled(_) => 0,
            ShutdownCause::ChildExited(status) => exit_code(status),
            ShutdownCause::ChildVanished => worker_status.map(exit_code).unwrap_or(1),
        };
        info!(?state, code, "supervisor exiting");
        Ok(code)
    }

    /// Missing required inputs are fatal at startup; nothing downstream can
    /// proceed without them.
    fn validate_environment(&self) -> Result<()> {
        if !self.config.workspace_root.is_dir() {
            return Err(Error::Startup(format!(
                "workspace root {} does not exist",
                self.config.workspace_root.display()
            )));
        }
        if !program_resolvable(&self.config.worker_program) {
            return Err(Error::Startup(format!(
                "worker program {:?} not found",
                self.config.worker_program
            )));
        }
        Ok(())
    }

    /// Deferred cleanup for a crashed prior lifecycle. Always runs at
    /// `enhanced`: enough to bound the blast radius of unfinished cleanup,
    /// never destructive enough to cost data unattended.
    async fn recovery_cleanup(&self) {
        let config = self.config.clone();
        let result = tokio::task::spawn_blocking(move || {
            engine::run_locked(&config, CleanupTier::Enhanced, false, false)
        })
        .await;
        match result {
            Ok(Ok(report)) => {
                info!(summary = %report.summary(), "crash-recovery cleanup finished");
            }
            Ok(Err(Error::LockTimeout { .. })) => {
                warn!("cleanup lock busy, skipping crash-recovery pass");
            }
            Ok(Err(e)) => warn!("crash-recovery cleanup failed: {e}"),
            Err(e) => warn!("crash-recovery task failed: {e}"),
        }
    }

    async fn exit_cleanup(&self) {
        let targets = self.config.quiesce_targets.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || quiesce(&targets)).await {
            warn!("quiescence task failed: {e}");
        }

        let config = self.config.clone();
        let budget = self.config.cleanup_budget;
        let work = tokio::task::spawn_blocking(move || {
            engine::run_locked(&config, config.exit_tier, config.dry_run, config.ignore_pins)
        });

        // The engine stops itself at the budget deadline; the outer race is
        // the hard backstop against a wedged filesystem call, so shutdown
        // always completes within grace window + budget.
        let hard_stop = budget + Duration::from_secs(5);
        let result = guard::with_budget(hard_stop, async {
            work.await
                .map_err(|e| Error::Other(format!("cleanup task failed: {e}")))?
        })
        .await;

        match result {
            Ok(report) => info!(summary = %report.summary(), "exit cleanup finished"),
            Err(Error::LockTimeout { waited }) => warn!(
                ?waited,
                "cleanup lock busy at shutdown, exiting anyway; next startup's crash recovery is the backstop"
            ),
            Err(Error::BudgetExceeded { budget }) => {
                warn!(?budget, "cleanup hard budget exceeded, exiting with partial cleanup");
            }
            Err(e) => warn!("exit cleanup failed: {e}"),
        }
    }
}

fn program_resolvable(program: &str) -> bool {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.exists();
    }
    // PATH search is part of startup validation, before config freezes the
    // environment out of the picture.
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}
