//! The cleanup engine.
//!
//! One run: load pins fresh, walk the target groups in scope for the
//! requested tier, ask the policy evaluator about every candidate, delete
//! (or report, in dry-run) and tally, then put the expected directory
//! skeleton back so the next startup finds a consistent layout. Per-path
//! failures are accumulated in the report, never raised: deletion is
//! idempotent and a failed path is simply retried by a future run. A
//! cooperative deadline turns a budget overrun into a distinct timeout
//! status with partial tallies, not a failure.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::Result;
use crate::policy::{DecisionReason, Evaluator, PinSet};
use crate::sizing::{dir_size, format_bytes, SizeCache};

use super::{groups_in_scope, CleanupTier, TargetGroup};

/// Filename fragments treated as credential-like during the nuclear scrub.
const CREDENTIAL_MARKERS: &[&str] = &["token", "key", "secret"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    /// The wall-clock budget expired mid-run. Partial tallies are kept;
    /// whatever remains is picked up by a future invocation.
    Timeout,
}

#[derive(Debug)]
pub struct CleanupReport {
    pub tier: CleanupTier,
    pub status: RunStatus,
    pub bytes_freed: u64,
    pub paths_deleted: usize,
    pub paths_skipped_pinned: usize,
    pub errors: Vec<String>,
    pub duration: Duration,
    pub dry_run: bool,
}

impl CleanupReport {
    fn new(tier: CleanupTier, dry_run: bool) -> Self {
        Self {
            tier,
            status: RunStatus::Completed,
            bytes_freed: 0,
            paths_deleted: 0,
            paths_skipped_pinned: 0,
            errors: Vec::new(),
            duration: Duration::default(),
            dry_run,
        }
    }

    /// The single human-readable summary line.
    pub fn summary(&self) -> String {
        let status = match self.status {
            RunStatus::Completed => "completed",
            RunStatus::Timeout => "timeout",
        };
        let mut line = format!(
            "cleanup tier={} status={} freed={} deleted={} pinned={} errors={} duration={:.1}s",
            self.tier,
            status,
            format_bytes(self.bytes_freed),
            self.paths_deleted,
            self.paths_skipped_pinned,
            self.errors.len(),
            self.duration.as_secs_f64(),
        );
        if self.dry_run {
            line.push_str(" (dry run)");
        }
        line
    }
}

/// Acquire the cleanup lock, then run the engine under the configured
/// budget. Contention with a live holder propagates as
/// [`crate::error::Error::LockTimeout`]; a budget overrun comes back as a
/// normal report with [`RunStatus::Timeout`].
pub fn run_locked(
    config: &Config,
    tier: CleanupTier,
    dry_run: bool,
    ignore_pins: bool,
) -> Result<CleanupReport> {
    let _guard = crate::guard::acquire(&config.lock_path, config.lock_timeout)?;
    let deadline = Instant::now() + config.cleanup_budget;
    CleanupEngine::new(config)
        .with_deadline(deadline)
        .run(tier, dry_run, ignore_pins)
}

pub struct CleanupEngine<'a> {
    config: &'a Config,
    deadline: Option<Instant>,
}

impl<'a> CleanupEngine<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            deadline: None,
        }
    }

    /// Cooperative wall-clock ceiling, checked between path operations.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn run(&self, tier: CleanupTier, dry_run: bool, ignore_pins: bool) -> Result<CleanupReport> {
        let started = Instant::now();
        let mut report = CleanupReport::new(tier, dry_run);

        // Pins may change between invocations; always load fresh.
        let pins = PinSet::load(&self.config.pin_file, &self.config.workspace_root);
        let evaluator = Evaluator::new(&self.config.workspace_root, &pins, ignore_pins)?;

        info!(
            tier = %tier,
            dry_run,
            ignore_pins,
            pins = pins.len(),
            "cleanup run starting"
        );

        for group in groups_in_scope(self.config, tier) {
            if self.expired(&mut report) {
                break;
            }
            self.clean_group(&group, &evaluator, dry_run, &mut report);
        }

        if tier >= CleanupTier::Nuclear && report.status == RunStatus::Completed {
            self.scrub_credentials(&evaluator, dry_run, &mut report);
        }

        if !dry_run {
            self.recreate_skeleton(&mut report);
        }

        report.duration = started.elapsed();
        info!(
            tier = %report.tier,
            status = ?report.status,
            bytes_freed = report.bytes_freed,
            paths_deleted = report.paths_deleted,
            paths_skipped_pinned = report.paths_skipped_pinned,
            errors = report.errors.len(),
            duration_ms = report.duration.as_millis() as u64,
            dry_run = report.dry_run,
            "cleanup run finished"
        );

        Ok(report)
    }

    fn clean_group(
        &self,
        group: &TargetGroup,
        evaluator: &Evaluator<'_>,
        dry_run: bool,
        report: &mut CleanupReport,
    ) {
        if group.model_storage {
            // The one expensive size computation; served from the cache so
            // repeated invocations stay cheap. Dry-run may populate it too,
            // sizing is observational.
            let cache = SizeCache::new(&self.config.size_cache_path, self.config.size_cache_ttl);
            let total_gb = cache.get_size_gb(&group.roots);
            info!(group = group.name, total_gb, "model storage in scope");
        }

        for root in &group.roots {
            if self.expired(report) {
                return;
            }
            let entries = match std::fs::read_dir(root) {
                Ok(entries) => entries,
                Err(_) => {
                    debug!(group = group.name, root = %root.display(), "target root absent, skipping");
                    continue;
                }
            };

            for entry in entries.flatten() {
                if self.expired(report) {
                    return;
                }
                self.clean_entry(&entry.path(), group, evaluator, dry_run, report);
            }
        }
    }

    fn clean_entry(
        &self,
        path: &Path,
        group: &TargetGroup,
        evaluator: &Evaluator<'_>,
        dry_run: bool,
        report: &mut CleanupReport,
    ) {
        let decision = evaluator.evaluate(path, group.allow_root_paths);
        if !decision.allowed {
            if decision.reason == DecisionReason::Pinned {
                report.paths_skipped_pinned += 1;
                debug!(path = %path.display(), "pinned, skipping");
            } else {
                debug!(path = %path.display(), reason = ?decision.reason, "policy denied, skipping");
            }
            return;
        }

        let meta = match path.symlink_metadata() {
            Ok(meta) => meta,
            Err(e) => {
                // Vanished mid-run; nothing to free.
                debug!(path = %path.display(), "stat failed mid-run: {e}");
                return;
            }
        };

        if meta.is_dir() && evaluator.pins_active() {
            // A pin may protect a file anywhere inside this directory, so it
            // cannot be dropped wholesale; descend and decide per entry.
            if self.clean_dir_guarded(path, group, evaluator, dry_run, report) && !dry_run {
                let _ = std::fs::remove_dir(path);
            }
            return;
        }

        let size = if meta.is_dir() {
            dir_size(path)
        } else {
            meta.len()
        };

        if dry_run {
            info!(
                group = group.name,
                path = %path.display(),
                size = %format_bytes(size),
                "dry run: would delete"
            );
        } else {
            let result = if meta.is_dir() {
                std::fs::remove_dir_all(path)
            } else {
                std::fs::remove_file(path)
            };
            if let Err(e) = result {
                report
                    .errors
                    .push(format!("failed to remove {}: {e}", path.display()));
                return;
            }
            debug!(group = group.name, path = %path.display(), size, "deleted");
        }

        report.bytes_freed += size;
        report.paths_deleted += 1;
    }

    /// Per-entry descent used while pins are active. Returns true when the
    /// whole subtree was (or would be) removed, so the caller may drop the
    /// now-empty directory itself.
    fn clean_dir_guarded(
        &self,
        dir: &Path,
        group: &TargetGroup,
        evaluator: &Evaluator<'_>,
        dry_run: bool,
        report: &mut CleanupReport,
    ) -> bool {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                report
                    .errors
                    .push(format!("failed to read {}: {e}", dir.display()));
                return false;
            }
        };

        let mut fully_cleaned = true;
        for entry in entries.flatten() {
            if self.expired(report) {
                return false;
            }
            let path = entry.path();

            let decision = evaluator.evaluate(&path, group.allow_root_paths);
            if !decision.allowed {
                if decision.reason == DecisionReason::Pinned {
                    report.paths_skipped_pinned += 1;
                    debug!(path = %path.display(), "pinned, skipping");
                } else {
                    debug!(path = %path.display(), reason = ?decision.reason, "policy denied, skipping");
                }
                fully_cleaned = false;
                continue;
            }

            let meta = match path.symlink_metadata() {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            if meta.is_dir() {
                if self.clean_dir_guarded(&path, group, evaluator, dry_run, report) {
                    if !dry_run {
                        let _ = std::fs::remove_dir(&path);
                    }
                } else {
                    fully_cleaned = false;
                }
                continue;
            }

            let size = meta.len();
            if dry_run {
                info!(
                    group = group.name,
                    path = %path.display(),
                    size = %format_bytes(size),
                    "dry run: would delete"
                );
            } else if let Err(e) = std::fs::remove_file(&path) {
                report
                    .errors
                    .push(format!("failed to remove {}: {e}", path.display()));
                fully_cleaned = false;
                continue;
            }
            report.bytes_freed += size;
            report.paths_deleted += 1;
        }

        fully_cleaned
    }

    /// Best-effort removal of credential-like filenames under the workspace.
    /// Nuclear and above only.
    fn scrub_credentials(
        &self,
        evaluator: &Evaluator<'_>,
        dry_run: bool,
        report: &mut CleanupReport,
    ) {
        let walker = WalkDir::new(&self.config.workspace_root).min_depth(1);
        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            if self.expired(report) {
                return;
            }
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_lowercase();
            if !CREDENTIAL_MARKERS.iter().any(|marker| name.contains(marker)) {
                continue;
            }
            let path = entry.path();
            if !evaluator.evaluate(path, false).allowed {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if dry_run {
                info!(path = %path.display(), "dry run: would scrub credential-like file");
            } else if let Err(e) = std::fs::remove_file(path) {
                report
                    .errors
                    .push(format!("failed to scrub {}: {e}", path.display()));
                continue;
            } else {
                warn!(path = %path.display(), "scrubbed credential-like file");
            }
            report.bytes_freed += size;
            report.paths_deleted += 1;
        }
    }

    fn recreate_skeleton(&self, report: &mut CleanupReport) {
        use std::os::unix::fs::PermissionsExt;

        for dir in self.config.skeleton_dirs() {
            if let Err(e) = std::fs::create_dir_all(&dir) {
                report
                    .errors
                    .push(format!("failed to recreate {}: {e}", dir.display()));
                continue;
            }
            let perms = std::fs::Permissions::from_mode(0o755);
            if let Err(e) = std::fs::set_permissions(&dir, perms) {
                warn!(dir = %dir.display(), "failed to set skeleton permissions: {e}");
            }
        }
    }

    fn expired(&self, report: &mut CleanupReport) -> bool {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                if report.status != RunStatus::Timeout {
                    warn!(tier = %report.tier, "cleanup budget expired, stopping early");
                    report.status = RunStatus::Timeout;
                }
                true
            }
            _ => false,
        }
    }
}
