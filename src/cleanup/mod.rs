//! Cleanup tiers and target groups.
//!
//! Tiers are ordered and cumulative: each tier cleans everything the tiers
//! below it clean, plus its own target groups. Model storage is the one
//! deliberately double-gated exception: it only enters scope at nuclear or
//! above AND with the explicit model-deletion override, so a fat-fingered
//! tier choice alone can never drop multi-gigabyte assets.

pub mod engine;

pub use engine::{CleanupEngine, CleanupReport, RunStatus};

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupTier {
    Basic,
    Enhanced,
    Nuclear,
    Forensic,
}

impl CleanupTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupTier::Basic => "basic",
            CleanupTier::Enhanced => "enhanced",
            CleanupTier::Nuclear => "nuclear",
            CleanupTier::Forensic => "forensic",
        }
    }
}

impl fmt::Display for CleanupTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CleanupTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basic" => Ok(CleanupTier::Basic),
            "enhanced" => Ok(CleanupTier::Enhanced),
            "nuclear" => Ok(CleanupTier::Nuclear),
            "forensic" => Ok(CleanupTier::Forensic),
            other => Err(format!(
                "unknown tier {other:?}, expected basic|enhanced|nuclear|forensic"
            )),
        }
    }
}

/// A named set of filesystem roots cleaned together.
#[derive(Debug, Clone)]
pub struct TargetGroup {
    pub name: &'static str,
    pub roots: Vec<PathBuf>,
    /// Lowest tier at which this group is in scope.
    pub tier: CleanupTier,
    /// Groups that are off by default are only cleaned with an explicit
    /// override; today that is exactly the model storage.
    pub default_on: bool,
    pub model_storage: bool,
    /// Roots outside the workspace (system temp scratch) that the evaluator
    /// should admit anyway.
    pub allow_root_paths: bool,
}

/// The full group table for a configuration. Scope filtering happens in
/// [`groups_in_scope`].
pub fn target_groups(config: &Config) -> Vec<TargetGroup> {
    vec![
        TargetGroup {
            name: "outputs",
            roots: vec![config.output_dir()],
            tier: CleanupTier::Basic,
            default_on: true,
            model_storage: false,
            allow_root_paths: false,
        },
        TargetGroup {
            name: "uploads",
            roots: vec![config.uploads_dir()],
            tier: CleanupTier::Basic,
            default_on: true,
            model_storage: false,
            allow_root_paths: false,
        },
        TargetGroup {
            name: "scratch",
            roots: vec![config.scratch_dir()],
            tier: CleanupTier::Basic,
            default_on: true,
            model_storage: false,
            allow_root_paths: false,
        },
        TargetGroup {
            name: "package-caches",
            roots: vec![config.pip_cache_dir()],
            tier: CleanupTier::Enhanced,
            default_on: true,
            model_storage: false,
            allow_root_paths: false,
        },
        TargetGroup {
            name: "download-caches",
            // Partial downloads land under the system temp dir, outside the
            // workspace, so this group admits root-level paths.
            roots: vec![config.download_scratch.clone()],
            tier: CleanupTier::Enhanced,
            default_on: true,
            model_storage: false,
            allow_root_paths: true,
        },
        TargetGroup {
            name: "app-state",
            roots: config.app_state_dirs(),
            tier: CleanupTier::Nuclear,
            default_on: true,
            model_storage: false,
            allow_root_paths: false,
        },
        TargetGroup {
            name: "model-storage",
            roots: config.model_roots(),
            tier: CleanupTier::Nuclear,
            default_on: false,
            model_storage: true,
            allow_root_paths: false,
        },
        // Forensic adds no groups of its own yet; it exists as the audit
        // retention extension point above nuclear.
    ]
}

/// Groups actually cleaned at `tier` under `config`: cumulative tier scoping
/// plus the model double-gate.
pub fn groups_in_scope(config: &Config, tier: CleanupTier) -> Vec<TargetGroup> {
    target_groups(config)
        .into_iter()
        .filter(|group| group.tier <= tier)
        .filter(|group| {
            group.default_on
                || (group.model_storage
                    && tier >= CleanupTier::Nuclear
                    && config.allow_model_delete)
        })
        .collect()
}
