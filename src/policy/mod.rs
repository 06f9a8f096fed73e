//! Path deletion policy.
//!
//! Every path the cleanup engine considers goes through [`Evaluator::evaluate`]
//! first. The checks are ordered cheapest-first and short-circuit: a literal
//! forbidden-root test runs before any filesystem resolution, and any failure
//! to resolve a real path is a denial. Fail-closed, never fail-open.

pub mod pins;

pub use pins::{PinRule, PinSet};

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::Result;

/// System roots that are never deletable, and that pin patterns may not name.
/// `/` only matches exactly; everything else matches itself and descendants.
pub const FORBIDDEN_ROOTS: &[&str] = &[
    "/", "/etc", "/usr", "/bin", "/sbin", "/lib", "/lib64", "/boot", "/dev", "/proc", "/sys",
    "/home", "/root", "/var", "/opt", "/srv",
];

pub fn is_forbidden_root(path: &Path) -> bool {
    FORBIDDEN_ROOTS.iter().any(|root| {
        if *root == "/" {
            path == Path::new("/")
        } else {
            path.starts_with(root)
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    Allowed,
    /// A pin matched but the ignore-pins override is active.
    AllowedPinOverridden,
    ForbiddenRoot,
    ResolveFailed,
    SymlinkEscapesWorkspace,
    OutsideWorkspace,
    Pinned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathDecision {
    pub allowed: bool,
    pub reason: DecisionReason,
}

impl PathDecision {
    fn allow(reason: DecisionReason) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    fn deny(reason: DecisionReason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

pub struct Evaluator<'a> {
    workspace_root: PathBuf,
    pins: &'a PinSet,
    ignore_pins: bool,
}

impl<'a> Evaluator<'a> {
    /// The workspace root must itself resolve; containment checks compare
    /// against its real path so symlinked workspaces behave.
    pub fn new(workspace_root: &Path, pins: &'a PinSet, ignore_pins: bool) -> Result<Self> {
        Ok(Self {
            workspace_root: workspace_root.canonicalize()?,
            pins,
            ignore_pins,
        })
    }

    /// Whether pin rules can still veto deletions. When this is false a
    /// whole directory can be dropped in one call; when true the caller must
    /// descend so pinned files inside an otherwise-deletable directory
    /// survive.
    pub fn pins_active(&self) -> bool {
        !self.ignore_pins && !self.pins.is_empty()
    }

    /// Decide whether `path` may be deleted.
    ///
    /// `allow_root_paths` relaxes only the workspace-containment check (for
    /// targets like the download scratch dir under the system temp root);
    /// forbidden roots, resolution failures and symlink escapes still deny.
    pub fn evaluate(&self, path: &Path, allow_root_paths: bool) -> PathDecision {
        if is_forbidden_root(path) {
            return PathDecision::deny(DecisionReason::ForbiddenRoot);
        }

        let resolved = match path.canonicalize() {
            Ok(resolved) => resolved,
            Err(_) => return PathDecision::deny(DecisionReason::ResolveFailed),
        };
        if is_forbidden_root(&resolved) {
            return PathDecision::deny(DecisionReason::ForbiddenRoot);
        }

        // A symlink whose target lives outside the workspace is rejected even
        // when the link itself is inside it, regardless of allow_root_paths.
        match path.symlink_metadata() {
            Ok(meta) => {
                if meta.file_type().is_symlink() && !resolved.starts_with(&self.workspace_root) {
                    return PathDecision::deny(DecisionReason::SymlinkEscapesWorkspace);
                }
            }
            Err(_) => return PathDecision::deny(DecisionReason::ResolveFailed),
        }

        if !allow_root_paths
            && (resolved == self.workspace_root || !resolved.starts_with(&self.workspace_root))
        {
            return PathDecision::deny(DecisionReason::OutsideWorkspace);
        }

        if let Some(rule) = self.pins.matching(&resolved) {
            if self.ignore_pins {
                warn!(
                    path = %resolved.display(),
                    pin = %rule,
                    "pin overridden by ignore-pins, path will be deleted"
                );
                return PathDecision::allow(DecisionReason::AllowedPinOverridden);
            }
            return PathDecision::deny(DecisionReason::Pinned);
        }

        PathDecision::allow(DecisionReason::Allowed)
    }
}
