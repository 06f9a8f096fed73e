//! Session marker and crash detection.
//!
//! The supervisor records "a lifecycle is in progress" at startup and clears
//! it at clean shutdown. A marker found at the next startup whose owner PID
//! is no longer alive means the previous container lifecycle crashed mid-run
//! and its cleanup may be unfinished; the supervisor then runs a deferred
//! enhanced-tier pass before normal startup. Liveness of the recorded PID is
//! the only staleness signal, same as the cleanup lock.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::guard::pid_alive;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerPayload {
    pub owner_pid: u32,
    pub created_at: DateTime<Utc>,
}

/// What a startup inspection of the marker path found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorSession {
    /// No marker: the previous lifecycle shut down cleanly (or never ran).
    Clean,
    /// Marker with a dead owner, or an unreadable marker: the previous run
    /// died without finishing its shutdown sequence.
    Crashed { owner_pid: Option<u32> },
    /// Marker with a live owner: another supervisor owns this container.
    Active { owner_pid: u32 },
}

pub struct SessionMarker {
    path: PathBuf,
    engaged: bool,
}

impl SessionMarker {
    pub fn inspect(path: &Path) -> PriorSession {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return PriorSession::Clean,
        };
        match serde_json::from_str::<MarkerPayload>(&content) {
            Ok(payload) if pid_alive(payload.owner_pid) => PriorSession::Active {
                owner_pid: payload.owner_pid,
            },
            Ok(payload) => PriorSession::Crashed {
                owner_pid: Some(payload.owner_pid),
            },
            Err(e) => {
                // A half-written marker is itself evidence of a crash.
                warn!(marker = %path.display(), "unreadable session marker ({e}), treating as crash");
                PriorSession::Crashed { owner_pid: None }
            }
        }
    }

    /// Record this process as the owner of the current lifecycle.
    pub fn engage(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = MarkerPayload {
            owner_pid: std::process::id(),
            created_at: Utc::now(),
        };
        std::fs::write(path, serde_json::to_string(&payload)?)?;
        debug!(marker = %path.display(), pid = payload.owner_pid, "session marker engaged");
        Ok(Self {
            path: path.to_path_buf(),
            engaged: true,
        })
    }

    /// Clear the marker at clean shutdown.
    pub fn disengage(mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(marker = %self.path.display(), "failed to clear session marker: {e}");
        }
        self.engaged = false;
    }
}

impl Drop for SessionMarker {
    fn drop(&mut self) {
        if self.engaged {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
