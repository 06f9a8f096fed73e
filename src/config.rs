//! Immutable runtime configuration.
//!
//! All operator knobs arrive as `EMBER_*` environment variables and are read
//! exactly once, at process start, into a [`Config`] that is passed by
//! reference into every component. Nothing else in the crate touches the
//! process environment after startup.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::cleanup::CleanupTier;
use crate::error::{Error, Result};

/// Subdirectories expected under the models root. Mirrors the model-type
/// layout the worker expects at startup.
pub const MODEL_SUBDIRS: &[&str] = &[
    "checkpoints",
    "loras",
    "vae",
    "embeddings",
    "controlnet",
    "upscale_models",
];

#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the persistent workspace volume. All deletions stay inside it.
    pub workspace_root: PathBuf,
    /// Tier the supervisor runs at container shutdown.
    pub exit_tier: CleanupTier,
    pub dry_run: bool,
    pub ignore_pins: bool,
    /// Second half of the model double-gate. Model storage is only ever
    /// deleted at nuclear-or-above AND with this set.
    pub allow_model_delete: bool,
    pub cleanup_budget: Duration,
    pub lock_timeout: Duration,
    pub pin_file: PathBuf,
    pub marker_path: PathBuf,
    pub lock_path: PathBuf,
    pub size_cache_path: PathBuf,
    pub size_cache_ttl: Duration,
    /// Scratch directory used by the download pipeline; cleaned at enhanced.
    pub download_scratch: PathBuf,
    pub worker_program: String,
    pub worker_args: Vec<String>,
    /// Grace window between SIGTERM and SIGKILL for the worker.
    pub worker_grace: Duration,
    pub liveness_poll: Duration,
    /// Name/cmdline fragments of auxiliary processes to quiesce before
    /// destructive cleanup.
    pub quiesce_targets: Vec<String>,
}

impl Config {
    /// Defaults for a given workspace root. Runtime state (session marker,
    /// lock, size cache) lives under `<workspace>/.ember` so it survives a
    /// container restart on a persistent volume.
    pub fn for_workspace(workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root = workspace_root.into();
        let state_dir = workspace_root.join(".ember");
        Self {
            exit_tier: CleanupTier::Basic,
            dry_run: false,
            ignore_pins: false,
            allow_model_delete: false,
            cleanup_budget: Duration::from_secs(45),
            lock_timeout: Duration::from_secs(10),
            pin_file: state_dir.join("pins.conf"),
            marker_path: state_dir.join("session.json"),
            lock_path: state_dir.join("cleanup.lock"),
            size_cache_path: state_dir.join("size_cache.json"),
            size_cache_ttl: Duration::from_secs(6 * 3600),
            download_scratch: std::env::temp_dir().join("ember_downloads"),
            worker_program: "python3".to_string(),
            worker_args: vec![
                workspace_root
                    .join("ComfyUI/main.py")
                    .to_string_lossy()
                    .into_owned(),
                "--listen".to_string(),
                "0.0.0.0".to_string(),
            ],
            worker_grace: Duration::from_secs(10),
            liveness_poll: Duration::from_secs(2),
            quiesce_targets: vec![
                "ComfyUI/main.py".to_string(),
                "download_huggingface".to_string(),
                "download_civitai".to_string(),
            ],
            workspace_root,
        }
    }

    /// Snapshot the process environment into a config. Called once from main.
    pub fn from_env() -> Result<Self> {
        let workspace = env_str("EMBER_WORKSPACE").unwrap_or_else(|| "/workspace".to_string());
        let mut config = Self::for_workspace(workspace);

        if let Some(tier) = env_str("EMBER_EXIT_TIER") {
            config.exit_tier = tier
                .parse()
                .map_err(|e: String| Error::Config(format!("EMBER_EXIT_TIER: {e}")))?;
        }
        config.dry_run = env_bool("EMBER_DRY_RUN", config.dry_run);
        config.ignore_pins = env_bool("EMBER_IGNORE_PINS", config.ignore_pins);
        config.allow_model_delete = env_bool("EMBER_ALLOW_MODEL_DELETE", config.allow_model_delete);
        config.cleanup_budget = env_secs("EMBER_CLEANUP_BUDGET_SECS", config.cleanup_budget);
        config.lock_timeout = env_secs("EMBER_LOCK_TIMEOUT_SECS", config.lock_timeout);
        config.size_cache_ttl = env_secs("EMBER_SIZE_CACHE_TTL_SECS", config.size_cache_ttl);
        if let Some(path) = env_str("EMBER_PIN_FILE") {
            config.pin_file = PathBuf::from(path);
        }
        if let Some(cmd) = env_str("EMBER_WORKER_CMD") {
            let mut parts = cmd.split_whitespace().map(str::to_string);
            match parts.next() {
                Some(program) => {
                    config.worker_program = program;
                    config.worker_args = parts.collect();
                }
                None => return Err(Error::Config("EMBER_WORKER_CMD is empty".to_string())),
            }
        }
        if let Some(targets) = env_str("EMBER_QUIESCE_TARGETS") {
            config.quiesce_targets = targets
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }

        Ok(config)
    }

    pub fn comfy_dir(&self) -> PathBuf {
        self.workspace_root.join("ComfyUI")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.comfy_dir().join("output")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.comfy_dir().join("input/uploads")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.comfy_dir().join("temp")
    }

    pub fn pip_cache_dir(&self) -> PathBuf {
        self.workspace_root.join(".cache/pip")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.comfy_dir().join("models")
    }

    /// Model storage roots tracked by the size cache and gated by the
    /// model-deletion override.
    pub fn model_roots(&self) -> Vec<PathBuf> {
        vec![self.models_dir()]
    }

    pub fn app_state_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.comfy_dir().join("user"),
            self.workspace_root.join(".config"),
        ]
    }

    /// Directories recreated (mode 0755) after a destructive run so the next
    /// startup finds the layout it expects.
    pub fn skeleton_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![
            self.output_dir(),
            self.uploads_dir(),
            self.scratch_dir(),
            self.download_scratch.clone(),
        ];
        for sub in MODEL_SUBDIRS {
            dirs.push(self.models_dir().join(sub));
        }
        dirs
    }
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_str(key) {
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    match env_str(key) {
        Some(v) => match v.parse::<u64>() {
            Ok(secs) => Duration::from_secs(secs),
            Err(_) => {
                warn!("{} is not a number ({:?}), using {:?}", key, v, default);
                default
            }
        },
        None => default,
    }
}
