//! Shared fixtures for integration tests.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use ember::config::Config;
use tempfile::TempDir;

pub struct Workspace {
    pub dir: TempDir,
    pub config: Config,
}

/// A workspace populated the way a real container looks mid-session:
/// rendered outputs, an upload, scratch files, a pip cache, app state and two
/// model files.
pub fn seeded_workspace() -> Workspace {
    let dir = TempDir::new().unwrap();
    let mut config = Config::for_workspace(dir.path());
    config.download_scratch = dir.path().join(".ember/downloads");
    config.quiesce_targets = vec![];
    config.lock_timeout = std::time::Duration::from_secs(2);

    let files: &[(&str, usize)] = &[
        ("ComfyUI/output/render.png", 400),
        ("ComfyUI/output/grid.png", 300),
        ("ComfyUI/input/uploads/photo.jpg", 200),
        ("ComfyUI/temp/scratch.bin", 100),
        (".cache/pip/wheel.whl", 500),
        ("ComfyUI/user/settings.json", 50),
        ("ComfyUI/models/checkpoints/flux1-dev.safetensors", 4096),
        ("ComfyUI/models/loras/style.safetensors", 2048),
    ];
    for (rel, bytes) in files {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, vec![0u8; *bytes]).unwrap();
    }

    Workspace { dir, config }
}

/// Recursive listing of all files under `root` as workspace-relative paths.
pub fn file_listing(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(root).unwrap().to_path_buf())
        .collect();
    files.sort();
    files
}

/// Recursive listing of every entry (files and directories) with file sizes,
/// for byte-for-byte tree comparison.
pub fn tree_snapshot(root: &Path) -> Vec<(PathBuf, Option<u64>)> {
    let mut entries: Vec<(PathBuf, Option<u64>)> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
            let size = e
                .metadata()
                .ok()
                .filter(|m| m.is_file())
                .map(|m| m.len());
            (rel, size)
        })
        .collect();
    entries.sort();
    entries
}
