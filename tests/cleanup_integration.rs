//! End-to-end cleanup engine behavior over a realistic workspace.

mod common;

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use ember::cleanup::{engine, CleanupEngine, CleanupTier, RunStatus};

use common::{file_listing, seeded_workspace, tree_snapshot};

#[test]
fn basic_cleans_ephemeral_artifacts_only() {
    let ws = seeded_workspace();
    let report = CleanupEngine::new(&ws.config)
        .run(CleanupTier::Basic, false, false)
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    let remaining = file_listing(ws.dir.path());
    assert!(!remaining.contains(&PathBuf::from("ComfyUI/output/render.png")));
    assert!(!remaining.contains(&PathBuf::from("ComfyUI/temp/scratch.bin")));
    // Enhanced and nuclear targets are untouched at basic.
    assert!(remaining.contains(&PathBuf::from(".cache/pip/wheel.whl")));
    assert!(remaining.contains(&PathBuf::from("ComfyUI/user/settings.json")));
    assert!(remaining.contains(&PathBuf::from(
        "ComfyUI/models/checkpoints/flux1-dev.safetensors"
    )));
}

#[test]
fn cleanup_is_idempotent() {
    let ws = seeded_workspace();
    let engine = CleanupEngine::new(&ws.config);

    let first = engine.run(CleanupTier::Enhanced, false, false).unwrap();
    assert!(first.bytes_freed > 0);

    let second = engine.run(CleanupTier::Enhanced, false, false).unwrap();
    assert_eq!(second.bytes_freed, 0);
    assert_eq!(second.paths_deleted, 0);
}

#[test]
fn nuclear_deletes_a_superset_of_basic() {
    let ws_basic = seeded_workspace();
    let ws_nuclear = seeded_workspace();

    let before_basic: HashSet<_> = file_listing(ws_basic.dir.path()).into_iter().collect();
    let before_nuclear: HashSet<_> = file_listing(ws_nuclear.dir.path()).into_iter().collect();
    assert_eq!(before_basic, before_nuclear, "fixtures must match");

    CleanupEngine::new(&ws_basic.config)
        .run(CleanupTier::Basic, false, false)
        .unwrap();
    CleanupEngine::new(&ws_nuclear.config)
        .run(CleanupTier::Nuclear, false, false)
        .unwrap();

    let after_basic: HashSet<_> = file_listing(ws_basic.dir.path()).into_iter().collect();
    let after_nuclear: HashSet<_> = file_listing(ws_nuclear.dir.path()).into_iter().collect();

    let deleted_basic: HashSet<_> = before_basic.difference(&after_basic).collect();
    let deleted_nuclear: HashSet<_> = before_nuclear.difference(&after_nuclear).collect();
    assert!(
        deleted_basic.is_subset(&deleted_nuclear),
        "tier scoping must be cumulative"
    );
    assert!(deleted_nuclear.len() > deleted_basic.len());
}

#[test]
fn dry_run_leaves_the_tree_byte_for_byte_unchanged() {
    let ws = seeded_workspace();

    for tier in [
        CleanupTier::Basic,
        CleanupTier::Enhanced,
        CleanupTier::Nuclear,
        CleanupTier::Forensic,
    ] {
        let before = tree_snapshot(ws.dir.path());
        let report = CleanupEngine::new(&ws.config).run(tier, true, false).unwrap();
        let after = tree_snapshot(ws.dir.path());
        assert_eq!(before, after, "dry run at {tier} must not mutate the tree");
        assert!(report.dry_run);
    }
}

#[test]
fn model_double_gate_matrix() {
    let model = PathBuf::from("ComfyUI/models/checkpoints/flux1-dev.safetensors");

    // (tier, override) -> model deleted iff tier >= nuclear AND override set
    let cases = [
        (CleanupTier::Enhanced, false, false),
        (CleanupTier::Enhanced, true, false),
        (CleanupTier::Nuclear, false, false),
        (CleanupTier::Nuclear, true, true),
    ];
    for (tier, allow, expect_deleted) in cases {
        let mut ws = seeded_workspace();
        ws.config.allow_model_delete = allow;
        CleanupEngine::new(&ws.config).run(tier, false, false).unwrap();
        let deleted = !file_listing(ws.dir.path()).contains(&model);
        assert_eq!(
            deleted, expect_deleted,
            "tier={tier} allow_model_delete={allow}"
        );
    }
}

#[test]
fn pinned_model_survives_every_tier_and_override() {
    let mut ws = seeded_workspace();
    ws.config.allow_model_delete = true;
    fs::create_dir_all(ws.config.pin_file.parent().unwrap()).unwrap();
    fs::write(&ws.config.pin_file, "model:flux1-dev\n").unwrap();

    // Basic deletes outputs but the model is not even in scope.
    let report = CleanupEngine::new(&ws.config)
        .run(CleanupTier::Basic, false, false)
        .unwrap();
    let remaining = file_listing(ws.dir.path());
    assert!(!remaining.contains(&PathBuf::from("ComfyUI/output/render.png")));
    assert!(remaining.contains(&PathBuf::from(
        "ComfyUI/models/checkpoints/flux1-dev.safetensors"
    )));
    assert_eq!(report.paths_skipped_pinned, 0, "no pinned path in basic scope");

    // Nuclear with the override set: the pin overrides the override.
    let report = CleanupEngine::new(&ws.config)
        .run(CleanupTier::Nuclear, false, false)
        .unwrap();
    let remaining = file_listing(ws.dir.path());
    assert!(remaining.contains(&PathBuf::from(
        "ComfyUI/models/checkpoints/flux1-dev.safetensors"
    )));
    assert!(
        !remaining.contains(&PathBuf::from("ComfyUI/models/loras/style.safetensors")),
        "unpinned models go at nuclear with the override"
    );
    assert!(report.paths_skipped_pinned >= 1);
}

#[test]
fn expired_budget_reports_timeout_with_partial_tally() {
    let ws = seeded_workspace();
    // Plenty of files so a full run would have real work to do.
    let outputs = ws.config.output_dir();
    for i in 0..500 {
        fs::write(outputs.join(format!("frame_{i:04}.png")), [0u8; 64]).unwrap();
    }
    let total = ember::sizing::dir_size(ws.dir.path());

    let report = CleanupEngine::new(&ws.config)
        .with_deadline(Instant::now())
        .run(CleanupTier::Basic, false, false)
        .unwrap();

    assert_eq!(report.status, RunStatus::Timeout);
    assert!(
        report.bytes_freed < total,
        "a timed-out run must not claim a full sweep"
    );
    // Whatever survived is picked up by the next, unbudgeted run.
    let report = CleanupEngine::new(&ws.config)
        .run(CleanupTier::Basic, false, false)
        .unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert!(file_listing(&outputs).is_empty());
}

#[test]
fn run_locked_holds_and_releases_the_lock() {
    let ws = seeded_workspace();
    let report = engine::run_locked(&ws.config, CleanupTier::Basic, false, false).unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert!(
        !ws.config.lock_path.exists(),
        "lock must be released after the run"
    );
}

#[test]
fn run_locked_fails_fast_on_live_contention() {
    let mut ws = seeded_workspace();
    ws.config.lock_timeout = Duration::from_millis(200);

    // A lock owned by this (live) process blocks the run.
    let _guard = ember::guard::acquire(&ws.config.lock_path, Duration::from_secs(1)).unwrap();
    let result = engine::run_locked(&ws.config, CleanupTier::Basic, false, false);
    assert!(matches!(result, Err(ember::Error::LockTimeout { .. })));
}
