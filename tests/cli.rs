//! CLI surface: tier argument, env-driven configuration, exit codes.

mod common;

use assert_cmd::Command;
use predicates::prelude::*;

use common::seeded_workspace;

fn ember() -> Command {
    let mut cmd = Command::cargo_bin("ember").unwrap();
    cmd.env_remove("EMBER_WORKSPACE")
        .env_remove("EMBER_DRY_RUN")
        .env_remove("EMBER_EXIT_TIER");
    cmd
}

#[test]
fn clean_basic_succeeds_and_prints_a_summary() {
    let ws = seeded_workspace();
    ember()
        .args(["clean", "basic"])
        .env("EMBER_WORKSPACE", ws.dir.path())
        .assert()
        .code(0)
        .stdout(predicate::str::contains("cleanup tier=basic status=completed"));

    assert!(!ws.config.output_dir().join("render.png").exists());
}

#[test]
fn unknown_tier_is_rejected() {
    ember()
        .args(["clean", "paranoid"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown tier"));
}

#[test]
fn dry_run_env_flag_reports_without_deleting() {
    let ws = seeded_workspace();
    ember()
        .args(["clean", "nuclear"])
        .env("EMBER_WORKSPACE", ws.dir.path())
        .env("EMBER_DRY_RUN", "1")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("(dry run)"));

    assert!(ws.config.output_dir().join("render.png").exists());
    assert!(ws.config.pip_cache_dir().join("wheel.whl").exists());
}

#[test]
fn held_lock_yields_the_lock_exit_code() {
    let ws = seeded_workspace();
    // This test process is the live holder.
    let _guard =
        ember::guard::acquire(&ws.config.lock_path, std::time::Duration::from_secs(1)).unwrap();

    ember()
        .args(["clean", "basic"])
        .env("EMBER_WORKSPACE", ws.dir.path())
        .env("EMBER_LOCK_TIMEOUT_SECS", "0")
        .assert()
        .code(4);
}

#[test]
fn size_reports_model_storage() {
    let ws = seeded_workspace();
    ember()
        .arg("size")
        .env("EMBER_WORKSPACE", ws.dir.path())
        .assert()
        .code(0)
        .stdout(predicate::str::contains("model storage:"));
}
