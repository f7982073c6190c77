//! CLI tests for the `optiloop` binary.
//!
//! Spawns the binary against a temp project root and checks exit codes and
//! the files it leaves behind. Nothing here reaches the model or Docker.

use std::fs;
use std::process::{Command, Output};

use optiloop::exit_codes;
use optiloop::io::config::{OptiloopConfig, load_config};
use optiloop::io::init::OptiloopPaths;

fn optiloop(root: &std::path::Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_optiloop"))
        .arg("-C")
        .arg(root)
        .args(args)
        .output()
        .expect("spawn optiloop")
}

#[test]
fn init_writes_default_config_once() {
    let temp = tempfile::tempdir().expect("tempdir");

    let first = optiloop(temp.path(), &["init"]);
    assert_eq!(first.status.code(), Some(exit_codes::OK));
    let paths = OptiloopPaths::new(temp.path());
    assert_eq!(
        load_config(&paths.config_path).expect("load"),
        OptiloopConfig::default()
    );

    let second = optiloop(temp.path(), &["init"]);
    assert_eq!(second.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&second.stderr).contains("--force"));

    let forced = optiloop(temp.path(), &["init", "--force"]);
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
}

#[test]
fn config_prints_effective_toml() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = OptiloopPaths::new(temp.path());
    fs::create_dir_all(&paths.state_dir).expect("state dir");
    fs::write(&paths.config_path, "[controller]\nmax_fix_attempts = 2\n").expect("config");

    let output = optiloop(temp.path(), &["config"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let printed: OptiloopConfig =
        toml::from_str(&String::from_utf8_lossy(&output.stdout)).expect("printed toml");
    assert_eq!(printed.controller.max_fix_attempts, 2);
    assert_eq!(printed.model, OptiloopConfig::default().model);
}

#[test]
fn invalid_config_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = OptiloopPaths::new(temp.path());
    fs::create_dir_all(&paths.state_dir).expect("state dir");
    fs::write(&paths.config_path, "[model]\nprogram = \"\"\n").expect("config");

    let output = optiloop(temp.path(), &["config"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("model.program"));
}

#[test]
fn run_rejects_blank_request_before_creating_a_session() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = optiloop(temp.path(), &["run", "--prompt", "   "]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("empty"));
    assert!(!OptiloopPaths::new(temp.path()).sessions_dir.exists());
}

#[test]
fn run_rejects_missing_attachment() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = optiloop(
        temp.path(),
        &["run", "--prompt", "minimize waste", "--attach", "nope.csv"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("attachment not found"));
}
