//! Argv gating of the global runtime
//!
//! These tests install and tear down the process-global runtime, so
//! they serialize on a local mutex.

use std::sync::Mutex;
use tempfile::TempDir;
use turtles::runtime;

static GLOBAL_GATE: Mutex<()> = Mutex::new(());

fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_without_enable_no_runtime_and_no_file() {
    let _gate = GLOBAL_GATE.lock().unwrap();
    let dir = TempDir::new().unwrap();
    let dir_arg = dir.path().to_string_lossy().to_string();

    let residual = runtime::init_from_argv(&argv(&[
        "host", "-i", "x", "+TURTLES", "-dbPath", &dir_arg, "-TURTLES", "-o", "y",
    ]))
    .unwrap();

    assert_eq!(residual, argv(&["host", "-i", "x", "-o", "y"]));
    assert!(runtime::with_global(|_| ()).is_none());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_enabled_creates_pid_named_file() {
    let _gate = GLOBAL_GATE.lock().unwrap();
    let dir = TempDir::new().unwrap();
    let dir_arg = dir.path().to_string_lossy().to_string();

    runtime::init_from_argv(&argv(&[
        "host",
        "+TURTLES",
        "-enabled",
        "-commitMode",
        "direct",
        "-dbPath",
        &dir_arg,
        "-dbPrefix",
        "gate",
        "-TURTLES",
    ]))
    .unwrap();

    let expected = dir
        .path()
        .join(format!("gate-{}.db", std::process::id()));
    assert!(runtime::with_global(|rt| rt.durable_file()).is_some());
    runtime::shutdown_global().unwrap();
    assert!(expected.exists(), "missing {}", expected.display());
}

#[test]
fn test_bad_commit_mode_is_fatal_at_init() {
    let _gate = GLOBAL_GATE.lock().unwrap();
    let result = runtime::init_from_argv(&argv(&[
        "host", "+TURTLES", "-enabled", "-commitMode", "sideways", "-TURTLES",
    ]));
    assert!(result.is_err());
    assert!(runtime::with_global(|_| ()).is_none());
}

#[test]
fn test_unknown_option_is_fatal_at_init() {
    let _gate = GLOBAL_GATE.lock().unwrap();
    let result = runtime::init_from_argv(&argv(&["host", "+TURTLES", "-turbo", "-TURTLES"]));
    assert!(result.is_err());
}
