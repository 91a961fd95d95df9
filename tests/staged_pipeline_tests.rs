//! Staged persistence pipeline, end to end
//!
//! Drives the real runtime (recorder thread + finalize timer) against
//! a temp directory and verifies settled rows reach the durable file
//! without waiting for shutdown.

use rusqlite::Connection;
use std::time::Duration;
use tempfile::TempDir;
use turtles::{CommitMode, TraceConfig, TraceRuntime};

fn staged_config(dir: &TempDir, interval_millis: u64) -> TraceConfig {
    TraceConfig {
        enabled: true,
        commit_mode: CommitMode::Staged,
        interval_millis,
        db_path: dir.path().to_path_buf(),
        ..TraceConfig::default()
    }
}

#[test]
fn test_finalizer_moves_settled_call_into_durable_file() {
    let dir = TempDir::new().unwrap();
    let runtime = TraceRuntime::start(staged_config(&dir, 50)).unwrap();
    let db = runtime.durable_file();

    runtime.define_proc("::one");
    let token = runtime.enter_call(None, "::one", 1, 0, 7).unwrap();
    runtime.leave_call(token);

    // Give the 50ms timer a few periods; the row must arrive durably
    // before any shutdown flush.
    std::thread::sleep(Duration::from_millis(500));

    let conn = Connection::open(&db).unwrap();
    let calls: i64 = conn
        .query_row(
            "SELECT calls FROM calls_by_caller_callee
             WHERE caller_name = '' AND callee_name = '::one'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(calls, 1);

    runtime.shutdown().unwrap();
}

#[test]
fn test_unsettled_call_survives_orderly_shutdown() {
    let dir = TempDir::new().unwrap();
    let runtime = TraceRuntime::start(staged_config(&dir, 30_000)).unwrap();
    let db = runtime.durable_file();

    runtime.define_proc("::hang");
    // Enter without leave: the call never settles.
    runtime.enter_call(None, "::hang", 1, 0, 3).unwrap();
    runtime.shutdown().unwrap();

    let conn = Connection::open(&db).unwrap();
    let unsettled: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM call_pts WHERE time_leave IS NULL",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(unsettled, 1);
}

#[test]
fn test_settled_view_rows_match_across_modes() {
    // The same trace driven through staged and direct modes must
    // produce identical view contents in the durable file.
    let drive = |config: TraceConfig| -> Vec<(String, String, i64)> {
        let runtime = TraceRuntime::start(config).unwrap();
        let db = runtime.durable_file();
        runtime.define_proc("::a");
        runtime.define_proc("::b");
        let ta = runtime.enter_call(None, "::a", 1, 0, 1).unwrap();
        let tb = runtime.enter_call(Some("::a"), "::b", 1, 1, 2).unwrap();
        runtime.leave_call(tb);
        runtime.leave_call(ta);
        runtime.shutdown().unwrap();

        let conn = Connection::open(&db).unwrap();
        let mut stmt = conn
            .prepare("SELECT caller_name, callee_name, calls FROM calls_by_caller_callee ORDER BY caller_name, callee_name")
            .unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    };

    let staged_dir = TempDir::new().unwrap();
    let direct_dir = TempDir::new().unwrap();
    let staged = drive(staged_config(&staged_dir, 30_000));
    let direct = drive(TraceConfig {
        enabled: true,
        commit_mode: CommitMode::Direct,
        db_path: direct_dir.path().to_path_buf(),
        ..TraceConfig::default()
    });

    assert_eq!(staged, direct);
    assert_eq!(staged.len(), 2);
}
