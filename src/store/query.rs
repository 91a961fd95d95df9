//! Typed readers over the reporting views
//!
//! Read-side helpers for the CLI and tests. These work against any
//! connection that carries the trace schema: a live store handle or a
//! durable file opened standalone.

use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;

use super::Namespace;

/// One row of `calls_by_caller_callee`.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeStat {
    /// Empty string for top-level calls (no caller).
    pub caller_name: String,
    pub callee_name: String,
    pub calls: i64,
    pub total_exec_micros: i64,
    pub avg_exec_micros: f64,
}

/// One row of `calls_by_callee`.
#[derive(Debug, Clone, Serialize)]
pub struct CalleeStat {
    pub callee_name: String,
    pub calls: i64,
    pub total_exec_micros: i64,
    pub avg_exec_micros: f64,
}

/// One row of `unused_procs`.
#[derive(Debug, Clone, Serialize)]
pub struct UnusedProc {
    pub proc_id: i64,
    pub proc_name: String,
    pub time_defined: i64,
}

/// Table counts for the status command.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StoreCounts {
    pub procs: i64,
    pub call_points: i64,
    pub settled_calls: i64,
}

/// Read `calls_by_caller_callee`, heaviest total execution time first.
pub fn calls_by_caller_callee(conn: &Connection, ns: Namespace) -> Result<Vec<EdgeStat>> {
    let sql = format!(
        "SELECT caller_name, callee_name, calls, total_exec_micros, avg_exec_micros
         FROM {}calls_by_caller_callee",
        ns.prefix()
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| anyhow::anyhow!("Failed to prepare caller/callee query: {}", e))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(EdgeStat {
                caller_name: row.get(0)?,
                callee_name: row.get(1)?,
                calls: row.get(2)?,
                total_exec_micros: row.get(3)?,
                avg_exec_micros: row.get(4)?,
            })
        })
        .map_err(|e| anyhow::anyhow!("Failed to read caller/callee view: {}", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("Failed to collect caller/callee rows: {}", e))?;
    Ok(rows)
}

/// Read `calls_by_callee`, heaviest total execution time first.
pub fn calls_by_callee(conn: &Connection, ns: Namespace) -> Result<Vec<CalleeStat>> {
    let sql = format!(
        "SELECT callee_name, calls, total_exec_micros, avg_exec_micros
         FROM {}calls_by_callee",
        ns.prefix()
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| anyhow::anyhow!("Failed to prepare callee query: {}", e))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CalleeStat {
                callee_name: row.get(0)?,
                calls: row.get(1)?,
                total_exec_micros: row.get(2)?,
                avg_exec_micros: row.get(3)?,
            })
        })
        .map_err(|e| anyhow::anyhow!("Failed to read callee view: {}", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("Failed to collect callee rows: {}", e))?;
    Ok(rows)
}

/// Read `unused_procs`: defined procedures with no settled incoming call.
pub fn unused_procs(conn: &Connection, ns: Namespace) -> Result<Vec<UnusedProc>> {
    let sql = format!(
        "SELECT proc_id, proc_name, time_defined FROM {}unused_procs",
        ns.prefix()
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| anyhow::anyhow!("Failed to prepare unused-procs query: {}", e))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(UnusedProc {
                proc_id: row.get(0)?,
                proc_name: row.get(1)?,
                time_defined: row.get(2)?,
            })
        })
        .map_err(|e| anyhow::anyhow!("Failed to read unused-procs view: {}", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("Failed to collect unused procs: {}", e))?;
    Ok(rows)
}

/// Count procs, call points and settled calls in one namespace.
pub fn store_counts(conn: &Connection, ns: Namespace) -> Result<StoreCounts> {
    let p = ns.prefix();
    let procs: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM {}proc_ids", p), [], |row| row.get(0))
        .map_err(|e| anyhow::anyhow!("Failed to count procs: {}", e))?;
    let call_points: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM {}call_pts", p), [], |row| row.get(0))
        .map_err(|e| anyhow::anyhow!("Failed to count call points: {}", e))?;
    let settled_calls: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM {}call_pts WHERE time_leave IS NOT NULL", p),
            [],
            |row| row.get(0),
        )
        .map_err(|e| anyhow::anyhow!("Failed to count settled calls: {}", e))?;
    Ok(StoreCounts {
        procs,
        call_points,
        settled_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TraceStore;
    use tempfile::TempDir;

    #[test]
    fn test_views_aggregate_settled_calls() {
        let dir = TempDir::new().unwrap();
        let store = TraceStore::open_staged(&dir.path().join("t-1.db")).unwrap();

        store.add_proc(1, "::a", 10).unwrap();
        store.add_proc(2, "::b", 11).unwrap();
        store.add_call(1, 2, 100, 1_000, Some(3_000)).unwrap();
        store.add_call(1, 2, 101, 2_000, Some(3_000)).unwrap();
        store.add_call(1, 2, 102, 5_000, None).unwrap();

        let edges = calls_by_caller_callee(store.connection(), Namespace::Main).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].caller_name, "::a");
        assert_eq!(edges[0].callee_name, "::b");
        assert_eq!(edges[0].calls, 2);
        assert_eq!(edges[0].total_exec_micros, 3_000);
        assert!((edges[0].avg_exec_micros - 1_500.0).abs() < f64::EPSILON);

        let callees = calls_by_callee(store.connection(), Namespace::Main).unwrap();
        assert_eq!(callees.len(), 1);
        assert_eq!(callees[0].calls, 2);
    }

    #[test]
    fn test_missing_caller_renders_as_empty_name() {
        let dir = TempDir::new().unwrap();
        let store = TraceStore::open_staged(&dir.path().join("t-1.db")).unwrap();

        store.add_proc(1, "::top", 10).unwrap();
        store.add_call(0, 1, 100, 50, Some(60)).unwrap();

        let edges = calls_by_caller_callee(store.connection(), Namespace::Main).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].caller_name, "");
        assert_eq!(edges[0].callee_name, "::top");
    }

    #[test]
    fn test_unused_procs_requires_settled_incoming_call() {
        let dir = TempDir::new().unwrap();
        let store = TraceStore::open_staged(&dir.path().join("t-1.db")).unwrap();

        store.add_proc(1, "::called", 10).unwrap();
        store.add_proc(2, "::pending", 10).unwrap();
        store.add_proc(3, "::never", 10).unwrap();
        store.add_call(0, 1, 100, 50, Some(60)).unwrap();
        store.add_call(0, 2, 101, 50, None).unwrap();

        let unused = unused_procs(store.connection(), Namespace::Main).unwrap();
        let names: Vec<_> = unused.iter().map(|u| u.proc_name.as_str()).collect();
        assert_eq!(names, vec!["::never", "::pending"]);
    }

    #[test]
    fn test_store_counts() {
        let dir = TempDir::new().unwrap();
        let store = TraceStore::open_staged(&dir.path().join("t-1.db")).unwrap();

        store.add_proc(1, "::a", 10).unwrap();
        store.add_call(0, 1, 100, 50, Some(60)).unwrap();
        store.add_call(0, 1, 101, 70, None).unwrap();

        let counts = store_counts(store.connection(), Namespace::Main).unwrap();
        assert_eq!(counts.procs, 1);
        assert_eq!(counts.call_points, 2);
        assert_eq!(counts.settled_calls, 1);
    }
}
