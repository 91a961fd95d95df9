//! Relational schema for the trace store
//!
//! Two tables and three reporting views, created identically in every
//! namespace a store handle uses: `main` always, `stage1` when the
//! staged pipeline attaches the durable file. View bodies reference
//! tables unqualified so the same definition text works in an attached
//! namespace and when the durable file is later opened standalone by
//! the clustering CLI.

use anyhow::Result;
use rusqlite::Connection;

/// Logical namespace inside one store handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Ephemeral side in staged mode; the only side in direct mode.
    Main,
    /// Durable, file-backed side of the staged pipeline.
    Stage1,
}

impl Namespace {
    /// Qualifier prefix for SQL identifiers, empty for `main`.
    pub fn prefix(self) -> &'static str {
        match self {
            Namespace::Main => "",
            Namespace::Stage1 => "stage1.",
        }
    }
}

/// Table DDL, formatted with the namespace prefix.
const TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS {ns}proc_ids (
        proc_id INTEGER NOT NULL UNIQUE,
        proc_name TEXT NOT NULL UNIQUE,
        time_defined INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS {ns}call_pts (
        caller_id INTEGER NOT NULL,
        callee_id INTEGER NOT NULL,
        trace_id INTEGER NOT NULL,
        time_enter INTEGER NOT NULL,
        time_leave INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS {ns}call_pts_edge
        ON call_pts(caller_id, callee_id)",
];

/// Identity constraint for the durable side: one row per
/// (caller, callee, trace, enter) no matter how many per-pid files are
/// merged into it.
const DURABLE_IDENTITY_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS {ns}call_pts_identity
    ON call_pts(caller_id, callee_id, trace_id, time_enter)";

/// View DDL, formatted with the namespace prefix.
///
/// All three views aggregate settled rows only: the exec-time columns
/// need `time_leave`, and `unused_procs` is defined over settled
/// incoming calls.
const VIEWS: &[&str] = &[
    "CREATE VIEW IF NOT EXISTS {ns}calls_by_caller_callee AS
        SELECT COALESCE(caller.proc_name, '') AS caller_name,
               callee.proc_name AS callee_name,
               COUNT(*) AS calls,
               SUM(c.time_leave - c.time_enter) AS total_exec_micros,
               AVG(c.time_leave - c.time_enter) AS avg_exec_micros
        FROM call_pts c
        JOIN proc_ids callee ON callee.proc_id = c.callee_id
        LEFT JOIN proc_ids caller ON caller.proc_id = c.caller_id
        WHERE c.time_leave IS NOT NULL
        GROUP BY c.caller_id, c.callee_id
        ORDER BY total_exec_micros DESC",
    "CREATE VIEW IF NOT EXISTS {ns}calls_by_callee AS
        SELECT callee.proc_name AS callee_name,
               COUNT(*) AS calls,
               SUM(c.time_leave - c.time_enter) AS total_exec_micros,
               AVG(c.time_leave - c.time_enter) AS avg_exec_micros
        FROM call_pts c
        JOIN proc_ids callee ON callee.proc_id = c.callee_id
        WHERE c.time_leave IS NOT NULL
        GROUP BY c.callee_id
        ORDER BY total_exec_micros DESC",
    "CREATE VIEW IF NOT EXISTS {ns}unused_procs AS
        SELECT p.proc_id, p.proc_name, p.time_defined
        FROM proc_ids p
        WHERE NOT EXISTS (
            SELECT 1 FROM call_pts c
            WHERE c.callee_id = p.proc_id AND c.time_leave IS NOT NULL
        )
        ORDER BY p.proc_name",
];

/// Ensure tables, indexes and views exist in one namespace.
///
/// `durable` additionally installs the identity constraint; it is set
/// for `stage1` in staged mode and for `main` in direct mode.
pub fn ensure_schema(conn: &Connection, ns: Namespace, durable: bool) -> Result<()> {
    for ddl in TABLES {
        conn.execute(&ddl.replace("{ns}", ns.prefix()), [])
            .map_err(|e| anyhow::anyhow!("Failed to create trace tables: {}", e))?;
    }
    if durable {
        conn.execute(&DURABLE_IDENTITY_INDEX.replace("{ns}", ns.prefix()), [])
            .map_err(|e| anyhow::anyhow!("Failed to create identity index: {}", e))?;
    }
    for ddl in VIEWS {
        conn.execute(&ddl.replace("{ns}", ns.prefix()), [])
            .map_err(|e| anyhow::anyhow!("Failed to create reporting views: {}", e))?;
    }
    Ok(())
}
