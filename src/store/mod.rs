//! Trace persistence layer
//!
//! One embedded SQLite handle per process, owned exclusively by the
//! recorder. Two commit modes share the same schema:
//!
//! - **staged**: `main` is an in-memory database absorbing writes at
//!   memory speed; the durable file is attached as `stage1` and a
//!   periodic finalize moves settled rows across in one transaction.
//! - **direct**: `main` is the durable file itself and finalize is a
//!   no-op.
//!
//! All statements use parameter binding; no SQL is ever assembled from
//! caller-provided strings.

mod schema;
pub mod query;

pub use schema::Namespace;

use anyhow::Result;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::options::{CommitMode, TraceConfig};

/// Current wall time in microseconds since the Unix epoch.
///
/// All persisted timestamps (`time_defined`, `time_enter`,
/// `time_leave`) use this clock.
pub fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// Handle over the per-process trace database.
pub struct TraceStore {
    conn: Connection,
    mode: CommitMode,
    durable_path: PathBuf,
}

impl TraceStore {
    /// Open the store for a process, deriving the durable filename
    /// `<db_path>/<db_prefix>-<pid>.db` from the configuration.
    ///
    /// Fatal on open or schema failure; there is no degraded mode.
    pub fn open(config: &TraceConfig, pid: u32) -> Result<Self> {
        let durable = config.durable_file(pid);
        match config.commit_mode {
            CommitMode::Staged => Self::open_staged(&durable),
            CommitMode::Direct => Self::open_direct(&durable),
        }
    }

    /// Staged mode: in-memory `main`, durable file attached as `stage1`.
    pub fn open_staged(durable: &Path) -> Result<Self> {
        if let Some(dir) = durable.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .map_err(|e| anyhow::anyhow!("Failed to create db directory {}: {}", dir.display(), e))?;
            }
        }

        let conn = Connection::open_in_memory()
            .map_err(|e| anyhow::anyhow!("Failed to open ephemeral store: {}", e))?;
        let path_str = durable.to_string_lossy().to_string();
        conn.execute("ATTACH DATABASE ?1 AS stage1", params![path_str])
            .map_err(|e| anyhow::anyhow!("Failed to attach durable store {}: {}", path_str, e))?;

        schema::ensure_schema(&conn, Namespace::Main, false)?;
        schema::ensure_schema(&conn, Namespace::Stage1, true)?;

        Ok(Self {
            conn,
            mode: CommitMode::Staged,
            durable_path: durable.to_path_buf(),
        })
    }

    /// Direct mode: the durable file is `main`; no second namespace.
    pub fn open_direct(durable: &Path) -> Result<Self> {
        if let Some(dir) = durable.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .map_err(|e| anyhow::anyhow!("Failed to create db directory {}: {}", dir.display(), e))?;
            }
        }

        let conn = Connection::open(durable)
            .map_err(|e| anyhow::anyhow!("Failed to open durable store {}: {}", durable.display(), e))?;
        schema::ensure_schema(&conn, Namespace::Main, true)?;

        Ok(Self {
            conn,
            mode: CommitMode::Direct,
            durable_path: durable.to_path_buf(),
        })
    }

    pub fn commit_mode(&self) -> CommitMode {
        self.mode
    }

    /// Path of the file-backed side.
    pub fn durable_path(&self) -> &Path {
        &self.durable_path
    }

    /// Namespace holding settled history: `stage1` when staged, `main`
    /// when direct.
    pub fn durable_namespace(&self) -> Namespace {
        match self.mode {
            CommitMode::Staged => Namespace::Stage1,
            CommitMode::Direct => Namespace::Main,
        }
    }

    /// Borrow the underlying connection for read-side queries.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Record a procedure definition. Conflicts on either unique key
    /// are silently ignored, so the first definition wins.
    pub fn add_proc(&self, proc_id: i64, proc_name: &str, time_defined: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO proc_ids (proc_id, proc_name, time_defined)
                 VALUES (?1, ?2, ?3)",
                params![proc_id, proc_name, time_defined],
            )
            .map_err(|e| anyhow::anyhow!("Failed to add proc {}: {}", proc_name, e))?;
        Ok(())
    }

    /// Record a call entry, optionally already settled.
    pub fn add_call(
        &self,
        caller_id: i64,
        callee_id: i64,
        trace_id: i64,
        time_enter: i64,
        time_leave: Option<i64>,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO call_pts (caller_id, callee_id, trace_id, time_enter, time_leave)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![caller_id, callee_id, trace_id, time_enter, time_leave],
            )
            .map_err(|e| anyhow::anyhow!("Failed to add call {}->{}: {}", caller_id, callee_id, e))?;
        Ok(())
    }

    /// Settle the matching unsettled call row.
    ///
    /// A missing or already-settled row is a no-op: leave events can
    /// outlive a finalize that already moved their row, and retried
    /// events can arrive twice.
    pub fn update_call(&self, caller_id: i64, callee_id: i64, trace_id: i64, time_leave: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE call_pts SET time_leave = ?4
                 WHERE caller_id = ?1 AND callee_id = ?2 AND trace_id = ?3
                   AND time_leave IS NULL",
                params![caller_id, callee_id, trace_id, time_leave],
            )
            .map_err(|e| anyhow::anyhow!("Failed to settle call {}->{}: {}", caller_id, callee_id, e))?;
        Ok(())
    }

    /// One finalize tick: transfer newly-settled history from `main`
    /// to `stage1` and drop the transferred call rows from `main`.
    ///
    /// Novelty is measured against the durable side's own timestamps
    /// rather than a separately tracked cursor, so a restarted
    /// finalizer resumes correctly. The whole tick is one transaction.
    /// Inert in direct mode.
    pub fn finalize(&mut self) -> Result<()> {
        if self.mode == CommitMode::Direct {
            return Ok(());
        }

        let tx = self
            .conn
            .transaction()
            .map_err(|e| anyhow::anyhow!("Failed to begin finalize transaction: {}", e))?;

        let last_finalize: i64 = tx
            .query_row(
                "SELECT MAX(
                    COALESCE((SELECT MAX(time_defined) FROM stage1.proc_ids), 0),
                    COALESCE((SELECT MAX(time_leave) FROM stage1.call_pts), 0))",
                [],
                |row| row.get(0),
            )
            .map_err(|e| anyhow::anyhow!("Failed to read finalize watermark: {}", e))?;
        let t_cut = now_micros();

        tx.execute(
            "INSERT OR IGNORE INTO stage1.proc_ids (proc_id, proc_name, time_defined)
             SELECT proc_id, proc_name, time_defined FROM main.proc_ids
             WHERE time_defined > ?1",
            params![last_finalize],
        )
        .map_err(|e| anyhow::anyhow!("Failed to transfer proc rows: {}", e))?;

        tx.execute(
            "INSERT OR IGNORE INTO stage1.call_pts (caller_id, callee_id, trace_id, time_enter, time_leave)
             SELECT caller_id, callee_id, trace_id, time_enter, time_leave FROM main.call_pts
             WHERE time_leave IS NOT NULL AND time_leave < ?1",
            params![t_cut],
        )
        .map_err(|e| anyhow::anyhow!("Failed to transfer call rows: {}", e))?;

        tx.execute(
            "DELETE FROM main.call_pts WHERE time_leave IS NOT NULL AND time_leave < ?1",
            params![t_cut],
        )
        .map_err(|e| anyhow::anyhow!("Failed to drop transferred call rows: {}", e))?;

        tx.commit()
            .map_err(|e| anyhow::anyhow!("Failed to commit finalize: {}", e))
    }

    /// Orderly shutdown: a final finalize, then a flush of every
    /// remaining `main.call_pts` row regardless of settlement, then
    /// DETACH. Unsettled rows survive orderly shutdown; only a crash
    /// kill loses them.
    pub fn close(mut self) -> Result<()> {
        if self.mode == CommitMode::Direct {
            return Ok(());
        }

        self.finalize()?;

        let tx = self
            .conn
            .transaction()
            .map_err(|e| anyhow::anyhow!("Failed to begin flush transaction: {}", e))?;
        // Proc rows first: a flushed call must never reference a proc
        // the durable side has not seen. The watermark transfer can
        // skip a proc whose insert was applied after a tick that
        // already advanced past its definition time; this sweep closes
        // that window.
        tx.execute(
            "INSERT OR IGNORE INTO stage1.proc_ids (proc_id, proc_name, time_defined)
             SELECT proc_id, proc_name, time_defined FROM main.proc_ids",
            [],
        )
        .map_err(|e| anyhow::anyhow!("Failed to flush proc rows: {}", e))?;
        tx.execute(
            "INSERT OR IGNORE INTO stage1.call_pts (caller_id, callee_id, trace_id, time_enter, time_leave)
             SELECT caller_id, callee_id, trace_id, time_enter, time_leave FROM main.call_pts",
            [],
        )
        .map_err(|e| anyhow::anyhow!("Failed to flush unsettled call rows: {}", e))?;
        tx.execute("DELETE FROM main.call_pts", [])
            .map_err(|e| anyhow::anyhow!("Failed to clear flushed call rows: {}", e))?;
        tx.commit()
            .map_err(|e| anyhow::anyhow!("Failed to commit flush: {}", e))?;

        self.conn
            .execute("DETACH DATABASE stage1", [])
            .map_err(|e| anyhow::anyhow!("Failed to detach durable store: {}", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn staged_store(dir: &TempDir) -> TraceStore {
        TraceStore::open_staged(&dir.path().join("turtles-1.db")).unwrap()
    }

    #[test]
    fn test_add_proc_is_idempotent_first_write_wins() {
        let dir = TempDir::new().unwrap();
        let store = staged_store(&dir);

        store.add_proc(7, "::seven", 100).unwrap();
        store.add_proc(7, "::seven", 999).unwrap();

        let (count, t): (i64, i64) = store
            .connection()
            .query_row(
                "SELECT COUNT(*), MAX(time_defined) FROM main.proc_ids WHERE proc_id = 7",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(t, 100);
    }

    #[test]
    fn test_update_call_missing_row_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = staged_store(&dir);
        store.update_call(1, 2, 3, 500).unwrap();
    }

    #[test]
    fn test_update_call_settled_row_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = staged_store(&dir);

        store.add_call(0, 1, 9, 100, None).unwrap();
        store.update_call(0, 1, 9, 200).unwrap();
        store.update_call(0, 1, 9, 999).unwrap();

        let t: i64 = store
            .connection()
            .query_row(
                "SELECT time_leave FROM main.call_pts WHERE trace_id = 9",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(t, 200);
    }

    #[test]
    fn test_finalize_moves_settled_rows_only() {
        let dir = TempDir::new().unwrap();
        let mut store = staged_store(&dir);

        store.add_proc(1, "::one", now_micros()).unwrap();
        store.add_call(0, 1, 11, 100, Some(200)).unwrap();
        store.add_call(0, 1, 12, 300, None).unwrap();
        store.finalize().unwrap();

        let staged: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM stage1.call_pts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(staged, 1);

        let remaining: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM main.call_pts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[test]
    fn test_finalize_twice_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut store = staged_store(&dir);

        store.add_proc(1, "::one", now_micros()).unwrap();
        store.add_call(0, 1, 11, 100, Some(200)).unwrap();
        store.finalize().unwrap();
        store.finalize().unwrap();

        let staged: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM stage1.call_pts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(staged, 1);
    }

    #[test]
    fn test_close_flushes_unsettled_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("turtles-1.db");
        let store = TraceStore::open_staged(&path).unwrap();

        store.add_proc(1, "::one", now_micros()).unwrap();
        store.add_call(0, 1, 11, 100, None).unwrap();
        store.close().unwrap();

        let conn = Connection::open(&path).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM call_pts WHERE time_leave IS NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_direct_mode_writes_straight_to_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("turtles-2.db");
        let mut store = TraceStore::open_direct(&path).unwrap();

        store.add_proc(1, "::one", 10).unwrap();
        store.add_call(0, 1, 5, 100, None).unwrap();
        store.update_call(0, 1, 5, 200).unwrap();
        store.finalize().unwrap();
        drop(store);

        let conn = Connection::open(&path).unwrap();
        let calls: i64 = conn
            .query_row(
                "SELECT calls FROM calls_by_caller_callee
                 WHERE caller_name = '' AND callee_name = '::one'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(calls, 1);
    }
}
