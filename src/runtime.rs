//! Trace intake
//!
//! The host runtime's enter/leave interception calls into this module.
//! The hooks themselves (how a host language exposes procedure entry
//! and exit) live outside this crate; what lives here is everything
//! they need: stable id derivation, the re-entry guard, submission to
//! the recorder, and the process-global runtime slot the fork
//! lifecycle operates on.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use crate::finalizer::FinalizeTimer;
use crate::hash::{proc_id, trace_id, NO_CALLER};
use crate::options::{ScheduleMode, TraceConfig};
use crate::recorder::{Recorder, WriteRequest};
use crate::store::{now_micros, TraceStore};

/// Namespace prefix of the framework itself.
///
/// Instrumentation must be inert for framework-internal procedures or
/// the recorder's own activity would trace itself forever.
pub const FRAMEWORK_PREFIX: &str = "turtles";

/// True when a fully-qualified name belongs to the framework.
pub fn is_framework_proc(proc_name: &str) -> bool {
    proc_name
        .trim_start_matches("::")
        .starts_with(FRAMEWORK_PREFIX)
}

/// Ties one call's enter and leave events together.
///
/// Returned by [`TraceRuntime::enter_call`], consumed by
/// [`TraceRuntime::leave_call`].
#[derive(Debug, Clone, Copy)]
pub struct CallToken {
    caller_id: i64,
    callee_id: i64,
    trace_id: i64,
}

/// A live tracing pipeline: store, recorder, and (in `mt` mode) the
/// finalize timer.
pub struct TraceRuntime {
    config: TraceConfig,
    pid: u32,
    recorder: Option<Recorder>,
    timer: Option<FinalizeTimer>,
}

impl TraceRuntime {
    /// Open the store for this process and start the recorder.
    ///
    /// Fatal on store-open or schema failure. A disabled config is a
    /// caller error; use [`init_from_argv`] for the enable check.
    pub fn start(config: TraceConfig) -> Result<Self> {
        let pid = std::process::id();
        let store = TraceStore::open(&config, pid)?;
        let interval = Duration::from_millis(config.interval_millis);
        let recorder = Recorder::start(store, config.schedule_mode, interval);
        let timer = match config.schedule_mode {
            ScheduleMode::Mt => Some(FinalizeTimer::start(recorder.submitter(), interval)),
            ScheduleMode::Ev => None,
        };

        if config.debug {
            tracing::debug!(pid, ?config.commit_mode, "turtles runtime started");
        }

        Ok(Self {
            config,
            pid,
            recorder: Some(recorder),
            timer,
        })
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// Path of this process's durable file.
    pub fn durable_file(&self) -> PathBuf {
        self.config.durable_file(self.pid)
    }

    /// Record a procedure definition; returns its stable id.
    ///
    /// Framework-internal names are not recorded and still get an id.
    pub fn define_proc(&self, proc_name: &str) -> i64 {
        let id = proc_id(proc_name);
        if is_framework_proc(proc_name) {
            return id;
        }
        if self.config.debug {
            tracing::debug!(proc_name, id, "define proc");
        }
        if let Some(recorder) = &self.recorder {
            recorder.submit(WriteRequest::AddProc {
                proc_id: id,
                proc_name: proc_name.to_string(),
                time_defined: now_micros(),
            });
        }
        id
    }

    /// Procedure entry hook.
    ///
    /// Returns `None` (and records nothing) when either side of the
    /// call is framework-internal. `caller_name` is `None` for
    /// top-level calls.
    pub fn enter_call(
        &self,
        caller_name: Option<&str>,
        callee_name: &str,
        thread_id: i64,
        stack_depth: i64,
        source_line: i64,
    ) -> Option<CallToken> {
        if is_framework_proc(callee_name) {
            return None;
        }
        if caller_name.is_some_and(is_framework_proc) {
            return None;
        }

        let caller_id = caller_name.map(proc_id).unwrap_or(NO_CALLER);
        let callee_id = proc_id(callee_name);
        let trace = trace_id(thread_id, stack_depth, caller_id, source_line, callee_id);

        if self.config.debug {
            tracing::debug!(caller_id, callee_id, trace, "enter call");
        }
        if let Some(recorder) = &self.recorder {
            recorder.submit(WriteRequest::AddCall {
                caller_id,
                callee_id,
                trace_id: trace,
                time_enter: now_micros(),
                time_leave: None,
            });
        }

        Some(CallToken {
            caller_id,
            callee_id,
            trace_id: trace,
        })
    }

    /// Procedure exit hook; settles the record opened by the matching
    /// [`enter_call`].
    pub fn leave_call(&self, token: CallToken) {
        if self.config.debug {
            tracing::debug!(token.caller_id, token.callee_id, token.trace_id, "leave call");
        }
        if let Some(recorder) = &self.recorder {
            recorder.submit(WriteRequest::UpdateCall {
                caller_id: token.caller_id,
                callee_id: token.callee_id,
                trace_id: token.trace_id,
                time_leave: now_micros(),
            });
        }
    }

    /// Block until every previously submitted write has been applied
    /// and a finalize has run.
    pub fn flush(&self) -> Result<()> {
        match &self.recorder {
            Some(recorder) => recorder.submit_and_wait(WriteRequest::Finalize),
            None => Ok(()),
        }
    }

    /// Stop the timer, run the final finalize plus unsettled flush,
    /// and detach the durable file.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_pipeline()
    }

    fn stop_pipeline(&mut self) -> Result<()> {
        if let Some(mut timer) = self.timer.take() {
            timer.stop();
        }
        match self.recorder.take() {
            Some(recorder) => recorder.shutdown(),
            None => Ok(()),
        }
    }
}

impl Drop for TraceRuntime {
    fn drop(&mut self) {
        if let Err(e) = self.stop_pipeline() {
            tracing::warn!("runtime shutdown failed: {}", e);
        }
    }
}

/// Process-global runtime slot.
///
/// The fork lifecycle needs a single well-known pipeline to stop and
/// restart around the fork; host trace hooks reach it through
/// [`with_global`].
static GLOBAL: Mutex<Option<TraceRuntime>> = Mutex::new(None);

/// Parse the `+TURTLES` blocks out of argv and, when tracing is
/// enabled, start the global runtime. Returns the residual argv.
///
/// Configuration errors are fatal here by contract; the caller prints
/// and exits non-zero.
pub fn init_from_argv(argv: &[String]) -> Result<Vec<String>> {
    let (residual, config) = crate::options::config_from_argv(argv)?;
    if config.enabled {
        install_global(TraceRuntime::start(config)?);
    }
    Ok(residual)
}

/// Put a runtime into the global slot, shutting down any previous one.
pub fn install_global(runtime: TraceRuntime) {
    let previous = {
        let mut slot = GLOBAL.lock().unwrap_or_else(|e| e.into_inner());
        slot.replace(runtime)
    };
    if let Some(previous) = previous {
        if let Err(e) = previous.shutdown() {
            tracing::warn!("previous runtime shutdown failed: {}", e);
        }
    }
}

/// Take the global runtime out of its slot, leaving tracing disabled.
pub fn take_global() -> Option<TraceRuntime> {
    let mut slot = GLOBAL.lock().unwrap_or_else(|e| e.into_inner());
    slot.take()
}

/// Run `f` against the global runtime, if tracing is enabled.
pub fn with_global<R>(f: impl FnOnce(&TraceRuntime) -> R) -> Option<R> {
    let slot = GLOBAL.lock().unwrap_or_else(|e| e.into_inner());
    slot.as_ref().map(f)
}

/// Shut the global runtime down; a disabled runtime is a no-op.
pub fn shutdown_global() -> Result<()> {
    match take_global() {
        Some(runtime) => runtime.shutdown(),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CommitMode;
    use crate::store::{query, Namespace};
    use rusqlite::Connection;
    use tempfile::TempDir;

    fn direct_config(dir: &TempDir) -> TraceConfig {
        TraceConfig {
            enabled: true,
            commit_mode: CommitMode::Direct,
            db_path: dir.path().to_path_buf(),
            ..TraceConfig::default()
        }
    }

    #[test]
    fn test_framework_names_are_guarded() {
        assert!(is_framework_proc("turtles::recorder::submit"));
        assert!(is_framework_proc("::turtles::fork"));
        assert!(!is_framework_proc("::app::main"));
        assert!(!is_framework_proc("myturtle::swim"));
    }

    #[test]
    fn test_direct_mode_single_call_counts_once() {
        let dir = TempDir::new().unwrap();
        let runtime = TraceRuntime::start(direct_config(&dir)).unwrap();
        let db = runtime.durable_file();

        runtime.define_proc("::one");
        let token = runtime.enter_call(None, "::one", 1, 0, 14).unwrap();
        runtime.leave_call(token);
        runtime.shutdown().unwrap();

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
    }

    #[test]
    fn test_nested_calls_count_per_edge() {
        let dir = TempDir::new().unwrap();
        let runtime = TraceRuntime::start(direct_config(&dir)).unwrap();
        let db = runtime.durable_file();

        runtime.define_proc("::a");
        runtime.define_proc("::b");

        // b once at top level.
        let t = runtime.enter_call(None, "::b", 1, 0, 3).unwrap();
        runtime.leave_call(t);
        // a once, calling b.
        let ta = runtime.enter_call(None, "::a", 1, 0, 9).unwrap();
        let tb = runtime.enter_call(Some("::a"), "::b", 1, 1, 5).unwrap();
        runtime.leave_call(tb);
        runtime.leave_call(ta);
        runtime.shutdown().unwrap();

        let conn = Connection::open(&db).unwrap();
        let edges = query::calls_by_caller_callee(&conn, Namespace::Main).unwrap();
        let count = |caller: &str, callee: &str| {
            edges
                .iter()
                .find(|e| e.caller_name == caller && e.callee_name == callee)
                .map(|e| e.calls)
                .unwrap_or(0)
        };
        assert_eq!(count("", "::b"), 1);
        assert_eq!(count("", "::a"), 1);
        assert_eq!(count("::a", "::b"), 1);
    }

    #[test]
    fn test_framework_calls_record_nothing() {
        let dir = TempDir::new().unwrap();
        let runtime = TraceRuntime::start(direct_config(&dir)).unwrap();
        let db = runtime.durable_file();

        assert!(runtime
            .enter_call(None, "turtles::recorder::submit", 1, 0, 1)
            .is_none());
        assert!(runtime
            .enter_call(Some("turtles::runtime::flush"), "::app", 1, 1, 2)
            .is_none());
        runtime.shutdown().unwrap();

        let conn = Connection::open(&db).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM call_pts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_recursive_calls_get_distinct_trace_ids() {
        let dir = TempDir::new().unwrap();
        let runtime = TraceRuntime::start(direct_config(&dir)).unwrap();
        let db = runtime.durable_file();

        runtime.define_proc("::fib");
        let outer = runtime.enter_call(Some("::fib"), "::fib", 1, 1, 2).unwrap();
        let inner = runtime.enter_call(Some("::fib"), "::fib", 1, 2, 2).unwrap();
        runtime.leave_call(inner);
        runtime.leave_call(outer);
        runtime.shutdown().unwrap();

        let conn = Connection::open(&db).unwrap();
        let settled: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM call_pts WHERE time_leave IS NOT NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(settled, 2);
    }
}
