//! Calls and unused report commands
//!
//! Thin readers over the store's reporting views.

use anyhow::Result;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

use turtles::output::{output_json, CallsResponse, JsonResponse, OutputFormat, UnusedResponse};
use turtles::store::query;
use turtles::store::Namespace;

fn open_trace_db(db_path: &Path) -> Result<Connection> {
    Connection::open(db_path)
        .map_err(|e| anyhow::anyhow!("Failed to open trace store {}: {}", db_path.display(), e))
}

/// Run the calls command
///
/// # Arguments
/// * `db_path` - Durable trace database
/// * `by_callee` - Aggregate over callers instead of per edge
/// * `limit` - Keep at most this many rows
/// * `output_format` - Human or Json
pub fn run_calls(
    db_path: PathBuf,
    by_callee: bool,
    limit: Option<usize>,
    output_format: OutputFormat,
) -> Result<()> {
    let conn = open_trace_db(&db_path)?;

    if by_callee {
        let mut rows = query::calls_by_callee(&conn, Namespace::Main)?;
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        if output_format == OutputFormat::Json {
            let response = JsonResponse::new(
                "calls",
                CallsResponse {
                    db_path: db_path.to_string_lossy().to_string(),
                    by_edge: Vec::new(),
                    by_callee: rows,
                },
            );
            return output_json(&response);
        }
        println!("{:<40} {:>8} {:>14} {:>12}", "callee", "calls", "total µs", "avg µs");
        for row in &rows {
            println!(
                "{:<40} {:>8} {:>14} {:>12.1}",
                row.callee_name, row.calls, row.total_exec_micros, row.avg_exec_micros
            );
        }
        return Ok(());
    }

    let mut rows = query::calls_by_caller_callee(&conn, Namespace::Main)?;
    if let Some(limit) = limit {
        rows.truncate(limit);
    }
    if output_format == OutputFormat::Json {
        let response = JsonResponse::new(
            "calls",
            CallsResponse {
                db_path: db_path.to_string_lossy().to_string(),
                by_edge: rows,
                by_callee: Vec::new(),
            },
        );
        return output_json(&response);
    }
    println!(
        "{:<30} {:<30} {:>8} {:>14} {:>12}",
        "caller", "callee", "calls", "total µs", "avg µs"
    );
    for row in &rows {
        let caller = if row.caller_name.is_empty() {
            "(top level)"
        } else {
            row.caller_name.as_str()
        };
        println!(
            "{:<30} {:<30} {:>8} {:>14} {:>12.1}",
            caller, row.callee_name, row.calls, row.total_exec_micros, row.avg_exec_micros
        );
    }
    Ok(())
}

/// Run the unused command: procedures with no settled incoming call.
pub fn run_unused(db_path: PathBuf, output_format: OutputFormat) -> Result<()> {
    let conn = open_trace_db(&db_path)?;
    let procs = query::unused_procs(&conn, Namespace::Main)?;

    if output_format == OutputFormat::Json {
        let response = JsonResponse::new(
            "unused",
            UnusedResponse {
                db_path: db_path.to_string_lossy().to_string(),
                procs,
            },
        );
        return output_json(&response);
    }

    if procs.is_empty() {
        println!("Every defined procedure has at least one settled call.");
        return Ok(());
    }
    for proc in &procs {
        println!("{}  {}", proc.proc_id, proc.proc_name);
    }
    Ok(())
}
