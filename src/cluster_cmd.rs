//! Cluster command implementation
//!
//! Reads a durable trace database and prints one bale per line:
//! `<group> { <proc> <proc> ... }`.

use anyhow::Result;
use std::path::PathBuf;

use turtles::engine::{cluster_file, ClusterOptions};
use turtles::output::{output_json, BalesResponse, JsonResponse, OutputFormat};

/// Run the cluster command
///
/// # Arguments
/// * `db_path` - Durable trace database
/// * `cutoff` - Minimum settled-call count for an edge to survive
/// * `undirected` - Sum antiparallel call counts into one weight
/// * `machines` - Worker roster size
/// * `verbosity` - 0 bales, 1 + summary, 2 + per-node report lines
/// * `output_format` - Human or Json
pub fn run_cluster(
    db_path: PathBuf,
    cutoff: i64,
    undirected: bool,
    machines: usize,
    verbosity: u8,
    output_format: OutputFormat,
) -> Result<()> {
    let options = ClusterOptions {
        cutoff,
        undirected,
        machines,
    };
    let outcome = cluster_file(&db_path, &options)?;

    if output_format == OutputFormat::Json {
        let response = JsonResponse::new(
            "cluster",
            BalesResponse {
                db_path: db_path.to_string_lossy().to_string(),
                cutoff,
                undirected,
                machines,
                bales: outcome.bales,
                nodes: if verbosity >= 2 {
                    outcome.reports
                } else {
                    Vec::new()
                },
            },
        );
        return output_json(&response);
    }

    for bale in &outcome.bales {
        println!("{}", bale.render());
    }
    if verbosity >= 1 {
        println!();
        println!(
            "{} procs in {} bales (cutoff {}, {} machines)",
            outcome.reports.len(),
            outcome.bales.len(),
            cutoff,
            machines
        );
    }
    if verbosity >= 2 {
        println!();
        for report in &outcome.reports {
            println!("{}", report.render());
        }
    }
    Ok(())
}
