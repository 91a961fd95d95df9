//! Status command implementation
//!
//! Shows row counts for a durable trace database.

use anyhow::Result;
use rusqlite::Connection;
use std::path::PathBuf;

use turtles::output::{output_json, JsonResponse, OutputFormat, StatusResponse};
use turtles::store::query;
use turtles::store::Namespace;
use turtles::version;

/// Run the status command
pub fn run_status(db_path: PathBuf, output_format: OutputFormat) -> Result<()> {
    let conn = Connection::open(&db_path)
        .map_err(|e| anyhow::anyhow!("Failed to open trace store {}: {}", db_path.display(), e))?;
    let counts = query::store_counts(&conn, Namespace::Main)?;

    if output_format == OutputFormat::Json {
        let response = JsonResponse::new(
            "status",
            StatusResponse {
                db_path: db_path.to_string_lossy().to_string(),
                version: version::version(),
                counts,
            },
        );
        return output_json(&response);
    }

    println!("{}", version::version());
    println!("Database: {}", db_path.display());
    println!("  procs:          {}", counts.procs);
    println!("  call points:    {}", counts.call_points);
    println!("  settled calls:  {}", counts.settled_calls);
    Ok(())
}
