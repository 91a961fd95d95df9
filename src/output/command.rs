//! JSON response types for CLI commands
//!
//! Responses carry a schema version so downstream tooling can detect
//! shape changes without guessing.

use anyhow::Result;
use serde::Serialize;

use crate::engine::{Bale, NodeReport};
use crate::store::query::{CalleeStat, EdgeStat, StoreCounts, UnusedProc};

/// Current response schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Output format selector for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output
    Human,
    /// JSON output with schema versioning
    Json,
}

impl OutputFormat {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "human" | "text" => Some(OutputFormat::Human),
            "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }
}

/// Envelope shared by all JSON responses.
#[derive(Debug, Serialize)]
pub struct JsonResponse<T: Serialize> {
    pub schema_version: u32,
    pub command: &'static str,
    pub data: T,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn new(command: &'static str, data: T) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            command,
            data,
        }
    }
}

/// `cluster` command payload.
#[derive(Debug, Serialize)]
pub struct BalesResponse {
    pub db_path: String,
    pub cutoff: i64,
    pub undirected: bool,
    pub machines: usize,
    pub bales: Vec<Bale>,
    /// Per-node lines, populated at verbosity >= 2.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeReport>,
}

/// `calls` command payload.
#[derive(Debug, Serialize)]
pub struct CallsResponse {
    pub db_path: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub by_edge: Vec<EdgeStat>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub by_callee: Vec<CalleeStat>,
}

/// `unused` command payload.
#[derive(Debug, Serialize)]
pub struct UnusedResponse {
    pub db_path: String,
    pub procs: Vec<UnusedProc>,
}

/// `status` command payload.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub db_path: String,
    pub version: String,
    pub counts: StoreCounts,
}

/// Output JSON to stdout
pub fn output_json<T: Serialize>(data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("human"), Some(OutputFormat::Human));
        assert_eq!(OutputFormat::from_str("TEXT"), Some(OutputFormat::Human));
        assert_eq!(OutputFormat::from_str("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str("yaml"), None);
    }

    #[test]
    fn test_json_envelope_carries_schema_version() {
        let response = JsonResponse::new("status", 42u32);
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"schema_version\":1"));
        assert!(json.contains("\"command\":\"status\""));
    }
}
