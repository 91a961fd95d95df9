//! Call-graph clustering engine
//!
//! Finds connected components of the recorded caller/callee graph by
//! simulated-distributed maximum-spanning-forest search
//! (Gallager–Humblet–Spira with the classical minimum inverted:
//! fragments merge along their *heaviest* outgoing edge, the strongest
//! association). K in-process workers each own a slice of the nodes
//! and exchange messages; there is no network and no shared node
//! state.

pub mod graph_load;
pub mod machine;
pub mod message;
pub mod node;
pub mod report;
pub mod transport;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;

pub use graph_load::EdgeMode;
pub use node::ProcId;
pub use report::{Bale, NodeReport};

/// Default worker count for the CLI.
pub const DEFAULT_MACHINES: usize = 4;

/// Knobs of one clustering run.
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    /// Minimum surviving edge weight (settled-call count).
    pub cutoff: i64,
    /// Sum antiparallel call counts instead of keeping directions
    /// distinct.
    pub undirected: bool,
    /// Worker roster size K.
    pub machines: usize,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            cutoff: 1,
            undirected: false,
            machines: DEFAULT_MACHINES,
        }
    }
}

/// Everything one run produces.
#[derive(Debug)]
pub struct ClusterOutcome {
    /// One entry per procedure, as emitted by summarize.
    pub reports: Vec<NodeReport>,
    /// Reports grouped into clusters.
    pub bales: Vec<Bale>,
}

/// Cluster a durable trace file.
pub fn cluster_file(db_path: &Path, options: &ClusterOptions) -> Result<ClusterOutcome> {
    let conn = Connection::open(db_path)
        .map_err(|e| anyhow::anyhow!("Failed to open trace store {}: {}", db_path.display(), e))?;
    cluster_connection(&conn, options)
}

/// Cluster over an already-open connection carrying the trace schema.
pub fn cluster_connection(conn: &Connection, options: &ClusterOptions) -> Result<ClusterOutcome> {
    let mode = if options.undirected {
        EdgeMode::Undirected
    } else {
        EdgeMode::Directed
    };
    let nodes = graph_load::load_graph(conn, options.cutoff, mode)?;
    let reports = transport::launch(nodes, options.machines).wait_until_done()?;
    let bales = report::bales_from_reports(&reports);
    Ok(ClusterOutcome { reports, bales })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TraceStore;
    use tempfile::TempDir;

    #[test]
    fn test_cluster_file_end_to_end() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.db");
        {
            let store = TraceStore::open_direct(&path).unwrap();
            store.add_proc(1, "::a", 1).unwrap();
            store.add_proc(2, "::b", 2).unwrap();
            store.add_proc(3, "::io::read", 3).unwrap();
            store.add_proc(4, "::io::write", 4).unwrap();
            store.add_call(1, 2, 100, 10, Some(20)).unwrap();
            store.add_call(1, 2, 101, 30, Some(40)).unwrap();
            store.add_call(3, 4, 102, 50, Some(60)).unwrap();
        }

        let outcome = cluster_file(&path, &ClusterOptions::default()).unwrap();
        assert_eq!(outcome.bales.len(), 2);
        assert_eq!(outcome.reports.len(), 4);

        let members: Vec<&[String]> = outcome.bales.iter().map(|b| b.members.as_slice()).collect();
        assert!(members.contains(&["::a".to_string(), "::b".to_string()].as_slice()));
        assert!(members
            .contains(&["::io::read".to_string(), "::io::write".to_string()].as_slice()));
    }

    #[test]
    fn test_cutoff_splits_weak_association() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.db");
        {
            let store = TraceStore::open_direct(&path).unwrap();
            store.add_proc(1, "::a", 1).unwrap();
            store.add_proc(2, "::b", 2).unwrap();
            store.add_call(1, 2, 100, 10, Some(20)).unwrap();
        }

        let strict = ClusterOptions {
            cutoff: 2,
            ..ClusterOptions::default()
        };
        let outcome = cluster_file(&path, &strict).unwrap();
        assert_eq!(outcome.bales.len(), 2);
    }
}
