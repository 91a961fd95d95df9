//! Durable store -> clustering graph
//!
//! The only store reads the engine ever performs, done up front by the
//! supervisor before any worker starts. Settled calls become weighted
//! undirected edges; the cutoff severs weak associations before the
//! search begins.

use anyhow::Result;
use rusqlite::Connection;
use std::collections::HashMap;

use super::node::{ProcId, ProcNode, Weight};
use crate::hash::NO_CALLER;

/// How directed call counts become one undirected weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeMode {
    /// Each direction stands alone; when both survive, the heavier one
    /// is the edge's weight.
    Directed,
    /// Antiparallel counts are summed before the cutoff.
    Undirected,
}

/// Load every defined proc and the surviving edges between them.
///
/// - weight = settled-call count on the edge
/// - rows with the no-caller sentinel and self-calls never form edges
/// - edges below `cutoff` are dropped
/// - procs with no surviving edges stay in the graph as singletons
pub fn load_graph(conn: &Connection, cutoff: Weight, mode: EdgeMode) -> Result<Vec<ProcNode>> {
    let mut names: HashMap<ProcId, String> = HashMap::new();
    {
        let mut stmt = conn
            .prepare("SELECT proc_id, proc_name FROM proc_ids")
            .map_err(|e| anyhow::anyhow!("Failed to prepare proc query: {}", e))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| anyhow::anyhow!("Failed to read procs: {}", e))?;
        for row in rows {
            let (id, name) = row.map_err(|e| anyhow::anyhow!("Failed to read proc row: {}", e))?;
            names.insert(id, name);
        }
    }

    // Undirected accumulation keyed by (low, high) endpoint pair.
    let mut edges: HashMap<(ProcId, ProcId), Weight> = HashMap::new();
    {
        let mut stmt = conn
            .prepare(
                "SELECT caller_id, callee_id, COUNT(*) FROM call_pts
                 WHERE time_leave IS NOT NULL AND caller_id != ?1 AND caller_id != callee_id
                 GROUP BY caller_id, callee_id",
            )
            .map_err(|e| anyhow::anyhow!("Failed to prepare edge query: {}", e))?;
        let rows = stmt
            .query_map([NO_CALLER], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(|e| anyhow::anyhow!("Failed to read edges: {}", e))?;
        for row in rows {
            let (caller, callee, count) =
                row.map_err(|e| anyhow::anyhow!("Failed to read edge row: {}", e))?;
            // A call edge without a defined callee violates the store
            // invariant; a missing caller can only come from a foreign
            // file merge. Either way it cannot cluster.
            if !names.contains_key(&caller) || !names.contains_key(&callee) {
                tracing::warn!(caller, callee, "call edge references undefined proc");
                continue;
            }
            let key = (caller.min(callee), caller.max(callee));
            let slot = edges.entry(key).or_insert(0);
            match mode {
                EdgeMode::Directed => *slot = (*slot).max(count),
                EdgeMode::Undirected => *slot += count,
            }
        }
    }

    let mut adjacency: HashMap<ProcId, HashMap<ProcId, Weight>> =
        names.keys().map(|&id| (id, HashMap::new())).collect();
    for (&(a, b), &weight) in &edges {
        if weight < cutoff {
            continue;
        }
        if let Some(m) = adjacency.get_mut(&a) {
            m.insert(b, weight);
        }
        if let Some(m) = adjacency.get_mut(&b) {
            m.insert(a, weight);
        }
    }

    let mut nodes: Vec<ProcNode> = adjacency
        .into_iter()
        .map(|(id, neighbors)| ProcNode::new(id, names[&id].clone(), neighbors))
        .collect();
    nodes.sort_by_key(|n| n.id);
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TraceStore;
    use tempfile::TempDir;

    fn seeded_store(dir: &TempDir) -> TraceStore {
        let store = TraceStore::open_direct(&dir.path().join("t.db")).unwrap();
        store.add_proc(1, "::a", 1).unwrap();
        store.add_proc(2, "::b", 2).unwrap();
        store.add_proc(3, "::c", 3).unwrap();
        // a -> b three settled calls, b -> a one, a -> c one unsettled.
        store.add_call(1, 2, 100, 10, Some(20)).unwrap();
        store.add_call(1, 2, 101, 30, Some(40)).unwrap();
        store.add_call(1, 2, 102, 50, Some(60)).unwrap();
        store.add_call(2, 1, 103, 70, Some(80)).unwrap();
        store.add_call(1, 3, 104, 90, None).unwrap();
        // top-level calls never form edges
        store.add_call(0, 1, 105, 11, Some(12)).unwrap();
        store
    }

    fn neighbors_of(nodes: &[ProcNode], id: ProcId) -> HashMap<ProcId, Weight> {
        nodes
            .iter()
            .find(|n| n.id == id)
            .map(|n| n.neighbors.clone())
            .unwrap_or_default()
    }

    #[test]
    fn test_directed_mode_takes_heavier_direction() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir);
        let nodes = load_graph(store.connection(), 1, EdgeMode::Directed).unwrap();

        assert_eq!(nodes.len(), 3);
        assert_eq!(neighbors_of(&nodes, 1).get(&2), Some(&3));
        assert_eq!(neighbors_of(&nodes, 2).get(&1), Some(&3));
        // The unsettled a -> c call contributes nothing.
        assert!(neighbors_of(&nodes, 3).is_empty());
    }

    #[test]
    fn test_undirected_mode_sums_antiparallel_counts() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir);
        let nodes = load_graph(store.connection(), 1, EdgeMode::Undirected).unwrap();
        assert_eq!(neighbors_of(&nodes, 1).get(&2), Some(&4));
    }

    #[test]
    fn test_cutoff_severs_weak_edges_but_keeps_nodes() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir);
        let nodes = load_graph(store.connection(), 4, EdgeMode::Directed).unwrap();

        assert_eq!(nodes.len(), 3);
        assert!(nodes.iter().all(|n| n.neighbors.is_empty()));
    }

    #[test]
    fn test_self_calls_form_no_edges() {
        let dir = TempDir::new().unwrap();
        let store = TraceStore::open_direct(&dir.path().join("t.db")).unwrap();
        store.add_proc(5, "::rec", 1).unwrap();
        store.add_call(5, 5, 200, 10, Some(20)).unwrap();

        let nodes = load_graph(store.connection(), 1, EdgeMode::Directed).unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(nodes[0].neighbors.is_empty());
    }
}
