//! Per-procedure node state for the clustering engine
//!
//! Each procedure in the call graph is one node, owned by exactly one
//! worker machine. A node holds only ids of its parent and children,
//! never references; resolution is a lookup in the owning machine's
//! node table.

use std::collections::HashMap;

/// Stable procedure id, as persisted.
pub type ProcId = i64;

/// Edge weight: the settled-call count of the surviving edge.
pub type Weight = i64;

/// Where a node stands inside one find/merge round.
///
/// Every message handler guards on this; a message arriving in the
/// wrong state is skipped silently because retries and reorderings
/// are normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Between rounds; ready for the next MOE search.
    Idle,
    /// MOE search running: local test pending or children outstanding.
    WaitMoe,
    /// Subtree aggregation finished, waiting for the fragment result.
    DoneMoe,
    /// Fragment MOE known; combining along it.
    Merge,
}

/// Maximum Outgoing Edge candidate `(from, to, weight)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Moe {
    pub from: ProcId,
    pub to: ProcId,
    pub weight: Weight,
}

impl Moe {
    /// The initial value for a node: a zero-weight self loop. Any real
    /// outgoing edge dominates it because its endpoints differ, which
    /// is exactly the `from != to` guard ancestors apply.
    pub fn degenerate(id: ProcId) -> Self {
        Self {
            from: id,
            to: id,
            weight: 0,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.from == self.to
    }
}

/// One procedure node.
#[derive(Debug, Clone)]
pub struct ProcNode {
    pub id: ProcId,
    pub name: String,
    /// Undirected edge weights to neighboring procs.
    pub neighbors: HashMap<ProcId, Weight>,
    /// Unvisited candidates, heaviest first after [`prepare`].
    ///
    /// [`prepare`]: ProcNode::prepare
    pub outer_edges: Vec<ProcId>,
    /// Confirmed intra-fragment neighbors.
    pub inner_edges: Vec<ProcId>,
    /// Fragment identifier.
    pub root: ProcId,
    /// Spanning-tree parent; self for a fragment root.
    pub parent: ProcId,
    /// Spanning-tree children.
    pub children: Vec<ProcId>,
    /// Best outgoing candidate seen in the current round.
    pub moe: Moe,
    /// Convergecast countdown: outstanding children plus the node's
    /// own pending local test.
    pub awaiting: usize,
    pub state: NodeState,
}

impl ProcNode {
    /// A fresh singleton fragment.
    pub fn new(id: ProcId, name: String, neighbors: HashMap<ProcId, Weight>) -> Self {
        let outer_edges: Vec<ProcId> = neighbors.keys().copied().collect();
        Self {
            id,
            name,
            neighbors,
            outer_edges,
            inner_edges: Vec::new(),
            root: id,
            parent: id,
            children: Vec::new(),
            moe: Moe::degenerate(id),
            awaiting: 0,
            state: NodeState::Idle,
        }
    }

    /// Sort the outgoing candidates by descending weight, proc id as
    /// the deterministic tie-break.
    pub fn prepare(&mut self) {
        let neighbors = &self.neighbors;
        self.outer_edges.sort_by(|a, b| {
            let wa = neighbors.get(a).copied().unwrap_or(0);
            let wb = neighbors.get(b).copied().unwrap_or(0);
            wb.cmp(&wa).then_with(|| a.cmp(b))
        });
    }

    /// Weight of the edge to a neighbor, zero when absent (a root has
    /// no edge to itself).
    pub fn weight_to(&self, neighbor: ProcId) -> Weight {
        self.neighbors.get(&neighbor).copied().unwrap_or(0)
    }

    /// True once this node is the root of its fragment.
    pub fn is_root(&self) -> bool {
        self.parent == self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_with_edges(edges: &[(ProcId, Weight)]) -> ProcNode {
        ProcNode::new(1, "::n".into(), edges.iter().copied().collect())
    }

    #[test]
    fn test_prepare_orders_by_descending_weight() {
        let mut node = node_with_edges(&[(10, 3), (20, 9), (30, 1)]);
        node.prepare();
        assert_eq!(node.outer_edges, vec![20, 10, 30]);
    }

    #[test]
    fn test_prepare_breaks_weight_ties_by_proc_id() {
        let mut node = node_with_edges(&[(30, 5), (10, 5), (20, 5)]);
        node.prepare();
        assert_eq!(node.outer_edges, vec![10, 20, 30]);
    }

    #[test]
    fn test_degenerate_moe_loses_to_any_real_edge() {
        let moe = Moe::degenerate(7);
        assert!(moe.is_degenerate());
        assert_eq!(moe.weight, 0);

        let real = Moe {
            from: 7,
            to: 9,
            weight: 1,
        };
        assert!(!real.is_degenerate());
        assert!(real.weight > moe.weight);
    }

    #[test]
    fn test_new_node_is_its_own_singleton_fragment() {
        let node = node_with_edges(&[(2, 1)]);
        assert_eq!(node.root, 1);
        assert!(node.is_root());
        assert_eq!(node.state, NodeState::Idle);
        assert!(node.children.is_empty());
    }
}
