//! Cluster report assembly
//!
//! The summarize phase yields one line per node; nodes sharing a root
//! form one bale (cluster). Output ordering is deterministic: bales by
//! group id, members by procedure name.

use serde::Serialize;
use std::collections::BTreeMap;

use super::node::{ProcId, Weight};

/// One summarize line: `root parent weight(self->parent) proc_id name`.
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub root: ProcId,
    pub parent: ProcId,
    /// Weight of the spanning-tree edge to the parent; zero for a root.
    pub weight: Weight,
    pub proc_id: ProcId,
    pub proc_name: String,
}

impl NodeReport {
    /// The per-node report line, verbosity >= 2 output.
    pub fn render(&self) -> String {
        format!(
            "{}  {}  {}  {}  {}",
            self.root, self.parent, self.weight, self.proc_id, self.proc_name
        )
    }
}

/// One cluster of procedures.
#[derive(Debug, Clone, Serialize)]
pub struct Bale {
    /// The fragment root's proc id, the cluster's identifier.
    pub group: ProcId,
    /// Member procedure names, sorted.
    pub members: Vec<String>,
}

impl Bale {
    /// The cluster line: `<group> { <name> <name> ... }`.
    pub fn render(&self) -> String {
        format!("{} {{ {} }}", self.group, self.members.join(" "))
    }
}

/// Group node reports into bales.
pub fn bales_from_reports(reports: &[NodeReport]) -> Vec<Bale> {
    let mut grouped: BTreeMap<ProcId, Vec<String>> = BTreeMap::new();
    for report in reports {
        grouped
            .entry(report.root)
            .or_default()
            .push(report.proc_name.clone());
    }
    grouped
        .into_iter()
        .map(|(group, mut members)| {
            members.sort();
            Bale { group, members }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(root: ProcId, proc_id: ProcId, name: &str) -> NodeReport {
        NodeReport {
            root,
            parent: root,
            weight: 0,
            proc_id,
            proc_name: name.to_string(),
        }
    }

    #[test]
    fn test_bales_group_by_root_and_sort() {
        let reports = vec![
            report(10, 12, "::c"),
            report(3, 3, "::solo"),
            report(10, 10, "::a"),
            report(10, 11, "::b"),
        ];
        let bales = bales_from_reports(&reports);
        assert_eq!(bales.len(), 2);
        assert_eq!(bales[0].group, 3);
        assert_eq!(bales[0].members, vec!["::solo"]);
        assert_eq!(bales[1].group, 10);
        assert_eq!(bales[1].members, vec!["::a", "::b", "::c"]);
    }

    #[test]
    fn test_render_formats() {
        let bale = Bale {
            group: 7,
            members: vec!["::x".into(), "::y".into()],
        };
        assert_eq!(bale.render(), "7 { ::x ::y }");

        let line = report(7, 9, "::y").render();
        assert_eq!(line, "7  7  0  9  ::y");
    }
}
