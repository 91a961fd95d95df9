//! Per-machine state and message handlers
//!
//! One `Machine` owns a disjoint subset of the procedure nodes
//! (`machine_of(proc) = proc mod K`) and processes messages one at a
//! time to completion. Handlers mutate owned nodes only and emit an
//! [`Outbox`]; they never touch another machine's memory and never
//! block.
//!
//! ## Phases
//!
//! | phase | work |
//! |---|---|
//! | 0 prepare      | sort each node's outgoing candidates |
//! | 1 find MOE     | convergecast the heaviest outgoing edge per fragment |
//! | 2 merge        | combine fragments along their MOEs, re-root |
//! | 3 check active | count nodes that still have outgoing candidates |
//! | 4 summarize    | emit one report line per owned node |
//!
//! A machine advances to the next phase when it has seen a
//! `phase_done` token from every machine for the current transition
//! (its own included). Tokens carry a transition sequence number: a
//! fast machine can be one phase ahead, and its token must count
//! toward the next barrier, not this one. Proc-level completion for
//! phases 1 and 2 runs on a signed pending counter for the same
//! reason: a small fragment can finish its downcast before a slow
//! owner has formally entered the phase.

use std::collections::{BTreeSet, HashMap};

use super::message::{MachineId, Message, Outbox};
use super::node::{Moe, NodeState, ProcId, ProcNode};
use super::report::NodeReport;

/// Identity a worker carries into every handler.
#[derive(Debug, Clone, Copy)]
pub struct WorkerContext {
    pub myself: MachineId,
    pub machines: usize,
}

impl WorkerContext {
    /// Owner of a proc. Plain modulo; skew is possible but placement
    /// never affects correctness, only balance.
    pub fn machine_of(&self, proc: ProcId) -> MachineId {
        proc.rem_euclid(self.machines as i64) as usize
    }
}

/// Engine phases, in driver order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prepare,
    FindMoe,
    Merge,
    CheckActive,
    Summarize,
}

/// Total order on MOE candidates: weight first, then the undirected
/// edge identity `(min, max)`, smaller identity winning ties.
///
/// Weight alone is not enough: with equal weights, three fragments can
/// choose MOEs in a rotation (A->B->C->A) and the merge phase never
/// finds a reciprocal pair. Under a total order the chosen edges
/// around any would-be cycle must all compare equal, hence be the same
/// edge, hence a two-cycle, which the protocol resolves.
fn candidate_wins(candidate: &Moe, current: &Moe) -> bool {
    if candidate.is_degenerate() {
        return false;
    }
    if candidate.weight != current.weight {
        return candidate.weight > current.weight;
    }
    let c = (
        candidate.from.min(candidate.to),
        candidate.from.max(candidate.to),
    );
    let k = (current.from.min(current.to), current.from.max(current.to));
    c < k
}

/// One worker's entire state.
pub struct Machine {
    ctx: WorkerContext,
    procs: HashMap<ProcId, ProcNode>,
    /// Owned nodes that currently identify their fragment
    /// (`node.root == node.id`); the targets of phase root commands.
    roots: BTreeSet<ProcId>,
    phase: Phase,
    /// Transition sequence number; all machines number transitions
    /// identically.
    seq: u64,
    /// Barrier countdown for the current transition.
    machines_in_phase: usize,
    /// Tokens already received for the *next* transition.
    pending_done: usize,
    phase_done_sent: bool,
    /// Signed per-proc completion counter for phases 1 and 2.
    procs_in_phase: i64,
    /// Phase 3 response countdown.
    await_active: usize,
    /// Global count of nodes with outgoing candidates, identical on
    /// every machine once phase 3 completes.
    procs_active: usize,
    /// Filled during summarize, handed to the supervisor on exit.
    reports: Vec<NodeReport>,
    done: bool,
}

impl Machine {
    pub fn new(ctx: WorkerContext, nodes: Vec<ProcNode>) -> Self {
        let mut procs = HashMap::with_capacity(nodes.len());
        let mut roots = BTreeSet::new();
        for node in nodes {
            debug_assert_eq!(ctx.machine_of(node.id), ctx.myself);
            roots.insert(node.id);
            procs.insert(node.id, node);
        }
        Self {
            ctx,
            procs,
            roots,
            phase: Phase::Prepare,
            seq: 0,
            machines_in_phase: 0,
            pending_done: 0,
            phase_done_sent: false,
            procs_in_phase: 0,
            await_active: 0,
            procs_active: 0,
            reports: Vec::new(),
            done: false,
        }
    }

    /// True after `bye` has been processed.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Reports collected during summarize.
    pub fn into_reports(self) -> Vec<NodeReport> {
        self.reports
    }

    /// Kick the machine off: enter phase 0.
    pub fn start(&mut self, out: &mut Outbox) {
        self.enter_phase(Phase::Prepare, out);
    }

    /// Process one message to completion.
    pub fn handle(&mut self, message: Message, out: &mut Outbox) {
        match message {
            Message::FindMoe { proc } => self.on_find_moe(proc, out),
            Message::TestMoe { proc } => self.on_test_moe(proc, out),
            Message::ReqRoot { proc, reply_to } => self.on_req_root(proc, reply_to, out),
            Message::RspRoot {
                proc,
                responder_root,
            } => self.on_rsp_root(proc, responder_root, out),
            Message::FoundMoe { proc, moe } => self.on_found_moe(proc, moe, out),
            Message::NotifyMoe { proc, moe } => self.on_notify_moe(proc, moe, out),
            Message::Merge { proc } => self.on_merge(proc, out),
            Message::ReqCombine { proc, sender } => self.on_req_combine(proc, sender, out),
            Message::NewRoot {
                proc,
                new_root,
                new_parent,
            } => self.on_new_root(proc, new_root, new_parent, out),
            Message::ReqActive { sender } => self.on_req_active(sender, out),
            Message::RspActive { count } => self.on_rsp_active(count, out),
            Message::PhaseDone { seq } => self.on_phase_done(seq, out),
            Message::Bye => self.done = true,
        }
    }

    fn send_to_proc(&self, out: &mut Outbox, proc: ProcId, message: Message) {
        out.push(self.ctx.machine_of(proc), message);
    }

    fn broadcast(&self, out: &mut Outbox, message: Message) {
        for machine in 0..self.ctx.machines {
            out.push(machine, message.clone());
        }
    }

    // ----- phase controller -----

    fn enter_phase(&mut self, phase: Phase, out: &mut Outbox) {
        self.seq += 1;
        self.phase = phase;
        self.machines_in_phase = self.ctx.machines - self.pending_done;
        self.pending_done = 0;
        self.phase_done_sent = false;

        match phase {
            Phase::Prepare => {
                for node in self.procs.values_mut() {
                    node.prepare();
                }
                self.finish_phase_work(out);
            }
            Phase::FindMoe => {
                self.procs_in_phase += self.procs.len() as i64;
                if self.procs_in_phase == 0 {
                    self.finish_phase_work(out);
                } else {
                    for root in self.roots.clone() {
                        self.send_to_proc(out, root, Message::FindMoe { proc: root });
                    }
                }
            }
            Phase::Merge => {
                self.procs_in_phase += self.procs.len() as i64;
                if self.procs_in_phase == 0 {
                    self.finish_phase_work(out);
                } else {
                    for root in self.roots.clone() {
                        self.send_to_proc(out, root, Message::Merge { proc: root });
                    }
                }
            }
            Phase::CheckActive => {
                self.procs_active = 0;
                self.await_active = self.ctx.machines;
                self.broadcast(
                    out,
                    Message::ReqActive {
                        sender: self.ctx.myself,
                    },
                );
            }
            Phase::Summarize => {
                let mut reports: Vec<NodeReport> = self
                    .procs
                    .values()
                    .map(|node| NodeReport {
                        root: node.root,
                        parent: node.parent,
                        weight: node.weight_to(node.parent),
                        proc_id: node.id,
                        proc_name: node.name.clone(),
                    })
                    .collect();
                reports.sort_by_key(|r| r.proc_id);
                self.reports.extend(reports);
                self.finish_phase_work(out);
            }
        }
    }

    /// This machine's share of the current phase is complete.
    fn finish_phase_work(&mut self, out: &mut Outbox) {
        if self.phase_done_sent {
            return;
        }
        self.phase_done_sent = true;
        self.broadcast(out, Message::PhaseDone { seq: self.seq });
    }

    /// One owned node finished its share of phase 1 or 2. The counter
    /// may dip below zero when a fragment completes its downcast
    /// before this machine has formally entered the phase; the entry
    /// credit balances it out.
    fn proc_phase_step(&mut self, out: &mut Outbox) {
        self.procs_in_phase -= 1;
        if self.procs_in_phase == 0 && matches!(self.phase, Phase::FindMoe | Phase::Merge) {
            self.finish_phase_work(out);
        }
    }

    fn on_phase_done(&mut self, seq: u64, out: &mut Outbox) {
        if seq == self.seq {
            self.machines_in_phase -= 1;
            if self.machines_in_phase == 0 {
                self.advance(out);
            }
        } else if seq == self.seq + 1 {
            self.pending_done += 1;
        } else {
            tracing::warn!(
                machine = self.ctx.myself,
                token = seq,
                at = self.seq,
                "stray phase_done token"
            );
        }
    }

    fn advance(&mut self, out: &mut Outbox) {
        match self.phase {
            Phase::Prepare => self.enter_phase(Phase::FindMoe, out),
            Phase::FindMoe => self.enter_phase(Phase::Merge, out),
            Phase::Merge => self.enter_phase(Phase::CheckActive, out),
            Phase::CheckActive => {
                if self.procs_active > 0 {
                    self.enter_phase(Phase::FindMoe, out);
                } else {
                    self.enter_phase(Phase::Summarize, out);
                }
            }
            Phase::Summarize => self.broadcast(out, Message::Bye),
        }
    }

    // ----- phase 1: MOE search -----

    fn on_find_moe(&mut self, proc: ProcId, out: &mut Outbox) {
        let Some(node) = self.procs.get_mut(&proc) else {
            warn_unknown_proc(self.ctx.myself, "find_moe", proc);
            return;
        };
        if node.state != NodeState::Idle {
            return;
        }
        node.state = NodeState::WaitMoe;
        node.awaiting = node.children.len() + 1;
        node.moe = Moe::degenerate(proc);

        if node.children.is_empty() {
            self.send_to_proc(out, proc, Message::TestMoe { proc });
        } else {
            for child in node.children.clone() {
                self.send_to_proc(out, child, Message::FindMoe { proc: child });
            }
        }
    }

    fn on_test_moe(&mut self, proc: ProcId, out: &mut Outbox) {
        let Some(node) = self.procs.get(&proc) else {
            warn_unknown_proc(self.ctx.myself, "test_moe", proc);
            return;
        };
        if node.state != NodeState::WaitMoe {
            return;
        }
        match node.outer_edges.first().copied() {
            // No candidates left: close the node's own share of
            // `awaiting` with whatever it has aggregated so far.
            None => {
                let moe = node.moe;
                self.send_to_proc(out, proc, Message::FoundMoe { proc, moe });
            }
            Some(candidate) => {
                self.send_to_proc(
                    out,
                    candidate,
                    Message::ReqRoot {
                        proc: candidate,
                        reply_to: proc,
                    },
                );
            }
        }
    }

    fn on_req_root(&mut self, proc: ProcId, reply_to: ProcId, out: &mut Outbox) {
        let Some(node) = self.procs.get(&proc) else {
            warn_unknown_proc(self.ctx.myself, "req_root", proc);
            return;
        };
        let responder_root = node.root;
        self.send_to_proc(
            out,
            reply_to,
            Message::RspRoot {
                proc: reply_to,
                responder_root,
            },
        );
    }

    fn on_rsp_root(&mut self, proc: ProcId, responder_root: ProcId, out: &mut Outbox) {
        let Some(node) = self.procs.get_mut(&proc) else {
            warn_unknown_proc(self.ctx.myself, "rsp_root", proc);
            return;
        };
        if node.state != NodeState::WaitMoe || node.outer_edges.is_empty() {
            return;
        }
        let head = node.outer_edges[0];
        if responder_root == node.root {
            // Same fragment: the edge is inner, try the next candidate.
            node.outer_edges.remove(0);
            node.inner_edges.push(head);
            self.send_to_proc(out, proc, Message::TestMoe { proc });
        } else {
            // Outgoing. Self-deliver so the comparison logic lives in
            // found_moe alone.
            let moe = Moe {
                from: proc,
                to: head,
                weight: node.weight_to(head),
            };
            self.send_to_proc(out, proc, Message::FoundMoe { proc, moe });
        }
    }

    fn on_found_moe(&mut self, proc: ProcId, candidate: Moe, out: &mut Outbox) {
        let Some(node) = self.procs.get_mut(&proc) else {
            warn_unknown_proc(self.ctx.myself, "found_moe", proc);
            return;
        };
        if node.state != NodeState::WaitMoe || node.awaiting == 0 {
            return;
        }
        node.awaiting -= 1;
        if candidate_wins(&candidate, &node.moe) {
            node.moe = candidate;
        }

        if node.awaiting == 1 {
            // All children reported; only the local test remains.
            self.send_to_proc(out, proc, Message::TestMoe { proc });
        } else if node.awaiting == 0 {
            node.state = NodeState::DoneMoe;
            let moe = node.moe;
            if node.is_root() {
                // Fragment result decided; downcast through self so
                // the root runs the same notify handler as everyone.
                self.send_to_proc(out, proc, Message::NotifyMoe { proc, moe });
            } else {
                let parent = node.parent;
                self.send_to_proc(out, parent, Message::FoundMoe { proc: parent, moe });
            }
        }
    }

    fn on_notify_moe(&mut self, proc: ProcId, moe: Moe, out: &mut Outbox) {
        let Some(node) = self.procs.get_mut(&proc) else {
            warn_unknown_proc(self.ctx.myself, "notify_moe", proc);
            return;
        };
        if node.state != NodeState::DoneMoe {
            return;
        }
        node.root = moe.from;
        node.moe = moe;
        node.state = NodeState::Merge;
        let children = node.children.clone();

        // The fragment identifier moved to the MOE originator; keep
        // the owned-roots set in step so phase 2 commands reach it.
        if moe.from == proc {
            self.roots.insert(proc);
        } else {
            self.roots.remove(&proc);
        }

        for child in children {
            self.send_to_proc(out, child, Message::NotifyMoe { proc: child, moe });
        }
        self.proc_phase_step(out);
    }

    // ----- phase 2: merge -----

    fn on_merge(&mut self, proc: ProcId, out: &mut Outbox) {
        let Some(node) = self.procs.get(&proc) else {
            warn_unknown_proc(self.ctx.myself, "merge", proc);
            return;
        };
        if node.state != NodeState::Merge {
            return;
        }
        if node.moe.is_degenerate() {
            // Exhausted fragment: nothing to combine with. Re-root in
            // place so the whole tree still walks through new_root and
            // the phase barrier drains uniformly.
            self.send_to_proc(
                out,
                proc,
                Message::NewRoot {
                    proc,
                    new_root: proc,
                    new_parent: proc,
                },
            );
        } else if node.moe.from == proc {
            let target = node.moe.to;
            self.send_to_proc(
                out,
                target,
                Message::ReqCombine {
                    proc: target,
                    sender: proc,
                },
            );
        }
    }

    fn on_req_combine(&mut self, proc: ProcId, sender: ProcId, out: &mut Outbox) {
        let Some(node) = self.procs.get_mut(&proc) else {
            warn_unknown_proc(self.ctx.myself, "req_combine", proc);
            return;
        };
        if !node.children.contains(&sender) {
            node.children.push(sender);
        }

        let reciprocal =
            node.moe.from == proc && node.moe.to == sender && proc > sender;
        if reciprocal {
            // Two fragments chose the same edge; the larger endpoint
            // roots the merged fragment.
            self.send_to_proc(
                out,
                proc,
                Message::NewRoot {
                    proc,
                    new_root: proc,
                    new_parent: proc,
                },
            );
        } else if node.state == NodeState::Idle {
            // Our re-root downcast already passed this node; the late
            // sender's subtree would never hear it. Bridge directly.
            let new_root = node.root;
            self.send_to_proc(
                out,
                sender,
                Message::NewRoot {
                    proc: sender,
                    new_root,
                    new_parent: proc,
                },
            );
        }
    }

    fn on_new_root(&mut self, proc: ProcId, new_root: ProcId, new_parent: ProcId, out: &mut Outbox) {
        let Some(node) = self.procs.get_mut(&proc) else {
            warn_unknown_proc(self.ctx.myself, "new_root", proc);
            return;
        };
        if node.state != NodeState::Merge {
            return;
        }
        node.root = new_root;
        if node.parent != new_parent {
            // Re-orientation: the old upward edge becomes a downward
            // one. A root has no upward edge to demote.
            let old_parent = node.parent;
            if old_parent != proc && !node.children.contains(&old_parent) {
                node.children.push(old_parent);
            }
        }
        node.children.retain(|&c| c != new_parent);
        node.parent = new_parent;
        node.state = NodeState::Idle;
        let children = node.children.clone();

        if new_root == proc {
            self.roots.insert(proc);
        } else {
            self.roots.remove(&proc);
        }

        for child in children {
            self.send_to_proc(
                out,
                child,
                Message::NewRoot {
                    proc: child,
                    new_root,
                    new_parent: proc,
                },
            );
        }
        self.proc_phase_step(out);
    }

    // ----- phase 3: termination check -----

    fn on_req_active(&mut self, sender: MachineId, out: &mut Outbox) {
        let count = self
            .procs
            .values()
            .filter(|n| !n.outer_edges.is_empty())
            .count();
        out.push(sender, Message::RspActive { count });
    }

    fn on_rsp_active(&mut self, count: usize, out: &mut Outbox) {
        if self.await_active == 0 {
            tracing::warn!(machine = self.ctx.myself, "stray rsp_active");
            return;
        }
        self.procs_active += count;
        self.await_active -= 1;
        if self.await_active == 0 {
            self.finish_phase_work(out);
        }
    }

}

fn warn_unknown_proc(machine: MachineId, command: &str, proc: ProcId) {
    tracing::warn!(
        machine,
        command,
        proc,
        "message for a proc this machine does not own"
    );
}
