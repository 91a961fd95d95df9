//! Engine messages
//!
//! Every interaction between machines (and between a machine and
//! itself) is one of these messages. Handlers never mutate remote
//! state directly; they return an [`Outbox`] of `(target machine,
//! message)` pairs which the worker loop dispatches after the handler
//! returns. An empty outbox is simply "nothing to say".

use super::node::{Moe, ProcId};

/// Worker machine index in `0..K`.
pub type MachineId = usize;

/// The engine's message vocabulary.
#[derive(Debug, Clone)]
pub enum Message {
    /// Phase 1 root command: start the MOE search down this subtree.
    FindMoe { proc: ProcId },
    /// Run the node's local candidate test.
    TestMoe { proc: ProcId },
    /// Ask `proc` which fragment it belongs to, for `reply_to`.
    ReqRoot { proc: ProcId, reply_to: ProcId },
    /// The answer to [`Message::ReqRoot`].
    RspRoot { proc: ProcId, responder_root: ProcId },
    /// Convergecast: a subtree's best candidate, also self-delivered
    /// to close the node's own share of `awaiting`.
    FoundMoe { proc: ProcId, moe: Moe },
    /// Downcast: the fragment's decided MOE.
    NotifyMoe { proc: ProcId, moe: Moe },
    /// Phase 2 root command, issued to each MOE originator.
    Merge { proc: ProcId },
    /// `sender` attaches itself below `proc` along the MOE.
    ReqCombine { proc: ProcId, sender: ProcId },
    /// Re-root the merged fragment; propagates along tree edges.
    NewRoot {
        proc: ProcId,
        new_root: ProcId,
        new_parent: ProcId,
    },
    /// Phase 3: how many of your procs still have outgoing candidates?
    ReqActive { sender: MachineId },
    /// The answer to [`Message::ReqActive`].
    RspActive { count: usize },
    /// Barrier token; `seq` names the phase transition it belongs to
    /// so a fast machine's token for the next phase is not counted
    /// against the current one.
    PhaseDone { seq: u64 },
    /// Clean worker exit; the only one.
    Bye,
}

/// Ordered batch of outgoing messages produced by one handler.
#[derive(Debug, Default)]
pub struct Outbox {
    messages: Vec<(MachineId, Message)>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, target: MachineId, message: Message) {
        self.messages.push((target, message));
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (MachineId, Message)> + '_ {
        self.messages.drain(..)
    }
}
