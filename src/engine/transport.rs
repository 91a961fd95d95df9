//! K-machine transport
//!
//! A fixed roster of K workers, each a plain thread running a
//! single-threaded event loop over an unbounded channel. Delivery is
//! FIFO per (sender, receiver) because every sender clones one
//! `Sender` per receiver and mpsc preserves per-sender order; there is
//! no global ordering and none is needed.
//!
//! The supervisor sits outside the roster: it partitions the loaded
//! graph, spawns the workers, and waits for them to exit via `bye`.

use anyhow::Result;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use super::machine::{Machine, WorkerContext};
use super::message::Message;
use super::node::ProcNode;
use super::report::NodeReport;

/// A running engine; joins on [`Supervisor::wait_until_done`].
pub struct Supervisor {
    handles: Vec<thread::JoinHandle<Vec<NodeReport>>>,
}

/// Partition the graph over K workers and start them.
///
/// Ownership is `machine_of(proc) = proc mod K`; a node never
/// migrates, so every node-local mutation happens on its owner.
pub fn launch(nodes: Vec<ProcNode>, machines: usize) -> Supervisor {
    let machines = machines.max(1);

    let mut channels: Vec<(Sender<Message>, Option<Receiver<Message>>)> = (0..machines)
        .map(|_| {
            let (tx, rx) = mpsc::channel();
            (tx, Some(rx))
        })
        .collect();
    let senders: Vec<Sender<Message>> = channels.iter().map(|(tx, _)| tx.clone()).collect();

    let mut partitions: Vec<Vec<ProcNode>> = (0..machines).map(|_| Vec::new()).collect();
    let probe = WorkerContext {
        myself: 0,
        machines,
    };
    for node in nodes {
        let owner = probe.machine_of(node.id);
        partitions[owner].push(node);
    }

    let mut handles = Vec::with_capacity(machines);
    for (myself, partition) in partitions.into_iter().enumerate() {
        let rx = channels[myself].1.take().expect("receiver taken twice");
        let roster = senders.clone();
        let ctx = WorkerContext { myself, machines };
        handles.push(thread::spawn(move || run_worker(ctx, partition, rx, roster)));
    }

    Supervisor { handles }
}

impl Supervisor {
    /// Barrier: satisfied once every worker has exited via `bye`.
    /// Returns the concatenated summarize reports.
    pub fn wait_until_done(self) -> Result<Vec<NodeReport>> {
        let mut reports = Vec::new();
        for handle in self.handles {
            let worker_reports = handle
                .join()
                .map_err(|_| anyhow::anyhow!("Engine worker panicked"))?;
            reports.extend(worker_reports);
        }
        Ok(reports)
    }
}

fn run_worker(
    ctx: WorkerContext,
    nodes: Vec<ProcNode>,
    rx: Receiver<Message>,
    roster: Vec<Sender<Message>>,
) -> Vec<NodeReport> {
    let mut machine = Machine::new(ctx, nodes);
    let mut outbox = super::message::Outbox::new();

    machine.start(&mut outbox);
    dispatch(&mut outbox, &roster);

    while let Ok(message) = rx.recv() {
        machine.handle(message, &mut outbox);
        dispatch(&mut outbox, &roster);
        if machine.is_done() {
            break;
        }
    }
    machine.into_reports()
}

fn dispatch(outbox: &mut super::message::Outbox, roster: &[Sender<Message>]) {
    for (target, message) in outbox.drain() {
        // A send can only fail once the target has exited on bye;
        // nothing after bye matters to it.
        let _ = roster[target].send(message);
    }
}
