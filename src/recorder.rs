//! Single-writer recorder
//!
//! All mutating store operations funnel through one recorder so the
//! SQLite handle has exactly one owner. Trace hooks fire on arbitrary
//! host threads and submit asynchronously; a submission from one
//! caller is applied in submission order, submissions from different
//! callers carry no cross-caller ordering guarantee.
//!
//! Per-write failures after init are logged and swallowed: a lost
//! record must never kill the recorder or surface into traced code.
//!
//! Two backends implement the same discipline:
//! - `mt`: a dedicated thread consuming an unbounded queue.
//! - `ev`: writes applied inline on the submitting thread behind a
//!   mutex, with the finalize tick piggybacked on submissions.

use anyhow::Result;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::options::ScheduleMode;
use crate::store::TraceStore;

/// A mutating store operation.
#[derive(Debug, Clone)]
pub enum WriteRequest {
    AddProc {
        proc_id: i64,
        proc_name: String,
        time_defined: i64,
    },
    AddCall {
        caller_id: i64,
        callee_id: i64,
        trace_id: i64,
        time_enter: i64,
        time_leave: Option<i64>,
    },
    UpdateCall {
        caller_id: i64,
        callee_id: i64,
        trace_id: i64,
        time_leave: i64,
    },
    Finalize,
}

struct Envelope {
    request: WriteRequest,
    /// Completion signal; fired after the write has been applied
    /// (successfully or not).
    done: Option<Sender<()>>,
}

enum Command {
    Apply(Envelope),
    Shutdown { done: Sender<()> },
}

struct InlineState {
    store: Option<TraceStore>,
    interval: Duration,
    last_tick: Instant,
}

#[derive(Clone)]
enum SubmitterInner {
    Thread(Sender<Command>),
    Inline(Arc<Mutex<InlineState>>),
}

/// Cloneable submission handle onto the recorder.
///
/// Held by trace hooks and the finalize timer; the owning
/// [`Recorder`] keeps the join handle and the shutdown right.
#[derive(Clone)]
pub struct WriteSubmitter {
    inner: SubmitterInner,
}

impl WriteSubmitter {
    /// Fire-and-forget submission.
    pub fn submit(&self, request: WriteRequest) {
        match &self.inner {
            SubmitterInner::Thread(tx) => {
                let envelope = Envelope {
                    request,
                    done: None,
                };
                if tx.send(Command::Apply(envelope)).is_err() {
                    tracing::warn!("trace write dropped: recorder has exited");
                }
            }
            SubmitterInner::Inline(state) => {
                if let Ok(mut state) = state.lock() {
                    apply_inline(&mut state, &request);
                }
            }
        }
    }

    /// Submit and block until the write has been applied.
    ///
    /// Errors only when the recorder is gone; an applied-but-failed
    /// write is already logged and swallowed by then.
    pub fn submit_and_wait(&self, request: WriteRequest) -> Result<()> {
        match &self.inner {
            SubmitterInner::Thread(tx) => {
                let (done_tx, done_rx) = mpsc::channel();
                let envelope = Envelope {
                    request,
                    done: Some(done_tx),
                };
                tx.send(Command::Apply(envelope))
                    .map_err(|_| anyhow::anyhow!("Recorder has exited"))?;
                done_rx
                    .recv()
                    .map_err(|_| anyhow::anyhow!("Recorder exited before completing write"))?;
                Ok(())
            }
            SubmitterInner::Inline(state) => {
                let mut state = state
                    .lock()
                    .map_err(|_| anyhow::anyhow!("Recorder state poisoned"))?;
                apply_inline(&mut state, &request);
                Ok(())
            }
        }
    }
}

/// Owner of the store and the write discipline.
pub struct Recorder {
    submitter: WriteSubmitter,
    handle: Option<thread::JoinHandle<()>>,
}

impl Recorder {
    /// Take ownership of the store and start the configured backend.
    ///
    /// `interval` only matters to the `ev` backend, which has no timer
    /// thread and ticks on the submission path instead.
    pub fn start(store: TraceStore, mode: ScheduleMode, interval: Duration) -> Self {
        match mode {
            ScheduleMode::Mt => {
                let (tx, rx) = mpsc::channel();
                let handle = thread::spawn(move || run_recorder(store, rx));
                Self {
                    submitter: WriteSubmitter {
                        inner: SubmitterInner::Thread(tx),
                    },
                    handle: Some(handle),
                }
            }
            ScheduleMode::Ev => Self {
                submitter: WriteSubmitter {
                    inner: SubmitterInner::Inline(Arc::new(Mutex::new(InlineState {
                        store: Some(store),
                        interval,
                        last_tick: Instant::now(),
                    }))),
                },
                handle: None,
            },
        }
    }

    /// A cloneable handle for hooks and timers.
    pub fn submitter(&self) -> WriteSubmitter {
        self.submitter.clone()
    }

    pub fn submit(&self, request: WriteRequest) {
        self.submitter.submit(request);
    }

    pub fn submit_and_wait(&self, request: WriteRequest) -> Result<()> {
        self.submitter.submit_and_wait(request)
    }

    /// Orderly shutdown: final finalize, flush of unsettled rows,
    /// detach, thread join. Consumes the recorder; submitters left
    /// behind turn into no-ops.
    pub fn shutdown(mut self) -> Result<()> {
        match &self.submitter.inner {
            SubmitterInner::Thread(tx) => {
                let (done_tx, done_rx) = mpsc::channel();
                tx.send(Command::Shutdown { done: done_tx })
                    .map_err(|_| anyhow::anyhow!("Recorder already exited"))?;
                done_rx
                    .recv()
                    .map_err(|_| anyhow::anyhow!("Recorder exited without acknowledging shutdown"))?;
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                Ok(())
            }
            SubmitterInner::Inline(state) => {
                let store = state
                    .lock()
                    .map_err(|_| anyhow::anyhow!("Recorder state poisoned"))?
                    .store
                    .take();
                match store {
                    Some(store) => store.close(),
                    None => Ok(()),
                }
            }
        }
    }
}

fn run_recorder(store: TraceStore, rx: Receiver<Command>) {
    let mut store = Some(store);
    while let Ok(command) = rx.recv() {
        match command {
            Command::Apply(envelope) => {
                if let Some(store) = store.as_mut() {
                    if let Err(e) = apply(store, &envelope.request) {
                        tracing::warn!("trace write dropped: {}", e);
                    }
                }
                if let Some(done) = envelope.done {
                    let _ = done.send(());
                }
            }
            Command::Shutdown { done } => {
                if let Some(store) = store.take() {
                    if let Err(e) = store.close() {
                        tracing::warn!("store close failed: {}", e);
                    }
                }
                let _ = done.send(());
                return;
            }
        }
    }
    // All submitters dropped without an explicit shutdown; close so the
    // durable side still gets the flush pass.
    if let Some(store) = store.take() {
        if let Err(e) = store.close() {
            tracing::warn!("store close failed: {}", e);
        }
    }
}

fn apply(store: &mut TraceStore, request: &WriteRequest) -> Result<()> {
    match request {
        WriteRequest::AddProc {
            proc_id,
            proc_name,
            time_defined,
        } => store.add_proc(*proc_id, proc_name, *time_defined),
        WriteRequest::AddCall {
            caller_id,
            callee_id,
            trace_id,
            time_enter,
            time_leave,
        } => store.add_call(*caller_id, *callee_id, *trace_id, *time_enter, *time_leave),
        WriteRequest::UpdateCall {
            caller_id,
            callee_id,
            trace_id,
            time_leave,
        } => store.update_call(*caller_id, *callee_id, *trace_id, *time_leave),
        WriteRequest::Finalize => store.finalize(),
    }
}

fn apply_inline(state: &mut InlineState, request: &WriteRequest) {
    let interval = state.interval;
    let due = state.last_tick.elapsed() >= interval;
    let Some(store) = state.store.as_mut() else {
        tracing::warn!("trace write dropped: recorder has shut down");
        return;
    };
    if let Err(e) = apply(store, request) {
        tracing::warn!("trace write dropped: {}", e);
    }
    if due && !matches!(request, WriteRequest::Finalize) {
        if let Err(e) = store.finalize() {
            tracing::warn!("finalize tick failed: {}", e);
        }
        state.last_tick = Instant::now();
    }
}
