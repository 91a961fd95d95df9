//! Periodic finalize trigger
//!
//! A single timer thread that fires a `Finalize` request into the
//! recorder every interval. The tick itself runs on the recorder (the
//! store has one owner); this thread only schedules. Cancellation is
//! idempotent and must be, because the pre-fork hook and an orderly
//! shutdown can race to stop the same timer.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use crate::recorder::{WriteRequest, WriteSubmitter};

/// Handle on the periodic finalize timer.
pub struct FinalizeTimer {
    cancel_tx: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl FinalizeTimer {
    /// Start ticking every `interval`, submitting `Finalize` to the
    /// recorder on each tick.
    pub fn start(submitter: WriteSubmitter, interval: Duration) -> Self {
        let (cancel_tx, cancel_rx) = mpsc::channel();

        let handle = thread::spawn(move || loop {
            match cancel_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    submitter.submit(WriteRequest::Finalize);
                }
                // Cancelled, or the owning handle is gone.
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            }
        });

        Self {
            cancel_tx,
            handle: Some(handle),
        }
    }

    /// Stop the timer and wait for the thread to exit.
    ///
    /// Safe to call more than once; a second stop is a no-op.
    pub fn stop(&mut self) {
        // Send fails if the thread already exited; that is fine.
        let _ = self.cancel_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FinalizeTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
