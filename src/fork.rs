//! Fork lifecycle
//!
//! A live recorder thread does not survive `fork`: the child inherits
//! the parent's memory but none of its threads, so a forked child
//! would hold a submission queue nobody drains and a SQLite handle
//! with undefined journal state. The dance:
//!
//! 1. Pre-fork: stop the finalize timer, finalize synchronously,
//!    close the store (the runtime shutdown does all three).
//! 2. Fork.
//! 3. Post-fork, child: copy the parent's durable file to
//!    `<db_path>/<db_prefix>-<child_pid>.db`, then restart the
//!    pipeline on the copy's name.
//! 4. Post-fork, parent: restart the pipeline under its own pid.
//!
//! The copy preserves the call-graph history across the fork; merging
//! the per-pid files post-hoc yields the union because every durable
//! insert is conflict-ignoring.

use anyhow::Result;

use crate::runtime::{self, TraceRuntime};

/// `fork(2)` with the tracing pipeline carried across.
///
/// Returns the child pid in the parent and 0 in the child, like the
/// raw call. With tracing disabled this is a plain fork.
///
/// # Safety
///
/// The tracing pipeline is quiesced before the fork and restarted
/// after, so none of its threads or database handles straddle the
/// fork. The caller remains responsible for every other thread and
/// resource in the process, as with any fork of a multithreaded
/// program.
pub unsafe fn fork() -> Result<libc::pid_t> {
    // Stop the pipeline outside the slot lock: the lock must not be
    // held across fork or the child would inherit it locked.
    let stopped = runtime::take_global();
    let restart = match stopped {
        Some(rt) => {
            let config = rt.config().clone();
            let parent_file = rt.durable_file();
            rt.shutdown()
                .map_err(|e| anyhow::anyhow!("Failed to quiesce tracing before fork: {}", e))?;
            Some((config, parent_file))
        }
        None => None,
    };

    let pid = libc::fork();
    if pid < 0 {
        let err = std::io::Error::last_os_error();
        // Fork failed; bring the parent pipeline back before erroring.
        if let Some((config, _)) = restart {
            match TraceRuntime::start(config) {
                Ok(rt) => runtime::install_global(rt),
                Err(e) => tracing::warn!("tracing not restarted after failed fork: {}", e),
            }
        }
        return Err(anyhow::anyhow!("fork failed: {}", err));
    }

    if let Some((config, parent_file)) = restart {
        if pid == 0 {
            // Child: inherit the parent's history under our own pid.
            let child_file = config.durable_file(std::process::id());
            if let Err(e) = std::fs::copy(&parent_file, &child_file) {
                tracing::warn!(
                    "failed to copy trace history {} -> {}: {}",
                    parent_file.display(),
                    child_file.display(),
                    e
                );
            }
        }
        match TraceRuntime::start(config) {
            Ok(rt) => runtime::install_global(rt),
            Err(e) => tracing::warn!("tracing not restarted after fork: {}", e),
        }
    }

    Ok(pid)
}
