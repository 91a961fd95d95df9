//! Turtles: runtime call tracing with post-hoc call-graph clustering
//!
//! Turtles records `(caller, callee, trace-id, t_enter, t_leave)`
//! tuples from a host runtime's procedure hooks into an embedded
//! SQLite store, and partitions the recorded call graph into clusters
//! ("bales") with a simulated-distributed maximum-spanning-forest
//! search.
//!
//! # Recording
//!
//! Tracing is enabled through bracketed `+TURTLES ... -TURTLES` blocks
//! in the host argv:
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! let argv: Vec<String> = std::env::args().collect();
//! // Residual argv goes back to the host's own option handling.
//! let residual = turtles::runtime::init_from_argv(&argv)?;
//! # drop(residual);
//! # Ok(())
//! # }
//! ```
//!
//! The host's interception hooks then call
//! [`runtime::TraceRuntime::enter_call`] /
//! [`runtime::TraceRuntime::leave_call`] through
//! [`runtime::with_global`].
//!
//! # Commit modes
//!
//! - `staged` (default): writes land in an in-memory buffer; a
//!   periodic finalizer transfers settled records into the durable
//!   `<dbPath>/<dbPrefix>-<pid>.db` file.
//! - `direct`: writes go straight to the durable file.
//!
//! # Clustering
//!
//! The `turtles` binary reads a durable file and prints one cluster
//! per line; see [`engine::cluster_file`] for the library entry point.

pub mod engine;
pub mod finalizer;
pub mod hash;
pub mod options;
pub mod output;
pub mod recorder;
pub mod runtime;
pub mod store;
pub mod version;

#[cfg(unix)]
pub mod fork;

pub use engine::{cluster_file, ClusterOptions, ClusterOutcome};
pub use hash::{proc_id, trace_id};
pub use options::{CommitMode, ScheduleMode, TraceConfig};
pub use runtime::TraceRuntime;
