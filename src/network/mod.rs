//! # Node-Worker Network
//!
//! The distributed evaluator: every parse-tree node becomes a dedicated
//! worker thread, wired with channels that mirror the trees and cross-link
//! them wherever a variable leaf references another equation's root.
//!
//! ## Architecture
//!
//! ```text
//! Controller
//!   ├── parent edge to each tree root (queries flow to x[0]'s root only)
//!   ├── circuit edge to every Var leaf (initial-assignment lookups)
//!   └── per tree T(v):
//!         root worker
//!           ├── request slots: one edge per Var leaf labeled v, forest-wide
//!           └── child workers, isomorphic to the parse tree
//!                 └── Var leaf labeled w: extra edge to T(w)'s root
//! ```
//!
//! The [`plan`] module allocates every channel before any thread starts and
//! moves each endpoint into the single seat that owns it; [`worker`] turns
//! seats into threads; [`node`] is the per-worker protocol automaton that the
//! threads drive.

pub mod message;
pub mod node;
pub mod plan;
pub mod worker;

pub use message::Message;
pub use plan::{Plan, PlannedRoot};

/// Failures of the worker fabric itself (as opposed to in-band query
/// failures, which travel as [`Message::err`]).
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// The operating system refused a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// A channel closed before every query was answered.
    #[error("worker network disconnected before all queries were answered")]
    Disconnected,

    /// A worker thread panicked; results are unreliable.
    #[error("a worker thread panicked")]
    WorkerPanicked,
}
