//! # circuitnet
//!
//! A concurrent evaluator for systems of arithmetic equations over named
//! variables. Each equation `x[v] = <expr>` is parsed into a tree, the forest
//! is checked for dependency cycles, and evaluation runs on a network of
//! cooperating workers: one thread per parse-tree node, wired with channels
//! that mirror the trees and cross-link them wherever a variable leaf
//! references another equation's root. Queries ask for variable 0 under a
//! partial assignment of the other variables.
//!
//! ## Pipeline
//!
//! ```text
//! Input text
//!     ↓
//! [parser]        → parse trees (arena-backed)
//!     ↓
//! [registry]      → equation table + acyclicity verdicts (P / F)
//!     ↓
//! [network::plan] → every channel, allocated and distributed before spawn
//!     ↓
//! [network::worker] → one thread per node, select-driven protocol automaton
//!     ↓
//! [controller]    → query dispatch, assignment lookups, verdict lines
//! ```
//!
//! ## Protocol sketch
//!
//! Every channel carries the same three-field [`network::Message`]. Requests
//! flow down the trees; a variable leaf first asks the controller for an
//! initial assignment and falls back to the root of the defining tree;
//! answers are cached per query at every node and broadcast to the parent and
//! to every cross-tree asker at once. Failures travel the same paths with the
//! in-band `err` bit set.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use circuitnet::{config::Config, controller};
//! use std::io;
//!
//! let config = Config::default();
//! let summary = controller::run(
//!     io::stdin().lock(),
//!     io::stdout().lock(),
//!     &config,
//! )?;
//! # Ok::<(), circuitnet::controller::ControllerError>(())
//! ```

pub mod ast;
pub mod config;
pub mod controller;
pub mod dependency;
pub mod network;
pub mod parser;
pub mod registry;

pub use ast::{ExprArena, Node, NodeId, NodeKind};
pub use config::Config;
pub use controller::{ControllerError, Summary};
pub use network::{Message, NetworkError};
pub use parser::ParseError;
pub use registry::{DefineError, Registry};
