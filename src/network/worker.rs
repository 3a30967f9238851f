//! Worker Threads
//!
//! Turns a [`Seat`] into a running worker: the thread tree of an equation is
//! isomorphic to its parse tree, because every operator worker spawns its
//! child workers before it starts listening and joins them after its listen
//! loop ends.
//!
//! The listen loop multiplexes every channel the seat owns through one
//! `Select`, reads exactly one message per wakeup, feeds it to the protocol
//! automaton, and performs the sends the automaton requests. A disconnect on
//! any monitored channel means the run is over: the controller dropped its
//! endpoints (or a peer went down), and the loop exits so the disconnection
//! cascades further down the tree.

use std::thread::{self, JoinHandle};

use crossbeam_channel::Select;

use crate::ast::NodeKind;
use crate::network::message::Message;
use crate::network::node::{Automaton, Dest, Shape, Source};
use crate::network::plan::{ChildLink, CircuitLink, DefLink, Seat, SeatKind};
use crate::network::NetworkError;

/// Spawn-time knobs shared by every worker of a run.
#[derive(Debug, Clone, Copy)]
pub struct SpawnOpts {
    /// Number of queries the run will carry (sizes the per-worker cache).
    pub queries: usize,
    /// Worker thread stack size in bytes; 0 keeps the platform default.
    pub stack_size: usize,
}

/// Spawn the worker for `seat` (and, transitively, its whole subtree).
pub fn spawn(seat: Seat, opts: SpawnOpts) -> Result<JoinHandle<()>, NetworkError> {
    let mut builder =
        thread::Builder::new().name(format!("circuit-{}-{}", seat.tree, seat.tag()));
    if opts.stack_size > 0 {
        builder = builder.stack_size(opts.stack_size);
    }
    builder.spawn(move || run(seat, opts)).map_err(NetworkError::Spawn)
}

/// Kind-specific endpoints kept by the running worker.
enum Wiring {
    Leaf,
    Var {
        circuit: CircuitLink,
        def: Option<DefLink>,
    },
    Op {
        children: Vec<(crate::network::plan::Tx, crate::network::plan::Rx)>,
    },
}

fn run(seat: Seat, opts: SpawnOpts) {
    let Seat {
        tree,
        is_root,
        kind,
        from_parent,
        to_parent,
        slots,
    } = seat;

    // Children first, so the worker tree mirrors the parse tree.
    let mut joins: Vec<JoinHandle<()>> = Vec::new();
    let (shape, wiring) = match kind {
        SeatKind::Num(value) => (Shape::Num(value), Wiring::Leaf),
        SeatKind::Var { circuit, def, .. } => (
            Shape::Var {
                defined: def.is_some(),
            },
            Wiring::Var { circuit, def },
        ),
        SeatKind::Op { kind, children } => {
            let mut edges = Vec::with_capacity(children.len());
            for ChildLink {
                seat: child_seat,
                to_child,
                from_child,
            } in children
            {
                match spawn(child_seat, opts) {
                    Ok(handle) => joins.push(handle),
                    Err(err) => {
                        // Fatal for the whole run: bail out and let the
                        // disconnection cascade unwind the network.
                        tracing::error!(tree, error = %err, "child worker spawn failed");
                        for handle in std::mem::take(&mut joins) {
                            let _ = handle.join();
                        }
                        return;
                    }
                }
                edges.push((to_child, from_child));
            }
            let shape = match kind {
                NodeKind::Neg => Shape::Neg,
                NodeKind::Add => Shape::Add,
                NodeKind::Mul => Shape::Mul,
                // Leaves never carry children.
                NodeKind::Num(_) | NodeKind::Var(_) => {
                    tracing::error!(tree, "leaf kind wired as operator");
                    return;
                }
            };
            (shape, Wiring::Op { children: edges })
        }
    };

    let respond_upward = !is_root || tree == 0;
    let mut automaton = Automaton::new(shape, respond_upward, slots.len(), opts.queries);

    // Select table: parent edge, request slots, then kind-specific channels.
    // The registration order fixes the index -> source mapping.
    let mut select = Select::new();
    let mut sources: Vec<Source> = Vec::new();
    let mut receivers: Vec<&crate::network::plan::Rx> = Vec::new();
    select.recv(&from_parent);
    sources.push(Source::Parent);
    receivers.push(&from_parent);
    for (j, slot) in slots.iter().enumerate() {
        select.recv(&slot.from_var);
        sources.push(Source::Slot(j));
        receivers.push(&slot.from_var);
    }
    match &wiring {
        Wiring::Leaf => {}
        Wiring::Var { circuit, def } => {
            select.recv(&circuit.from_circuit);
            sources.push(Source::Circuit);
            receivers.push(&circuit.from_circuit);
            if let Some(def) = def {
                select.recv(&def.from_root);
                sources.push(Source::Definition);
                receivers.push(&def.from_root);
            }
        }
        Wiring::Op { children } => {
            for (j, (_, from_child)) in children.iter().enumerate() {
                select.recv(from_child);
                sources.push(Source::Child(j));
                receivers.push(from_child);
            }
        }
    }

    let mut out: Vec<(Dest, Message)> = Vec::new();
    'listen: loop {
        let oper = select.select();
        let index = oper.index();
        let source = sources[index];
        let Ok(message) = oper.recv(receivers[index]) else {
            // Disconnection: end of input reached the network.
            break 'listen;
        };

        out.clear();
        automaton.handle(source, message, &mut out);
        for (dest, reply) in out.drain(..) {
            let sent = match (dest, &wiring) {
                (Dest::Parent, _) => to_parent.send(reply),
                (Dest::Slot(j), _) => slots[j].to_var.send(reply),
                (Dest::Child(j), Wiring::Op { children }) => children[j].0.send(reply),
                (Dest::Circuit, Wiring::Var { circuit, .. }) => circuit.to_circuit.send(reply),
                (Dest::Definition, Wiring::Var { def: Some(def), .. }) => {
                    def.to_root.send(reply)
                }
                _ => {
                    tracing::error!(tree, ?dest, "reply routed to missing endpoint");
                    break 'listen;
                }
            };
            if sent.is_err() {
                // Benign during teardown: the peer already dropped its end.
                tracing::debug!(tree, ?dest, "peer disconnected; shutting down");
                break 'listen;
            }
        }
    }

    // Close downstream edges, then collect the children they fed.
    drop(wiring);
    drop(to_parent);
    drop(slots);
    for handle in joins {
        if handle.join().is_err() {
            tracing::error!(tree, "child worker panicked");
        }
    }
}
