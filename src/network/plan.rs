//! Channel Plan
//!
//! Allocates every channel of the network before any thread starts, and
//! distributes each endpoint into the single seat that will own it. Ownership
//! is the whole hygiene story: an endpoint is either moved into its owner or
//! dropped here, so end-of-input can propagate as channel disconnection and no
//! stray handle can keep the network alive.
//!
//! Three families of channels exist:
//! - tree edges between a parent and each child, created per edge;
//! - cross-tree edges between a `Var` leaf labeled `w` and the root of the
//!   tree defining `x[w]` (the root side is a numbered request slot);
//! - circuit edges between every `Var` leaf and the controller.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::ast::NodeKind;
use crate::network::message::Message;
use crate::registry::Registry;

pub(crate) type Tx = Sender<Message>;
pub(crate) type Rx = Receiver<Message>;

/// Create one directed pipe. Capacity 0 means unbounded, the analogue of
/// trusting the transport buffer; in-flight traffic per channel stays within
/// a few messages per active query either way.
fn pipe(capacity: usize) -> (Tx, Rx) {
    if capacity == 0 {
        unbounded()
    } else {
        bounded(capacity)
    }
}

/// A child subtree plus the parent-side endpoints of its tree edge.
pub struct ChildLink {
    pub seat: Seat,
    pub to_child: Tx,
    pub from_child: Rx,
}

/// Root-side endpoints of one request slot (a `Var` leaf somewhere in the
/// forest that references this tree's variable).
pub struct VarSlot {
    pub to_var: Tx,
    pub from_var: Rx,
}

/// Leaf-side endpoints toward the root of the defining tree.
pub struct DefLink {
    pub to_root: Tx,
    pub from_root: Rx,
}

/// Leaf-side endpoints toward the controller.
pub struct CircuitLink {
    pub to_circuit: Tx,
    pub from_circuit: Rx,
}

/// Kind-specific wiring of a seat.
pub enum SeatKind {
    /// Literal leaf.
    Num(i64),
    /// Variable leaf. `def` is present iff the referenced variable has its
    /// own equation.
    Var {
        label: usize,
        circuit: CircuitLink,
        def: Option<DefLink>,
    },
    /// Operator node; children in spawn order (right first, then left).
    Op {
        kind: NodeKind,
        children: Vec<ChildLink>,
    },
}

/// Everything one worker owns: its identity and every channel endpoint it is
/// allowed to touch.
pub struct Seat {
    /// Variable whose equation this node belongs to.
    pub tree: usize,
    /// Whether this seat is the top of its tree.
    pub is_root: bool,
    pub kind: SeatKind,
    pub from_parent: Rx,
    pub to_parent: Tx,
    /// Request slots; populated only on root seats.
    pub slots: Vec<VarSlot>,
}

impl Seat {
    /// Short kind tag for thread names and diagnostics.
    pub fn tag(&self) -> &'static str {
        match self.kind {
            SeatKind::Num(_) => "num",
            SeatKind::Var { .. } => "var",
            SeatKind::Op {
                kind: NodeKind::Neg,
                ..
            } => "neg",
            SeatKind::Op {
                kind: NodeKind::Add,
                ..
            } => "add",
            SeatKind::Op { .. } => "mul",
        }
    }
}

/// A spawned-to-be tree root plus the controller-side endpoints of its parent
/// edge.
pub struct PlannedRoot {
    pub var: usize,
    pub seat: Seat,
    pub to_root: Tx,
    pub from_root: Rx,
}

/// Controller-side endpoints of one `Var` leaf's circuit edge.
pub struct LeafLink {
    /// The variable the leaf references (what the lookup is about).
    pub label: usize,
    pub to_var: Tx,
    pub from_var: Rx,
}

/// The fully wired network, ready to spawn.
pub struct Plan {
    /// Tree roots in spawn order (dependents before their dependencies, the
    /// reverse of the registry's topological order).
    pub roots: Vec<PlannedRoot>,
    /// One entry per `Var` leaf in the forest.
    pub leaves: Vec<LeafLink>,
}

impl Plan {
    /// Total number of workers the plan will spawn.
    pub fn worker_count(&self, registry: &Registry) -> usize {
        registry
            .topo()
            .iter()
            .filter_map(|&v| registry.tree(v))
            .map(|root| registry.arena().subtree_len(root))
            .sum()
    }
}

/// Wire the whole forest.
pub fn build(registry: &Registry, channel_capacity: usize) -> Plan {
    let space = registry.var_space();
    let mut slots: Vec<Vec<VarSlot>> = (0..space).map(|_| Vec::new()).collect();
    let mut leaves = Vec::new();

    // Pass 1: build every tree's seat hierarchy, accumulating request slots
    // for the roots they reference. Dependents are walked first so slot
    // numbering is stable across runs.
    let mut built: Vec<Option<Seat>> = (0..space).map(|_| None).collect();
    let mut parent_edges: Vec<Option<(Tx, Rx)>> = (0..space).map(|_| None).collect();
    for &v in registry.topo().iter().rev() {
        let Some(root) = registry.tree(v) else {
            continue;
        };
        let (to_root, from_parent) = pipe(channel_capacity);
        let (to_parent, from_root) = pipe(channel_capacity);
        let seat = build_seat(
            registry,
            v,
            root,
            from_parent,
            to_parent,
            channel_capacity,
            &mut slots,
            &mut leaves,
        );
        built[v] = Some(seat);
        parent_edges[v] = Some((to_root, from_root));
    }

    // Pass 2: promote each tree's top seat to a root. Slots could not be
    // attached during pass 1 because a leaf may reference a tree whose seat
    // is built later.
    let mut roots = Vec::new();
    for &v in registry.topo().iter().rev() {
        let (Some(mut seat), Some((to_root, from_root))) =
            (built[v].take(), parent_edges[v].take())
        else {
            continue;
        };
        seat.is_root = true;
        seat.slots = std::mem::take(&mut slots[v]);
        roots.push(PlannedRoot {
            var: v,
            seat,
            to_root,
            from_root,
        });
    }

    tracing::debug!(
        trees = roots.len(),
        var_leaves = leaves.len(),
        "network plan assembled"
    );
    Plan { roots, leaves }
}

/// Recursively build the seat subtree for `node`, creating the child edges on
/// the way down and registering leaf endpoints as they appear.
#[allow(clippy::too_many_arguments)]
fn build_seat(
    registry: &Registry,
    tree: usize,
    node: crate::ast::NodeId,
    from_parent: Rx,
    to_parent: Tx,
    capacity: usize,
    slots: &mut [Vec<VarSlot>],
    leaves: &mut Vec<LeafLink>,
) -> Seat {
    let entry = *registry.arena().node(node);
    let kind = match entry.kind {
        NodeKind::Num(value) => SeatKind::Num(value),
        NodeKind::Var(label) => {
            // Circuit edge: every variable leaf can ask the controller for an
            // initial assignment.
            let (to_circuit, from_var) = pipe(capacity);
            let (to_var, from_circuit) = pipe(capacity);
            leaves.push(LeafLink {
                label,
                to_var,
                from_var,
            });

            // Cross-tree edge, only when the variable has a defining tree.
            let def = registry.tree(label).map(|_| {
                let (to_root, slot_from_var) = pipe(capacity);
                let (slot_to_var, from_root) = pipe(capacity);
                slots[label].push(VarSlot {
                    to_var: slot_to_var,
                    from_var: slot_from_var,
                });
                DefLink { to_root, from_root }
            });

            SeatKind::Var {
                label,
                circuit: CircuitLink {
                    to_circuit,
                    from_circuit,
                },
                def,
            }
        }
        NodeKind::Neg | NodeKind::Add | NodeKind::Mul => {
            let mut children = Vec::new();
            // Right child first, then left: the order workers spawn and the
            // order the select table lists them.
            for child in [entry.right, entry.left].into_iter().flatten() {
                let (to_child, child_from_parent) = pipe(capacity);
                let (child_to_parent, from_child) = pipe(capacity);
                let seat = build_seat(
                    registry,
                    tree,
                    child,
                    child_from_parent,
                    child_to_parent,
                    capacity,
                    slots,
                    leaves,
                );
                children.push(ChildLink {
                    seat,
                    to_child,
                    from_child,
                });
            }
            SeatKind::Op {
                kind: entry.kind,
                children,
            }
        }
    };

    Seat {
        tree,
        is_root: false,
        kind,
        from_parent,
        to_parent,
        slots: Vec::new(),
    }
}
