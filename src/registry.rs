//! # Equation Registry
//!
//! Run-wide table mapping each variable index to the parse tree defining it,
//! plus the topological ordering the dependency analysis emits.
//!
//! The registry has a single-writer lifecycle: it is populated during ingest,
//! then frozen and shared immutably with the planner. At most one equation per
//! variable is ever accepted, and every accepted equation leaves the reference
//! graph acyclic.

use crate::ast::{ExprArena, NodeId};
use crate::dependency;

/// Why an equation was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefineError {
    /// The variable already has an equation.
    #[error("variable x[{var}] is already defined")]
    Redefined { var: usize },

    /// Accepting the equation would close a dependency cycle.
    #[error("defining x[{var}] would close a dependency cycle")]
    Cyclic { var: usize },

    /// A variable index outside the declared variable space.
    #[error("variable x[{var}] is outside the declared space of {space}")]
    OutOfRange { var: usize, space: usize },
}

/// The equation forest of one run.
#[derive(Debug)]
pub struct Registry {
    arena: ExprArena,
    trees: Vec<Option<NodeId>>,
    topo: Vec<usize>,
}

impl Registry {
    /// Create an empty registry over `var_space` variables `x[0]..x[var_space-1]`.
    pub fn new(var_space: usize) -> Self {
        Registry {
            arena: ExprArena::new(),
            trees: vec![None; var_space],
            topo: Vec::new(),
        }
    }

    /// Size of the declared variable space.
    pub fn var_space(&self) -> usize {
        self.trees.len()
    }

    /// Shared view of the node arena.
    pub fn arena(&self) -> &ExprArena {
        &self.arena
    }

    /// Mutable arena access for the parser during ingest.
    pub fn arena_mut(&mut self) -> &mut ExprArena {
        &mut self.arena
    }

    /// The tree defining `v`, if any.
    pub fn tree(&self, v: usize) -> Option<NodeId> {
        self.trees.get(v).copied().flatten()
    }

    /// Dependency-first post-order over every defined variable.
    pub fn topo(&self) -> &[usize] {
        &self.topo
    }

    /// Number of accepted equations.
    pub fn equation_count(&self) -> usize {
        self.topo.len()
    }

    /// Accept the equation `x[v] = <tree rooted at root>`, or reject it and
    /// leave the registry unchanged.
    ///
    /// Rejection reasons: `v` (or any referenced variable) outside the
    /// declared space, `v` already defined, or a dependency cycle that the
    /// equation would close. The acyclicity check runs over the whole forest
    /// after each tentative insertion, and the topological order is refreshed
    /// on every acceptance.
    pub fn define(&mut self, v: usize, root: NodeId) -> Result<(), DefineError> {
        let space = self.var_space();
        if v >= space {
            return Err(DefineError::OutOfRange { var: v, space });
        }

        let mut refs = Vec::new();
        self.arena.var_refs(root, &mut refs);
        if let Some(&out) = refs.iter().find(|&&w| w >= space) {
            return Err(DefineError::OutOfRange { var: out, space });
        }

        if self.trees[v].is_some() {
            return Err(DefineError::Redefined { var: v });
        }

        self.trees[v] = Some(root);
        match dependency::topo_order(&self.arena, &self.trees) {
            Some(order) => {
                tracing::debug!(
                    var = v,
                    references = refs.len(),
                    equations = order.len(),
                    "equation accepted"
                );
                self.topo = order;
                Ok(())
            }
            None => {
                self.trees[v] = None;
                Err(DefineError::Cyclic { var: v })
            }
        }
    }
}
