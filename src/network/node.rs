//! Per-Node Protocol Automaton
//!
//! The query state machine a worker drives, factored out of the thread and
//! channel plumbing so it can be exercised message-by-message in tests.
//!
//! For every query ordinal the automaton enforces two rules: a value is
//! computed at most once, and every asker is answered — either directly from
//! the cache or by the broadcast that publishes the first answer to the parent
//! edge and to every request slot at once.

use crate::network::message::Message;

/// Which channel a message arrived on, as resolved by the worker's select
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The parent edge; for a tree root this is the controller.
    Parent,
    /// Request slot `j`: a variable leaf (elsewhere in the forest) that
    /// references the tree this root defines.
    Slot(usize),
    /// Reply from child `j` in spawn order (0 = right, 1 = left).
    Child(usize),
    /// Reply from the controller's initial-assignment table.
    Circuit,
    /// Reply from the root of the tree defining this leaf's variable.
    Definition,
}

impl Source {
    /// Requests arrive on the parent edge or a request slot; every other
    /// channel carries replies.
    pub fn is_request(self) -> bool {
        matches!(self, Source::Parent | Source::Slot(_))
    }
}

/// Where an outgoing message must be written. Mirrors [`Source`]; the worker
/// owns the matching sender for each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dest {
    Parent,
    Slot(usize),
    Child(usize),
    Circuit,
    Definition,
}

/// The node kind this automaton speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Literal leaf; replies are stateless.
    Num(i64),
    /// Variable leaf; `defined` records whether the variable has its own
    /// equation to fall back on when no assignment exists.
    Var { defined: bool },
    /// Unary minus.
    Neg,
    /// Addition.
    Add,
    /// Multiplication.
    Mul,
}

/// Per-query progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryState {
    #[default]
    Unseen,
    /// Operator: requests sent to the children.
    WaitChildren,
    /// Binary operator: first operand received and stored.
    HaveOne(i64),
    /// Variable leaf: assignment lookup sent to the controller.
    WaitCircuit,
    /// Variable leaf: request sent to the defining tree's root.
    WaitDefinition,
    /// Answered. `Some` carries the cached value, `None` a failure.
    Done(Option<i64>),
}

/// The state machine of one worker.
#[derive(Debug)]
pub struct Automaton {
    shape: Shape,
    /// Whether answers are also published on the parent edge. Suppressed for
    /// roots of every tree but variable 0's, so the controller hears exactly
    /// one voice.
    respond_upward: bool,
    /// Number of request slots (nonzero only for roots with referencing
    /// leaves).
    slots: usize,
    cache: Vec<QueryState>,
}

impl Automaton {
    pub fn new(shape: Shape, respond_upward: bool, slots: usize, queries: usize) -> Self {
        Automaton {
            shape,
            respond_upward,
            slots,
            cache: vec![QueryState::Unseen; queries],
        }
    }

    /// Current progress for `query` (test and diagnostic hook).
    pub fn state(&self, query: usize) -> QueryState {
        self.cache[query]
    }

    /// Handle one incoming message, pushing any outgoing sends into `out`.
    pub fn handle(&mut self, src: Source, msg: Message, out: &mut Vec<(Dest, Message)>) {
        match self.shape {
            Shape::Num(literal) => {
                // No cache: the answer does not depend on the query.
                if let Some(dest) = reply_dest(src) {
                    out.push((dest, Message::value(msg.query, literal)));
                }
            }
            Shape::Var { defined } => self.on_var(defined, src, msg, out),
            Shape::Neg | Shape::Add | Shape::Mul => self.on_operator(src, msg, out),
        }
    }

    fn on_var(&mut self, defined: bool, src: Source, msg: Message, out: &mut Vec<(Dest, Message)>) {
        let q = msg.query;
        match self.cache[q] {
            QueryState::Done(cached) => self.reply_cached(src, q, cached, out),
            QueryState::Unseen => {
                self.cache[q] = QueryState::WaitCircuit;
                out.push((Dest::Circuit, Message::request(q)));
            }
            QueryState::WaitCircuit => {
                if src == Source::Circuit {
                    if !msg.err {
                        // The controller had an initial assignment; it shadows
                        // any equation.
                        self.settle(q, Some(msg.val), out);
                    } else if defined {
                        self.cache[q] = QueryState::WaitDefinition;
                        out.push((Dest::Definition, Message::request(q)));
                    } else {
                        self.settle(q, None, out);
                    }
                }
            }
            QueryState::WaitDefinition => {
                if src == Source::Definition {
                    let result = (!msg.err).then_some(msg.val);
                    self.settle(q, result, out);
                }
            }
            QueryState::WaitChildren | QueryState::HaveOne(_) => {}
        }
    }

    fn on_operator(&mut self, src: Source, msg: Message, out: &mut Vec<(Dest, Message)>) {
        let q = msg.query;
        match self.cache[q] {
            QueryState::Done(cached) => self.reply_cached(src, q, cached, out),
            QueryState::Unseen => {
                self.cache[q] = QueryState::WaitChildren;
                out.push((Dest::Child(0), Message::request(q)));
                if matches!(self.shape, Shape::Add | Shape::Mul) {
                    out.push((Dest::Child(1), Message::request(q)));
                }
            }
            QueryState::WaitChildren => {
                if let Source::Child(_) = src {
                    if msg.err {
                        self.settle(q, None, out);
                    } else if self.shape == Shape::Neg {
                        self.settle(q, Some(msg.val.wrapping_neg()), out);
                    } else {
                        self.cache[q] = QueryState::HaveOne(msg.val);
                    }
                }
            }
            QueryState::HaveOne(first) => {
                if let Source::Child(_) = src {
                    if msg.err {
                        self.settle(q, None, out);
                    } else {
                        let combined = match self.shape {
                            Shape::Add => first.wrapping_add(msg.val),
                            Shape::Mul => first.wrapping_mul(msg.val),
                            // HaveOne is only ever entered by binary shapes.
                            Shape::Neg | Shape::Num(_) | Shape::Var { .. } => return,
                        };
                        self.settle(q, Some(combined), out);
                    }
                }
            }
            QueryState::WaitCircuit | QueryState::WaitDefinition => {}
        }
    }

    /// Cache the outcome and broadcast it: upward to the parent edge (unless
    /// suppressed) and to every request slot.
    fn settle(&mut self, q: usize, result: Option<i64>, out: &mut Vec<(Dest, Message)>) {
        self.cache[q] = QueryState::Done(result);
        let reply = Message::outcome(q, result);
        if self.respond_upward {
            out.push((Dest::Parent, reply));
        }
        for j in 0..self.slots {
            out.push((Dest::Slot(j), reply));
        }
    }

    /// Serve a request from the cache. Replies go only to genuine askers;
    /// stale replies arriving after settlement are dropped.
    fn reply_cached(
        &self,
        src: Source,
        q: usize,
        cached: Option<i64>,
        out: &mut Vec<(Dest, Message)>,
    ) {
        if let Some(dest) = reply_dest(src) {
            out.push((dest, Message::outcome(q, cached)));
        }
    }
}

/// The write-back edge for a request source, `None` for reply sources.
fn reply_dest(src: Source) -> Option<Dest> {
    match src {
        Source::Parent => Some(Dest::Parent),
        Source::Slot(j) => Some(Dest::Slot(j)),
        Source::Child(_) | Source::Circuit | Source::Definition => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(a: &mut Automaton, src: Source, msg: Message) -> Vec<(Dest, Message)> {
        let mut out = Vec::new();
        a.handle(src, msg, &mut out);
        out
    }

    #[test]
    fn test_num_replies_to_each_asker() {
        let mut a = Automaton::new(Shape::Num(42), true, 2, 1);

        assert_eq!(
            drive(&mut a, Source::Parent, Message::request(0)),
            vec![(Dest::Parent, Message::value(0, 42))]
        );
        assert_eq!(
            drive(&mut a, Source::Slot(1), Message::request(0)),
            vec![(Dest::Slot(1), Message::value(0, 42))]
        );
    }

    #[test]
    fn test_unary_negates_and_broadcasts() {
        let mut a = Automaton::new(Shape::Neg, true, 1, 2);

        assert_eq!(
            drive(&mut a, Source::Parent, Message::request(1)),
            vec![(Dest::Child(0), Message::request(1))]
        );
        assert_eq!(
            drive(&mut a, Source::Child(0), Message::value(1, 5)),
            vec![
                (Dest::Parent, Message::value(1, -5)),
                (Dest::Slot(0), Message::value(1, -5)),
            ]
        );
        assert_eq!(a.state(1), QueryState::Done(Some(-5)));
    }

    #[test]
    fn test_binary_combines_in_arrival_order() {
        let mut a = Automaton::new(Shape::Add, true, 0, 1);

        assert_eq!(
            drive(&mut a, Source::Parent, Message::request(0)),
            vec![
                (Dest::Child(0), Message::request(0)),
                (Dest::Child(1), Message::request(0)),
            ]
        );
        // First operand is held, whichever child answers first.
        assert!(drive(&mut a, Source::Child(1), Message::value(0, 2)).is_empty());
        assert_eq!(a.state(0), QueryState::HaveOne(2));
        assert_eq!(
            drive(&mut a, Source::Child(0), Message::value(0, 3)),
            vec![(Dest::Parent, Message::value(0, 5))]
        );
    }

    #[test]
    fn test_multiplication_wraps() {
        let mut a = Automaton::new(Shape::Mul, true, 0, 1);
        drive(&mut a, Source::Parent, Message::request(0));
        drive(&mut a, Source::Child(0), Message::value(0, i64::MAX));
        let out = drive(&mut a, Source::Child(1), Message::value(0, 2));
        assert_eq!(out, vec![(Dest::Parent, Message::value(0, i64::MAX.wrapping_mul(2)))]);
    }

    #[test]
    fn test_child_failure_propagates() {
        let mut a = Automaton::new(Shape::Add, true, 1, 1);
        drive(&mut a, Source::Parent, Message::request(0));
        let out = drive(&mut a, Source::Child(0), Message::failure(0));
        assert_eq!(
            out,
            vec![
                (Dest::Parent, Message::failure(0)),
                (Dest::Slot(0), Message::failure(0)),
            ]
        );
        // The second child's late reply is dropped, not recombined.
        assert!(drive(&mut a, Source::Child(1), Message::value(0, 9)).is_empty());
        assert_eq!(a.state(0), QueryState::Done(None));
    }

    #[test]
    fn test_cache_idempotence() {
        let mut a = Automaton::new(Shape::Add, true, 0, 1);
        drive(&mut a, Source::Parent, Message::request(0));
        drive(&mut a, Source::Child(0), Message::value(0, 2));
        let first = drive(&mut a, Source::Child(1), Message::value(0, 3));
        let again = drive(&mut a, Source::Parent, Message::request(0));
        let again2 = drive(&mut a, Source::Parent, Message::request(0));

        assert_eq!(first, vec![(Dest::Parent, Message::value(0, 5))]);
        assert_eq!(again, vec![(Dest::Parent, Message::value(0, 5))]);
        assert_eq!(again, again2);
    }

    #[test]
    fn test_requests_while_pending_are_served_by_broadcast() {
        let mut a = Automaton::new(Shape::Neg, true, 2, 1);
        drive(&mut a, Source::Parent, Message::request(0));
        // A slot asks while the children are still working: no direct reply...
        assert!(drive(&mut a, Source::Slot(0), Message::request(0)).is_empty());
        // ...because the broadcast reaches every slot anyway.
        let out = drive(&mut a, Source::Child(0), Message::value(0, 7));
        assert!(out.contains(&(Dest::Slot(0), Message::value(0, -7))));
        assert!(out.contains(&(Dest::Slot(1), Message::value(0, -7))));
    }

    #[test]
    fn test_var_assignment_answer() {
        let mut a = Automaton::new(Shape::Var { defined: true }, true, 0, 1);

        assert_eq!(
            drive(&mut a, Source::Parent, Message::request(0)),
            vec![(Dest::Circuit, Message::request(0))]
        );
        assert_eq!(
            drive(&mut a, Source::Circuit, Message::value(0, 10)),
            vec![(Dest::Parent, Message::value(0, 10))]
        );
    }

    #[test]
    fn test_var_falls_back_to_definition() {
        let mut a = Automaton::new(Shape::Var { defined: true }, true, 0, 1);
        drive(&mut a, Source::Parent, Message::request(0));
        assert_eq!(
            drive(&mut a, Source::Circuit, Message::failure(0)),
            vec![(Dest::Definition, Message::request(0))]
        );
        assert_eq!(
            drive(&mut a, Source::Definition, Message::value(0, 3)),
            vec![(Dest::Parent, Message::value(0, 3))]
        );
    }

    #[test]
    fn test_var_without_definition_fails() {
        let mut a = Automaton::new(Shape::Var { defined: false }, true, 0, 1);
        drive(&mut a, Source::Parent, Message::request(0));
        assert_eq!(
            drive(&mut a, Source::Circuit, Message::failure(0)),
            vec![(Dest::Parent, Message::failure(0))]
        );
        assert_eq!(a.state(0), QueryState::Done(None));
    }

    #[test]
    fn test_suppressed_upward_reply_still_feeds_slots() {
        // Root of a tree other than variable 0: slots hear the answer, the
        // controller does not.
        let mut a = Automaton::new(Shape::Num(3), false, 1, 1);
        let mut full = Automaton::new(Shape::Neg, false, 1, 1);

        // Stateless literal roots reply per asker, so suppression is moot...
        assert_eq!(
            drive(&mut a, Source::Slot(0), Message::request(0)),
            vec![(Dest::Slot(0), Message::value(0, 3))]
        );
        // ...but an operator root publishes only to its slots.
        drive(&mut full, Source::Slot(0), Message::request(0));
        assert_eq!(
            drive(&mut full, Source::Child(0), Message::value(0, 1)),
            vec![(Dest::Slot(0), Message::value(0, -1))]
        );
    }

    #[test]
    fn test_unsolicited_reply_triggers_evaluation() {
        // A broadcast can reach a leaf that never asked; in the untouched
        // state it is treated as a request and evaluation proceeds.
        let mut a = Automaton::new(Shape::Var { defined: true }, true, 0, 1);
        assert_eq!(
            drive(&mut a, Source::Definition, Message::value(0, 9)),
            vec![(Dest::Circuit, Message::request(0))]
        );
        assert_eq!(a.state(0), QueryState::WaitCircuit);
    }

    #[test]
    fn test_queries_are_independent() {
        let mut a = Automaton::new(Shape::Add, true, 0, 3);
        drive(&mut a, Source::Parent, Message::request(0));
        drive(&mut a, Source::Parent, Message::request(2));
        drive(&mut a, Source::Child(0), Message::value(2, 10));
        drive(&mut a, Source::Child(0), Message::value(0, 1));
        drive(&mut a, Source::Child(1), Message::value(0, 2));

        assert_eq!(a.state(0), QueryState::Done(Some(3)));
        assert_eq!(a.state(2), QueryState::HaveOne(10));
        assert_eq!(a.state(1), QueryState::Unseen);
    }
}
