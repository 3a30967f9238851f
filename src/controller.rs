//! # Controller
//!
//! The top-level driver of a run. It ingests the textual input (equations,
//! then queries), prints a verdict line per labeled input, spins up the
//! worker network, seeds variable 0's root with each query, and services the
//! initial-assignment lookups that variable leaves send back.
//!
//! ## Run shape
//!
//! 1. Read the `N K V` header.
//! 2. Ingest `K` equations, printing `P`/`F` verdicts in input order.
//! 3. Plan and spawn the worker network (one thread per parse-tree node).
//! 4. Read `N-K` queries; answer trivial ones directly, dispatch the rest.
//! 5. Service leaf lookups and collect root replies until every query is
//!    answered; results print as they arrive, matched by label.
//! 6. Drop every controller-held endpoint and join the root workers.

use std::collections::HashMap;
use std::io::{BufRead, Write};

use crossbeam_channel::Select;

use crate::config::Config;
use crate::network::plan::{self, LeafLink};
use crate::network::worker::{self, SpawnOpts};
use crate::network::{Message, NetworkError};
use crate::parser;
use crate::registry::Registry;

/// Controller failure. In-band verdicts (`F` lines) are not errors; these are
/// the conditions that abort the run.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed header: {message}")]
    MalformedHeader { message: String },

    #[error("input ended early: {missing} labeled line(s) missing")]
    UnexpectedEof { missing: usize },

    #[error("line label {found:?} is not an integer")]
    BadLabel { found: String },

    #[error("declared variable space {declared} exceeds the configured limit {limit}")]
    VariableSpaceExceeded { declared: usize, limit: usize },

    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Per-run accounting, reported by [`run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Summary {
    pub equations_accepted: usize,
    pub equations_rejected: usize,
    pub queries_answered: usize,
    pub queries_failed: usize,
}

/// One parsed query line.
struct Query {
    label: i64,
    /// `None` marks a malformed line; it fails without touching the network.
    assigns: Option<HashMap<usize, i64>>,
}

/// Drive a full run: read `input`, write verdict lines to `out`.
pub fn run<R: BufRead, W: Write>(
    mut input: R,
    mut out: W,
    config: &Config,
) -> Result<Summary, ControllerError> {
    let mut summary = Summary::default();

    let (total, equations, var_space) = read_header(&mut input)?;
    let query_count = total - equations;
    let limit = config.limits.max_variables;
    if var_space > limit {
        return Err(ControllerError::VariableSpaceExceeded {
            declared: var_space,
            limit,
        });
    }

    // Phase 1: equations, verdict per line in input order.
    let mut registry = Registry::new(var_space);
    for index in 0..equations {
        let line = labeled_line(&mut input, total - index)?;
        let (label, rest) = split_label(&line)?;
        let verdict = ingest_equation(&mut registry, rest);
        match verdict {
            Ok(()) => {
                summary.equations_accepted += 1;
                writeln!(out, "{label} P")?;
            }
            Err(reason) => {
                tracing::debug!(label, %reason, "equation rejected");
                summary.equations_rejected += 1;
                writeln!(out, "{label} F")?;
            }
        }
    }
    out.flush()?;

    // Phase 2: the network. Channels first, then one thread per node.
    let plan = plan::build(&registry, config.network.channel_capacity);
    let opts = SpawnOpts {
        queries: query_count,
        stack_size: config.network.worker_stack_size,
    };
    tracing::debug!(
        workers = plan.worker_count(&registry),
        queries = query_count,
        "spawning worker network"
    );

    let mut handles = Vec::new();
    let mut root_senders = Vec::new();
    let mut root_zero = None;
    for planned in plan.roots {
        let (var, to_root, from_root) = (planned.var, planned.to_root, planned.from_root);
        handles.push(worker::spawn(planned.seat, opts)?);
        if var == 0 {
            root_zero = Some((to_root, from_root));
        } else {
            root_senders.push(to_root);
            // Replies from roots of other variables are suppressed; the
            // receiver is simply dropped here.
            drop(from_root);
        }
    }
    let leaves = plan.leaves;

    // Phase 3: queries.
    let mut queries = Vec::with_capacity(query_count);
    for index in 0..query_count {
        let line = labeled_line(&mut input, query_count - index)?;
        let (label, rest) = split_label(&line)?;
        let assigns = match parser::parse_assignments(rest) {
            Ok(pairs) if pairs.iter().all(|&(v, _)| v < var_space) => {
                Some(pairs.into_iter().collect::<HashMap<_, _>>())
            }
            Ok(_) => None,
            Err(reason) => {
                tracing::debug!(label, %reason, "query rejected");
                None
            }
        };
        queries.push(Query { label, assigns });
    }

    let mut answered = 0usize;
    match &root_zero {
        None => {
            // Nothing can compute variable 0.
            for query in &queries {
                writeln!(out, "{} F", query.label)?;
                summary.queries_failed += 1;
                answered += 1;
            }
        }
        Some((to_root, _)) => {
            for (ordinal, query) in queries.iter().enumerate() {
                match &query.assigns {
                    None => {
                        writeln!(out, "{} F", query.label)?;
                        summary.queries_failed += 1;
                        answered += 1;
                    }
                    Some(assigns) => {
                        if let Some(&direct) = assigns.get(&0) {
                            // An assignment for x[0] shadows its equation.
                            writeln!(out, "{} P {}", query.label, direct)?;
                            summary.queries_answered += 1;
                            answered += 1;
                        } else if to_root.send(Message::request(ordinal)).is_err() {
                            return Err(NetworkError::Disconnected.into());
                        }
                    }
                }
            }
        }
    }

    // Phase 4: event loop. One reply arrives per dispatched query; leaf
    // lookups are serviced against the per-query assignments throughout.
    if answered < query_count {
        let (_, from_root) = root_zero
            .as_ref()
            .ok_or(NetworkError::Disconnected)?;
        let mut select = Select::new();
        select.recv(from_root);
        for leaf in &leaves {
            select.recv(&leaf.from_var);
        }

        while answered < query_count {
            let oper = select.select();
            let index = oper.index();
            if index == 0 {
                let reply = oper.recv(from_root).map_err(|_| NetworkError::Disconnected)?;
                let query = &queries[reply.query];
                if reply.err {
                    writeln!(out, "{} F", query.label)?;
                    summary.queries_failed += 1;
                } else {
                    writeln!(out, "{} P {}", query.label, reply.val)?;
                    summary.queries_answered += 1;
                }
                answered += 1;
            } else {
                let leaf = &leaves[index - 1];
                let request = oper
                    .recv(&leaf.from_var)
                    .map_err(|_| NetworkError::Disconnected)?;
                let reply = lookup(&queries, request.query, leaf);
                if leaf.to_var.send(reply).is_err() {
                    return Err(NetworkError::Disconnected.into());
                }
            }
        }
    }
    out.flush()?;

    // Phase 5: teardown. Dropping every controller-held endpoint disconnects
    // the network; the worker trees drain and exit bottom-up.
    drop(root_zero);
    drop(root_senders);
    drop(leaves);
    for handle in handles {
        handle.join().map_err(|_| NetworkError::WorkerPanicked)?;
    }

    Ok(summary)
}

/// Answer one leaf lookup from the query's assignment list.
fn lookup(queries: &[Query], ordinal: usize, leaf: &LeafLink) -> Message {
    let assigned = queries
        .get(ordinal)
        .and_then(|q| q.assigns.as_ref())
        .and_then(|a| a.get(&leaf.label).copied());
    match assigned {
        Some(value) => Message::value(ordinal, value),
        None => Message::failure(ordinal),
    }
}

/// Parse one equation body and register it; any failure is an `F` verdict.
fn ingest_equation(registry: &mut Registry, body: &str) -> Result<(), String> {
    let (var, root) =
        parser::parse_equation(registry.arena_mut(), body).map_err(|e| e.to_string())?;
    registry.define(var, root).map_err(|e| e.to_string())
}

/// Read the `N K V` header line.
fn read_header<R: BufRead>(input: &mut R) -> Result<(usize, usize, usize), ControllerError> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(ControllerError::MalformedHeader {
            message: "empty input".to_string(),
        });
    }
    let mut fields = line.split_whitespace().map(str::parse::<usize>);
    let mut next = |name: &str| {
        fields
            .next()
            .and_then(Result::ok)
            .ok_or_else(|| ControllerError::MalformedHeader {
                message: format!("missing or invalid field: {name}"),
            })
    };
    let total = next("total line count")?;
    let equations = next("equation count")?;
    let var_space = next("variable space")?;
    if equations > total {
        return Err(ControllerError::MalformedHeader {
            message: format!("equation count {equations} exceeds total {total}"),
        });
    }
    Ok((total, equations, var_space))
}

/// Read the next labeled line; `missing` sizes the EOF diagnostic.
fn labeled_line<R: BufRead>(input: &mut R, missing: usize) -> Result<String, ControllerError> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(ControllerError::UnexpectedEof { missing });
    }
    Ok(line)
}

/// Split `<label> rest...`; the label is an integer echoed back in verdicts.
fn split_label(line: &str) -> Result<(i64, &str), ControllerError> {
    let trimmed = line.trim_start();
    let end = trimmed
        .find(char::is_whitespace)
        .unwrap_or(trimmed.len());
    let (head, rest) = trimmed.split_at(end);
    let label = head.parse::<i64>().map_err(|_| ControllerError::BadLabel {
        found: head.to_string(),
    })?;
    Ok((label, rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::io::Cursor;

    fn run_text(input: &str) -> (Vec<String>, Summary) {
        let mut out = Vec::new();
        let summary =
            run(Cursor::new(input), &mut out, &Config::default()).expect("run should succeed");
        let lines = String::from_utf8(out)
            .expect("utf8 output")
            .lines()
            .map(str::to_string)
            .collect();
        (lines, summary)
    }

    #[test]
    fn test_no_equation_for_variable_zero() {
        let (lines, summary) = run_text("2 1 2\n1 x[1] = 5\n2 x[1]=3\n");
        assert_eq!(lines, vec!["1 P", "2 F"]);
        assert_eq!(summary.queries_failed, 1);
    }

    #[test]
    fn test_direct_answer_from_assignment() {
        let (lines, _) = run_text("2 1 1\n1 x[0] = 5\n2 x[0]=9\n");
        assert_eq!(lines, vec!["1 P", "2 P 9"]);
    }

    #[test]
    fn test_malformed_query_line_fails_alone() {
        let (lines, summary) = run_text("3 1 1\n1 x[0] = 2\n2 x[0]=oops\n3\n");
        assert_eq!(lines[0], "1 P");
        assert!(lines.contains(&"2 F".to_string()));
        assert!(lines.contains(&"3 P 2".to_string()));
        assert_eq!(summary.queries_failed, 1);
        assert_eq!(summary.queries_answered, 1);
    }

    #[test]
    fn test_header_validation() {
        let mut out = Vec::new();
        let err = run(Cursor::new("1 2 1\n"), &mut out, &Config::default()).unwrap_err();
        assert!(matches!(err, ControllerError::MalformedHeader { .. }));
    }

    #[test]
    fn test_truncated_input() {
        let mut out = Vec::new();
        let err = run(Cursor::new("3 2 1\n1 x[0] = 5\n"), &mut out, &Config::default())
            .unwrap_err();
        assert!(matches!(err, ControllerError::UnexpectedEof { .. }));
    }

    #[test]
    fn test_variable_space_limit() {
        let mut config = Config::default();
        config.limits.max_variables = 4;
        let mut out = Vec::new();
        let err = run(Cursor::new("1 0 5\n1\n"), &mut out, &config).unwrap_err();
        assert!(matches!(
            err,
            ControllerError::VariableSpaceExceeded {
                declared: 5,
                limit: 4
            }
        ));
    }
}
