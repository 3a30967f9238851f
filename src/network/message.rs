//! Wire Message
//!
//! The single fixed record every channel in the network carries. Receivers
//! never inspect a sender id inside the payload; they distinguish peers by
//! which channel the message arrived on.

/// One unit of network traffic.
///
/// A request and a reply share the same shape: `query` names the query
/// ordinal, `val` carries the payload of a successful reply (and is ignored on
/// requests), `err` marks a reply whose subtree could not be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    /// Query ordinal, dense from zero in input order.
    pub query: usize,
    /// Reply payload; meaningless when `err` is set or on requests.
    pub val: i64,
    /// In-band failure bit; propagates upward through operator nodes.
    pub err: bool,
}

impl Message {
    /// A request for the value of `query`.
    pub fn request(query: usize) -> Self {
        Message {
            query,
            val: 0,
            err: false,
        }
    }

    /// A successful reply.
    pub fn value(query: usize, val: i64) -> Self {
        Message {
            query,
            val,
            err: false,
        }
    }

    /// A failed reply.
    pub fn failure(query: usize) -> Self {
        Message {
            query,
            val: 0,
            err: true,
        }
    }

    /// Build the reply for a cached outcome.
    pub fn outcome(query: usize, result: Option<i64>) -> Self {
        match result {
            Some(val) => Message::value(query, val),
            None => Message::failure(query),
        }
    }
}
