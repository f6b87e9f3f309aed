//! Memo of resolved input queries.
//!
//! Outcomes, including the negative ones, are cached exactly like
//! successes, so repeated queries for the same id never re-hit the
//! recipient. Entries disappear only through an explicit clear command.

use std::collections::HashMap;

use crate::protocol::{IoReply, Reply, ReplyError};

/// A resolved input outcome, as the round trip left it.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedInput {
    Value(serde_json::Value),
    NotFound,
    Terminated,
}

impl CachedInput {
    pub fn to_reply(&self) -> IoReply {
        match self {
            Self::Value(value) => Ok(Reply::Value(value.clone())),
            Self::NotFound => Err(ReplyError::NotFound),
            Self::Terminated => Err(ReplyError::Terminated),
        }
    }
}

#[derive(Debug, Default)]
pub struct InputCache {
    entries: HashMap<String, CachedInput>,
}

impl InputCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, input_id: &str) -> Option<&CachedInput> {
        self.entries.get(input_id)
    }

    pub fn insert(&mut self, input_id: String, outcome: CachedInput) {
        self.entries.insert(input_id, outcome);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
