//! Per-evaluation token counter.

use crate::protocol::{EvalRef, EvalToken};

/// Issues `(reference, counter)` pairs, each at most once.
#[derive(Debug, Default)]
pub struct TokenSeq {
    counter: u64,
}

impl TokenSeq {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }

    /// Returns the current token, then advances the counter.
    pub fn next(&mut self, reference: &EvalRef) -> EvalToken {
        let token = EvalToken {
            reference: reference.clone(),
            counter: self.counter,
        };
        self.counter += 1;
        token
    }
}
