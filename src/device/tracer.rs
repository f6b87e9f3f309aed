//! Tracer accumulator: per-evaluation facts plus the durable module set.
//!
//! Two separate stores on purpose: `current` is scratch state reset on every
//! configure, while `modules_ever_defined` grows monotonically for the whole
//! device life and is only consumed at teardown. Folding from the former
//! into the latter happens exclusively when the info is read; callers are
//! expected to read it once per evaluation.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Facts accumulated for the current evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TracerInfo {
    pub modules_defined: BTreeSet<String>,
    pub configured_at: Option<DateTime<Utc>>,
}

/// One incremental fact from the instrumentation side.
#[derive(Debug, Clone, PartialEq)]
pub enum TracerUpdate {
    ModulesDefined(Vec<String>),
}

#[derive(Debug, Default)]
pub struct TracerAccumulator {
    current: TracerInfo,
    modules_ever_defined: BTreeSet<String>,
}

impl TracerAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh evaluation scope; the durable set is untouched.
    pub fn reset(&mut self, configured_at: DateTime<Utc>) {
        self.current = TracerInfo {
            modules_defined: BTreeSet::new(),
            configured_at: Some(configured_at),
        };
    }

    /// Merges a batch of incremental facts into the current scope.
    pub fn apply(&mut self, updates: Vec<TracerUpdate>) {
        for update in updates {
            match update {
                TracerUpdate::ModulesDefined(names) => {
                    self.current.modules_defined.extend(names);
                }
            }
        }
    }

    /// Returns the current info, folding its module names into the durable
    /// set as a side effect. This is the only fold point.
    pub fn snapshot_and_fold(&mut self) -> TracerInfo {
        self.modules_ever_defined
            .extend(self.current.modules_defined.iter().cloned());
        self.current.clone()
    }

    pub fn modules_ever_defined(&self) -> &BTreeSet<String> {
        &self.modules_ever_defined
    }

    /// Consumes the durable set; only teardown calls this.
    pub fn take_modules_ever_defined(&mut self) -> BTreeSet<String> {
        std::mem::take(&mut self.modules_ever_defined)
    }
}
