//! Object-liveness tracker collaborator.
//!
//! Evaluated code registers opaque objects whose usefulness is tied to a
//! liveness scope: an object referenced by the evaluator lives as long as
//! the *current evaluation's* output, anything else as long as the
//! requesting process. The tracker's own algorithm is external to this
//! crate; [`ObjectTracker`] is the boundary, and [`InMemoryTracker`] is the
//! embeddable implementation used in tests.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{peer::PeerId, protocol::EvalRef};

/// Opaque identifier of a tracked object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(String);

impl From<String> for ObjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How long a reference keeps its object alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessScope {
    /// While the given evaluation's output is alive.
    Evaluation(EvalRef),
    /// While the owning process is alive.
    Process,
}

/// A single registered reference: who holds it and for how long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessKey {
    pub owner: PeerId,
    pub scope: LivenessScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("object tracker unavailable: {0}")]
    Unavailable(String),
}

/// External collaborator tracking object liveness.
#[async_trait]
pub trait ObjectTracker: Send + Sync {
    /// Registers a reference keeping `object` alive under `key`.
    async fn add_reference(&self, object: ObjectId, key: LivenessKey) -> Result<(), TrackerError>;

    /// Requests that `destination` be notified with `payload` once `object`
    /// becomes unreferenced. The reply is passed back to the caller
    /// unchanged.
    async fn monitor(
        &self,
        object: ObjectId,
        destination: PeerId,
        payload: serde_json::Value,
        ack: bool,
    ) -> Result<serde_json::Value, TrackerError>;
}

/// Notification fired when a monitored object is released.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorNotice {
    pub destination: PeerId,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone)]
struct MonitorEntry {
    destination: PeerId,
    payload: serde_json::Value,
}

/// DashMap-backed tracker for embedding and tests.
///
/// Objects are released manually via [`InMemoryTracker::release`], which
/// drops all references and returns the monitor notices that fired.
#[derive(Debug, Default)]
pub struct InMemoryTracker {
    references: DashMap<ObjectId, Vec<LivenessKey>>,
    monitors: DashMap<ObjectId, Vec<MonitorEntry>>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// References currently registered for `object`.
    pub fn references_of(&self, object: &ObjectId) -> Vec<LivenessKey> {
        self.references
            .get(object)
            .map(|keys| keys.clone())
            .unwrap_or_default()
    }

    /// Drops every reference to `object` and fires its monitors.
    pub fn release(&self, object: &ObjectId) -> Vec<MonitorNotice> {
        self.references.remove(object);
        self.monitors
            .remove(object)
            .map(|(_, entries)| {
                entries
                    .into_iter()
                    .map(|entry| MonitorNotice {
                        destination: entry.destination,
                        payload: entry.payload,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObjectTracker for InMemoryTracker {
    async fn add_reference(&self, object: ObjectId, key: LivenessKey) -> Result<(), TrackerError> {
        self.references.entry(object).or_default().push(key);
        Ok(())
    }

    async fn monitor(
        &self,
        object: ObjectId,
        destination: PeerId,
        payload: serde_json::Value,
        ack: bool,
    ) -> Result<serde_json::Value, TrackerError> {
        self.monitors.entry(object).or_default().push(MonitorEntry {
            destination,
            payload,
        });
        Ok(if ack {
            serde_json::Value::String("ok".to_string())
        } else {
            serde_json::Value::Null
        })
    }
}
