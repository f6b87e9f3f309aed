//! # I/O request protocol
//!
//! The wire surface between the evaluator and the device. It mirrors a
//! generic character-I/O protocol: output requests, input requests, option
//! negotiation, geometry queries, and batches, plus a reserved extension
//! namespace used by evaluated code. A consumer that does not know the
//! extension shapes (or anything else) lands in [`IoRequest::Unknown`] and
//! gets a safe unsupported-operation reply, so capability probing never
//! harms the device.
//!
//! ## Correlation
//!
//! Every request travels inside an [`IoMessage`] carrying a oneshot reply
//! sender, the correlation token. The dispatcher answers each message
//! exactly once, on every path including errors; a caller is never left
//! waiting.

use std::path::PathBuf;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::{
    encoding::{ConversionError, Encoding},
    peer::PeerId,
    tracker::ObjectId,
};

/// Identifier scoping one discrete evaluation run. All buffered output,
/// tokens, and tracer data are scoped to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvalRef(Uuid);

impl EvalRef {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for EvalRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reevaluation-safe token: `(reference, counter)`.
///
/// Counters are strictly increasing within one reference, and a reference is
/// never reused across configures, so a token from a prior evaluation is
/// always distinguishable from a current one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalToken {
    pub reference: EvalRef,
    pub counter: u64,
}

/// Failure contract for a deferred char producer.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ProducerError(pub String);

/// Deferred char-producing callback: invoked once by the dispatcher when the
/// write is processed, yielding the bytes to append.
pub type CharsProducer =
    Box<dyn FnOnce() -> BoxFuture<'static, Result<Vec<u8>, ProducerError>> + Send>;

/// Standard read shapes. All of them are rejected (the device cannot
/// interactively read), but they are modeled so the rejection is explicit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadRequest {
    Chars { count: usize },
    Line,
    Until,
    Password,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryDim {
    Rows,
    Columns,
}

/// An inbound I/O request.
#[derive(strum::Display)]
pub enum IoRequest {
    /// Append decoded text to the output buffer.
    PutChars { encoding: Encoding, data: Vec<u8> },
    /// Like [`IoRequest::PutChars`], but the bytes come from a deferred
    /// producer invoked at processing time.
    PutCharsWith {
        encoding: Encoding,
        producer: CharsProducer,
    },
    /// Any interactive read. Always unsupported.
    Read {
        encoding: Encoding,
        read: ReadRequest,
    },
    /// Option updates; only an encoding change is recognized.
    SetOpts { opts: Vec<(String, String)> },
    /// Current options: working encoding plus the fixed binary flag.
    GetOpts,
    /// Terminal geometry. Always unsupported.
    Geometry(GeometryDim),
    /// Ordered batch; processing stops at the first failing item and that
    /// failure becomes the batch reply.
    Batch(Vec<IoRequest>),
    /// Reserved extension namespace for evaluated code.
    Extension(ExtensionRequest),
    /// Anything the device does not recognize; replies unsupported without
    /// affecting device state.
    Unknown(String),
}

impl std::fmt::Debug for IoRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PutChars { encoding, data } => f
                .debug_struct("PutChars")
                .field("encoding", encoding)
                .field("len", &data.len())
                .finish(),
            Self::PutCharsWith { encoding, .. } => f
                .debug_struct("PutCharsWith")
                .field("encoding", encoding)
                .finish_non_exhaustive(),
            Self::Read { encoding, read } => f
                .debug_struct("Read")
                .field("encoding", encoding)
                .field("read", read)
                .finish(),
            Self::SetOpts { opts } => f.debug_struct("SetOpts").field("opts", opts).finish(),
            Self::GetOpts => write!(f, "GetOpts"),
            Self::Geometry(dim) => f.debug_tuple("Geometry").field(dim).finish(),
            Self::Batch(items) => f.debug_tuple("Batch").field(&items.len()).finish(),
            Self::Extension(ext) => f.debug_tuple("Extension").field(ext).finish(),
            Self::Unknown(name) => f.debug_tuple("Unknown").field(name).finish(),
        }
    }
}

/// Requests in the reserved namespace, issued by evaluated code rather than
/// by the generic I/O machinery.
#[derive(Debug)]
pub enum ExtensionRequest {
    /// Flush buffered text, then emit a rich (non-text) value to the
    /// session recipient.
    PushOutput { value: serde_json::Value },
    /// Resolve an input id through the cache (round-tripping to the
    /// recipient on a miss).
    GetInputValue { input_id: String },
    /// Next `(reference, counter)` token for the current evaluation.
    GenerateToken,
    /// Register object liveness with the external tracker.
    ReferenceObject { object: ObjectId, requester: PeerId },
    /// Ask the tracker to notify `destination` with `payload` once `object`
    /// becomes unreferenced.
    MonitorObject {
        object: ObjectId,
        destination: PeerId,
        payload: serde_json::Value,
        ack: bool,
    },
    GetBroadcastTarget,
    GetEvaluationFile,
}

impl ExtensionRequest {
    /// Backward-compatible monitor form: `ack` defaults to false.
    pub fn monitor_object(
        object: ObjectId,
        destination: PeerId,
        payload: serde_json::Value,
    ) -> Self {
        Self::MonitorObject {
            object,
            destination,
            payload,
            ack: false,
        }
    }
}

/// Successful reply values.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok,
    Opts { encoding: Encoding, binary: bool },
    Value(serde_json::Value),
    Token(EvalToken),
    Target(PeerId),
    File(Option<PathBuf>),
}

/// Error-shaped replies. All of them are non-fatal to the device.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReplyError {
    #[error("unsupported operation")]
    Unsupported,
    #[error("conversion failed: {0}")]
    Conversion(#[from] ConversionError),
    #[error("input not found")]
    NotFound,
    #[error("recipient terminated while resolving input")]
    Terminated,
    #[error("object tracker failed: {0}")]
    Tracker(String),
}

pub type IoReply = Result<Reply, ReplyError>;

/// A request paired with its correlation token.
#[derive(Debug)]
pub struct IoMessage {
    pub request: IoRequest,
    pub reply_to: oneshot::Sender<IoReply>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_names_for_logs() {
        assert_eq!(IoRequest::GetOpts.to_string(), "GetOpts");
        assert_eq!(
            IoRequest::Unknown("whoami".into()).to_string(),
            "Unknown"
        );
    }

    #[test]
    fn test_monitor_object_defaults_ack_off() {
        let req = ExtensionRequest::monitor_object(
            ObjectId::from("obj"),
            PeerId::new(),
            serde_json::json!({"k": 1}),
        );
        match req {
            ExtensionRequest::MonitorObject { ack, .. } => assert!(!ack),
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_eval_refs_are_unique() {
        assert_ne!(EvalRef::new(), EvalRef::new());
    }

    #[test]
    fn test_token_serde_round_trip() {
        let token = EvalToken {
            reference: EvalRef::new(),
            counter: 3,
        };
        let json = serde_json::to_string(&token).unwrap();
        let back: EvalToken = serde_json::from_str(&json).unwrap();
        assert_eq!(token, back);
    }
}
