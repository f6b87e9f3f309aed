//! Recipient surface: the messages the device emits toward the session and
//! the handle it sends them through.
//!
//! The recipient is a peer like any other: [`SessionHandle`] bundles its
//! message channel with its [`PeerHandle`] so the device can both send to it
//! and subscribe to its termination (the input round trip depends on the
//! latter).

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::{
    peer::{PeerHandle, PeerId},
    protocol::EvalRef,
};

/// Payload of an output event: batched text or a rich value pushed by
/// evaluated code.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputPayload {
    Stdout(String),
    Rich(serde_json::Value),
}

/// Recipient's answer to an input request.
#[derive(Debug, Clone, PartialEq)]
pub enum InputReply {
    Value(serde_json::Value),
    NotFound,
}

/// Messages the device sends to the session recipient.
#[derive(Debug)]
pub enum SessionMessage {
    /// Output scoped to the evaluation that produced it (`None` before the
    /// first configure).
    Output {
        reference: Option<EvalRef>,
        payload: OutputPayload,
    },
    /// Synchronous input query; the recipient answers through `reply_to`.
    InputRequest {
        reference: Option<EvalRef>,
        input_id: String,
        reply_to: oneshot::Sender<InputReply>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("session recipient is gone")]
pub struct SessionClosed;

/// Sender half of the recipient, paired with its peer identity.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    peer: PeerHandle,
    sender: mpsc::UnboundedSender<SessionMessage>,
}

impl SessionHandle {
    /// Creates the handle together with the receiver the recipient task
    /// drains.
    pub fn channel(peer: PeerHandle) -> (Self, mpsc::UnboundedReceiver<SessionMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { peer, sender }, receiver)
    }

    pub fn id(&self) -> &PeerId {
        self.peer.id()
    }

    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    pub fn send(&self, message: SessionMessage) -> Result<(), SessionClosed> {
        self.sender.send(message).map_err(|_| SessionClosed)
    }
}

#[cfg(test)]
mod tests {
    use crate::peer::{ExitReason, PeerController};

    use super::*;

    #[tokio::test]
    async fn test_send_after_receiver_drop_reports_closed() {
        let (_controller, peer) = PeerController::new();
        let (handle, receiver) = SessionHandle::channel(peer);
        drop(receiver);
        let result = handle.send(SessionMessage::Output {
            reference: None,
            payload: OutputPayload::Stdout("late".into()),
        });
        assert_eq!(result, Err(SessionClosed));
    }

    #[tokio::test]
    async fn test_handle_exposes_peer_termination() {
        let (controller, peer) = PeerController::new();
        let (handle, _receiver) = SessionHandle::channel(peer);
        controller.terminate(ExitReason::Normal);
        assert_eq!(handle.peer().terminated().await, ExitReason::Normal);
    }
}
