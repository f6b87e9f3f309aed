//! Peer identity and death notification.
//!
//! The device never links to its peers implicitly; it subscribes to an
//! explicit termination signal. A [`PeerController`] is held by whoever owns
//! the peer's lifetime, and every [`PeerHandle`] clone can await
//! [`PeerHandle::terminated`]. The signal is watch-backed so a subscriber
//! that arrives after the peer already died still observes the death.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

/// Identity of a concurrent unit the device talks to (evaluator, session
/// recipient, the device itself).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(Uuid);

impl PeerId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a peer (or the device itself) stopped.
#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
pub enum ExitReason {
    #[strum(serialize = "normal")]
    Normal,
    #[strum(serialize = "shutdown")]
    Shutdown,
    #[strum(to_string = "error: {0}")]
    Error(String),
}

/// Observer side of a peer: identity plus the termination subscription.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: PeerId,
    exit: watch::Receiver<Option<ExitReason>>,
}

impl PeerHandle {
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Non-blocking peek at the exit reason, if the peer already died.
    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.exit.borrow().clone()
    }

    /// Resolves once, with the peer's exit reason.
    ///
    /// The returned future is self-contained (`'static`), so it can be
    /// pinned across a select loop without borrowing the handle.
    pub fn terminated(&self) -> impl Future<Output = ExitReason> + Send + 'static {
        let mut exit = self.exit.clone();
        async move {
            loop {
                if let Some(reason) = exit.borrow_and_update().clone() {
                    return reason;
                }
                if exit.changed().await.is_err() {
                    // Controller dropped without an explicit reason.
                    let last = exit.borrow().clone();
                    return last.unwrap_or(ExitReason::Normal);
                }
            }
        }
    }
}

/// Owning side of a peer's lifetime.
#[derive(Debug)]
pub struct PeerController {
    id: PeerId,
    exit: watch::Sender<Option<ExitReason>>,
}

impl PeerController {
    pub fn new() -> (Self, PeerHandle) {
        let id = PeerId::new();
        let (tx, rx) = watch::channel(None);
        (
            Self {
                id: id.clone(),
                exit: tx,
            },
            PeerHandle { id, exit: rx },
        )
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Signals termination. The first reason wins; later calls are ignored.
    pub fn terminate(&self, reason: ExitReason) {
        self.exit.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }
}
