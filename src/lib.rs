//! # vio: virtual I/O device for sandboxed evaluation
//!
//! `vio` sits between a sandboxed code-execution peer (the *evaluator*) and
//! the outside world. It intercepts every character-output and
//! character-input request the evaluator issues, batches standard writes
//! into output events for a *session recipient*, resolves input queries
//! through a synchronous round trip to that recipient, and exposes a
//! private extension channel evaluated code uses to push rich results,
//! obtain reevaluation-safe tokens, and register object liveness with an
//! external tracker.
//!
//! ## Architecture
//!
//! The device is an actor: one spawned task owns all state and drains one
//! mailbox ([`device`]). Leaf components keep their own invariants:
//!
//! - Output buffering and carriage-return coalescing ([`device::buffer`])
//! - Input-outcome memoization ([`device::input_cache`])
//! - Per-evaluation tracer facts and the durable module set
//!   ([`device::tracer`])
//! - Reevaluation-safe tokens ([`device::token`])
//!
//! The wire surface lives in [`protocol`]; peers and their death
//! notifications in [`peer`]; the recipient surface in [`session`]; the
//! external collaborators in [`tracker`] and [`modules`].
//!
//! ## Lifetime
//!
//! A device is created once per evaluator and lives exactly as long as it:
//! when the evaluator terminates, the device deletes every module recorded
//! during its life and terminates with the same reason. Configuration
//! happens once per evaluation unit and resets only per-evaluation state.

pub mod config;
pub mod device;
pub mod encoding;
pub mod error;
pub mod modules;
pub mod peer;
pub mod protocol;
pub mod session;
pub mod tracker;

// Re-exports
pub use config::DeviceConfig;
pub use device::{Device, DeviceError, DeviceHandle, DeviceResult, IoSender};
pub use device::tracer::{TracerInfo, TracerUpdate};
pub use encoding::Encoding;
pub use error::{Error, InternalResult};
pub use modules::{InMemoryModuleHost, ModuleError, ModuleHost};
pub use peer::{ExitReason, PeerController, PeerHandle, PeerId};
pub use protocol::{
    EvalRef, EvalToken, ExtensionRequest, IoMessage, IoReply, IoRequest, Reply, ReplyError,
};
pub use session::{InputReply, OutputPayload, SessionHandle, SessionMessage};
pub use tracker::{
    InMemoryTracker, LivenessKey, LivenessScope, ObjectId, ObjectTracker, TrackerError,
};

#[cfg(test)]
mod tests {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    #[ctor::ctor]
    fn init_tests() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    }
}
