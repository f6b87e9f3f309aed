//! # Device dispatcher
//!
//! The actor at the center of the crate: a single spawned task that owns
//! every piece of device state and processes one inbound message at a time.
//! Strictly sequential processing is what makes buffer and cache mutation
//! race-free without any locking.
//!
//! ## Message flow
//!
//! - Standard writes are transcoded and appended to the [`OutputBuffer`];
//!   the first write into an empty buffer arms a one-shot flush timer so
//!   bursts coalesce into a single output event.
//! - Standard reads, geometry queries and malformed options are rejected
//!   with unsupported-operation replies; so is anything unrecognized, which
//!   keeps capability probing harmless.
//! - Extension requests reach the token generator, the input cache, the
//!   tracer accumulator and the external collaborators, replying
//!   synchronously.
//!
//! ## Lifetime
//!
//! The dispatcher monitors the evaluator peer. When it dies, every module
//! recorded over the device's whole life is deleted through the
//! [`ModuleHost`] and the device terminates with the evaluator's exit
//! reason. The only other way out is an explicit owner [`DeviceHandle::shutdown`].

use std::{path::PathBuf, sync::Arc};

use async_recursion::async_recursion;
use chrono::Utc;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tracing::{debug, info, instrument, warn};

use crate::{
    config::DeviceConfig,
    encoding::{self, ConversionError, Encoding},
    modules::ModuleHost,
    peer::{ExitReason, PeerController, PeerHandle, PeerId},
    protocol::{
        EvalRef, ExtensionRequest, IoMessage, IoReply, IoRequest, Reply, ReplyError,
    },
    session::{InputReply, OutputPayload, SessionHandle, SessionMessage},
    tracker::{LivenessKey, LivenessScope, ObjectTracker},
};

pub mod buffer;
pub mod input_cache;
pub mod token;
pub mod tracer;

use buffer::OutputBuffer;
use input_cache::{CachedInput, InputCache};
use token::TokenSeq;
use tracer::{TracerAccumulator, TracerInfo, TracerUpdate};

/// Errors surfaced by the handle API when the device is already gone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("device terminated")]
    Terminated,
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Everything the dispatcher accepts through its mailbox.
#[derive(Debug)]
pub enum Command {
    Configure { reference: EvalRef, file: PathBuf },
    Flush { reply_to: oneshot::Sender<()> },
    ClearInputCache,
    TracerUpdates(Vec<TracerUpdate>),
    GetTracerInfo { reply_to: oneshot::Sender<TracerInfo> },
    Io(IoMessage),
    Shutdown,
}

/// Public face of a running device.
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    commands: mpsc::Sender<Command>,
    peer: PeerHandle,
}

impl DeviceHandle {
    pub fn id(&self) -> &PeerId {
        self.peer.id()
    }

    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    /// Begins a new evaluation scope: resets the reference, source file,
    /// token counter and tracer info. Fire-and-forget.
    pub async fn configure(
        &self,
        reference: EvalRef,
        file: impl Into<PathBuf>,
    ) -> DeviceResult<()> {
        self.send(Command::Configure {
            reference,
            file: file.into(),
        })
        .await
    }

    /// Forces buffered output to be emitted; returns only after the
    /// emission completed.
    pub async fn flush(&self) -> DeviceResult<()> {
        let (reply_to, done) = oneshot::channel();
        self.send(Command::Flush { reply_to }).await?;
        done.await.map_err(|_| DeviceError::Terminated)
    }

    pub async fn clear_input_cache(&self) -> DeviceResult<()> {
        self.send(Command::ClearInputCache).await
    }

    /// Merges a batch of incremental tracer facts. Fire-and-forget.
    pub async fn tracer_updates(&self, updates: Vec<TracerUpdate>) -> DeviceResult<()> {
        self.send(Command::TracerUpdates(updates)).await
    }

    /// Current tracer info; folds its module names into the durable
    /// cleanup set as a side effect.
    pub async fn get_tracer_info(&self) -> DeviceResult<TracerInfo> {
        let (reply_to, info) = oneshot::channel();
        self.send(Command::GetTracerInfo { reply_to }).await?;
        info.await.map_err(|_| DeviceError::Terminated)
    }

    /// Issues one protocol request and awaits its correlated reply.
    pub async fn request(&self, request: IoRequest) -> DeviceResult<IoReply> {
        self.io_sender().request(request).await
    }

    /// The channel the evaluator writes protocol requests into.
    pub fn io_sender(&self) -> IoSender {
        IoSender {
            commands: self.commands.clone(),
        }
    }

    /// Owner-initiated stop; the device exits with [`ExitReason::Shutdown`]
    /// and performs no module cleanup.
    pub async fn shutdown(&self) -> DeviceResult<()> {
        self.send(Command::Shutdown).await
    }

    /// Resolves with the device's own exit reason.
    pub fn terminated(&self) -> impl std::future::Future<Output = ExitReason> + Send + 'static {
        self.peer.terminated()
    }

    async fn send(&self, command: Command) -> DeviceResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| DeviceError::Terminated)
    }
}

/// Request-channel half of a [`DeviceHandle`], for the evaluator side.
#[derive(Debug, Clone)]
pub struct IoSender {
    commands: mpsc::Sender<Command>,
}

impl IoSender {
    pub async fn send(&self, message: IoMessage) -> DeviceResult<()> {
        self.commands
            .send(Command::Io(message))
            .await
            .map_err(|_| DeviceError::Terminated)
    }

    pub async fn request(&self, request: IoRequest) -> DeviceResult<IoReply> {
        let (reply_to, reply) = oneshot::channel();
        self.send(IoMessage { request, reply_to }).await?;
        reply.await.map_err(|_| DeviceError::Terminated)
    }
}

/// The dispatcher state. Owned exclusively by the device task.
pub struct Device {
    config: DeviceConfig,
    evaluator: PeerHandle,
    send_to: SessionHandle,
    broadcast_to: PeerId,
    tracker: Arc<dyn ObjectTracker>,
    module_host: Arc<dyn ModuleHost>,
    module_path: PathBuf,

    encoding: Encoding,
    reference: Option<EvalRef>,
    file: Option<PathBuf>,
    buffer: OutputBuffer,
    input_cache: InputCache,
    tokens: TokenSeq,
    tracer: TracerAccumulator,
    flush_deadline: Option<Instant>,
}

impl Device {
    /// Spawns the dispatcher task and returns its handle.
    pub fn spawn(
        config: DeviceConfig,
        evaluator: PeerHandle,
        send_to: SessionHandle,
        broadcast_to: PeerId,
        tracker: Arc<dyn ObjectTracker>,
        module_host: Arc<dyn ModuleHost>,
        module_path: impl Into<PathBuf>,
    ) -> DeviceHandle {
        let (commands, mailbox) = mpsc::channel(config.mailbox_capacity);
        let (controller, peer) = PeerController::new();
        let device = Self {
            encoding: config.encoding,
            config,
            evaluator,
            send_to,
            broadcast_to,
            tracker,
            module_host,
            module_path: module_path.into(),
            reference: None,
            file: None,
            buffer: OutputBuffer::new(),
            input_cache: InputCache::new(),
            tokens: TokenSeq::new(),
            tracer: TracerAccumulator::new(),
            flush_deadline: None,
        };
        tokio::spawn(async move {
            let reason = device.run(mailbox).await;
            info!(reason = %reason, "device stopped");
            controller.terminate(reason);
        });
        DeviceHandle { commands, peer }
    }

    async fn run(mut self, mut mailbox: mpsc::Receiver<Command>) -> ExitReason {
        let evaluator_down = self.evaluator.terminated();
        tokio::pin!(evaluator_down);

        loop {
            tokio::select! {
                reason = &mut evaluator_down => {
                    debug!(reason = %reason, "evaluator terminated");
                    self.cleanup().await;
                    return reason;
                }
                command = mailbox.recv() => match command {
                    Some(Command::Shutdown) | None => return ExitReason::Shutdown,
                    Some(command) => self.handle_command(command).await,
                },
                _ = flush_timer(self.flush_deadline), if self.flush_deadline.is_some() => {
                    self.flush();
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Configure { reference, file } => {
                debug!(reference = %reference, file = %file.display(), "configure");
                self.reference = Some(reference);
                self.file = Some(file);
                self.tokens.reset();
                self.tracer.reset(Utc::now());
                self.buffer.clear();
                self.flush_deadline = None;
            }
            Command::Flush { reply_to } => {
                self.flush();
                let _ = reply_to.send(());
            }
            Command::ClearInputCache => self.input_cache.clear(),
            Command::TracerUpdates(updates) => self.tracer.apply(updates),
            Command::GetTracerInfo { reply_to } => {
                let _ = reply_to.send(self.tracer.snapshot_and_fold());
            }
            Command::Io(IoMessage { request, reply_to }) => {
                debug!(request = %request, "io request");
                let reply = self.handle_io(request).await;
                // The single reply-send site: exactly one reply per request.
                let _ = reply_to.send(reply);
            }
            // Handled in the run loop before dispatching here.
            Command::Shutdown => {}
        }
    }

    #[async_recursion]
    async fn handle_io(&mut self, request: IoRequest) -> IoReply {
        match request {
            IoRequest::PutChars { encoding, data } => self.put_chars(encoding, data),
            IoRequest::PutCharsWith { encoding, producer } => {
                let bytes = producer()
                    .await
                    .map_err(|e| ConversionError::ProducerFailed(e.to_string()))?;
                self.put_chars(encoding, bytes)
            }
            // The device cannot interactively read.
            IoRequest::Read { .. } => Err(ReplyError::Unsupported),
            IoRequest::SetOpts { opts } => self.set_opts(opts),
            IoRequest::GetOpts => Ok(Reply::Opts {
                encoding: self.encoding,
                binary: true,
            }),
            IoRequest::Geometry(_) => Err(ReplyError::Unsupported),
            IoRequest::Batch(requests) => {
                for request in requests {
                    if let Err(error) = self.handle_io(request).await {
                        return Err(error);
                    }
                }
                Ok(Reply::Ok)
            }
            IoRequest::Extension(request) => self.handle_extension(request).await,
            IoRequest::Unknown(name) => {
                debug!(request = %name, "unrecognized request");
                Err(ReplyError::Unsupported)
            }
        }
    }

    async fn handle_extension(&mut self, request: ExtensionRequest) -> IoReply {
        match request {
            ExtensionRequest::PushOutput { value } => {
                // Text written before this call must reach the recipient
                // before the rich value does.
                self.flush();
                self.emit(OutputPayload::Rich(value));
                Ok(Reply::Ok)
            }
            ExtensionRequest::GetInputValue { input_id } => {
                if let Some(cached) = self.input_cache.get(&input_id) {
                    return cached.to_reply();
                }
                let outcome = self.resolve_input(&input_id).await;
                let reply = outcome.to_reply();
                self.input_cache.insert(input_id, outcome);
                reply
            }
            ExtensionRequest::GenerateToken => match &self.reference {
                Some(reference) => {
                    let reference = reference.clone();
                    Ok(Reply::Token(self.tokens.next(&reference)))
                }
                None => Err(ReplyError::Unsupported),
            },
            ExtensionRequest::ReferenceObject { object, requester } => {
                let scope = if &requester == self.evaluator.id() {
                    // Alive only while this evaluation's output is alive.
                    match &self.reference {
                        Some(reference) => LivenessScope::Evaluation(reference.clone()),
                        None => return Err(ReplyError::Unsupported),
                    }
                } else {
                    LivenessScope::Process
                };
                self.tracker
                    .add_reference(
                        object,
                        LivenessKey {
                            owner: requester,
                            scope,
                        },
                    )
                    .await
                    .map_err(|e| ReplyError::Tracker(e.to_string()))?;
                Ok(Reply::Ok)
            }
            ExtensionRequest::MonitorObject {
                object,
                destination,
                payload,
                ack,
            } => {
                let reply = self
                    .tracker
                    .monitor(object, destination, payload, ack)
                    .await
                    .map_err(|e| ReplyError::Tracker(e.to_string()))?;
                Ok(Reply::Value(reply))
            }
            ExtensionRequest::GetBroadcastTarget => Ok(Reply::Target(self.broadcast_to.clone())),
            ExtensionRequest::GetEvaluationFile => Ok(Reply::File(self.file.clone())),
        }
    }

    fn put_chars(&mut self, declared: Encoding, data: Vec<u8>) -> IoReply {
        let text = encoding::recode(data, declared, self.encoding)?;
        if !text.is_empty() && self.buffer.push(text) {
            self.flush_deadline = Some(Instant::now() + self.config.flush_delay);
        }
        Ok(Reply::Ok)
    }

    fn set_opts(&mut self, opts: Vec<(String, String)>) -> IoReply {
        match opts.as_slice() {
            [(name, value)] if name == "encoding" => match value.parse::<Encoding>() {
                Ok(encoding) => {
                    self.encoding = encoding;
                    Ok(Reply::Ok)
                }
                Err(_) => Err(ReplyError::Unsupported),
            },
            _ => Err(ReplyError::Unsupported),
        }
    }

    /// Round-trips an input query to the recipient. The wait is bounded by
    /// the recipient's lifetime, never by a timeout; there is no
    /// cancellation of an in-flight query.
    #[instrument(skip(self))]
    async fn resolve_input(&self, input_id: &str) -> CachedInput {
        let (reply_to, reply) = oneshot::channel();
        let request = SessionMessage::InputRequest {
            reference: self.reference.clone(),
            input_id: input_id.to_string(),
            reply_to,
        };
        if self.send_to.send(request).is_err() {
            return CachedInput::Terminated;
        }
        tokio::select! {
            answer = reply => match answer {
                Ok(InputReply::Value(value)) => CachedInput::Value(value),
                Ok(InputReply::NotFound) => CachedInput::NotFound,
                // Reply channel dropped without an answer: the recipient
                // discarded the request.
                Err(_) => CachedInput::Terminated,
            },
            reason = self.send_to.peer().terminated() => {
                debug!(reason = %reason, "recipient terminated during input wait");
                CachedInput::Terminated
            }
        }
    }

    fn flush(&mut self) {
        self.flush_deadline = None;
        let text = self.buffer.take();
        if text.is_empty() {
            return;
        }
        self.emit(OutputPayload::Stdout(text));
    }

    fn emit(&self, payload: OutputPayload) {
        let message = SessionMessage::Output {
            reference: self.reference.clone(),
            payload,
        };
        if self.send_to.send(message).is_err() {
            warn!("session recipient is gone; output event dropped");
        }
    }

    /// Deletes every module recorded over the device's life. Individual
    /// failures are logged and skipped; cleanup is terminal either way.
    async fn cleanup(&mut self) {
        let modules = self.tracer.take_modules_ever_defined();
        if modules.is_empty() {
            return;
        }
        info!(count = modules.len(), "deleting modules at teardown");
        for name in modules {
            if let Err(error) = self
                .module_host
                .delete_module(&name, &self.module_path)
                .await
            {
                warn!(module = %name, error = %error, "module delete failed during cleanup");
            }
        }
    }
}

async fn flush_timer(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
