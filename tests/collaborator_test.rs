//! Collaborator-boundary tests: the device against mocked tracker and
//! module-host implementations.

use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use mockall::{mock, predicate};
use tokio::time::sleep;

use vio::{
    modules::{ModuleError, ModuleHost},
    tracker::{LivenessKey, LivenessScope, ObjectTracker, TrackerError},
    Device, DeviceConfig, EvalRef, ExitReason, ExtensionRequest, InMemoryModuleHost,
    InMemoryTracker, InputReply, IoRequest, ObjectId, PeerController, PeerId, Reply, ReplyError,
    SessionHandle, SessionMessage, TracerUpdate,
};

mock! {
    Tracker {}

    #[async_trait]
    impl ObjectTracker for Tracker {
        async fn add_reference(
            &self,
            object: ObjectId,
            key: LivenessKey,
        ) -> Result<(), TrackerError>;
        async fn monitor(
            &self,
            object: ObjectId,
            destination: PeerId,
            payload: serde_json::Value,
            ack: bool,
        ) -> Result<serde_json::Value, TrackerError>;
    }
}

mock! {
    Modules {}

    #[async_trait]
    impl ModuleHost for Modules {
        async fn delete_module(&self, name: &str, path: &Path) -> Result<(), ModuleError>;
    }
}

/// Recipient that answers every input with not-found and discards output.
fn drain_recipient() -> (PeerController, SessionHandle) {
    let (controller, peer) = PeerController::new();
    let (handle, mut receiver) = SessionHandle::channel(peer);
    tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            if let SessionMessage::InputRequest { reply_to, .. } = message {
                let _ = reply_to.send(InputReply::NotFound);
            }
        }
    });
    (controller, handle)
}

#[tokio::test]
async fn test_foreign_requester_gets_process_scope() {
    let mut tracker = MockTracker::new();
    let foreign = PeerId::new();
    let expected_key = LivenessKey {
        owner: foreign.clone(),
        scope: LivenessScope::Process,
    };
    tracker
        .expect_add_reference()
        .with(
            predicate::eq(ObjectId::from("frame-1")),
            predicate::eq(expected_key),
        )
        .times(1)
        .returning(|_, _| Ok(()));

    let (_evaluator, evaluator_handle) = PeerController::new();
    let (_session, send_to) = drain_recipient();
    let device = Device::spawn(
        DeviceConfig::default(),
        evaluator_handle,
        send_to,
        PeerId::new(),
        Arc::new(tracker),
        Arc::new(InMemoryModuleHost::new()),
        "/tmp/modules",
    );
    device.configure(EvalRef::new(), "cell.src").await.unwrap();

    let reply = device
        .request(IoRequest::Extension(ExtensionRequest::ReferenceObject {
            object: ObjectId::from("frame-1"),
            requester: foreign,
        }))
        .await
        .unwrap();
    assert_eq!(reply, Ok(Reply::Ok));
}

#[tokio::test]
async fn test_tracker_failure_surfaces_as_error_reply() {
    let mut tracker = MockTracker::new();
    tracker
        .expect_add_reference()
        .returning(|_, _| Err(TrackerError::Unavailable("tracker down".into())));

    let (_evaluator, evaluator_handle) = PeerController::new();
    let (_session, send_to) = drain_recipient();
    let device = Device::spawn(
        DeviceConfig::default(),
        evaluator_handle,
        send_to,
        PeerId::new(),
        Arc::new(tracker),
        Arc::new(InMemoryModuleHost::new()),
        "/tmp/modules",
    );

    let reply = device
        .request(IoRequest::Extension(ExtensionRequest::ReferenceObject {
            object: ObjectId::from("frame-1"),
            requester: PeerId::new(),
        }))
        .await
        .unwrap();
    match reply {
        Err(ReplyError::Tracker(message)) => assert!(message.contains("tracker down")),
        other => panic!("unexpected reply: {:?}", other),
    }

    // The device itself survived the collaborator failure.
    let reply = device.request(IoRequest::GetOpts).await.unwrap();
    assert!(reply.is_ok());
}

#[tokio::test]
async fn test_cleanup_continues_past_failing_deletes() {
    let mut modules = MockModules::new();
    modules
        .expect_delete_module()
        .withf(|name, _path| name == "Bad")
        .times(1)
        .returning(|name, _| {
            Err(ModuleError::DeleteFailed {
                name: name.to_string(),
                message: "still referenced".into(),
            })
        });
    modules
        .expect_delete_module()
        .withf(|name, _path| name == "Good")
        .times(1)
        .returning(|_, _| Ok(()));

    let modules = Arc::new(modules);
    let (evaluator, evaluator_handle) = PeerController::new();
    let (_session, send_to) = drain_recipient();
    let device = Device::spawn(
        DeviceConfig::default(),
        evaluator_handle,
        send_to,
        PeerId::new(),
        Arc::new(InMemoryTracker::new()),
        modules.clone(),
        "/tmp/modules",
    );

    device.configure(EvalRef::new(), "cell.src").await.unwrap();
    device
        .tracer_updates(vec![TracerUpdate::ModulesDefined(vec![
            "Bad".into(),
            "Good".into(),
        ])])
        .await
        .unwrap();
    device.get_tracer_info().await.unwrap();

    evaluator.terminate(ExitReason::Normal);
    assert_eq!(device.terminated().await, ExitReason::Normal);
    // Let the device task finish so our Arc is the last one standing and
    // the mock expectations (one delete per module) verify on this thread.
    sleep(Duration::from_millis(50)).await;
    drop(modules);
}

#[tokio::test]
async fn test_device_survives_unanswered_collaborators_under_load() {
    // A smoke check that sequential processing holds up: interleave writes,
    // cache hits and unsupported requests, then confirm the device is
    // still responsive.
    let (_evaluator, evaluator_handle) = PeerController::new();
    let (_session, send_to) = drain_recipient();
    let device = Device::spawn(
        DeviceConfig {
            flush_delay: Duration::from_millis(5),
            ..DeviceConfig::default()
        },
        evaluator_handle,
        send_to,
        PeerId::new(),
        Arc::new(InMemoryTracker::new()),
        Arc::new(InMemoryModuleHost::new()),
        "/tmp/modules",
    );
    device.configure(EvalRef::new(), "cell.src").await.unwrap();

    for i in 0..50 {
        let reply = device
            .request(IoRequest::PutChars {
                encoding: vio::Encoding::Utf8,
                data: format!("line {}\n", i).into_bytes(),
            })
            .await
            .unwrap();
        assert_eq!(reply, Ok(Reply::Ok));

        let reply = device
            .request(IoRequest::Extension(ExtensionRequest::GetInputValue {
                input_id: format!("input-{}", i % 5),
            }))
            .await
            .unwrap();
        assert_eq!(reply, Err(ReplyError::NotFound));

        let reply = device
            .request(IoRequest::Unknown(format!("probe-{}", i)))
            .await
            .unwrap();
        assert_eq!(reply, Err(ReplyError::Unsupported));
    }

    sleep(Duration::from_millis(50)).await;
    let reply = device.request(IoRequest::GetOpts).await.unwrap();
    assert!(reply.is_ok());
}
