//! Orchestrator integration tests.
//!
//! Runs the orchestrator against MockBackend and the in-memory stores.
//! These tests do NOT require Docker.

use bytes::Bytes;
use futures::channel::mpsc;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use code_play_core::mocks::MockCredentialValidator;
use code_play_core::traits::{RecordStore, SandboxRegistry};
use code_play_core::types::{ProjectRecord, SandboxId, SandboxStatus};
use code_play_core::Error;
use code_play_sandbox::demux::encode_frame;
use code_play_sandbox::engine::SANDBOX_ID_LABEL;
use code_play_sandbox::{
    relay, ContainerBackend, ContainerSpec, ExecScript, MockBackend, MockOp, OrchestratorConfig,
    RelayOutcome, ResourceLimits, SandboxOrchestrator, StreamChannel,
};
use code_play_store::{InMemoryRecordStore, InMemoryRegistry};

// =============================================================================
// Helpers
// =============================================================================

struct Harness {
    orchestrator: SandboxOrchestrator,
    backend: Arc<MockBackend>,
    registry: Arc<InMemoryRegistry>,
    records: Arc<InMemoryRecordStore>,
    credentials: Arc<MockCredentialValidator>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(OrchestratorConfig::default())
    }

    fn with_config(config: OrchestratorConfig) -> Self {
        let backend = Arc::new(MockBackend::new());
        let registry = Arc::new(InMemoryRegistry::new());
        let records = Arc::new(InMemoryRecordStore::new());
        let credentials = Arc::new(
            MockCredentialValidator::new()
                .with_token("alice-token", "alice")
                .with_token("bob-token", "bob")
                .with_expired("stale-token"),
        );
        let orchestrator = SandboxOrchestrator::new(
            backend.clone(),
            registry.clone(),
            records.clone(),
            credentials.clone(),
            config,
        );
        Self {
            orchestrator,
            backend,
            registry,
            records,
            credentials,
        }
    }

    /// A project owned by alice.
    async fn project(&self) -> String {
        let project = ProjectRecord::new("alice", "demo", "vanilla-ts");
        self.records.insert_project(&project).await.unwrap();
        project.id
    }

    async fn running_sandbox(&self) -> SandboxId {
        let project_id = self.project().await;
        self.orchestrator.create(&project_id).await.unwrap().id
    }
}

fn exec_calls(backend: &MockBackend) -> usize {
    backend
        .calls()
        .iter()
        .filter(|c| c.starts_with("exec:"))
        .count()
}

/// Yield until the backend has logged a call starting with `prefix`.
async fn wait_for_call(backend: &MockBackend, prefix: &str) -> String {
    for _ in 0..10_000 {
        if let Some(call) = backend.calls().into_iter().find(|c| c.starts_with(prefix)) {
            return call;
        }
        tokio::task::yield_now().await;
    }
    panic!("no {} call was made", prefix);
}

// =============================================================================
// 1. Create
// =============================================================================

#[tokio::test]
async fn test_create_reaches_running_with_registry_entry() {
    let h = Harness::new();
    let project_id = h.project().await;

    let sandbox = h.orchestrator.create(&project_id).await.unwrap();
    assert_eq!(sandbox.status, SandboxStatus::Running);
    assert_eq!(sandbox.project_id, project_id);
    let container_id = sandbox.container_id.clone().expect("running has a container");

    let entry = h.registry.get(&sandbox.id).await.unwrap().unwrap();
    assert_eq!(entry.container_id, container_id);
    assert_eq!(entry.project_id, project_id);

    let stored = h.records.get_sandbox(&sandbox.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SandboxStatus::Running);
    assert_eq!(stored.container_id, Some(container_id));

    let calls = h.backend.calls();
    assert_eq!(calls[0], format!("create:sandbox-{}", sandbox.id));
    assert!(calls[1].starts_with("start:"));
}

#[tokio::test]
async fn test_create_failure_leaves_failed_without_registry_entry() {
    let h = Harness::new();
    let project_id = h.project().await;
    h.backend.fail_on(MockOp::Start);

    let err = h.orchestrator.create(&project_id).await.unwrap_err();
    assert!(matches!(err, Error::Runtime(_)));
    assert!(err.to_string().contains("start"));

    // the created container was cleaned up
    assert_eq!(h.backend.container_count(), 0);
    assert!(h.registry.is_empty());

    let calls = h.backend.calls();
    let id = calls[0].trim_start_matches("create:sandbox-");
    let id = SandboxId::from(id);
    let sandbox = h.orchestrator.get(&id).await.unwrap();
    assert_eq!(sandbox.status, SandboxStatus::Failed);

    let before = exec_calls(&h.backend);
    let err = h.orchestrator.execute(&id, "echo hi", None).await.unwrap_err();
    assert!(matches!(
        err,
        Error::NotRunning {
            status: SandboxStatus::Failed,
            ..
        }
    ));
    assert_eq!(exec_calls(&h.backend), before);
}

#[tokio::test]
async fn test_concurrent_creates_are_independent() {
    let h = Harness::new();
    let project_id = h.project().await;

    let results =
        futures::future::join_all((0..5).map(|_| h.orchestrator.create(&project_id))).await;

    let mut ids: Vec<SandboxId> = results
        .into_iter()
        .map(|r| {
            let sandbox = r.unwrap();
            assert_eq!(sandbox.status, SandboxStatus::Running);
            sandbox.id
        })
        .collect();
    ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    ids.dedup();
    assert_eq!(ids.len(), 5);
    assert_eq!(h.backend.container_count(), 5);
}

// =============================================================================
// 2. Execute
// =============================================================================

#[tokio::test]
async fn test_execute_echo() {
    let h = Harness::new();
    let id = h.running_sandbox().await;

    let result = h.orchestrator.execute(&id, "echo hi", None).await.unwrap();
    assert_eq!(result.stdout, b"hi\n");
    assert!(result.stderr.is_empty());
    assert_eq!(result.exit_code, 0);
}

#[tokio::test]
async fn test_execute_nonzero_exit_is_a_result() {
    let h = Harness::new();
    let id = h.running_sandbox().await;
    h.backend.push_exec(ExecScript::output("", "no such file\n", 2));

    let result = h
        .orchestrator
        .execute(&id, "cat missing", Some("/tmp"))
        .await
        .unwrap();
    assert_eq!(result.exit_code, 2);
    assert_eq!(result.stderr_lossy(), "no such file\n");
    assert!(!result.success());
}

#[tokio::test]
async fn test_execute_unknown_exit_code() {
    let h = Harness::new();
    let id = h.running_sandbox().await;
    h.backend.push_exec(ExecScript::raw(
        vec![encode_frame(StreamChannel::Stdout, b"partial")],
        None,
    ));

    let result = h.orchestrator.execute(&id, "sleep 1", None).await.unwrap();
    assert_eq!(result.stdout, b"partial");
    assert_eq!(result.exit_code, -1);
}

#[tokio::test]
async fn test_execute_frames_split_across_chunks() {
    let h = Harness::new();
    let id = h.running_sandbox().await;
    let frame = encode_frame(StreamChannel::Stdout, b"hello world");
    h.backend.push_exec(ExecScript::raw(
        vec![frame.slice(..5), frame.slice(5..10), frame.slice(10..)],
        Some(0),
    ));

    let result = h.orchestrator.execute(&id, "printf", None).await.unwrap();
    assert_eq!(result.stdout_lossy(), "hello world");
}

#[tokio::test]
async fn test_malformed_frame_is_protocol_error_and_sandbox_stays_running() {
    let h = Harness::new();
    let id = h.running_sandbox().await;
    h.backend.push_exec(ExecScript::raw(
        vec![Bytes::from_static(&[9, 0, 0, 0, 0, 0, 0, 1, b'x'])],
        Some(0),
    ));

    let err = h.orchestrator.execute(&id, "ls", None).await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));

    assert_eq!(
        h.orchestrator.get(&id).await.unwrap().status,
        SandboxStatus::Running
    );
    let result = h.orchestrator.execute(&id, "echo again", None).await.unwrap();
    assert_eq!(result.stdout, b"again\n");
}

#[tokio::test]
async fn test_exec_stream_error_is_runtime_error() {
    let h = Harness::new();
    let id = h.running_sandbox().await;
    h.backend
        .push_exec(ExecScript::output("a", "", 0).with_stream_error("connection reset"));

    let err = h.orchestrator.execute(&id, "ls", None).await.unwrap_err();
    assert!(matches!(err, Error::Runtime(_)));
}

#[tokio::test(start_paused = true)]
async fn test_execute_times_out() {
    let h = Harness::with_config(OrchestratorConfig {
        exec_timeout: Duration::from_secs(2),
        ..Default::default()
    });
    let id = h.running_sandbox().await;
    h.backend
        .push_exec(ExecScript::output("late", "", 0).with_delay(Duration::from_secs(60)));

    let err = h
        .orchestrator
        .execute(&id, "sleep 60", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert_eq!(
        h.orchestrator.get(&id).await.unwrap().status,
        SandboxStatus::Running
    );
}

#[tokio::test]
async fn test_empty_command_is_rejected() {
    let h = Harness::new();
    let id = h.running_sandbox().await;
    let err = h.orchestrator.execute(&id, "   ", None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
}

#[tokio::test]
async fn test_execute_unknown_sandbox() {
    let h = Harness::new();
    let err = h
        .orchestrator
        .execute(&SandboxId::from("nope"), "ls", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_expired_registry_entry_is_not_found() {
    let h = Harness::new();
    let id = h.running_sandbox().await;
    h.registry.delete(&id).await.unwrap();

    let before = exec_calls(&h.backend);
    let err = h.orchestrator.execute(&id, "ls", None).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(exec_calls(&h.backend), before);
}

// =============================================================================
// 3. Stop & Delete
// =============================================================================

#[tokio::test]
async fn test_stop_is_idempotent() {
    let h = Harness::new();
    let id = h.running_sandbox().await;

    let stopped = h.orchestrator.stop(&id).await.unwrap();
    assert_eq!(stopped.status, SandboxStatus::Stopped);
    assert!(h.registry.get(&id).await.unwrap().is_none());

    let again = h.orchestrator.stop(&id).await.unwrap();
    assert_eq!(again.status, SandboxStatus::Stopped);

    let stop_calls = h
        .backend
        .calls()
        .iter()
        .filter(|c| c.starts_with("stop:"))
        .count();
    assert_eq!(stop_calls, 1);

    let err = h.orchestrator.execute(&id, "ls", None).await.unwrap_err();
    assert!(matches!(
        err,
        Error::NotRunning {
            status: SandboxStatus::Stopped,
            ..
        }
    ));
}

#[tokio::test]
async fn test_stop_failure_marks_failed() {
    let h = Harness::new();
    let id = h.running_sandbox().await;
    h.backend.fail_on(MockOp::Stop);

    assert!(matches!(
        h.orchestrator.stop(&id).await,
        Err(Error::Runtime(_))
    ));
    assert_eq!(
        h.orchestrator.get(&id).await.unwrap().status,
        SandboxStatus::Failed
    );
}

#[tokio::test]
async fn test_delete_twice_is_not_found() {
    let h = Harness::new();
    let id = h.running_sandbox().await;

    h.orchestrator.delete(&id).await.unwrap();
    assert_eq!(h.backend.container_count(), 0);
    assert!(h.registry.get(&id).await.unwrap().is_none());
    assert!(h.records.get_sandbox(&id).await.unwrap().is_none());

    assert!(matches!(
        h.orchestrator.delete(&id).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        h.orchestrator.get(&id).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_failed_sandbox() {
    let h = Harness::new();
    let project_id = h.project().await;
    h.backend.fail_on(MockOp::Create);
    assert!(h.orchestrator.create(&project_id).await.is_err());
    h.backend.recover(MockOp::Create);

    let calls = h.backend.calls();
    let id = SandboxId::from(calls[0].trim_start_matches("create:sandbox-"));
    h.orchestrator.delete(&id).await.unwrap();
    assert!(h.records.get_sandbox(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_remove_failure_keeps_sandbox_as_failed() {
    let h = Harness::new();
    let id = h.running_sandbox().await;
    h.backend.fail_on(MockOp::Remove);

    assert!(h.orchestrator.delete(&id).await.is_err());
    let sandbox = h.orchestrator.get(&id).await.unwrap();
    assert_eq!(sandbox.status, SandboxStatus::Failed);
}

// =============================================================================
// 3b. Interleavings
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_execute_while_creating_is_not_running() {
    let h = Harness::new();
    let project_id = h.project().await;
    h.backend.delay_on(MockOp::Start, Duration::from_secs(5));

    let orchestrator = h.orchestrator.clone();
    let creating = tokio::spawn(async move { orchestrator.create(&project_id).await });
    let call = wait_for_call(&h.backend, "create:sandbox-").await;
    let id = SandboxId::from(call.trim_start_matches("create:sandbox-"));

    let err = h.orchestrator.execute(&id, "echo hi", None).await.unwrap_err();
    assert!(matches!(
        err,
        Error::NotRunning {
            status: SandboxStatus::Creating,
            ..
        }
    ));
    assert_eq!(exec_calls(&h.backend), 0);

    let sandbox = creating.await.unwrap().unwrap();
    assert_eq!(sandbox.status, SandboxStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn test_delete_during_provisioning_discards_container() {
    let h = Harness::new();
    let project_id = h.project().await;
    h.backend.delay_on(MockOp::Start, Duration::from_secs(5));

    let orchestrator = h.orchestrator.clone();
    let creating = tokio::spawn(async move { orchestrator.create(&project_id).await });
    let call = wait_for_call(&h.backend, "create:sandbox-").await;
    let id = SandboxId::from(call.trim_start_matches("create:sandbox-"));
    wait_for_call(&h.backend, "start:").await;

    h.orchestrator.delete(&id).await.unwrap();

    let err = creating.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(h.backend.container_count(), 0);
    assert!(h.registry.get(&id).await.unwrap().is_none());
    assert!(h.records.get_sandbox(&id).await.unwrap().is_none());
    assert!(matches!(
        h.orchestrator.get(&id).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_execute_while_stopping_is_not_running() {
    let h = Harness::new();
    let id = h.running_sandbox().await;
    h.backend.delay_on(MockOp::Stop, Duration::from_secs(5));

    let orchestrator = h.orchestrator.clone();
    let stop_id = id.clone();
    let stopping = tokio::spawn(async move { orchestrator.stop(&stop_id).await });
    wait_for_call(&h.backend, "stop:").await;

    let err = h.orchestrator.execute(&id, "echo hi", None).await.unwrap_err();
    assert!(matches!(err, Error::NotRunning { .. }));
    assert_eq!(exec_calls(&h.backend), 0);

    let stopped = stopping.await.unwrap().unwrap();
    assert_eq!(stopped.status, SandboxStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_second_stop_waits_for_first() {
    let h = Harness::new();
    let id = h.running_sandbox().await;
    h.backend.delay_on(MockOp::Stop, Duration::from_secs(5));

    let orchestrator = h.orchestrator.clone();
    let stop_id = id.clone();
    let first = tokio::spawn(async move { orchestrator.stop(&stop_id).await });
    wait_for_call(&h.backend, "stop:").await;

    let second = h.orchestrator.stop(&id).await.unwrap();
    assert_eq!(second.status, SandboxStatus::Stopped);
    assert_eq!(first.await.unwrap().unwrap().status, SandboxStatus::Stopped);

    let stop_calls = h
        .backend
        .calls()
        .iter()
        .filter(|c| c.starts_with("stop:"))
        .count();
    assert_eq!(stop_calls, 1);
}

#[tokio::test(start_paused = true)]
async fn test_second_stop_reports_failed_first_stop() {
    let h = Harness::new();
    let id = h.running_sandbox().await;
    h.backend.delay_on(MockOp::Stop, Duration::from_secs(5));
    h.backend.fail_on(MockOp::Stop);

    let orchestrator = h.orchestrator.clone();
    let stop_id = id.clone();
    let first = tokio::spawn(async move { orchestrator.stop(&stop_id).await });
    wait_for_call(&h.backend, "stop:").await;

    let err = h.orchestrator.stop(&id).await.unwrap_err();
    assert!(matches!(
        err,
        Error::NotRunning {
            status: SandboxStatus::Failed,
            ..
        }
    ));
    assert!(matches!(first.await.unwrap(), Err(Error::Runtime(_))));
}

// =============================================================================
// 4. Terminal
// =============================================================================

#[tokio::test]
async fn test_expired_credential_never_reaches_backend() {
    let h = Harness::new();
    let id = h.running_sandbox().await;
    let before = h.backend.call_count();

    let err = h
        .orchestrator
        .attach_terminal(&id, "stale-token")
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::Unauthorized(_)));
    assert_eq!(h.backend.call_count(), before);
    assert_eq!(h.credentials.call_count(), 1);
}

#[tokio::test]
async fn test_unauthorized_before_lookup() {
    let h = Harness::new();
    let err = h
        .orchestrator
        .attach_terminal(&SandboxId::from("missing"), "garbage")
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::Unauthorized(_)));
}

#[tokio::test]
async fn test_terminal_of_another_user_is_not_found() {
    let h = Harness::new();
    let id = h.running_sandbox().await;
    let err = h
        .orchestrator
        .attach_terminal(&id, "bob-token")
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_terminal_on_stopped_sandbox() {
    let h = Harness::new();
    let id = h.running_sandbox().await;
    h.orchestrator.stop(&id).await.unwrap();

    let err = h
        .orchestrator
        .attach_terminal(&id, "alice-token")
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::NotRunning { .. }));
}

#[tokio::test]
async fn test_terminal_relays_until_shell_exits() {
    let h = Harness::new();
    let id = h.running_sandbox().await;
    let session = h
        .orchestrator
        .attach_terminal(&id, "alice-token")
        .await
        .unwrap();

    let (caller_tx, caller_rx) = mpsc::unbounded::<Bytes>();
    let (out_tx, mut out_rx) = mpsc::unbounded::<Bytes>();
    let task = tokio::spawn(relay(session, caller_rx, out_tx));

    caller_tx.unbounded_send(Bytes::from_static(b"pwd\n")).unwrap();
    assert_eq!(out_rx.next().await.unwrap(), Bytes::from_static(b"pwd\n"));

    caller_tx.unbounded_send(Bytes::from_static(b"exit\n")).unwrap();
    assert_eq!(out_rx.next().await.unwrap(), Bytes::from_static(b"exit\n"));

    let outcome = task.await.unwrap();
    assert_eq!(outcome, RelayOutcome::ShellExited);
    assert_eq!(outcome.close_code(), Some(1000));

    // the shell ending does not touch the sandbox
    assert_eq!(
        h.orchestrator.get(&id).await.unwrap().status,
        SandboxStatus::Running
    );
}

// =============================================================================
// 5. Recovery
// =============================================================================

#[tokio::test]
async fn test_restart_rehydrates_from_stores() {
    let h = Harness::new();
    let id = h.running_sandbox().await;

    let restarted = SandboxOrchestrator::new(
        h.backend.clone(),
        h.registry.clone(),
        h.records.clone(),
        h.credentials.clone(),
        OrchestratorConfig::default(),
    );
    assert_eq!(
        restarted.get(&id).await.unwrap().status,
        SandboxStatus::Running
    );
    let result = restarted.execute(&id, "echo back", None).await.unwrap();
    assert_eq!(result.stdout, b"back\n");
}

#[tokio::test]
async fn test_restart_with_expired_registry_is_not_found() {
    let h = Harness::new();
    let id = h.running_sandbox().await;
    h.registry.delete(&id).await.unwrap();

    let restarted = SandboxOrchestrator::new(
        h.backend.clone(),
        h.registry.clone(),
        h.records.clone(),
        h.credentials.clone(),
        OrchestratorConfig::default(),
    );
    assert!(matches!(restarted.get(&id).await, Err(Error::NotFound(_))));
    // still deletable
    restarted.delete(&id).await.unwrap();
}

#[tokio::test]
async fn test_reap_orphans_keeps_live_sandboxes() {
    let h = Harness::new();
    let live = h.running_sandbox().await;

    let orphan = ContainerSpec {
        image: "code-play-sandbox:latest".into(),
        name: "sandbox-ghost".into(),
        env: vec![],
        limits: ResourceLimits::default(),
        network: "code-play-network".into(),
        workdir: "/workspace".into(),
        labels: HashMap::from([(SANDBOX_ID_LABEL.to_string(), "ghost".to_string())]),
    };
    h.backend.create(&orphan).await.unwrap();
    assert_eq!(h.backend.container_count(), 2);

    assert_eq!(h.orchestrator.reap_orphans().await.unwrap(), 1);
    assert_eq!(h.backend.container_count(), 1);
    assert_eq!(
        h.orchestrator.get(&live).await.unwrap().status,
        SandboxStatus::Running
    );
}
