//! 통합 테스트 -- 가짜 서버 스크립트로 감독기 수명 주기 검증

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use gordo_core::DirectiveStore;
use gordo_core::error::SupervisorError;
use gordo_log_classifier::EventKind;
use gordo_supervisor::{
    CollectingSink, MockCall, MockControl, StopOutcome, Supervisor, SupervisorSettings,
    SupervisorState,
};

/// 로그 세 줄을 출력한 뒤 정지 파일이 생길 때까지 대기하는 서버
const WAIT_FOR_STOP_FILE: &str = r#"#!/bin/sh
echo "$@" > "{dir}/args"
echo "$$:M 15 Jan 2024 12:00:00.000 * Redis 2.6.17 (00000000/0) 64 bit, standalone mode, port 6390, pid $$ ready to start."
echo "$$:M 15 Jan 2024 12:00:00.001 * The server is now ready to accept connections on port 6390"
echo "$$:M 15 Jan 2024 12:00:00.002 - 1 clients connected (0 slaves), 0 maxclients"
while [ ! -f "{dir}/stop" ]; do sleep 0.05; done
echo "$$:M 15 Jan 2024 12:00:01.000 * Removing the unix socket file."
exit 0
"#;

/// 한 줄 출력 후 곧바로 종료하는 서버
const EXITS_IMMEDIATELY: &str = r#"#!/bin/sh
echo "$$:M 15 Jan 2024 12:00:00.000 * DB loaded from disk: 0.001 seconds"
exit 7
"#;

/// SIGTERM을 무시하고 계속 실행되는 서버
const NEVER_EXITS: &str = r#"#!/bin/sh
trap '' TERM
echo "$$:M 15 Jan 2024 12:00:00.001 * The server is now ready to accept connections on port 6390"
while true; do sleep 1; done
"#;

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-server.sh");
    std::fs::write(&path, body.replace("{dir}", &dir.display().to_string())).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn store() -> Arc<DirectiveStore> {
    Arc::new(
        DirectiveStore::with_directives(
            [
                ("maxmemory", "1G"),
                ("port", "6380"),
                ("unixsocket", "/tmp/gordo-lifecycle.sock"),
            ],
            &["maxmemory"],
            true,
        )
        .unwrap(),
    )
}

fn build(
    script: &Path,
    mock: &MockControl,
    stop_timeout: Duration,
) -> (Supervisor<MockControl>, CollectingSink) {
    let sink = CollectingSink::new();
    let settings = SupervisorSettings {
        binary: script.display().to_string(),
        enforce_interval: Duration::from_secs(3600),
        stop_timeout,
        replica_of: None,
    };
    let supervisor = Supervisor::new(Arc::new(mock.clone()), store(), Arc::new(sink.clone()), settings);
    (supervisor, sink)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not met within 5s");
}

#[tokio::test]
async fn start_classifies_output_and_stop_is_graceful() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), WAIT_FOR_STOP_FILE);
    let stop_file = dir.path().join("stop");
    let mock = MockControl::new().with_shutdown_hook(move || {
        std::fs::write(&stop_file, b"").unwrap();
    });
    let (supervisor, sink) = build(&script, &mock, Duration::from_secs(5));

    supervisor.start().await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Running);
    wait_until(|| sink.kinds().len() >= 3).await;

    let args = std::fs::read_to_string(dir.path().join("args")).unwrap();
    assert_eq!(
        args.trim(),
        "--maxmemory 1G --port 6380 --unixsocket /tmp/gordo-lifecycle.sock"
    );
    assert_eq!(supervisor.store().get("port").unwrap(), "6390");
    assert_eq!(supervisor.info().version.as_deref(), Some("2.6.17"));

    let outcome = supervisor.stop().await.unwrap();
    assert_eq!(outcome, StopOutcome::Graceful);
    assert_eq!(supervisor.state(), SupervisorState::Idle);
    assert_eq!(
        sink.kinds(),
        vec![
            EventKind::StartupBanner,
            EventKind::ListeningSocket,
            EventKind::ClientCount,
            EventKind::SocketRemoved,
        ]
    );
    assert!(mock.calls().contains(&MockCall::Shutdown { graceful: true }));
}

#[tokio::test]
async fn second_start_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), NEVER_EXITS);
    let mock = MockControl::new();
    let (supervisor, _) = build(&script, &mock, Duration::from_millis(200));

    supervisor.start().await.unwrap();
    let err = supervisor.start().await.unwrap_err();
    assert!(matches!(err, SupervisorError::InvalidState { .. }));

    assert_eq!(supervisor.stop().await.unwrap(), StopOutcome::Forced);
}

#[tokio::test]
async fn unexpected_exit_returns_to_idle() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), EXITS_IMMEDIATELY);
    let mock = MockControl::new();
    let (supervisor, sink) = build(&script, &mock, Duration::from_secs(1));

    supervisor.start().await.unwrap();
    let mut state = supervisor.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == SupervisorState::Idle),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(sink.kinds(), vec![EventKind::DbLoaded]);
    assert_eq!(supervisor.info().last_exit.as_deref(), Some("exit code 7"));
    assert_eq!(supervisor.stop().await.unwrap(), StopOutcome::AlreadyStopped);
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn unresponsive_server_is_killed() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), NEVER_EXITS);
    let mock = MockControl::new().unreachable();
    let (supervisor, _) = build(&script, &mock, Duration::from_millis(300));

    supervisor.start().await.unwrap();
    let outcome = supervisor.stop().await.unwrap();
    assert_eq!(outcome, StopOutcome::Forced);
    assert_eq!(supervisor.state(), SupervisorState::Idle);
    assert!(supervisor.info().last_exit.is_some());
}

#[tokio::test]
async fn restart_replaces_the_process() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), NEVER_EXITS);
    let mock = MockControl::new();
    let (supervisor, _) = build(&script, &mock, Duration::from_millis(300));

    supervisor.start().await.unwrap();
    let first_pid = supervisor.info().pid;

    let outcome = supervisor.restart().await.unwrap();
    assert_eq!(outcome, StopOutcome::Forced);
    assert_eq!(supervisor.state(), SupervisorState::Running);
    assert_ne!(supervisor.info().pid, first_pid);

    supervisor.shutdown().await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Idle);
}
