//! 프로세스 감독기
//!
//! 서버 프로세스의 수명 주기(`Idle → Starting → Running → Stopping → Idle`)를
//! 관리합니다. 시작 시 디렉티브 저장소의 인자 목록으로 서버를 실행하고,
//! 출력 한 줄마다 분류해 싱크로 넘기며, 강제 적용 루프를 함께 띄웁니다.
//!
//! 시작/정지/재시작은 하나의 비동기 뮤텍스로 직렬화되므로 재시작 중에
//! 두 번째 인스턴스가 실행되는 일은 없습니다.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use gordo_core::config::GordoConfig;
use gordo_core::directive::{DirectiveStore, PORT, SetOutcome};
use gordo_core::error::{ControlError, SupervisorError};
use gordo_core::metrics as m;
use gordo_log_classifier::{EventKind, LogEvent, classify};

use crate::control::{ControlClient, ControlTarget};
use crate::enforcer::Enforcer;
use crate::process::ServerProcess;
use crate::sink::EventSink;

/// SIGKILL 후 종료를 기다리는 시간
const KILL_WAIT: Duration = Duration::from_secs(5);

/// 감독기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl SupervisorState {
    fn gauge_value(self) -> f64 {
        match self {
            Self::Idle => 0.0,
            Self::Starting => 1.0,
            Self::Running => 2.0,
            Self::Stopping => 3.0,
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        })
    }
}

/// 정지 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// 실행 중인 서버가 없었음
    AlreadyStopped,
    /// 제한 시간 안에 종료됨
    Graceful,
    /// 제한 시간을 넘겨 프로세스 그룹을 강제 종료함
    Forced,
}

impl StopOutcome {
    fn label(self) -> &'static str {
        match self {
            Self::AlreadyStopped => "already_stopped",
            Self::Graceful => "graceful",
            Self::Forced => "forced",
        }
    }
}

/// 감독기 동작 설정
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// 서버 실행 파일
    pub binary: String,
    /// 강제 적용 주기
    pub enforce_interval: Duration,
    /// 정상 종료 대기 시간
    pub stop_timeout: Duration,
    /// 리스닝 소켓 확인 후 지정할 마스터 (host, port)
    pub replica_of: Option<(String, u16)>,
}

impl SupervisorSettings {
    pub fn from_config(config: &GordoConfig) -> Self {
        Self {
            binary: config.server.binary.clone(),
            enforce_interval: config.supervisor.enforce_interval,
            stop_timeout: config.supervisor.stop_timeout(),
            replica_of: config.replica_of(),
        }
    }
}

/// 서버 출력에서 알아낸 실행 정보
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub pid: Option<u32>,
    pub version: Option<String>,
    pub mode: Option<String>,
    pub bit_depth: Option<i64>,
    pub port: Option<u16>,
    pub unix_socket: Option<String>,
    pub listening: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub last_exit: Option<String>,
}

struct Running {
    process: ServerProcess,
    enforcement: CancellationToken,
    generation: u64,
}

#[derive(Default)]
struct Runtime {
    running: Option<Running>,
    generation: u64,
}

struct Inner<C> {
    control: Arc<C>,
    store: Arc<DirectiveStore>,
    sink: Arc<dyn EventSink>,
    settings: SupervisorSettings,
    runtime: Mutex<Runtime>,
    state: watch::Sender<SupervisorState>,
    info: RwLock<ServerInfo>,
    cancel: CancellationToken,
}

/// 서버 프로세스 감독기
///
/// 복제해도 같은 감독기를 가리킵니다.
pub struct Supervisor<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for Supervisor<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: ControlClient> Supervisor<C> {
    pub fn new(
        control: Arc<C>,
        store: Arc<DirectiveStore>,
        sink: Arc<dyn EventSink>,
        settings: SupervisorSettings,
    ) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        metrics::gauge!(m::SUPERVISOR_STATE).set(SupervisorState::Idle.gauge_value());
        Self {
            inner: Arc::new(Inner {
                control,
                store,
                sink,
                settings,
                runtime: Mutex::new(Runtime::default()),
                state,
                info: RwLock::new(ServerInfo::default()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// 현재 상태
    pub fn state(&self) -> SupervisorState {
        *self.inner.state.borrow()
    }

    /// 상태 변경 구독
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.inner.state.subscribe()
    }

    /// 서버 실행 정보 스냅샷
    pub fn info(&self) -> ServerInfo {
        self.inner.read_info().clone()
    }

    pub fn store(&self) -> &Arc<DirectiveStore> {
        &self.inner.store
    }

    pub fn control(&self) -> &Arc<C> {
        &self.inner.control
    }

    /// 서버를 시작합니다. `Idle`에서만 허용됩니다.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        let mut runtime = self.inner.runtime.lock().await;
        self.inner.start_locked(&mut runtime)
    }

    /// 서버를 정지합니다.
    ///
    /// 컨트롤 연결로 종료를 요청한 뒤 `stop_timeout`까지 기다리고, 넘기면
    /// 프로세스 그룹에 SIGKILL을 보냅니다. `Idle`이면 아무것도 하지 않습니다.
    pub async fn stop(&self) -> Result<StopOutcome, SupervisorError> {
        let mut runtime = self.inner.runtime.lock().await;
        self.inner.stop_locked(&mut runtime).await
    }

    /// 정지 후 다시 시작합니다.
    pub async fn restart(&self) -> Result<StopOutcome, SupervisorError> {
        let mut runtime = self.inner.runtime.lock().await;
        let outcome = self.inner.stop_locked(&mut runtime).await?;
        self.inner.start_locked(&mut runtime)?;
        Ok(outcome)
    }

    /// 데몬 종료 시 호출합니다. 서버를 정지하고 모든 백그라운드 태스크를 취소합니다.
    pub async fn shutdown(&self) -> Result<StopOutcome, SupervisorError> {
        let outcome = self.stop().await;
        self.inner.cancel.cancel();
        outcome
    }

    /// 저장소 기준 컨트롤 대상에서 라이브 설정 값을 조회합니다.
    pub async fn get_live_config(&self, key: &str) -> Result<String, ControlError> {
        let target = ControlTarget::from_store(&self.inner.store)?;
        self.inner.control.get_config(&target, key).await
    }

    /// 저장소 기준 컨트롤 대상에 라이브 설정 값을 적용합니다.
    pub async fn set_live_config(&self, key: &str, value: &str) -> Result<(), ControlError> {
        let target = ControlTarget::from_store(&self.inner.store)?;
        self.inner.control.set_config(&target, key, value).await
    }
}

impl<C> Inner<C> {
    fn set_state(&self, state: SupervisorState) {
        self.state.send_replace(state);
        metrics::gauge!(m::SUPERVISOR_STATE).set(state.gauge_value());
    }

    fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    fn read_info(&self) -> std::sync::RwLockReadGuard<'_, ServerInfo> {
        self.info.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_info(&self) -> std::sync::RwLockWriteGuard<'_, ServerInfo> {
        self.info.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: ControlClient> Inner<C> {
    fn start_locked(self: &Arc<Self>, runtime: &mut Runtime) -> Result<(), SupervisorError> {
        let state = self.state();
        if runtime.running.is_some() || state != SupervisorState::Idle {
            return Err(SupervisorError::InvalidState {
                operation: "start".to_owned(),
                state: state.to_string(),
            });
        }

        self.set_state(SupervisorState::Starting);
        runtime.generation += 1;
        let generation = runtime.generation;
        let args = self.store.to_argument_list();
        info!(
            binary = %self.settings.binary,
            args = args.len(),
            generation,
            "starting server"
        );

        let observer = Arc::clone(self);
        let mut replica_pending = self.settings.replica_of.is_some();
        let on_line = move |line: String| {
            metrics::counter!(m::SUPERVISOR_OUTPUT_LINES_TOTAL).increment(1);
            let started = Instant::now();
            let classification = classify(&line);
            metrics::histogram!(m::CLASSIFIER_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
            observer.sink.emit(&classification);
            observer.observe(&classification.event, &mut replica_pending);
        };

        let process = match ServerProcess::spawn(&self.settings.binary, &args, on_line) {
            Ok(process) => process,
            Err(e) => {
                error!(error = %e, "server spawn failed");
                metrics::counter!(m::SUPERVISOR_STARTS_TOTAL, m::LABEL_RESULT => "failed")
                    .increment(1);
                self.set_state(SupervisorState::Idle);
                return Err(e);
            }
        };
        let pid = process.pid();

        *self.write_info() = ServerInfo {
            pid: Some(pid),
            started_at: Some(Utc::now()),
            ..ServerInfo::default()
        };

        let enforcement = self.cancel.child_token();
        let enforcer = Enforcer::new(
            Arc::clone(&self.control),
            Arc::clone(&self.store),
            self.settings.enforce_interval,
        );
        tokio::spawn(enforcer.run(enforcement.clone()));

        let completion = process.completion();
        let watcher = Arc::clone(self);
        tokio::spawn(async move {
            let exit = completion.wait().await;
            watcher.handle_exit(generation, exit.to_string()).await;
        });

        runtime.running = Some(Running {
            process,
            enforcement,
            generation,
        });
        metrics::counter!(m::SUPERVISOR_STARTS_TOTAL, m::LABEL_RESULT => "started").increment(1);
        self.set_state(SupervisorState::Running);
        info!(pid, "server started");
        Ok(())
    }

    async fn stop_locked(&self, runtime: &mut Runtime) -> Result<StopOutcome, SupervisorError> {
        let Some(running) = runtime.running.take() else {
            debug!("stop requested while idle");
            self.set_state(SupervisorState::Idle);
            return Ok(StopOutcome::AlreadyStopped);
        };

        self.set_state(SupervisorState::Stopping);
        running.enforcement.cancel();
        let pid = running.process.pid();
        let completion = running.process.completion();
        info!(pid, "stopping server");

        if completion.get().is_none() {
            self.request_shutdown(pid).await;
        }

        let mut result = Ok(());
        let outcome = match completion.wait_timeout(self.settings.stop_timeout).await {
            Some(exit) => {
                info!(pid, exit = %exit, "server stopped");
                self.write_info().last_exit = Some(exit.to_string());
                StopOutcome::Graceful
            }
            None => {
                warn!(
                    pid,
                    timeout_secs = self.settings.stop_timeout.as_secs(),
                    "server did not exit in time, killing process group"
                );
                if let Err(e) = running.process.signal_group(libc::SIGKILL) {
                    error!(pid, error = %e, "failed to kill process group");
                    result = Err(e);
                }
                match completion.wait_timeout(KILL_WAIT).await {
                    Some(exit) => {
                        info!(pid, exit = %exit, "server killed");
                        self.write_info().last_exit = Some(exit.to_string());
                    }
                    None => error!(pid, "process group still alive after SIGKILL"),
                }
                StopOutcome::Forced
            }
        };

        metrics::counter!(m::SUPERVISOR_STOPS_TOTAL, m::LABEL_MODE => outcome.label()).increment(1);
        self.write_info().listening = false;
        self.set_state(SupervisorState::Idle);
        result.map(|()| outcome)
    }

    async fn request_shutdown(&self, pid: u32) {
        let target = match ControlTarget::from_store(&self.store) {
            Ok(target) => target,
            Err(e) => {
                warn!(pid, error = %e, "no control address, waiting for exit");
                return;
            }
        };
        match self.control.shutdown(&target, true).await {
            Ok(()) => debug!(pid, "shutdown requested over control connection"),
            Err(e) if e.is_connection() => {
                warn!(pid, error = %e, "control connection unavailable, treating server as stopped");
            }
            Err(e) => warn!(pid, error = %e, "shutdown command rejected"),
        }
    }

    /// 서버가 스스로 종료한 경우의 처리
    async fn handle_exit(&self, generation: u64, exit: String) {
        let mut runtime = self.runtime.lock().await;
        let current = runtime
            .running
            .as_ref()
            .is_some_and(|r| r.generation == generation);
        if !current {
            // 정지 경로에서 이미 정리됨
            return;
        }
        let Some(running) = runtime.running.take() else {
            return;
        };

        running.enforcement.cancel();
        warn!(pid = running.process.pid(), exit = %exit, "server exited unexpectedly");
        metrics::counter!(m::SUPERVISOR_UNEXPECTED_EXITS_TOTAL).increment(1);
        {
            let mut info = self.write_info();
            info.last_exit = Some(exit);
            info.listening = false;
        }
        self.set_state(SupervisorState::Idle);
    }

    /// 분류된 이벤트에서 실행 정보를 갱신합니다.
    fn observe(self: &Arc<Self>, event: &LogEvent, replica_pending: &mut bool) {
        match event.kind {
            EventKind::StartupBanner => {
                let port = event.int("port").and_then(|p| u16::try_from(p).ok());
                {
                    let mut info = self.write_info();
                    info.version = event.text("version").map(str::to_owned);
                    info.mode = event.text("mode").map(str::to_owned);
                    info.bit_depth = event.int("bit_depth");
                    if let Some(pid) = event.int("pid").and_then(|p| u32::try_from(p).ok()) {
                        if pid != 0 {
                            info.pid = Some(pid);
                        }
                    }
                    if port.is_some_and(|p| p != 0) {
                        info.port = port;
                    }
                }
                if let Some(port) = port {
                    self.record_port(port);
                }
            }
            EventKind::ListeningSocket => {
                match event.text("transport") {
                    Some("tcp") => {
                        let port = event.int("port").and_then(|p| u16::try_from(p).ok());
                        if let Some(port) = port.filter(|p| *p != 0) {
                            self.write_info().port = Some(port);
                            self.record_port(port);
                        }
                    }
                    Some("unix") => {
                        self.write_info().unix_socket = event.text("address").map(str::to_owned);
                    }
                    _ => return,
                }
                self.write_info().listening = true;

                if std::mem::take(replica_pending) {
                    self.issue_replica_of();
                }
            }
            _ => {}
        }
    }

    fn record_port(&self, port: u16) {
        if port == 0 {
            return;
        }
        let value = port.to_string();
        if self.store.get(PORT).is_ok_and(|v| v == value) {
            return;
        }
        match self.store.set(PORT, value) {
            Ok(SetOutcome::Applied) => debug!(port, "port recorded from server output"),
            Ok(SetOutcome::Prohibited) => debug!(port, "port is protected, not recorded"),
            Err(e) => warn!(port, error = %e, "failed to record port"),
        }
    }

    fn issue_replica_of(self: &Arc<Self>) {
        let Some((host, port)) = self.settings.replica_of.clone() else {
            return;
        };
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let result = match ControlTarget::from_store(&inner.store) {
                Ok(target) => inner.control.set_replica_of(&target, &host, port).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => info!(master = %format!("{host}:{port}"), "replication configured"),
                Err(e) => warn!(master = %format!("{host}:{port}"), error = %e, "failed to configure replication"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{MockCall, MockControl};
    use crate::sink::CollectingSink;
    use gordo_core::directive::MAXMEMORY;

    fn store() -> Arc<DirectiveStore> {
        Arc::new(
            DirectiveStore::with_directives(
                [("maxmemory", "1G"), ("port", "6380"), ("unixsocket", "/tmp/gordo-test.sock")],
                &[MAXMEMORY],
                true,
            )
            .unwrap(),
        )
    }

    fn settings(binary: &str) -> SupervisorSettings {
        SupervisorSettings {
            binary: binary.to_owned(),
            enforce_interval: Duration::from_secs(60),
            stop_timeout: Duration::from_millis(300),
            replica_of: None,
        }
    }

    fn supervisor(mock: &MockControl, binary: &str) -> (Supervisor<MockControl>, CollectingSink) {
        let sink = CollectingSink::new();
        let sup = Supervisor::new(
            Arc::new(mock.clone()),
            store(),
            Arc::new(sink.clone()),
            settings(binary),
        );
        (sup, sink)
    }

    #[tokio::test]
    async fn stop_while_idle_is_ok() {
        let mock = MockControl::new();
        let (sup, _) = supervisor(&mock, "redis-server");

        assert_eq!(sup.stop().await.unwrap(), StopOutcome::AlreadyStopped);
        assert_eq!(sup.state(), SupervisorState::Idle);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn spawn_failure_returns_to_idle() {
        let mock = MockControl::new();
        let (sup, _) = supervisor(&mock, "/nonexistent/redis-server");

        let err = sup.start().await.unwrap_err();
        assert!(matches!(err, SupervisorError::SpawnFailed { .. }));
        assert_eq!(sup.state(), SupervisorState::Idle);
    }

    #[test]
    fn state_names() {
        assert_eq!(SupervisorState::Stopping.to_string(), "stopping");
        assert_eq!(SupervisorState::Idle.to_string(), "idle");
        assert!(SupervisorState::Running.gauge_value() > SupervisorState::Starting.gauge_value());
    }

    #[test]
    fn settings_from_default_config() {
        let settings = SupervisorSettings::from_config(&GordoConfig::default());
        assert_eq!(settings.binary, "redis-server");
        assert_eq!(settings.enforce_interval, Duration::from_secs(60));
        assert_eq!(settings.stop_timeout, Duration::from_secs(10));
        assert!(settings.replica_of.is_none());
    }

    #[tokio::test]
    async fn banner_and_listening_socket_update_info_and_port() {
        let mock = MockControl::new();
        let (sup, _) = supervisor(&mock, "redis-server");
        let mut pending = false;

        let banner = classify(
            "1:M 15 Jan 2024 12:00:00.000 * Redis 2.6.17 (00000000/0) 64 bit, standalone mode, port 6390, pid 77 ready to start.",
        );
        sup.inner.observe(&banner.event, &mut pending);
        let socket = classify("The server is now ready to accept connections at /tmp/gordo-test.sock");
        sup.inner.observe(&socket.event, &mut pending);

        let info = sup.info();
        assert_eq!(info.version.as_deref(), Some("2.6.17"));
        assert_eq!(info.mode.as_deref(), Some("standalone"));
        assert_eq!(info.port, Some(6390));
        assert_eq!(info.pid, Some(77));
        assert_eq!(info.unix_socket.as_deref(), Some("/tmp/gordo-test.sock"));
        assert!(info.listening);
        assert_eq!(sup.store().get("port").unwrap(), "6390");
    }

    #[tokio::test]
    async fn first_listening_socket_issues_replica_of_once() {
        let mock = MockControl::new();
        let sink = CollectingSink::new();
        let mut settings = settings("redis-server");
        settings.replica_of = Some(("10.0.0.1".to_owned(), 6379));
        let sup = Supervisor::new(Arc::new(mock.clone()), store(), Arc::new(sink), settings);
        let mut pending = true;

        let socket = classify("The server is now ready to accept connections on port 6380");
        sup.inner.observe(&socket.event, &mut pending);
        sup.inner.observe(&socket.event, &mut pending);
        assert!(!pending);

        for _ in 0..50 {
            if !mock.calls().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            mock.calls(),
            vec![MockCall::ReplicaOf("10.0.0.1".to_owned(), 6379)]
        );
    }

    #[tokio::test]
    async fn protected_port_is_not_overwritten() {
        let mock = MockControl::new();
        let store = Arc::new(
            DirectiveStore::with_directives([("port", "6380")], &["port"], true).unwrap(),
        );
        let sup = Supervisor::new(
            Arc::new(mock),
            Arc::clone(&store),
            Arc::new(CollectingSink::new()),
            settings("redis-server"),
        );
        let mut pending = false;
        let socket = classify("The server is now ready to accept connections on port 7000");
        sup.inner.observe(&socket.event, &mut pending);
        assert_eq!(store.get("port").unwrap(), "6380");
        assert_eq!(sup.info().port, Some(7000));
    }
}
