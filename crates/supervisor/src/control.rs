//! 컨트롤 연결 -- 실행 중인 서버에 대한 관리 명령 채널
//!
//! [`ControlClient`] trait으로 서버 관리 명령을 추상화합니다.
//! 운영 코드는 [`RespClient`]를, 테스트는 `MockControl`을 사용합니다.
//!
//! ```text
//! ┌────────────┐   ┌──────────┐
//! │ Supervisor │   │ Enforcer │   HTTP API
//! └─────┬──────┘   └────┬─────┘      │
//!       └───────┬───────┴────────────┘
//!               ▼
//!        ┌───────────────┐
//!        │ ControlClient │ (trait)
//!        └───────────────┘
//!          │          │
//!          ▼          ▼
//!    ┌──────────┐ ┌──────┐
//!    │RespClient│ │ Mock │
//!    └────┬─────┘ └──────┘
//!         ▼
//!   unix socket / 127.0.0.1:<port>
//! ```
//!
//! 호출마다 새 연결을 열고 인증한 뒤 명령 하나를 보냅니다. 연결 수립과
//! 명령 전체가 하나의 타임아웃으로 묶입니다.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};

use gordo_core::directive::{DirectiveStore, PORT, REQUIREPASS, UNIXSOCKET};
use gordo_core::error::ControlError;
use gordo_core::metrics as m;

use crate::resp::{Reply, decode_reply, encode_command};

/// TCP 연결 시 사용하는 호스트
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// 연결 대상 주소
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// 유닉스 도메인 소켓 경로
    Unix(PathBuf),
    /// TCP 주소
    Tcp { host: String, port: u16 },
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "{}", path.display()),
            Self::Tcp { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

/// 컨트롤 연결 대상 (주소 + 인증 정보)
#[derive(Clone, PartialEq, Eq)]
pub struct ControlTarget {
    pub endpoint: Endpoint,
    pub password: Option<String>,
}

impl ControlTarget {
    /// 디렉티브 저장소에서 연결 대상을 도출합니다.
    ///
    /// `unixsocket`이 있으면 소켓을, 없으면 `127.0.0.1:<port>`를 사용합니다.
    /// 인증 비밀번호는 `requirepass`에서 가져옵니다.
    pub fn from_store(store: &DirectiveStore) -> Result<Self, ControlError> {
        let password = store.get(REQUIREPASS).ok().filter(|p| !p.is_empty());

        if let Ok(path) = store.get(UNIXSOCKET) {
            return Ok(Self {
                endpoint: Endpoint::Unix(PathBuf::from(path)),
                password,
            });
        }

        let port = store
            .get(PORT)
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .filter(|p| *p != 0)
            .ok_or_else(|| ControlError::Connect {
                address: "<none>".to_owned(),
                reason: "neither unixsocket nor a usable port is configured".to_owned(),
            })?;

        Ok(Self {
            endpoint: Endpoint::Tcp {
                host: LOOPBACK_HOST.to_owned(),
                port,
            },
            password,
        })
    }
}

// 비밀번호는 출력하지 않는다
impl fmt::Debug for ControlTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlTarget")
            .field("endpoint", &self.endpoint)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// 서버 관리 명령 추상화
///
/// 모든 메서드는 `target`에 새로 연결한 뒤 명령을 실행합니다.
/// 연결 자체가 실패하면 [`ControlError::Connect`] 또는
/// [`ControlError::Timeout`]을, 서버가 명령을 거부하면
/// [`ControlError::Command`]를 반환합니다.
pub trait ControlClient: Send + Sync + 'static {
    /// 라이브 설정 값을 조회합니다 (`CONFIG GET`).
    fn get_config(
        &self,
        target: &ControlTarget,
        key: &str,
    ) -> impl Future<Output = Result<String, ControlError>> + Send;

    /// 라이브 설정 값을 변경합니다 (`CONFIG SET`).
    fn set_config(
        &self,
        target: &ControlTarget,
        key: &str,
        value: &str,
    ) -> impl Future<Output = Result<(), ControlError>> + Send;

    /// 서버를 종료합니다.
    ///
    /// `graceful`이면 일반 `SHUTDOWN`(저장 정책 유지), 아니면 `SHUTDOWN NOSAVE`.
    /// 응답 전에 서버가 연결을 닫는 것은 성공으로 간주합니다.
    fn shutdown(
        &self,
        target: &ControlTarget,
        graceful: bool,
    ) -> impl Future<Output = Result<(), ControlError>> + Send;

    /// 복제 대상 마스터를 지정합니다 (`SLAVEOF host port`).
    fn set_replica_of(
        &self,
        target: &ControlTarget,
        host: &str,
        port: u16,
    ) -> impl Future<Output = Result<(), ControlError>> + Send;
}

// ─── RESP 구현 ───────────────────────────────────────────────────────

trait Io: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// RESP 프로토콜 기반 컨트롤 클라이언트
#[derive(Debug, Clone)]
pub struct RespClient {
    timeout: Duration,
    client_name: String,
}

impl RespClient {
    /// 호출 타임아웃과 연결 이름(`CLIENT SETNAME`)으로 생성합니다.
    pub fn new(timeout: Duration, client_name: impl Into<String>) -> Self {
        Self {
            timeout,
            client_name: client_name.into(),
        }
    }

    /// 연결을 열고 인증합니다.
    ///
    /// 인증 실패는 연결 실패로 보고합니다. 연결 이름 지정 실패는 무시합니다.
    pub async fn connect(&self, target: &ControlTarget) -> Result<RespConnection, ControlError> {
        self.bounded("connect", self.open(target)).await
    }

    async fn open(&self, target: &ControlTarget) -> Result<RespConnection, ControlError> {
        let address = target.endpoint.to_string();
        let connect_failed = |e: std::io::Error| ControlError::Connect {
            address: address.clone(),
            reason: e.to_string(),
        };

        let stream: Box<dyn Io> = match &target.endpoint {
            Endpoint::Unix(path) => Box::new(UnixStream::connect(path).await.map_err(connect_failed)?),
            Endpoint::Tcp { host, port } => Box::new(
                TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(connect_failed)?,
            ),
        };
        let mut conn = RespConnection {
            stream,
            address: address.clone(),
            read_buf: BytesMut::with_capacity(512),
            write_buf: BytesMut::with_capacity(256),
        };

        if let Some(password) = &target.password {
            conn.command("AUTH", &["AUTH", password.as_str()])
                .await
                .map_err(|e| ControlError::Connect {
                    address: address.clone(),
                    reason: format!("authentication failed: {e}"),
                })?;
        }

        if let Err(e) = conn
            .command("CLIENT SETNAME", &["CLIENT", "SETNAME", self.client_name.as_str()])
            .await
        {
            tracing::debug!(address = %address, error = %e, "could not name control connection");
        }

        Ok(conn)
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, ControlError>
    where
        F: Future<Output = Result<T, ControlError>>,
    {
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ControlError::Timeout {
                operation: operation.to_owned(),
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };
        if result.is_err() {
            metrics::counter!(m::CONTROL_ERRORS_TOTAL, m::LABEL_OPERATION => operation)
                .increment(1);
        }
        result
    }
}

impl ControlClient for RespClient {
    async fn get_config(&self, target: &ControlTarget, key: &str) -> Result<String, ControlError> {
        self.bounded("config_get", async {
            self.open(target).await?.get_config(key).await
        })
        .await
    }

    async fn set_config(
        &self,
        target: &ControlTarget,
        key: &str,
        value: &str,
    ) -> Result<(), ControlError> {
        self.bounded("config_set", async {
            self.open(target).await?.set_config(key, value).await
        })
        .await
    }

    async fn shutdown(&self, target: &ControlTarget, graceful: bool) -> Result<(), ControlError> {
        self.bounded("shutdown", async {
            self.open(target).await?.shutdown(graceful).await
        })
        .await
    }

    async fn set_replica_of(
        &self,
        target: &ControlTarget,
        host: &str,
        port: u16,
    ) -> Result<(), ControlError> {
        self.bounded("replica_of", async {
            self.open(target).await?.set_replica_of(host, port).await
        })
        .await
    }
}

/// 인증이 끝난 RESP 연결
pub struct RespConnection {
    stream: Box<dyn Io>,
    address: String,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl fmt::Debug for RespConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RespConnection")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl RespConnection {
    /// `CONFIG GET key`
    pub async fn get_config(&mut self, key: &str) -> Result<String, ControlError> {
        match self.command("CONFIG GET", &["CONFIG", "GET", key]).await? {
            Reply::Array(Some(items)) => items
                .into_iter()
                .nth(1)
                .and_then(Reply::into_string)
                .ok_or_else(|| ControlError::Command {
                    command: "CONFIG GET".to_owned(),
                    reason: format!("unknown parameter '{key}'"),
                }),
            other => Err(ControlError::Protocol(format!(
                "unexpected CONFIG GET reply: {other:?}"
            ))),
        }
    }

    /// `CONFIG SET key value`
    pub async fn set_config(&mut self, key: &str, value: &str) -> Result<(), ControlError> {
        self.command("CONFIG SET", &["CONFIG", "SET", key, value])
            .await
            .map(|_| ())
    }

    /// `SHUTDOWN` / `SHUTDOWN NOSAVE`
    pub async fn shutdown(&mut self, graceful: bool) -> Result<(), ControlError> {
        let args: &[&str] = if graceful {
            &["SHUTDOWN"]
        } else {
            &["SHUTDOWN", "NOSAVE"]
        };
        match self.call(args).await? {
            None => Ok(()),
            Some(Reply::Error(reason)) => Err(ControlError::Command {
                command: "SHUTDOWN".to_owned(),
                reason,
            }),
            Some(_) => Ok(()),
        }
    }

    /// `SLAVEOF host port`
    pub async fn set_replica_of(&mut self, host: &str, port: u16) -> Result<(), ControlError> {
        let port = port.to_string();
        self.command("SLAVEOF", &["SLAVEOF", host, port.as_str()])
            .await
            .map(|_| ())
    }

    async fn command(&mut self, name: &str, args: &[&str]) -> Result<Reply, ControlError> {
        match self.call(args).await? {
            Some(Reply::Error(reason)) => Err(ControlError::Command {
                command: name.to_owned(),
                reason,
            }),
            Some(reply) => Ok(reply),
            None => Err(ControlError::Connect {
                address: self.address.clone(),
                reason: format!("connection closed before {name} reply"),
            }),
        }
    }

    /// 명령을 보내고 응답 하나를 읽습니다. 서버가 연결을 닫으면 `None`.
    async fn call(&mut self, args: &[&str]) -> Result<Option<Reply>, ControlError> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);
        let written = self.stream.write_all(&self.write_buf).await;
        let flushed = match written {
            Ok(()) => self.stream.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = flushed {
            return self.closed_or(e);
        }

        loop {
            if let Some(reply) = decode_reply(&mut self.read_buf)? {
                return Ok(Some(reply));
            }
            let read = self.stream.read_buf(&mut self.read_buf).await;
            match read {
                Ok(0) => return Ok(None),
                Ok(_) => {}
                Err(e) => return self.closed_or(e),
            }
        }
    }

    fn closed_or(&self, e: std::io::Error) -> Result<Option<Reply>, ControlError> {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::ConnectionReset | ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof => {
                Ok(None)
            }
            _ => Err(ControlError::Connect {
                address: self.address.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

// ─── 테스트용 Mock ───────────────────────────────────────────────────

#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockCall, MockControl};

#[cfg(any(test, feature = "test-util"))]
mod mock {
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    use super::{ControlClient, ControlError, ControlTarget};

    /// Mock이 받은 호출 기록
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum MockCall {
        GetConfig(String),
        SetConfig(String, String),
        Shutdown { graceful: bool },
        ReplicaOf(String, u16),
    }

    type Hook = Arc<dyn Fn() + Send + Sync>;

    #[derive(Default)]
    struct State {
        unreachable: bool,
        config: BTreeMap<String, String>,
        rejected: BTreeSet<String>,
        calls: Vec<MockCall>,
        connect_attempts: usize,
        shutdown_hook: Option<Hook>,
    }

    /// 테스트용 Mock 컨트롤 클라이언트
    ///
    /// 복제본끼리 상태를 공유하므로 감독기에 넘긴 뒤에도 호출 기록을
    /// 확인할 수 있습니다.
    #[derive(Clone, Default)]
    pub struct MockControl {
        state: Arc<Mutex<State>>,
    }

    impl MockControl {
        pub fn new() -> Self {
            Self::default()
        }

        /// 모든 호출이 연결 실패를 반환하도록 설정합니다.
        pub fn unreachable(self) -> Self {
            self.set_reachable(false);
            self
        }

        /// 라이브 설정 값을 미리 채웁니다.
        pub fn with_config(self, key: &str, value: &str) -> Self {
            self.lock().config.insert(key.to_owned(), value.to_owned());
            self
        }

        /// 해당 키의 `CONFIG SET`을 서버가 거부하도록 설정합니다.
        pub fn reject_key(self, key: &str) -> Self {
            self.lock().rejected.insert(key.to_owned());
            self
        }

        /// 종료 명령을 받으면 실행할 콜백을 등록합니다.
        pub fn with_shutdown_hook(self, hook: impl Fn() + Send + Sync + 'static) -> Self {
            self.lock().shutdown_hook = Some(Arc::new(hook));
            self
        }

        /// 도달 가능 여부를 실행 중에 바꿉니다.
        pub fn set_reachable(&self, reachable: bool) {
            self.lock().unreachable = !reachable;
        }

        /// 지금까지의 호출 기록 (연결 실패한 호출 제외)
        pub fn calls(&self) -> Vec<MockCall> {
            self.lock().calls.clone()
        }

        /// 연결 시도 횟수 (실패 포함)
        pub fn connect_attempts(&self) -> usize {
            self.lock().connect_attempts
        }

        /// 현재 라이브 설정 값
        pub fn config_value(&self, key: &str) -> Option<String> {
            self.lock().config.get(key).cloned()
        }

        fn lock(&self) -> MutexGuard<'_, State> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        fn enter(&self, target: &ControlTarget, call: MockCall) -> Result<(), ControlError> {
            let mut state = self.lock();
            state.connect_attempts += 1;
            if state.unreachable {
                return Err(ControlError::Connect {
                    address: target.endpoint.to_string(),
                    reason: "connection refused".to_owned(),
                });
            }
            state.calls.push(call);
            Ok(())
        }
    }

    impl ControlClient for MockControl {
        async fn get_config(
            &self,
            target: &ControlTarget,
            key: &str,
        ) -> Result<String, ControlError> {
            self.enter(target, MockCall::GetConfig(key.to_owned()))?;
            self.lock()
                .config
                .get(key)
                .cloned()
                .ok_or_else(|| ControlError::Command {
                    command: "CONFIG GET".to_owned(),
                    reason: format!("unknown parameter '{key}'"),
                })
        }

        async fn set_config(
            &self,
            target: &ControlTarget,
            key: &str,
            value: &str,
        ) -> Result<(), ControlError> {
            self.enter(target, MockCall::SetConfig(key.to_owned(), value.to_owned()))?;
            let mut state = self.lock();
            if state.rejected.contains(key) {
                return Err(ControlError::Command {
                    command: "CONFIG SET".to_owned(),
                    reason: format!("ERR Invalid argument '{value}' for CONFIG SET '{key}'"),
                });
            }
            state.config.insert(key.to_owned(), value.to_owned());
            Ok(())
        }

        async fn shutdown(
            &self,
            target: &ControlTarget,
            graceful: bool,
        ) -> Result<(), ControlError> {
            self.enter(target, MockCall::Shutdown { graceful })?;
            let hook = self.lock().shutdown_hook.clone();
            if let Some(hook) = hook {
                hook();
            }
            Ok(())
        }

        async fn set_replica_of(
            &self,
            target: &ControlTarget,
            host: &str,
            port: u16,
        ) -> Result<(), ControlError> {
            self.enter(target, MockCall::ReplicaOf(host.to_owned(), port))
        }
    }
}
