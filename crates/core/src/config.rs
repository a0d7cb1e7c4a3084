//! 설정 관리 — gordo.toml 파싱 및 런타임 설정
//!
//! [`GordoConfig`]는 사이드카 전체 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`GORDO_SUPERVISOR_ENFORCE_INTERVAL=1m30s` 형식)
//! 3. 설정 파일 (`gordo.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), gordo_core::error::GordoError> {
//! use gordo_core::config::GordoConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = GordoConfig::load("gordo.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = GordoConfig::parse("[general]\nlog_level = \"debug\"")?;
//! let store = config.build_store()?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::directive::{DirectiveStore, MAXMEMORY};
use crate::error::{ConfigError, GordoError};

/// Gordo 통합 설정
///
/// `gordo.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GordoConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 감독 대상 서버 설정
    #[serde(default)]
    pub server: ServerConfig,
    /// 감독기 및 강제 적용 루프 설정
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// 컨트롤 API 설정
    #[serde(default)]
    pub api: ApiConfig,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// 기본 디렉티브에 덮어쓸 값
    ///
    /// 여기 적힌 키만 [`default_directives`]를 덮어씁니다.
    #[serde(default)]
    pub directives: BTreeMap<String, String>,
}

impl GordoConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, GordoError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, GordoError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GordoError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                GordoError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, GordoError> {
        toml::from_str(toml_str).map_err(|e| {
            GordoError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `GORDO_{SECTION}_{FIELD}`
    /// 예: `GORDO_SUPERVISOR_FIXED_MEMORY=true`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "GORDO_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "GORDO_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "GORDO_GENERAL_PID_FILE");

        // Server
        override_string(&mut self.server.binary, "GORDO_SERVER_BINARY");
        override_string(&mut self.server.replica_of, "GORDO_SERVER_REPLICA_OF");

        // Supervisor
        override_duration(
            &mut self.supervisor.enforce_interval,
            "GORDO_SUPERVISOR_ENFORCE_INTERVAL",
        );
        override_bool(
            &mut self.supervisor.fixed_memory,
            "GORDO_SUPERVISOR_FIXED_MEMORY",
        );
        override_u64(
            &mut self.supervisor.stop_timeout_secs,
            "GORDO_SUPERVISOR_STOP_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.supervisor.control_timeout_ms,
            "GORDO_SUPERVISOR_CONTROL_TIMEOUT_MS",
        );
        override_bool(
            &mut self.supervisor.wait_for_start,
            "GORDO_SUPERVISOR_WAIT_FOR_START",
        );
        override_csv(&mut self.supervisor.protected, "GORDO_SUPERVISOR_PROTECTED");

        // API
        override_string(&mut self.api.listen_addr, "GORDO_API_LISTEN_ADDR");

        // Metrics
        override_bool(&mut self.metrics.enabled, "GORDO_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "GORDO_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "GORDO_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), GordoError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.server.binary.trim().is_empty() {
            return Err(invalid("server.binary", "must not be empty".to_owned()));
        }

        if !self.server.replica_of.is_empty() && self.replica_of().is_none() {
            return Err(invalid(
                "server.replica_of",
                "expected '<host> <port>'".to_owned(),
            ));
        }

        if self.supervisor.enforce_interval.is_zero() {
            return Err(invalid(
                "supervisor.enforce_interval",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.supervisor.stop_timeout_secs == 0 {
            return Err(invalid(
                "supervisor.stop_timeout_secs",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.supervisor.control_timeout_ms == 0 {
            return Err(invalid(
                "supervisor.control_timeout_ms",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.api.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(invalid(
                "api.listen_addr",
                format!("'{}' is not a socket address", self.api.listen_addr),
            ));
        }

        let directives = self.effective_directives();
        if let Some((key, _)) = directives.iter().find(|(_, v)| v.is_empty()) {
            return Err(invalid(
                &format!("directives.{key}"),
                "value must not be empty".to_owned(),
            ));
        }

        if self.supervisor.fixed_memory {
            for key in &self.supervisor.protected {
                if !directives.contains_key(key) {
                    return Err(invalid(
                        "supervisor.protected",
                        format!("protected directive '{key}' has no value"),
                    ));
                }
            }
        }

        Ok(())
    }

    /// 기본 디렉티브에 설정 파일 값을 덮어쓴 최종 디렉티브 맵
    pub fn effective_directives(&self) -> BTreeMap<String, String> {
        let mut directives = default_directives();
        directives.extend(
            self.directives
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        directives
    }

    /// 설정으로부터 디렉티브 저장소를 생성합니다.
    ///
    /// 보호는 `supervisor.fixed_memory`가 켜져 있을 때만 활성화됩니다.
    pub fn build_store(&self) -> Result<DirectiveStore, GordoError> {
        let protected: Vec<&str> = self
            .supervisor
            .protected
            .iter()
            .map(String::as_str)
            .collect();
        let store = DirectiveStore::with_directives(
            self.effective_directives(),
            &protected,
            self.supervisor.fixed_memory,
        )?;
        Ok(store)
    }

    /// `server.replica_of`를 (host, port)로 분해합니다.
    pub fn replica_of(&self) -> Option<(String, u16)> {
        let mut parts = self.server.replica_of.split_whitespace();
        let host = parts.next()?;
        let port = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some((host.to_owned(), port))
    }
}

/// 감독 대상 서버의 기본 디렉티브
///
/// 비밀번호는 `requirepass`와 `masterauth` 양쪽에 같은 값이 들어갑니다.
pub fn default_directives() -> BTreeMap<String, String> {
    [
        (MAXMEMORY, "1G"),
        ("requirepass", DEFAULT_PASSWORD),
        ("masterauth", DEFAULT_PASSWORD),
        ("syslog-enabled", "yes"),
        ("loglevel", "debug"),
        ("daemonize", "no"),
        ("unixsocket", "/tmp/redis.sock"),
        ("port", "6380"),
        ("dbfilename", "slave.rdb"),
        ("bind", "0.0.0.0"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v.to_owned()))
    .collect()
}

/// 기본 서버 비밀번호
pub const DEFAULT_PASSWORD: &str = "secretpass";

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로 (빈 문자열이면 기록하지 않음)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: String::new(),
        }
    }
}

/// 감독 대상 서버 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 서버 실행 파일 경로
    pub binary: String,
    /// 시작 후 복제할 마스터 (`"<host> <port>"`, 빈 문자열이면 사용 안 함)
    pub replica_of: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            binary: "redis-server".to_owned(),
            replica_of: String::new(),
        }
    }
}

/// 감독기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// 보호 디렉티브 재적용 주기 (`"60s"`, `"1m30s"`, `"500ms"` 형식)
    #[serde(with = "humantime_serde")]
    pub enforce_interval: Duration,
    /// 보호 디렉티브 변경 금지 (FixedMemory 모드)
    pub fixed_memory: bool,
    /// 보호 대상 디렉티브 키 목록
    pub protected: Vec<String>,
    /// 정상 종료 대기 시간 (초), 초과 시 프로세스 그룹 강제 종료
    pub stop_timeout_secs: u64,
    /// 컨트롤 연결 호출 타임아웃 (밀리초)
    pub control_timeout_ms: u64,
    /// true면 `/start` 호출 전까지 서버를 시작하지 않음
    pub wait_for_start: bool,
    /// 컨트롤 연결의 CLIENT SETNAME 값
    pub client_name: String,
}

impl SupervisorConfig {
    /// 정지 대기 시간
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// 컨트롤 호출 타임아웃
    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            enforce_interval: Duration::from_secs(60),
            fixed_memory: false,
            protected: vec![MAXMEMORY.to_owned()],
            stop_timeout_secs: 10,
            control_timeout_ms: 2_000,
            wait_for_start: false,
            client_name: "gordo-control".to_owned(),
        }
    }
}

/// 컨트롤 API 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// HTTP 수신 주소
    pub listen_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_owned(),
        }
    }
}

/// 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus 엔드포인트 활성화 여부
    pub enabled: bool,
    /// 수신 주소
    pub listen_addr: String,
    /// 수신 포트
    pub port: u16,
    /// 스크레이프 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9187,
            endpoint: "/metrics".to_owned(),
        }
    }
}

fn invalid(field: &str, reason: String) -> GordoError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_duration(target: &mut Duration, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match humantime::parse_duration(val.trim()) {
            Ok(parsed) => *target = parsed,
            Err(e) => warn!(
                env_key,
                value = val.as_str(),
                error = %e,
                "failed to parse duration from env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
