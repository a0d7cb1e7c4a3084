//! 에러 타입 — 도메인별 에러 정의

/// Gordo 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum GordoError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 디렉티브 저장소 에러
    #[error("directive error: {0}")]
    Directive(#[from] DirectiveError),

    /// 컨트롤 연결 에러
    #[error("control error: {0}")]
    Control(#[from] ControlError),

    /// 프로세스 감독 에러
    #[error("supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 디렉티브 저장소 에러
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DirectiveError {
    /// 요청한 키가 저장소에 없음
    #[error("directive '{key}' not found")]
    NotFound { key: String },

    /// 빈 키 또는 빈 값
    #[error("invalid directive '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

/// 컨트롤 연결 에러
///
/// 연결 수립 실패와 명령 실패를 구분합니다. 감독기의 정지 경로에서는
/// [`ControlError::Connect`]를 "이미 정지됨"으로 해석합니다.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ControlError {
    /// 연결 수립 실패 (소켓 없음, 인증 실패 등)
    #[error("connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    /// 서버가 명령을 거부함
    #[error("command {command} failed: {reason}")]
    Command { command: String, reason: String },

    /// 응답 형식 오류
    #[error("protocol error: {0}")]
    Protocol(String),

    /// 호출 시간 초과
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

impl ControlError {
    /// 연결 자체가 성립하지 않은 에러인지 여부
    ///
    /// API 응답의 `connection error` 상태와 정지 경로의 no-op 판정에 사용합니다.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Timeout { .. })
    }
}

/// 프로세스 감독 에러
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// 서버 프로세스 생성 실패
    #[error("failed to spawn '{binary}': {reason}")]
    SpawnFailed { binary: String, reason: String },

    /// 현재 상태에서 허용되지 않는 전환
    #[error("invalid transition: cannot {operation} while {state}")]
    InvalidState { operation: String, state: String },

    /// 프로세스 그룹 시그널 전송 실패
    #[error("failed to signal process group {pgid}: {reason}")]
    Signal { pgid: i32, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display_names_key() {
        let err = DirectiveError::NotFound {
            key: "maxmemory".to_owned(),
        };
        assert!(err.to_string().contains("maxmemory"));
    }

    #[test]
    fn connect_error_is_connection() {
        let err = ControlError::Connect {
            address: "/tmp/redis.sock".to_owned(),
            reason: "No such file or directory".to_owned(),
        };
        assert!(err.is_connection());
        assert!(err.to_string().contains("/tmp/redis.sock"));
    }

    #[test]
    fn command_error_is_not_connection() {
        let err = ControlError::Command {
            command: "CONFIG SET".to_owned(),
            reason: "ERR Unsupported CONFIG parameter".to_owned(),
        };
        assert!(!err.is_connection());
    }

    #[test]
    fn spawn_failed_converts_to_gordo_error() {
        let err: GordoError = SupervisorError::SpawnFailed {
            binary: "redis-server".to_owned(),
            reason: "not found".to_owned(),
        }
        .into();
        assert!(matches!(err, GordoError::Supervisor(_)));
        assert!(err.to_string().contains("redis-server"));
    }
}
