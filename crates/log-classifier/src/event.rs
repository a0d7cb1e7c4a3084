//! 분류 결과 타입
//!
//! [`LogEvent`]는 로그 한 줄에서 추출한 구조화 이벤트이고,
//! [`Classification`]은 이벤트와 필드 추출 중 발견한 이상([`ClassificationAnomaly`])을 함께 담습니다.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;

/// 이벤트 종류
///
/// 규칙 테이블의 선언 순서와 동일하게 나열합니다. 마지막의
/// [`EventKind::Unrecognized`]는 어떤 규칙에도 매칭되지 않은 라인입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ClientCount,
    BgsaveComplete,
    ListeningSocket,
    StartupBanner,
    ClientAccepted,
    FileLimitRaised,
    ClientDisconnected,
    ReplicaSyncRequest,
    ReplicaFullSyncRequest,
    BgsaveStart,
    BgsaveBegin,
    ReplicaSyncStatus,
    DbKeyMetrics,
    DbSaved,
    DbLoaded,
    FinalSave,
    SocketRemoved,
    ReplicaOfIssued,
    ConnectingToMaster,
    MasterSyncStarted,
    PartialResyncImpossible,
    FullResyncFromMaster,
    MasterSyncState,
    MasterPingReply,
    Unrecognized,
}

impl EventKind {
    /// 메트릭 레이블과 로그 필드에 쓰는 snake_case 이름
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientCount => "client_count",
            Self::BgsaveComplete => "bgsave_complete",
            Self::ListeningSocket => "listening_socket",
            Self::StartupBanner => "startup_banner",
            Self::ClientAccepted => "client_accepted",
            Self::FileLimitRaised => "file_limit_raised",
            Self::ClientDisconnected => "client_disconnected",
            Self::ReplicaSyncRequest => "replica_sync_request",
            Self::ReplicaFullSyncRequest => "replica_full_sync_request",
            Self::BgsaveStart => "bgsave_start",
            Self::BgsaveBegin => "bgsave_begin",
            Self::ReplicaSyncStatus => "replica_sync_status",
            Self::DbKeyMetrics => "db_key_metrics",
            Self::DbSaved => "db_saved",
            Self::DbLoaded => "db_loaded",
            Self::FinalSave => "final_save",
            Self::SocketRemoved => "socket_removed",
            Self::ReplicaOfIssued => "replica_of_issued",
            Self::ConnectingToMaster => "connecting_to_master",
            Self::MasterSyncStarted => "master_sync_started",
            Self::PartialResyncImpossible => "partial_resync_impossible",
            Self::FullResyncFromMaster => "full_resync_from_master",
            Self::MasterSyncState => "master_sync_state",
            Self::MasterPingReply => "master_ping_reply",
            Self::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 추출된 필드 값 (문자열 또는 정수)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Str(String),
}

impl FieldValue {
    /// 정수 값이면 반환합니다.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Str(_) => None,
        }
    }

    /// 문자열 값이면 반환합니다.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Int(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

/// 로그를 쓴 서버 프로세스의 역할 표시자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerRole {
    /// `M`
    Master,
    /// `S`
    Replica,
    /// `C` (BGSAVE 등으로 fork된 자식)
    Child,
    /// `X`
    Sentinel,
}

impl ServerRole {
    /// 메타데이터의 역할 문자를 해석합니다.
    pub fn from_marker(marker: char) -> Option<Self> {
        match marker {
            'M' => Some(Self::Master),
            'S' => Some(Self::Replica),
            'C' => Some(Self::Child),
            'X' => Some(Self::Sentinel),
            _ => None,
        }
    }
}

/// 메시지 앞의 메타데이터 세그먼트에서 얻은 정보
///
/// 해석에 실패한 항목은 `None`으로 남습니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LineMeta {
    /// 로그를 쓴 프로세스 ID
    pub pid: Option<u32>,
    /// 프로세스 역할 (구버전 형식에는 없음)
    pub role: Option<ServerRole>,
    /// 타임스탬프 (연도가 포함된 형식에서만)
    pub timestamp: Option<NaiveDateTime>,
}

/// 로그 한 줄에서 추출한 구조화 이벤트
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    /// 이벤트 종류
    pub kind: EventKind,
    /// 추출된 필드 (필드 이름 순)
    pub fields: BTreeMap<&'static str, FieldValue>,
    /// 메타데이터
    pub meta: LineMeta,
    /// 구분자 뒤의 메시지 본문
    pub message: String,
    /// 입력 라인 원문
    pub raw: String,
}

impl LogEvent {
    /// 필드 값을 조회합니다.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// 정수 필드를 조회합니다.
    pub fn int(&self, name: &str) -> Option<i64> {
        self.field(name).and_then(FieldValue::as_int)
    }

    /// 문자열 필드를 조회합니다.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(FieldValue::as_str)
    }

    /// 어떤 규칙에도 매칭되지 않았는지 여부
    pub fn is_unrecognized(&self) -> bool {
        self.kind == EventKind::Unrecognized
    }
}

/// 필드 추출 이상 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyReason {
    /// 기대한 위치에 토큰이 없음
    MissingToken,
    /// 정수여야 할 토큰이 정수가 아님
    NotAnInteger,
    /// 분기를 결정하는 토큰이 알려진 값이 아님
    UnexpectedToken,
}

impl fmt::Display for AnomalyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MissingToken => "missing token",
            Self::NotAnInteger => "not an integer",
            Self::UnexpectedToken => "unexpected token",
        })
    }
}

/// 규칙은 매칭됐지만 필드 하나를 기대대로 추출하지 못한 경우
///
/// 이벤트는 해당 필드를 0 또는 빈 문자열로 채운 채 그대로 발행됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationAnomaly {
    /// 매칭된 규칙
    pub rule: EventKind,
    /// 추출하려던 필드
    pub field: &'static str,
    /// 문제가 된 토큰 (없으면 빈 문자열)
    pub token: String,
    /// 사유
    pub reason: AnomalyReason,
}

impl fmt::Display for ClassificationAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}: {} ('{}')",
            self.rule, self.field, self.reason, self.token
        )
    }
}

/// 분류 결과: 이벤트 하나와 0개 이상의 추출 이상
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub event: LogEvent,
    pub anomalies: Vec<ClassificationAnomaly>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_unique_snake_case() {
        let kinds = [
            EventKind::ClientCount,
            EventKind::DbKeyMetrics,
            EventKind::MasterSyncState,
            EventKind::Unrecognized,
        ];
        for kind in kinds {
            let name = kind.as_str();
            assert_eq!(name, name.to_lowercase());
            assert!(!name.contains(' '));
            assert_eq!(kind.to_string(), name);
        }
    }

    #[test]
    fn kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&EventKind::ReplicaFullSyncRequest).unwrap();
        assert_eq!(json, "\"replica_full_sync_request\"");
    }

    #[test]
    fn field_value_accessors() {
        let int = FieldValue::from(42);
        let text = FieldValue::from("10.0.0.2:6379");
        assert_eq!(int.as_int(), Some(42));
        assert_eq!(int.as_str(), None);
        assert_eq!(text.as_str(), Some("10.0.0.2:6379"));
        assert_eq!(text.to_string(), "10.0.0.2:6379");
    }

    #[test]
    fn field_value_serializes_untagged() {
        let json = serde_json::to_string(&FieldValue::Int(7)).unwrap();
        assert_eq!(json, "7");
        let json = serde_json::to_string(&FieldValue::from("x")).unwrap();
        assert_eq!(json, "\"x\"");
    }

    #[test]
    fn role_markers() {
        assert_eq!(ServerRole::from_marker('M'), Some(ServerRole::Master));
        assert_eq!(ServerRole::from_marker('S'), Some(ServerRole::Replica));
        assert_eq!(ServerRole::from_marker('C'), Some(ServerRole::Child));
        assert_eq!(ServerRole::from_marker('X'), Some(ServerRole::Sentinel));
        assert_eq!(ServerRole::from_marker('Q'), None);
    }

    #[test]
    fn anomaly_display_names_rule_and_field() {
        let anomaly = ClassificationAnomaly {
            rule: EventKind::ClientCount,
            field: "slave_count",
            token: "(x".to_owned(),
            reason: AnomalyReason::NotAnInteger,
        };
        let msg = anomaly.to_string();
        assert!(msg.contains("client_count.slave_count"));
        assert!(msg.contains("not an integer"));
        assert!(msg.contains("(x"));
    }
}
