//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 크레이트는 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `gordo_`
//! - 모듈명: `classifier_`, `server_`, `supervisor_`, `control_`, `enforcer_`, `directive_`, `api_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(gordo_core::metrics::CLASSIFIER_MATCHED_LINES_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 이벤트 종류 레이블 키 (client_count, bgsave_complete, ...)
pub const LABEL_KIND: &str = "kind";

/// 분류 규칙 레이블 키
pub const LABEL_RULE: &str = "rule";

/// 결과 레이블 키 (success, failure, prohibited)
pub const LABEL_RESULT: &str = "result";

/// 정지 방식 레이블 키 (graceful, forced, noop)
pub const LABEL_MODE: &str = "mode";

/// API 경로 레이블 키
pub const LABEL_ROUTE: &str = "route";

/// API 응답 상태 레이블 키
pub const LABEL_STATUS: &str = "status";

/// 데이터베이스 번호 레이블 키
pub const LABEL_DB: &str = "db";

/// 컨트롤 명령 레이블 키 (connect, config_get, config_set, shutdown, replicaof)
pub const LABEL_OPERATION: &str = "operation";

// ─── Log Classifier 메트릭 ─────────────────────────────────────────

/// Classifier: 분류 규칙에 일치한 로그 라인 수 (counter)
///
/// 읽은 전체 라인 수는 [`SUPERVISOR_OUTPUT_LINES_TOTAL`]이 셉니다.
pub const CLASSIFIER_MATCHED_LINES_TOTAL: &str = "gordo_classifier_matched_lines_total";

/// Classifier: 종류별 이벤트 수 (counter, label: kind)
pub const CLASSIFIER_EVENTS_TOTAL: &str = "gordo_classifier_events_total";

/// Classifier: 필드 추출 이상 건수 (counter, label: rule)
pub const CLASSIFIER_ANOMALIES_TOTAL: &str = "gordo_classifier_anomalies_total";

/// Classifier: 라인 하나 분류 소요 시간 (histogram, 초)
pub const CLASSIFIER_DURATION_SECONDS: &str = "gordo_classifier_duration_seconds";

// ─── 서버 상태 메트릭 (로그에서 추출) ─────────────────────────────────

/// Server: 연결된 클라이언트 수 (gauge)
pub const SERVER_CONNECTED_CLIENTS: &str = "gordo_server_connected_clients";

/// Server: 연결된 복제 노드 수 (gauge)
pub const SERVER_CONNECTED_REPLICAS: &str = "gordo_server_connected_replicas";

/// Server: 데이터베이스별 키 수 (gauge, label: db)
pub const SERVER_DB_KEYS: &str = "gordo_server_db_keys";

/// Server: 데이터베이스별 만료 설정 키 수 (gauge, label: db)
pub const SERVER_DB_VOLATILE_KEYS: &str = "gordo_server_db_volatile_keys";

/// Server: 마지막 디스크 로드 소요 시간 (gauge, 초)
pub const SERVER_LOAD_DURATION_SECONDS: &str = "gordo_server_load_duration_seconds";

/// Server: 완료된 백그라운드 저장 수 (counter)
pub const SERVER_BGSAVE_COMPLETED_TOTAL: &str = "gordo_server_bgsave_completed_total";

// ─── Supervisor 메트릭 ─────────────────────────────────────────────

/// Supervisor: 서버 시작 시도 수 (counter, label: result)
pub const SUPERVISOR_STARTS_TOTAL: &str = "gordo_supervisor_starts_total";

/// Supervisor: 서버 정지 수 (counter, label: mode)
pub const SUPERVISOR_STOPS_TOTAL: &str = "gordo_supervisor_stops_total";

/// Supervisor: 예기치 않은 서버 종료 수 (counter)
pub const SUPERVISOR_UNEXPECTED_EXITS_TOTAL: &str = "gordo_supervisor_unexpected_exits_total";

/// Supervisor: 현재 상태 (gauge, 0=idle 1=starting 2=running 3=stopping)
pub const SUPERVISOR_STATE: &str = "gordo_supervisor_state";

/// Supervisor: 읽은 서버 출력 라인 수 (counter)
pub const SUPERVISOR_OUTPUT_LINES_TOTAL: &str = "gordo_supervisor_output_lines_total";

/// Control: 컨트롤 연결 실패 수 (counter, label: operation)
pub const CONTROL_ERRORS_TOTAL: &str = "gordo_control_errors_total";

// ─── Enforcer 메트릭 ───────────────────────────────────────────────

/// Enforcer: 강제 적용 주기 실행 수 (counter, label: result)
pub const ENFORCER_TICKS_TOTAL: &str = "gordo_enforcer_ticks_total";

/// Enforcer: 라이브 값이 달라 재적용한 횟수 (counter)
pub const ENFORCER_CORRECTIONS_TOTAL: &str = "gordo_enforcer_corrections_total";

// ─── Directive / API 메트릭 ────────────────────────────────────────

/// Directive: API 경유 디렉티브 쓰기 수 (counter, label: result)
pub const DIRECTIVE_WRITES_TOTAL: &str = "gordo_directive_writes_total";

/// API: 처리한 요청 수 (counter, labels: route, status)
pub const API_REQUESTS_TOTAL: &str = "gordo_api_requests_total";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "gordo_daemon_uptime_seconds";

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "gordo_daemon_build_info";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 분류 소요 시간 히스토그램 버킷 (초)
///
/// 1us ~ 10ms 범위, 라인 하나는 보통 수 마이크로초
pub const CLASSIFY_DURATION_BUCKETS: [f64; 8] = [
    0.000_001, 0.000_005, 0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.01,
];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Log Classifier
    describe_counter!(
        CLASSIFIER_MATCHED_LINES_TOTAL,
        "Server log lines matched by a classification rule"
    );
    describe_counter!(
        CLASSIFIER_EVENTS_TOTAL,
        "Classified events per event kind"
    );
    describe_counter!(
        CLASSIFIER_ANOMALIES_TOTAL,
        "Field extraction anomalies per classification rule"
    );
    describe_histogram!(
        CLASSIFIER_DURATION_SECONDS,
        "Time to classify a single log line in seconds"
    );

    // Server (log-derived)
    describe_gauge!(
        SERVER_CONNECTED_CLIENTS,
        "Connected clients as last reported by the server log"
    );
    describe_gauge!(
        SERVER_CONNECTED_REPLICAS,
        "Connected replicas as last reported by the server log"
    );
    describe_gauge!(SERVER_DB_KEYS, "Keys per database from the server log");
    describe_gauge!(
        SERVER_DB_VOLATILE_KEYS,
        "Keys with an expiry per database from the server log"
    );
    describe_gauge!(
        SERVER_LOAD_DURATION_SECONDS,
        "Duration of the last dataset load from disk in seconds"
    );
    describe_counter!(
        SERVER_BGSAVE_COMPLETED_TOTAL,
        "Background saves reported as successful"
    );

    // Supervisor
    describe_counter!(
        SUPERVISOR_STARTS_TOTAL,
        "Server start attempts by result"
    );
    describe_counter!(SUPERVISOR_STOPS_TOTAL, "Server stops by stop mode");
    describe_counter!(
        SUPERVISOR_UNEXPECTED_EXITS_TOTAL,
        "Server exits not requested by the supervisor"
    );
    describe_counter!(
        SUPERVISOR_OUTPUT_LINES_TOTAL,
        "Lines read from the server's standard output"
    );
    describe_counter!(
        CONTROL_ERRORS_TOTAL,
        "Control connection failures by operation"
    );
    describe_gauge!(
        SUPERVISOR_STATE,
        "Supervisor lifecycle state (0=idle, 1=starting, 2=running, 3=stopping)"
    );

    // Enforcer
    describe_counter!(ENFORCER_TICKS_TOTAL, "Enforcement passes by result");
    describe_counter!(
        ENFORCER_CORRECTIONS_TOTAL,
        "Protected directives re-applied because the live value drifted"
    );

    // Directive / API
    describe_counter!(
        DIRECTIVE_WRITES_TOTAL,
        "Directive writes requested through the control API by result"
    );
    describe_counter!(
        API_REQUESTS_TOTAL,
        "Control API requests by route and response status"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Gordo daemon uptime in seconds");
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        CLASSIFIER_MATCHED_LINES_TOTAL,
        CLASSIFIER_EVENTS_TOTAL,
        CLASSIFIER_ANOMALIES_TOTAL,
        CLASSIFIER_DURATION_SECONDS,
        SERVER_CONNECTED_CLIENTS,
        SERVER_CONNECTED_REPLICAS,
        SERVER_DB_KEYS,
        SERVER_DB_VOLATILE_KEYS,
        SERVER_LOAD_DURATION_SECONDS,
        SERVER_BGSAVE_COMPLETED_TOTAL,
        SUPERVISOR_STARTS_TOTAL,
        SUPERVISOR_STOPS_TOTAL,
        SUPERVISOR_UNEXPECTED_EXITS_TOTAL,
        SUPERVISOR_STATE,
        SUPERVISOR_OUTPUT_LINES_TOTAL,
        CONTROL_ERRORS_TOTAL,
        ENFORCER_TICKS_TOTAL,
        ENFORCER_CORRECTIONS_TOTAL,
        DIRECTIVE_WRITES_TOTAL,
        API_REQUESTS_TOTAL,
        DAEMON_UPTIME_SECONDS,
        DAEMON_BUILD_INFO,
    ];

    #[test]
    fn all_metrics_start_with_gordo_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("gordo_"),
                "Metric '{}' does not start with 'gordo_' prefix",
                name
            );
        }
    }

    #[test]
    fn metric_names_are_unique() {
        let mut names = ALL_METRIC_NAMES.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ALL_METRIC_NAMES.len());
    }

    #[test]
    fn counters_end_with_total() {
        let counters = [
            CLASSIFIER_MATCHED_LINES_TOTAL,
            CLASSIFIER_EVENTS_TOTAL,
            CLASSIFIER_ANOMALIES_TOTAL,
            SUPERVISOR_STARTS_TOTAL,
            SUPERVISOR_STOPS_TOTAL,
            SUPERVISOR_UNEXPECTED_EXITS_TOTAL,
            SUPERVISOR_OUTPUT_LINES_TOTAL,
            CONTROL_ERRORS_TOTAL,
            SERVER_BGSAVE_COMPLETED_TOTAL,
            ENFORCER_TICKS_TOTAL,
            ENFORCER_CORRECTIONS_TOTAL,
            DIRECTIVE_WRITES_TOTAL,
            API_REQUESTS_TOTAL,
        ];
        for name in counters {
            assert!(name.ends_with("_total"), "{name}");
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        // 레코더 없이 호출해도 패닉하지 않아야 함
        describe_all();
    }

    #[test]
    fn label_keys_are_lowercase() {
        let labels = [
            LABEL_KIND,
            LABEL_RULE,
            LABEL_RESULT,
            LABEL_MODE,
            LABEL_ROUTE,
            LABEL_STATUS,
            LABEL_DB,
            LABEL_OPERATION,
        ];
        for label in &labels {
            assert_eq!(label.to_lowercase(), *label);
        }
    }

    #[test]
    fn classify_duration_buckets_are_sorted() {
        let buckets = CLASSIFY_DURATION_BUCKETS;
        for i in 1..buckets.len() {
            assert!(
                buckets[i] > buckets[i - 1],
                "Bucket values must be in ascending order"
            );
        }
    }
}
