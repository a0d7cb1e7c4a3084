//! 분류 이벤트 싱크
//!
//! 감독기는 서버 출력 한 줄마다 분류 결과를 [`EventSink`]로 넘깁니다.
//! 기본 구현 [`TracingSink`]는 구조화 로그를 남기고 서버 상태 메트릭을 갱신합니다.

use gordo_core::metrics as m;
use gordo_log_classifier::{Classification, EventKind, LogEvent};

/// 로그 tracing target
pub const SERVER_LOG_TARGET: &str = "gordo::server";

/// 분류 결과 수신자
///
/// 읽기 태스크에서 출력 순서대로 호출되므로 오래 블로킹하면 안 됩니다.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, classification: &Classification);
}

/// tracing 로그와 메트릭으로 내보내는 싱크
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, classification: &Classification) {
        let event = &classification.event;
        let kind = event.kind.as_str();

        metrics::counter!(m::CLASSIFIER_EVENTS_TOTAL, m::LABEL_KIND => kind).increment(1);

        if event.is_unrecognized() {
            tracing::debug!(target: SERVER_LOG_TARGET, line = %event.raw, "server output");
        } else {
            metrics::counter!(m::CLASSIFIER_MATCHED_LINES_TOTAL).increment(1);
            tracing::info!(
                target: SERVER_LOG_TARGET,
                kind,
                pid = event.meta.pid,
                fields = %render_fields(event),
                "{}",
                event.message
            );
        }

        for anomaly in &classification.anomalies {
            metrics::counter!(m::CLASSIFIER_ANOMALIES_TOTAL, m::LABEL_RULE => anomaly.rule.as_str())
                .increment(1);
            tracing::warn!(
                target: SERVER_LOG_TARGET,
                rule = anomaly.rule.as_str(),
                field = anomaly.field,
                token = %anomaly.token,
                reason = %anomaly.reason,
                line = %event.raw,
                "field extraction anomaly"
            );
        }

        record_server_metrics(event);
    }
}

/// `key=value` 형식으로 필드를 나열합니다.
fn render_fields(event: &LogEvent) -> String {
    let mut out = String::new();
    for (name, value) in &event.fields {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(name);
        out.push('=');
        out.push_str(&value.to_string());
    }
    out
}

fn record_server_metrics(event: &LogEvent) {
    match event.kind {
        EventKind::ClientCount => {
            if let Some(clients) = event.int("client_count") {
                metrics::gauge!(m::SERVER_CONNECTED_CLIENTS).set(clients as f64);
            }
            if let Some(replicas) = event.int("slave_count") {
                metrics::gauge!(m::SERVER_CONNECTED_REPLICAS).set(replicas as f64);
            }
        }
        EventKind::DbKeyMetrics => {
            let db = event.int("db_index").unwrap_or_default().to_string();
            if let Some(keys) = event.int("key_count") {
                metrics::gauge!(m::SERVER_DB_KEYS, m::LABEL_DB => db.clone()).set(keys as f64);
            }
            if let Some(volatile) = event.int("volatile_count") {
                metrics::gauge!(m::SERVER_DB_VOLATILE_KEYS, m::LABEL_DB => db).set(volatile as f64);
            }
        }
        EventKind::DbLoaded => {
            if let Some(secs) = event
                .text("load_time_seconds")
                .and_then(|s| s.parse::<f64>().ok())
            {
                metrics::gauge!(m::SERVER_LOAD_DURATION_SECONDS).set(secs);
            }
        }
        EventKind::BgsaveComplete => {
            metrics::counter!(m::SERVER_BGSAVE_COMPLETED_TOTAL).increment(1);
        }
        _ => {}
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use collecting::CollectingSink;

#[cfg(any(test, feature = "test-util"))]
mod collecting {
    use std::sync::{Arc, Mutex, PoisonError};

    use gordo_log_classifier::{Classification, EventKind};

    use super::EventSink;

    /// 받은 분류 결과를 모아 두는 테스트용 싱크
    #[derive(Debug, Clone, Default)]
    pub struct CollectingSink {
        items: Arc<Mutex<Vec<Classification>>>,
    }

    impl CollectingSink {
        pub fn new() -> Self {
            Self::default()
        }

        /// 지금까지 받은 분류 결과
        pub fn items(&self) -> Vec<Classification> {
            self.items
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// 받은 이벤트 종류 (순서 유지)
        pub fn kinds(&self) -> Vec<EventKind> {
            self.items().iter().map(|c| c.event.kind).collect()
        }
    }

    impl EventSink for CollectingSink {
        fn emit(&self, classification: &Classification) {
            self.items
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(classification.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gordo_log_classifier::classify;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn render_fields_is_sorted_key_value() {
        let c = classify("DB 0: 12 keys (3 volatile) in 16 slots HT.");
        assert_eq!(
            render_fields(&c.event),
            "db_index=0 key_count=12 slot_count=16 volatile_count=3"
        );
    }

    #[test]
    fn render_fields_empty_for_fieldless_event() {
        let c = classify("Background saving terminated with success");
        assert_eq!(render_fields(&c.event), "");
    }

    #[test]
    fn tracing_sink_accepts_every_kind_without_recorder() {
        let sink = TracingSink;
        for line in [
            "1 clients connected (0 slaves), 0 maxclients",
            "DB 0: 1 keys (0 volatile) in 4 slots HT.",
            "DB loaded from disk: 0.012 seconds",
            "many clients connected (x slaves), 0 maxclients",
            "not a known line",
        ] {
            sink.emit(&classify(line));
        }
    }

    fn rendered_value(rendered: &str, metric: &str) -> Option<u64> {
        rendered
            .lines()
            .find_map(|l| l.strip_prefix(metric)?.strip_prefix(' ')?.trim().parse().ok())
    }

    #[test]
    fn matched_counter_skips_unrecognized_lines() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            let sink = TracingSink;
            sink.emit(&classify("1 clients connected (0 slaves), 0 maxclients"));
            sink.emit(&classify("not a known line"));
            sink.emit(&classify("Background saving terminated with success"));
            sink.emit(&classify("another unknown line"));
        });

        let rendered = handle.render();
        assert_eq!(
            rendered_value(&rendered, m::CLASSIFIER_MATCHED_LINES_TOTAL),
            Some(2),
            "{rendered}"
        );
    }

    #[test]
    fn collecting_sink_keeps_order() {
        let sink = CollectingSink::new();
        sink.emit(&classify("Client closed connection"));
        sink.emit(&classify("Removing the unix socket file."));
        assert_eq!(
            sink.kinds(),
            vec![EventKind::ClientDisconnected, EventKind::SocketRemoved]
        );
    }
}
