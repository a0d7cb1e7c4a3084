//! 분류 규칙 테이블
//!
//! [`RULES`]는 우선순위 순서로 선언된 규칙 목록입니다. 메시지는 위에서부터
//! 평가되며 처음 매칭된 규칙이 이벤트 종류를 결정합니다. 여러 규칙의 접두어가
//! 겹치므로 (`"DB "`로 시작하는 규칙 세 개 등) 선언 순서 자체가 계약입니다.

use crate::event::{AnomalyReason, EventKind, FieldValue};
use crate::extract::{Extractor, strip_sigil};

/// 메시지에 대한 매칭 조건
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// 메시지 전체 일치
    Exact(&'static str),
    /// 접두어 일치
    Prefix(&'static str),
    /// 접미어 일치
    Suffix(&'static str),
    /// 부분 문자열 포함
    Contains(&'static str),
    /// 접두어 일치 + 부분 문자열 포함
    PrefixContains(&'static str, &'static str),
}

impl Trigger {
    /// 메시지가 조건을 만족하는지 검사합니다.
    pub fn matches(&self, message: &str) -> bool {
        match *self {
            Self::Exact(text) => message == text,
            Self::Prefix(prefix) => message.starts_with(prefix),
            Self::Suffix(suffix) => message.ends_with(suffix),
            Self::Contains(needle) => message.contains(needle),
            Self::PrefixContains(prefix, needle) => {
                message.starts_with(prefix) && message.contains(needle)
            }
        }
    }
}

/// 분류 규칙 하나: (조건, 추출 함수, 이벤트 종류)
pub struct Rule {
    pub kind: EventKind,
    pub trigger: Trigger,
    pub(crate) extract: fn(&mut Extractor<'_>),
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("kind", &self.kind)
            .field("trigger", &self.trigger)
            .finish()
    }
}

/// 우선순위 순서의 규칙 테이블
pub static RULES: [Rule; 24] = [
    Rule {
        kind: EventKind::ClientCount,
        trigger: Trigger::Contains("clients connected"),
        extract: client_count,
    },
    Rule {
        kind: EventKind::BgsaveComplete,
        trigger: Trigger::Exact("Background saving terminated with success"),
        extract: no_fields,
    },
    Rule {
        kind: EventKind::ListeningSocket,
        trigger: Trigger::Prefix("The server is now ready to accept "),
        extract: listening_socket,
    },
    Rule {
        kind: EventKind::StartupBanner,
        trigger: Trigger::Suffix("ready to start."),
        extract: startup_banner,
    },
    Rule {
        kind: EventKind::ClientAccepted,
        trigger: Trigger::Contains("Accepted"),
        extract: client_accepted,
    },
    Rule {
        kind: EventKind::FileLimitRaised,
        trigger: Trigger::Prefix("Increased maximum number of open files to "),
        extract: file_limit_raised,
    },
    Rule {
        kind: EventKind::ClientDisconnected,
        trigger: Trigger::Exact("Client closed connection"),
        extract: no_fields,
    },
    Rule {
        kind: EventKind::ReplicaSyncRequest,
        trigger: Trigger::Suffix("asks for synchronization"),
        extract: |e| e.text("replica_address", 1),
    },
    Rule {
        kind: EventKind::ReplicaFullSyncRequest,
        trigger: Trigger::Prefix("Full resync requested "),
        extract: |e| e.text("replica_address", 5),
    },
    Rule {
        kind: EventKind::BgsaveStart,
        trigger: Trigger::Prefix("Background saving started"),
        extract: |e| {
            let last = e.last_token();
            e.int_value("pid", last);
        },
    },
    Rule {
        kind: EventKind::BgsaveBegin,
        trigger: Trigger::Prefix("Starting BGSAVE"),
        extract: |e| {
            e.text("reason", 3);
            e.text("target", 6);
        },
    },
    Rule {
        kind: EventKind::ReplicaSyncStatus,
        trigger: Trigger::Prefix("Synchronization with slave "),
        extract: |e| {
            e.text("replica_address", 3);
            e.text("status", 4);
        },
    },
    Rule {
        kind: EventKind::DbKeyMetrics,
        trigger: Trigger::PrefixContains("DB ", "keys"),
        extract: db_key_metrics,
    },
    Rule {
        kind: EventKind::DbSaved,
        trigger: Trigger::Prefix("DB saved "),
        extract: |e| e.text("target", 3),
    },
    Rule {
        kind: EventKind::DbLoaded,
        trigger: Trigger::Prefix("DB loaded from disk:"),
        extract: |e| e.text("load_time_seconds", 4),
    },
    Rule {
        kind: EventKind::FinalSave,
        trigger: Trigger::Prefix("Saving the final"),
        extract: no_fields,
    },
    Rule {
        kind: EventKind::SocketRemoved,
        trigger: Trigger::Exact("Removing the unix socket file."),
        extract: no_fields,
    },
    Rule {
        kind: EventKind::ReplicaOfIssued,
        trigger: Trigger::Prefix("SLAVE OF"),
        extract: |e| e.text("master_address", 2),
    },
    Rule {
        kind: EventKind::ConnectingToMaster,
        trigger: Trigger::Prefix("Connecting to MASTER"),
        extract: |e| e.text("master_address", 3),
    },
    Rule {
        kind: EventKind::MasterSyncStarted,
        trigger: Trigger::Exact("MASTER <-> SLAVE sync started"),
        extract: no_fields,
    },
    Rule {
        kind: EventKind::PartialResyncImpossible,
        trigger: Trigger::Prefix("Partial resynchronization not possible"),
        extract: partial_resync_impossible,
    },
    Rule {
        kind: EventKind::FullResyncFromMaster,
        trigger: Trigger::Prefix("Full resync from master"),
        extract: |e| {
            let message = e.message();
            e.put("message", FieldValue::from(message));
        },
    },
    Rule {
        kind: EventKind::MasterSyncState,
        trigger: Trigger::Prefix(MASTER_SYNC_STATE_PREFIX),
        extract: master_sync_state,
    },
    Rule {
        kind: EventKind::MasterPingReply,
        trigger: Trigger::Prefix("Master replied to PING"),
        extract: no_fields,
    },
];

const MASTER_SYNC_STATE_PREFIX: &str = "MASTER <-> SLAVE sync:";
const NO_CACHED_MASTER: &str = "no cached master";

/// 우선순위 순서의 규칙 목록
pub fn rules() -> &'static [Rule] {
    &RULES
}

/// 메시지에 처음 매칭되는 규칙을 찾습니다.
pub fn find_rule(message: &str) -> Option<&'static Rule> {
    RULES.iter().find(|rule| rule.trigger.matches(message))
}

fn no_fields(_: &mut Extractor<'_>) {}

// "1 clients connected (0 slaves), 0 maxclients"
fn client_count(e: &mut Extractor<'_>) {
    e.int("client_count", 0);
    e.int_with("slave_count", 3, strip_sigil);
}

// "... accept connections at /tmp/redis.sock" / "... accept connections on port 6380"
fn listening_socket(e: &mut Extractor<'_>) {
    match e.token(8) {
        Some("at") => {
            e.put("transport", FieldValue::from("unix"));
            e.text("address", 9);
        }
        Some("on") => {
            e.put("transport", FieldValue::from("tcp"));
            e.int("port", 10);
        }
        other => {
            e.anomaly(
                "transport",
                other.unwrap_or_default(),
                match other {
                    Some(_) => AnomalyReason::UnexpectedToken,
                    None => AnomalyReason::MissingToken,
                },
            );
            e.put("transport", FieldValue::Str(String::new()));
        }
    }
}

// "Redis 2.6.17 (00000000/0) 64 bit, standalone mode, port 6380, pid 123 ready to start."
fn startup_banner(e: &mut Extractor<'_>) {
    e.text("version", 1);
    e.int("bit_depth", 3);

    let message = e.message();
    let body = message.strip_suffix(" ready to start.").unwrap_or(message);
    let segments: Vec<&str> = body.split(", ").collect();

    let mode = segments
        .get(1)
        .map(|s| s.strip_suffix("mode").unwrap_or(s).trim());
    e.text_value("mode", mode);

    let port = segments.get(2).map(|s| s.strip_prefix("port ").unwrap_or(s));
    e.int_value("port", port);

    let pid = segments.get(3).map(|s| s.strip_prefix("pid ").unwrap_or(s));
    e.int_value("pid", pid);
}

// "Accepted 127.0.0.1:52341" / "Accepted connection from /tmp/redis.sock"
fn client_accepted(e: &mut Extractor<'_>) {
    let index = if e.token(1) == Some("connection") { 3 } else { 1 };
    e.text("client", index);
}

// "Increased maximum number of open files to 10032 (it was originally set to 1024)."
fn file_limit_raised(e: &mut Extractor<'_>) {
    e.int("new_limit", 7);
    e.int_with("previous_limit", 13, strip_close_paren);
}

// "DB 0: 1 keys (0 volatile) in 4 slots HT."
fn db_key_metrics(e: &mut Extractor<'_>) {
    e.int_with("db_index", 1, strip_colon);
    e.int("key_count", 2);
    e.int_with("volatile_count", 4, strip_sigil);
    e.int("slot_count", 7);
}

fn partial_resync_impossible(e: &mut Extractor<'_>) {
    let message = e.message();
    let reason = if message.contains(NO_CACHED_MASTER) {
        NO_CACHED_MASTER
    } else {
        message
    };
    e.put("reason", FieldValue::from(reason));
}

fn master_sync_state(e: &mut Extractor<'_>) {
    let message = e.message();
    let state = message
        .strip_prefix(MASTER_SYNC_STATE_PREFIX)
        .unwrap_or(message)
        .trim();
    e.put("state", FieldValue::from(state));
}

fn strip_colon(token: &str) -> &str {
    token.strip_suffix(':').unwrap_or(token)
}

fn strip_close_paren(token: &str) -> &str {
    token.strip_suffix(").").unwrap_or(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 규칙마다 해당 규칙에만 해당하는 대표 메시지
    const SAMPLES: [(EventKind, &str); 24] = [
        (
            EventKind::ClientCount,
            "1 clients connected (0 slaves), 0 maxclients",
        ),
        (
            EventKind::BgsaveComplete,
            "Background saving terminated with success",
        ),
        (
            EventKind::ListeningSocket,
            "The server is now ready to accept connections on port 6380",
        ),
        (
            EventKind::StartupBanner,
            "Redis 2.6.17 (00000000/0) 64 bit, standalone mode, port 6380, pid 123 ready to start.",
        ),
        (EventKind::ClientAccepted, "Accepted 127.0.0.1:52341"),
        (
            EventKind::FileLimitRaised,
            "Increased maximum number of open files to 10032 (it was originally set to 1024).",
        ),
        (EventKind::ClientDisconnected, "Client closed connection"),
        (
            EventKind::ReplicaSyncRequest,
            "Slave 10.0.0.2:6379 asks for synchronization",
        ),
        (
            EventKind::ReplicaFullSyncRequest,
            "Full resync requested by slave 10.0.0.2:6379",
        ),
        (EventKind::BgsaveStart, "Background saving started by pid 4242"),
        (
            EventKind::BgsaveBegin,
            "Starting BGSAVE for SYNC with target: disk",
        ),
        (
            EventKind::ReplicaSyncStatus,
            "Synchronization with slave 10.0.0.2:6379 succeeded",
        ),
        (EventKind::DbKeyMetrics, "DB 0: 1 keys (0 volatile) in 4 slots HT."),
        (EventKind::DbSaved, "DB saved on disk"),
        (EventKind::DbLoaded, "DB loaded from disk: 0.012 seconds"),
        (
            EventKind::FinalSave,
            "Saving the final RDB snapshot before exiting.",
        ),
        (EventKind::SocketRemoved, "Removing the unix socket file."),
        (
            EventKind::ReplicaOfIssued,
            "SLAVE OF 10.0.0.1:6379 enabled (user request)",
        ),
        (
            EventKind::ConnectingToMaster,
            "Connecting to MASTER 10.0.0.1:6379",
        ),
        (EventKind::MasterSyncStarted, "MASTER <-> SLAVE sync started"),
        (
            EventKind::PartialResyncImpossible,
            "Partial resynchronization not possible (no cached master)",
        ),
        (
            EventKind::FullResyncFromMaster,
            "Full resync from master: 3f2a:1",
        ),
        (
            EventKind::MasterSyncState,
            "MASTER <-> SLAVE sync: Finished with success",
        ),
        (
            EventKind::MasterPingReply,
            "Master replied to PING, replication can continue...",
        ),
    ];

    #[test]
    fn table_order_matches_event_kind_order() {
        for pair in RULES.windows(2) {
            assert!(pair[0].kind < pair[1].kind, "{:?}", pair[1]);
        }
        assert_eq!(rules().len(), 24);
    }

    #[test]
    fn every_sample_selects_its_own_rule() {
        for (kind, message) in SAMPLES {
            let rule = find_rule(message).unwrap_or_else(|| panic!("no rule for {message}"));
            assert_eq!(rule.kind, kind, "message: {message}");
        }
    }

    #[test]
    fn accepted_outranks_db_key_metrics() {
        let rule = find_rule("DB 0: Accepted 2 keys").unwrap();
        assert_eq!(rule.kind, EventKind::ClientAccepted);
    }

    #[test]
    fn clients_connected_outranks_accepted() {
        let rule = find_rule("2 clients connected (0 slaves), Accepted").unwrap();
        assert_eq!(rule.kind, EventKind::ClientCount);
    }

    #[test]
    fn db_keys_outranks_db_saved() {
        let rule = find_rule("DB saved 5 keys").unwrap();
        assert_eq!(rule.kind, EventKind::DbKeyMetrics);
    }

    #[test]
    fn unrelated_db_message_matches_nothing() {
        assert!(find_rule("DB something else").is_none());
    }

    #[test]
    fn trigger_variants() {
        assert!(Trigger::Exact("a b").matches("a b"));
        assert!(!Trigger::Exact("a b").matches("a b "));
        assert!(Trigger::Prefix("a").matches("abc"));
        assert!(Trigger::Suffix("c").matches("abc"));
        assert!(Trigger::Contains("b").matches("abc"));
        assert!(Trigger::PrefixContains("a", "c").matches("abc"));
        assert!(!Trigger::PrefixContains("a", "d").matches("abc"));
    }

    #[test]
    fn strip_helpers() {
        assert_eq!(strip_colon("0:"), "0");
        assert_eq!(strip_colon("0"), "0");
        assert_eq!(strip_close_paren("1024)."), "1024");
    }
}
