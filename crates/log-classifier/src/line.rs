//! 라인 분해 -- 메타데이터 세그먼트와 메시지 본문 분리
//!
//! # 라인 형식
//! ```text
//! 1234:M 15 Jan 2024 12:00:00.123 * Ready to accept connections
//! [1234] 15 Jan 12:00:00.123 - 1 clients connected (0 slaves), 0 maxclients
//! ```
//!
//! 구분자는 `" - "` 또는 `" * "`이며, `" - "`가 우선합니다. 첫 번째 구분자에서만
//! 분리하고 나머지는 모두 메시지입니다. 구분자 없이 `"* "`/`"- "`로 시작하거나
//! 구분자가 아예 없는 라인은 메타데이터가 비어 있는 메시지로 취급합니다.

use chrono::NaiveDateTime;

use crate::event::{LineMeta, ServerRole};

const SEPARATORS: [&str; 2] = [" - ", " * "];
const BARE_MARKERS: [&str; 2] = ["- ", "* "];

/// 메타데이터와 메시지로 나뉜 라인
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitLine<'a> {
    pub meta: &'a str,
    pub message: &'a str,
}

/// 라인을 메타데이터와 메시지로 나눕니다.
///
/// 줄 끝의 `\r`/`\n`은 무시합니다.
pub fn split_line(line: &str) -> SplitLine<'_> {
    let line = line.trim_end_matches(['\r', '\n']);

    for separator in SEPARATORS {
        if let Some(idx) = line.find(separator) {
            return SplitLine {
                meta: &line[..idx],
                message: &line[idx + separator.len()..],
            };
        }
    }

    for marker in BARE_MARKERS {
        if let Some(message) = line.strip_prefix(marker) {
            return SplitLine { meta: "", message };
        }
    }

    SplitLine {
        meta: "",
        message: line,
    }
}

/// 메타데이터 세그먼트를 해석합니다.
///
/// 알 수 없는 형식이면 모든 항목이 비어 있는 [`LineMeta`]를 반환합니다.
pub fn parse_meta(meta: &str) -> LineMeta {
    let meta = meta.trim();
    let (head, rest) = meta.split_once(' ').unwrap_or((meta, ""));

    // 구버전: "[pid] dd Mon hh:mm:ss.mmm" (연도 없음)
    if let Some(pid) = head.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        return LineMeta {
            pid: pid.parse().ok(),
            role: None,
            timestamp: None,
        };
    }

    let (pid, role) = parse_pid_role(head);
    LineMeta {
        pid,
        role,
        timestamp: NaiveDateTime::parse_from_str(rest.trim(), "%d %b %Y %H:%M:%S%.3f").ok(),
    }
}

fn parse_pid_role(token: &str) -> (Option<u32>, Option<ServerRole>) {
    match token.split_once(':') {
        Some((pid, role)) => {
            let mut chars = role.chars();
            let role = match (chars.next(), chars.next()) {
                (Some(marker), None) => ServerRole::from_marker(marker),
                _ => None,
            };
            (pid.parse().ok(), role)
        }
        None => (None, None),
    }
}
