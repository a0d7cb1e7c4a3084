//! 라인 분류
//!
//! [`classify`]는 부작용이 없는 전역 함수입니다. 어떤 입력에도 패닉하지 않으며,
//! 매칭되는 규칙이 없으면 [`EventKind::Unrecognized`] 이벤트를 돌려줍니다.

use std::collections::BTreeMap;

use crate::event::{Classification, EventKind, LogEvent};
use crate::extract::Extractor;
use crate::line::{parse_meta, split_line};
use crate::rule::find_rule;

/// 로그 한 줄을 분류합니다.
///
/// # 사용 예시
/// ```
/// use gordo_log_classifier::{EventKind, classify};
///
/// let result = classify("1 clients connected (0 slaves), 0 maxclients");
/// assert_eq!(result.event.kind, EventKind::ClientCount);
/// assert_eq!(result.event.int("client_count"), Some(1));
/// assert!(result.anomalies.is_empty());
/// ```
pub fn classify(line: &str) -> Classification {
    let split = split_line(line);
    let meta = parse_meta(split.meta);

    let Some(rule) = find_rule(split.message) else {
        return Classification {
            event: LogEvent {
                kind: EventKind::Unrecognized,
                fields: BTreeMap::new(),
                meta,
                message: split.message.to_owned(),
                raw: line.to_owned(),
            },
            anomalies: Vec::new(),
        };
    };

    let mut extractor = Extractor::new(rule.kind, split.message);
    (rule.extract)(&mut extractor);
    let (fields, anomalies) = extractor.finish();

    Classification {
        event: LogEvent {
            kind: rule.kind,
            fields,
            meta,
            message: split.message.to_owned(),
            raw: line.to_owned(),
        },
        anomalies,
    }
}
