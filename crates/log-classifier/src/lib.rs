//! Gordo 로그 분류기
//!
//! 감독 대상 서버가 표준 출력에 쓰는 자유 형식 로그 한 줄을 구조화 이벤트로 바꿉니다.
//!
//! # 모듈 구성
//!
//! - [`line`]: 메타데이터 세그먼트와 메시지 본문 분리, 메타데이터 해석
//! - [`rule`]: 우선순위 순서의 규칙 테이블
//! - [`extract`]: 토큰 위치 기반 필드 추출 (fail-soft)
//! - [`classifier`]: [`classify`] 진입점
//! - [`event`]: 이벤트, 필드 값, 추출 이상 타입
//!
//! # 흐름
//!
//! ```text
//! raw line -> split_line -> (meta, message) -> RULES (first match) -> Extractor -> Classification
//!                              |                                                      |
//!                          parse_meta                                     LogEvent + anomalies
//! ```

pub mod classifier;
pub mod event;
pub mod extract;
pub mod line;
pub mod rule;

// --- 주요 타입 re-export ---

pub use classifier::classify;
pub use event::{
    AnomalyReason, Classification, ClassificationAnomaly, EventKind, FieldValue, LineMeta,
    LogEvent, ServerRole,
};
pub use rule::{RULES, Rule, Trigger, find_rule, rules};
