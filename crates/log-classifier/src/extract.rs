//! 필드 추출기
//!
//! 규칙의 추출 함수는 [`Extractor`]에 필드를 기록합니다. 토큰이 없거나 정수가
//! 아니면 필드는 0 또는 빈 문자열로 채워지고 [`ClassificationAnomaly`]가 쌓입니다.

use std::collections::BTreeMap;

use crate::event::{AnomalyReason, ClassificationAnomaly, EventKind, FieldValue};

/// 공백으로 토큰화한 메시지에서 필드를 추출합니다.
pub struct Extractor<'a> {
    kind: EventKind,
    message: &'a str,
    tokens: Vec<&'a str>,
    fields: BTreeMap<&'static str, FieldValue>,
    anomalies: Vec<ClassificationAnomaly>,
}

impl<'a> Extractor<'a> {
    /// 매칭된 규칙과 메시지로 추출기를 생성합니다.
    pub fn new(kind: EventKind, message: &'a str) -> Self {
        Self {
            kind,
            message,
            tokens: message.split(' ').collect(),
            fields: BTreeMap::new(),
            anomalies: Vec::new(),
        }
    }

    /// 메시지 원문
    pub fn message(&self) -> &'a str {
        self.message
    }

    /// `index` 번째 토큰
    pub fn token(&self, index: usize) -> Option<&'a str> {
        self.tokens.get(index).copied()
    }

    /// 마지막 토큰
    pub fn last_token(&self) -> Option<&'a str> {
        self.tokens.last().copied()
    }

    /// 토큰을 문자열 필드로 기록합니다.
    pub fn text(&mut self, field: &'static str, index: usize) {
        let token = self.token(index);
        self.text_value(field, token);
    }

    /// 값을 문자열 필드로 기록합니다. `None`이면 빈 문자열과 이상을 남깁니다.
    pub fn text_value(&mut self, field: &'static str, value: Option<&str>) {
        match value {
            Some(value) => self.put(field, FieldValue::from(value)),
            None => {
                self.anomaly(field, "", AnomalyReason::MissingToken);
                self.put(field, FieldValue::Str(String::new()));
            }
        }
    }

    /// 토큰을 정수 필드로 기록합니다.
    pub fn int(&mut self, field: &'static str, index: usize) {
        let token = self.token(index);
        self.int_value(field, token);
    }

    /// 토큰을 변환한 뒤 정수 필드로 기록합니다.
    pub fn int_with(&mut self, field: &'static str, index: usize, clean: fn(&str) -> &str) {
        let token = self.token(index).map(clean);
        self.int_value(field, token);
    }

    /// 값을 정수 필드로 기록합니다. 실패하면 0과 이상을 남깁니다.
    pub fn int_value(&mut self, field: &'static str, value: Option<&str>) {
        let parsed = match value {
            Some(raw) => match raw.parse::<i64>() {
                Ok(v) => v,
                Err(_) => {
                    self.anomaly(field, raw, AnomalyReason::NotAnInteger);
                    0
                }
            },
            None => {
                self.anomaly(field, "", AnomalyReason::MissingToken);
                0
            }
        };
        self.put(field, FieldValue::Int(parsed));
    }

    /// 필드를 그대로 기록합니다.
    pub fn put(&mut self, field: &'static str, value: FieldValue) {
        self.fields.insert(field, value);
    }

    /// 이상을 기록합니다.
    pub fn anomaly(&mut self, field: &'static str, token: &str, reason: AnomalyReason) {
        self.anomalies.push(ClassificationAnomaly {
            rule: self.kind,
            field,
            token: token.to_owned(),
            reason,
        });
    }

    /// 추출 결과를 돌려줍니다.
    pub fn finish(self) -> (BTreeMap<&'static str, FieldValue>, Vec<ClassificationAnomaly>) {
        (self.fields, self.anomalies)
    }
}

/// 첫 글자 (`(` 같은 표식)를 제거합니다.
pub fn strip_sigil(token: &str) -> &str {
    let mut chars = token.chars();
    chars.next();
    chars.as_str()
}
