//! 디렉티브 저장소 — 서버 설정의 단일 진실 공급원
//!
//! [`DirectiveStore`]는 감독 대상 서버에 전달할 디렉티브(키-값 쌍)를 보관합니다.
//! API 레이어, 강제 적용 루프, 감독기가 `Arc<DirectiveStore>`로 공유하며
//! 모든 접근은 내부 락으로 직렬화됩니다.
//!
//! # 쓰기 보호
//! 보호 키(기본값 `maxmemory`)는 보호가 활성화된 동안 [`DirectiveStore::set`]
//! 호출을 거부하고 [`SetOutcome::Prohibited`]를 반환합니다. 이는 에러가 아니라
//! 호출자가 구조화된 거부 응답으로 변환해야 하는 결과입니다.
//!
//! # 사용 예시
//! ```
//! use gordo_core::directive::{DirectiveStore, SetOutcome};
//!
//! let store = DirectiveStore::new(["maxmemory"], true);
//! store.force("maxmemory", "1G").unwrap();
//! assert_eq!(store.set("maxmemory", "2G").unwrap(), SetOutcome::Prohibited);
//! assert_eq!(store.get("maxmemory").unwrap(), "1G");
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock};

use crate::error::DirectiveError;

/// 최대 메모리 디렉티브 키
pub const MAXMEMORY: &str = "maxmemory";
/// TCP 포트 디렉티브 키
pub const PORT: &str = "port";
/// 유닉스 소켓 경로 디렉티브 키
pub const UNIXSOCKET: &str = "unixsocket";
/// 인증 비밀번호 디렉티브 키
pub const REQUIREPASS: &str = "requirepass";

/// [`DirectiveStore::set`] 호출 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// 값이 저장됨
    Applied,
    /// 보호 키라서 거부됨 (저장된 값은 변경되지 않음)
    Prohibited,
}

#[derive(Debug, Default)]
struct Inner {
    directives: BTreeMap<String, String>,
    protected: BTreeSet<String>,
    protection_active: bool,
}

/// 디렉티브 저장소
///
/// 키 순서로 정렬된 맵을 사용하므로 [`snapshot`](Self::snapshot)과
/// [`to_argument_list`](Self::to_argument_list)의 순서가 결정적입니다.
#[derive(Debug, Default)]
pub struct DirectiveStore {
    inner: RwLock<Inner>,
}

impl DirectiveStore {
    /// 보호 키 목록과 보호 활성화 여부로 빈 저장소를 생성합니다.
    pub fn new<I, S>(protected: I, protection_active: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: RwLock::new(Inner {
                directives: BTreeMap::new(),
                protected: protected.into_iter().map(Into::into).collect(),
                protection_active,
            }),
        }
    }

    /// 초기 디렉티브 목록으로 저장소를 생성합니다.
    ///
    /// 초기값은 보호 여부와 관계없이 적용됩니다. 빈 키나 빈 값이 있으면
    /// 에러를 반환합니다.
    pub fn with_directives<I, K, V>(
        directives: I,
        protected: &[&str],
        protection_active: bool,
    ) -> Result<Self, DirectiveError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new(protected.iter().copied(), protection_active);
        for (key, value) in directives {
            store.force(key, value)?;
        }
        Ok(store)
    }

    /// 디렉티브 값을 조회합니다.
    pub fn get(&self, key: &str) -> Result<String, DirectiveError> {
        self.read()
            .directives
            .get(key)
            .cloned()
            .ok_or_else(|| DirectiveError::NotFound {
                key: key.to_owned(),
            })
    }

    /// 키가 존재하는지 확인합니다.
    pub fn contains(&self, key: &str) -> bool {
        self.read().directives.contains_key(key)
    }

    /// 디렉티브 값을 기록합니다.
    ///
    /// 보호가 활성화된 보호 키이면 값을 바꾸지 않고
    /// [`SetOutcome::Prohibited`]를 반환합니다.
    pub fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<SetOutcome, DirectiveError> {
        let (key, value) = validate(key.into(), value.into())?;
        let mut inner = self.write();
        if inner.protection_active && inner.protected.contains(&key) {
            tracing::debug!(key = %key, "write to protected directive rejected");
            return Ok(SetOutcome::Prohibited);
        }
        inner.directives.insert(key, value);
        Ok(SetOutcome::Applied)
    }

    /// 보호 여부를 무시하고 값을 기록합니다.
    ///
    /// 시작 시점의 설정/CLI 값 적용에만 사용합니다.
    pub fn force(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), DirectiveError> {
        let (key, value) = validate(key.into(), value.into())?;
        self.write().directives.insert(key, value);
        Ok(())
    }

    /// 키가 보호 대상이고 현재 보호가 활성화되어 있는지 확인합니다.
    pub fn is_protected(&self, key: &str) -> bool {
        let inner = self.read();
        inner.protection_active && inner.protected.contains(key)
    }

    /// 보호 활성화 여부
    pub fn protection_active(&self) -> bool {
        self.read().protection_active
    }

    /// 보호를 켜거나 끕니다.
    pub fn set_protection(&self, active: bool) {
        self.write().protection_active = active;
    }

    /// 전체 디렉티브를 키 순서로 복사해 반환합니다.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.read()
            .directives
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// 저장소에 값이 있는 보호 키 목록을 반환합니다.
    ///
    /// 보호 활성화 여부와 무관하게 보호 키 전체를 대상으로 합니다.
    pub fn protected_snapshot(&self) -> Vec<(String, String)> {
        let inner = self.read();
        inner
            .protected
            .iter()
            .filter_map(|k| inner.directives.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// 서버 커맨드라인 인자 목록을 생성합니다.
    ///
    /// 디렉티브마다 `--<key>`, `<value>` 두 개의 토큰을 생성합니다.
    pub fn to_argument_list(&self) -> Vec<String> {
        let inner = self.read();
        let mut args = Vec::with_capacity(inner.directives.len() * 2);
        for (key, value) in &inner.directives {
            args.push(format!("--{key}"));
            args.push(value.clone());
        }
        args
    }

    /// 저장된 디렉티브 수
    pub fn len(&self) -> usize {
        self.read().directives.len()
    }

    /// 저장소가 비어 있는지 여부
    pub fn is_empty(&self) -> bool {
        self.read().directives.is_empty()
    }

    // 락 오염은 무시한다: 저장소는 단일 insert 단위로만 변경되므로 항상 일관적이다.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn validate(key: String, value: String) -> Result<(String, String), DirectiveError> {
    if key.trim().is_empty() {
        return Err(DirectiveError::Invalid {
            key,
            reason: "key must not be empty".to_owned(),
        });
    }
    if value.is_empty() {
        return Err(DirectiveError::Invalid {
            key,
            reason: "value must not be empty".to_owned(),
        });
    }
    Ok((key, value))
}
