//! Gordo 공통 크레이트
//!
//! 사이드카의 모든 크레이트가 공유하는 에러 타입, 설정, 디렉티브 저장소,
//! 메트릭 이름을 정의합니다.
//!
//! # 모듈 구성
//!
//! - [`config`]: `gordo.toml` 파싱 및 환경변수 오버라이드
//! - [`directive`]: 서버 디렉티브 저장소 (쓰기 보호 포함)
//! - [`error`]: 도메인 에러 타입
//! - [`metrics`]: Prometheus 메트릭 이름 상수

pub mod config;
pub mod directive;
pub mod error;
pub mod metrics;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, ControlError, DirectiveError, GordoError, SupervisorError};

// 설정
pub use config::GordoConfig;

// 디렉티브 저장소
pub use directive::{DirectiveStore, SetOutcome};
