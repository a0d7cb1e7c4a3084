//! Gordo 서버 감독 크레이트
//!
//! 감독 대상 서버 프로세스를 실행/정지하고, 출력 로그를 분류해 싱크로 넘기며,
//! 보호 디렉티브를 주기적으로 다시 적용합니다.
//!
//! # 모듈 구성
//!
//! - [`resp`]: 컨트롤 연결용 RESP 인코딩/디코딩
//! - [`control`]: [`ControlClient`] trait과 RESP 구현
//! - [`process`]: 프로세스 그룹 생성, 출력 읽기, 완료 신호
//! - [`sink`]: 분류 결과 싱크
//! - [`enforcer`]: 보호 디렉티브 강제 적용 루프
//! - [`supervisor`]: 수명 주기 상태 머신
//!
//! # 테스트 지원
//!
//! `test-util` feature를 켜면 `MockControl`과 `CollectingSink`가 공개됩니다.

pub mod control;
pub mod enforcer;
pub mod process;
pub mod resp;
pub mod sink;
pub mod supervisor;

pub use control::{ControlClient, ControlTarget, Endpoint, RespClient};
pub use enforcer::{Enforcer, TickOutcome};
pub use process::{Completion, ProcessExit, ServerProcess};
pub use sink::{EventSink, TracingSink};
pub use supervisor::{ServerInfo, StopOutcome, Supervisor, SupervisorSettings, SupervisorState};

#[cfg(any(test, feature = "test-util"))]
pub use control::{MockCall, MockControl};
#[cfg(any(test, feature = "test-util"))]
pub use sink::CollectingSink;
