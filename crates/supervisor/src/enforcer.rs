//! 보호 디렉티브 강제 적용 루프
//!
//! 고정 주기마다 실행 중인 서버에 연결해 보호 디렉티브의 저장값을 다시
//! 적용합니다. 연결이 되지 않거나 적용이 실패해도 로그만 남기고 다음 주기를
//! 기다립니다.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use gordo_core::DirectiveStore;
use gordo_core::metrics as m;

use crate::control::{ControlClient, ControlTarget};

/// 한 주기의 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// 서버에 연결하지 못함
    Unreachable,
    /// 보호 디렉티브 적용 시도 완료
    Applied {
        /// 적용에 성공한 디렉티브 수
        pushed: usize,
        /// 적용에 실패한 디렉티브 수
        failed: usize,
        /// 라이브 값이 저장값과 달랐던 디렉티브 수
        corrected: usize,
    },
}

impl TickOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Unreachable => "unreachable",
            Self::Applied { failed: 0, .. } => "applied",
            Self::Applied { .. } => "partial",
        }
    }
}

/// 보호 디렉티브 강제 적용기
pub struct Enforcer<C> {
    control: Arc<C>,
    store: Arc<DirectiveStore>,
    interval: Duration,
}

impl<C: ControlClient> Enforcer<C> {
    pub fn new(control: Arc<C>, store: Arc<DirectiveStore>, interval: Duration) -> Self {
        Self {
            control,
            store,
            interval,
        }
    }

    /// 한 주기를 실행합니다.
    ///
    /// 라이브 값을 먼저 조회해 차이가 있으면 교정 건수로 세고, 값이 같아도
    /// 저장값을 항상 다시 적용합니다.
    pub async fn tick(&self) -> TickOutcome {
        let outcome = self.apply().await;
        metrics::counter!(m::ENFORCER_TICKS_TOTAL, m::LABEL_RESULT => outcome.label()).increment(1);
        outcome
    }

    async fn apply(&self) -> TickOutcome {
        let target = match ControlTarget::from_store(&self.store) {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!(error = %e, "enforcement skipped: no control address");
                return TickOutcome::Unreachable;
            }
        };

        let mut pushed = 0;
        let mut failed = 0;
        let mut corrected = 0;

        for (key, value) in self.store.protected_snapshot() {
            match self.control.get_config(&target, &key).await {
                Ok(live) if live != value => {
                    tracing::info!(key = %key, live = %live, stored = %value, "protected directive drifted");
                    corrected += 1;
                }
                Ok(_) => {}
                Err(e) if e.is_connection() => {
                    tracing::warn!(address = %target.endpoint, error = %e, "server unavailable, retrying next interval");
                    return TickOutcome::Unreachable;
                }
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "could not read live value");
                }
            }

            match self.control.set_config(&target, &key, &value).await {
                Ok(()) => pushed += 1,
                Err(e) if e.is_connection() => {
                    tracing::warn!(address = %target.endpoint, error = %e, "server unavailable, retrying next interval");
                    return TickOutcome::Unreachable;
                }
                Err(e) => {
                    tracing::warn!(key = %key, value = %value, error = %e, "failed to enforce protected directive");
                    failed += 1;
                }
            }
        }

        if corrected > 0 {
            metrics::counter!(m::ENFORCER_CORRECTIONS_TOTAL).increment(corrected as u64);
        }
        tracing::debug!(pushed, failed, corrected, "enforcement pass complete");
        TickOutcome::Applied {
            pushed,
            failed,
            corrected,
        }
    }

    /// 취소될 때까지 주기적으로 [`tick`](Self::tick)을 실행합니다.
    ///
    /// 첫 주기는 시작 후 `interval`이 지난 뒤 실행됩니다.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.interval, "enforcement loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        tracing::info!("enforcement loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{MockCall, MockControl};
    use gordo_core::directive::MAXMEMORY;

    fn store() -> Arc<DirectiveStore> {
        Arc::new(
            DirectiveStore::with_directives(
                [("maxmemory", "1G"), ("port", "6380"), ("loglevel", "debug")],
                &[MAXMEMORY],
                true,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn tick_pushes_only_protected_directives() {
        let mock = MockControl::new().with_config("maxmemory", "1G");
        let enforcer = Enforcer::new(Arc::new(mock.clone()), store(), Duration::from_secs(60));

        let outcome = enforcer.tick().await;
        assert_eq!(
            outcome,
            TickOutcome::Applied {
                pushed: 1,
                failed: 0,
                corrected: 0
            }
        );
        assert_eq!(
            mock.calls(),
            vec![
                MockCall::GetConfig("maxmemory".to_owned()),
                MockCall::SetConfig("maxmemory".to_owned(), "1G".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn tick_restores_drifted_value() {
        let mock = MockControl::new().with_config("maxmemory", "4G");
        let enforcer = Enforcer::new(Arc::new(mock.clone()), store(), Duration::from_secs(60));

        let outcome = enforcer.tick().await;
        assert!(matches!(outcome, TickOutcome::Applied { corrected: 1, .. }));
        assert_eq!(mock.config_value("maxmemory").as_deref(), Some("1G"));
    }

    #[tokio::test]
    async fn rejected_push_is_not_fatal() {
        let mock = MockControl::new()
            .with_config("maxmemory", "1G")
            .reject_key("maxmemory");
        let enforcer = Enforcer::new(Arc::new(mock), store(), Duration::from_secs(60));

        let outcome = enforcer.tick().await;
        assert_eq!(
            outcome,
            TickOutcome::Applied {
                pushed: 0,
                failed: 1,
                corrected: 0
            }
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_reported() {
        let mock = MockControl::new().unreachable();
        let enforcer = Enforcer::new(Arc::new(mock), store(), Duration::from_secs(60));
        assert_eq!(enforcer.tick().await, TickOutcome::Unreachable);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_tick_is_followed_by_next_tick() {
        let mock = MockControl::new().unreachable();
        let enforcer = Enforcer::new(Arc::new(mock.clone()), store(), Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(enforcer.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(mock.connect_attempts(), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(mock.connect_attempts(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(mock.connect_attempts(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_loop_stops_ticking() {
        let mock = MockControl::new().with_config("maxmemory", "1G");
        let enforcer = Enforcer::new(Arc::new(mock.clone()), store(), Duration::from_secs(10));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(enforcer.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(11)).await;
        cancel.cancel();
        handle.await.unwrap();
        let after_cancel = mock.calls().len();

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(mock.calls().len(), after_cancel);
        assert_eq!(after_cancel, 2);
    }
}
