//! 서버 프로세스 핸들
//!
//! 자식 프로세스를 자체 프로세스 그룹으로 생성하고 표준 출력을 줄 단위로
//! 읽어 콜백에 넘깁니다. 종료 대기는 별도 태스크가 맡으며, 프로세스가
//! 종료되고 출력이 모두 소비되면 [`Completion`]이 정확히 한 번 기록됩니다.

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;

use gordo_core::error::SupervisorError;

/// 프로세스 종료 후 남은 출력을 기다리는 최대 시간
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 종료 정보
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// 종료 코드 (시그널로 종료되면 `None`)
    pub code: Option<i32>,
    /// 종료 시그널
    pub signal: Option<i32>,
}

impl ProcessExit {
    const UNKNOWN: Self = Self {
        code: None,
        signal: None,
    };

    fn from_status(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

/// 프로세스 완료 신호
///
/// 값은 대기 태스크 하나만 기록하므로 프로세스 수명당 한 번만 바뀝니다.
#[derive(Debug, Clone)]
pub struct Completion {
    rx: watch::Receiver<Option<ProcessExit>>,
}

impl Completion {
    /// 완료되었으면 종료 정보를 반환합니다.
    pub fn get(&self) -> Option<ProcessExit> {
        *self.rx.borrow()
    }

    /// 완료될 때까지 기다립니다.
    pub async fn wait(&self) -> ProcessExit {
        let mut rx = self.rx.clone();
        let waited = rx.wait_for(Option::is_some).await.map(|v| *v);
        match waited {
            Ok(exit) => exit.unwrap_or(ProcessExit::UNKNOWN),
            // 대기 태스크가 기록 없이 사라짐 (런타임 종료)
            Err(_) => self.get().unwrap_or(ProcessExit::UNKNOWN),
        }
    }

    /// 주어진 시간 안에 완료되면 종료 정보를 반환합니다.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<ProcessExit> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }
}

/// 실행 중인 서버 프로세스
#[derive(Debug)]
pub struct ServerProcess {
    pid: u32,
    completion: Completion,
}

impl ServerProcess {
    /// 서버 프로세스를 생성합니다.
    ///
    /// `on_line`은 읽기 태스크에서 출력 순서대로 호출됩니다.
    /// 줄 끝의 `\r\n`은 제거하고, UTF-8이 아닌 바이트는 대체 문자로 바꿉니다.
    pub fn spawn<F>(binary: &str, args: &[String], mut on_line: F) -> Result<Self, SupervisorError>
    where
        F: FnMut(String) + Send + 'static,
    {
        let spawn_failed = |reason: String| SupervisorError::SpawnFailed {
            binary: binary.to_owned(),
            reason,
        };

        let mut child = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_failed(e.to_string()))?;

        let pid = child
            .id()
            .ok_or_else(|| spawn_failed("process exited before its pid was read".to_owned()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_failed("stdout was not captured".to_owned()))?;

        let reader = tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::with_capacity(256);
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        on_line(line.trim_end_matches(['\r', '\n']).to_owned());
                    }
                    Err(e) => {
                        tracing::warn!(pid, error = %e, "server output read failed");
                        break;
                    }
                }
            }
            tracing::debug!(pid, "server output closed");
        });

        let (tx, rx) = watch::channel(None);
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => ProcessExit::from_status(status),
                Err(e) => {
                    tracing::warn!(pid, error = %e, "failed to wait for server process");
                    ProcessExit::UNKNOWN
                }
            };
            // 손자 프로세스가 출력을 쥐고 있으면 EOF가 오지 않는다
            if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await.is_err() {
                tracing::debug!(pid, "server output still open after exit");
            }
            let _ = tx.send(Some(exit));
        });

        Ok(Self {
            pid,
            completion: Completion { rx },
        })
    }

    /// 프로세스 ID (프로세스 그룹 ID와 같음)
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// 완료 신호 핸들
    pub fn completion(&self) -> Completion {
        self.completion.clone()
    }

    /// 프로세스 그룹 전체에 시그널을 보냅니다.
    pub fn signal_group(&self, signal: libc::c_int) -> Result<(), SupervisorError> {
        signal_group(self.pid, signal)
    }
}

/// 프로세스 그룹에 시그널을 보냅니다.
///
/// 그룹이 이미 없으면(`ESRCH`) 성공으로 간주합니다.
pub fn signal_group(pgid: u32, signal: libc::c_int) -> Result<(), SupervisorError> {
    let pgid = libc::pid_t::try_from(pgid).unwrap_or(0);
    // 0과 1은 각각 자기 그룹과 init을 뜻한다
    if pgid <= 1 {
        return Err(SupervisorError::Signal {
            pgid,
            reason: "refusing to signal reserved process group".to_owned(),
        });
    }

    // SAFETY: killpg(2)는 정수 인자만 받으며 실패 시 errno만 설정한다
    let rc = unsafe { libc::killpg(pgid, signal) };
    if rc == 0 {
        return Ok(());
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(SupervisorError::Signal {
        pgid,
        reason: err.to_string(),
    })
}
