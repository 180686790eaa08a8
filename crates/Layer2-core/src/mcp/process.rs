//! MCP 서버 프로세스 관리
//!
//! 자식 프로세스는 모니터 태스크가 단독으로 소유합니다. 모니터는 프로세스 종료를
//! 감시하다가 `ConnectionEvent`를 채널로 보내고, 명시적 종료 요청이 오면 프로세스를
//! 죽인 뒤 결과를 회신합니다.

use std::path::Path;
use std::process::Stdio;
use tether_foundation::{ChildEnv, Error, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

// ============================================================================
// ConnectionEvent
// ============================================================================

/// 연결 상태 변화 이벤트 (모니터 태스크 -> ConnectionManager)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub server: String,
    /// 연결 시도 식별자. 같은 이름으로 다시 연결했을 때 오래된 이벤트를 걸러냄
    pub connection_id: u64,
    pub kind: ConnectionEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEventKind {
    /// 프로세스 종료 (시그널 종료면 code 없음)
    ProcessExited { code: Option<i32> },
    /// 프로세스 상태 조회 실패
    ProcessError { message: String },
    /// 전송 계층 종료 (stdout EOF, 쓰기 실패)
    TransportClosed,
}

impl std::fmt::Display for ConnectionEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProcessExited { code: Some(code) } => write!(f, "process exited with code {}", code),
            Self::ProcessExited { code: None } => write!(f, "process terminated by signal"),
            Self::ProcessError { message } => write!(f, "process error: {}", message),
            Self::TransportClosed => write!(f, "transport closed"),
        }
    }
}

// ============================================================================
// ProcessHandle
// ============================================================================

/// 프로세스 최종 상태
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    Exited { code: Option<i32> },
    Killed,
    Failed { message: String },
}

type KillReply = oneshot::Sender<std::io::Result<()>>;

/// 실행할 프로세스 설명
pub struct ProcessSpec<'a> {
    pub program: &'a Path,
    pub args: &'a [String],
    pub env: &'a ChildEnv,
    pub cwd: &'a Path,
}

/// MCP 서버 프로세스 핸들
pub struct ProcessHandle {
    server: String,
    pid: Option<u32>,
    exit: watch::Receiver<Option<ProcessExit>>,
    kill_tx: parking_lot::Mutex<Option<oneshot::Sender<KillReply>>>,
}

impl ProcessHandle {
    /// 프로세스 시작
    ///
    /// stdin/stdout은 전송 계층용으로 반환하고, stderr는 debug 로그로 흘려보냅니다.
    pub fn spawn(
        server: &str,
        connection_id: u64,
        spec: ProcessSpec<'_>,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Result<(Self, ChildStdin, ChildStdout)> {
        info!(server, "Spawning MCP process: {} {:?}", spec.program.display(), spec.args);

        let mut child = Command::new(spec.program)
            .args(spec.args)
            .env_clear()
            .envs(spec.env)
            .current_dir(spec.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::McpConnection(format!(
                    "failed to spawn '{}' for server '{}': {}",
                    spec.program.display(),
                    server,
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::McpConnection("failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::McpConnection("failed to capture stdout".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let server = server.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %server, "stderr: {}", line);
                }
            });
        }

        let pid = child.id();
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel::<KillReply>();
        let server_name = server.to_string();

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let (exit, kind) = match status {
                        Ok(status) => (
                            ProcessExit::Exited { code: status.code() },
                            ConnectionEventKind::ProcessExited { code: status.code() },
                        ),
                        Err(e) => (
                            ProcessExit::Failed { message: e.to_string() },
                            ConnectionEventKind::ProcessError { message: e.to_string() },
                        ),
                    };
                    debug!(server = %server_name, "MCP process finished: {}", kind);
                    exit_tx.send_replace(Some(exit));
                    let _ = events.send(ConnectionEvent {
                        server: server_name,
                        connection_id,
                        kind,
                    });
                }
                request = kill_rx => {
                    let result = child.kill().await;
                    exit_tx.send_replace(Some(ProcessExit::Killed));
                    // 핸들이 drop된 경우(request = Err)에도 프로세스는 정리
                    if let Ok(reply) = request {
                        let _ = reply.send(result);
                    }
                }
            }
        });

        Ok((
            Self {
                server: server.to_string(),
                pid,
                exit: exit_rx,
                kill_tx: parking_lot::Mutex::new(Some(kill_tx)),
            },
            stdin,
            stdout,
        ))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// 최종 상태 (아직 실행 중이면 None)
    pub fn exit_status(&self) -> Option<ProcessExit> {
        self.exit.borrow().clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// 프로세스 종료. 이미 종료됐으면 아무 일도 하지 않음
    pub async fn terminate(&self) -> Result<()> {
        if self.has_exited() {
            return Ok(());
        }

        let kill_tx = self.kill_tx.lock().take();
        let Some(kill_tx) = kill_tx else {
            return Ok(());
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if kill_tx.send(reply_tx).is_err() {
            // 모니터가 이미 종료를 관찰함
            return Ok(());
        }

        match reply_rx.await {
            Ok(Ok(())) => {
                debug!(server = %self.server, "MCP process terminated");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(server = %self.server, "Failed to kill MCP process: {}", e);
                Err(Error::McpConnection(format!(
                    "failed to terminate '{}': {}",
                    self.server, e
                )))
            }
            Err(_) => Ok(()),
        }
    }
}
