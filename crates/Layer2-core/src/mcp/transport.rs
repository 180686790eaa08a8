//! MCP Transport - 줄 단위 JSON-RPC 전송 계층
//!
//! 자식 프로세스의 stdin/stdout에 붙지만, 임의의 `AsyncRead`/`AsyncWrite` 쌍으로도
//! 만들 수 있습니다 (테스트에서는 `tokio::io::duplex`).
//!
//! - writer task: 채널로 받은 줄을 순서대로 기록
//! - reader task: 응답을 대기 중인 요청에 전달, 서버발 `ping` 요청에 응답
//!
//! 스트림이 끝나거나 쓰기가 실패하면 연결 상태가 false로 바뀌고, 대기 중인 요청은
//! 모두 에러로 끝납니다.

use super::protocol::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    RequestId,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_foundation::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type PendingMap = HashMap<u64, oneshot::Sender<std::result::Result<Value, JsonRpcError>>>;
type ResponseRx = oneshot::Receiver<std::result::Result<Value, JsonRpcError>>;

/// MCP Transport trait
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// 요청 전송 및 응답 수신
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value>;

    /// 알림 전송 (응답 없음)
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// 연결 종료
    async fn close(&self) -> Result<()>;

    /// 연결 상태 확인
    fn is_connected(&self) -> bool;
}

// ============================================================================
// StdioTransport
// ============================================================================

/// Stdio Transport - newline-delimited JSON-RPC
pub struct StdioTransport {
    server: String,
    request_id: AtomicU64,
    outgoing: mpsc::UnboundedSender<String>,
    pending: Arc<Mutex<PendingMap>>,
    connected: Arc<watch::Sender<bool>>,
    request_timeout: Option<Duration>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StdioTransport {
    /// reader/writer 쌍 위에 전송 계층 생성 (tokio 런타임 안에서 호출)
    pub fn new<R, W>(server: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let server = server.into();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel::<String>();
        let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
        let (connected, _) = watch::channel(true);
        let connected = Arc::new(connected);

        let writer_task = tokio::spawn(write_loop(
            server.clone(),
            writer,
            outgoing_rx,
            Arc::clone(&connected),
            Arc::clone(&pending),
        ));
        let reader_task = tokio::spawn(read_loop(
            server.clone(),
            reader,
            outgoing.clone(),
            Arc::clone(&connected),
            Arc::clone(&pending),
        ));

        Self {
            server,
            request_id: AtomicU64::new(1),
            outgoing,
            pending,
            connected,
            request_timeout: None,
            tasks: Mutex::new(vec![writer_task, reader_task]),
        }
    }

    /// 요청당 응답 대기 시간 제한 (None = 무제한)
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// 연결이 끊길 때까지 대기
    pub async fn closed(&self) {
        let mut rx = self.connected.subscribe();
        let _ = rx.wait_for(|connected| !*connected).await;
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// 응답 대기 등록
    ///
    /// 연결 상태 확인과 등록은 `pending` 잠금 안에서 함께 수행합니다. 연결 종료도 같은
    /// 잠금 안에서 상태를 바꾸고 대기열을 비우므로, 등록된 요청은 응답을 받거나
    /// 종료 에러로 끝납니다.
    fn register(&self, id: u64) -> Result<ResponseRx> {
        let mut pending = self.pending.lock();
        if !*self.connected.borrow() {
            return Err(self.closed_error());
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(id, tx);
        Ok(rx)
    }

    fn closed_error(&self) -> Error {
        Error::McpConnection(format!("transport for '{}' is closed", self.server))
    }

    fn send_line<T: serde::Serialize>(&self, message: &T) -> Result<()> {
        let line = JsonRpcMessage::to_line(message)?;
        self.outgoing.send(line).map_err(|_| self.closed_error())
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id();
        let rx = self.register(id)?;

        debug!(server = %self.server, id, method, "Sending MCP request");
        if let Err(e) = self.send_line(&JsonRpcRequest::new(id, method, params)) {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        let response = match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(response) => response,
                Err(_) => {
                    self.pending.lock().remove(&id);
                    return Err(Error::Timeout(format!(
                        "'{}' did not answer {} within {}s",
                        self.server,
                        method,
                        limit.as_secs()
                    )));
                }
            },
            None => rx.await,
        };

        match response {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(Error::Mcp(format!("{} failed: {}", method, error))),
            Err(_) => Err(Error::McpConnection(format!(
                "connection to '{}' closed before {} completed",
                self.server, method
            ))),
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if !self.is_connected() {
            return Err(self.closed_error());
        }
        self.send_line(&JsonRpcNotification::new(method, params))
    }

    async fn close(&self) -> Result<()> {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        // 대기 중인 요청은 sender가 drop되면서 에러로 끝남
        mark_closed(&self.connected, &self.pending);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

// ============================================================================
// I/O tasks
// ============================================================================

async fn write_loop<W>(
    server: String,
    mut writer: W,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    connected: Arc<watch::Sender<bool>>,
    pending: Arc<Mutex<PendingMap>>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    while let Some(line) = outgoing.recv().await {
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            warn!(server = %server, "Failed to write to MCP server: {}", e);
            break;
        }
    }

    mark_closed(&connected, &pending);
}

/// 연결 종료 표시 + 대기 중인 요청 정리 (`pending` 잠금 안에서)
fn mark_closed(connected: &watch::Sender<bool>, pending: &Mutex<PendingMap>) {
    let mut pending = pending.lock();
    connected.send_replace(false);
    pending.clear();
}

async fn read_loop<R>(
    server: String,
    reader: R,
    outgoing: mpsc::UnboundedSender<String>,
    connected: Arc<watch::Sender<bool>>,
    pending: Arc<Mutex<PendingMap>>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!(server = %server, "MCP stdout read error: {}", e);
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match JsonRpcMessage::parse(&line) {
            Ok(JsonRpcMessage::Response(response)) => {
                deliver(&server, &pending, response);
            }
            Ok(JsonRpcMessage::Request(request)) => {
                let reply = answer_server_request(&request);
                if let Ok(line) = JsonRpcMessage::to_line(&reply) {
                    let _ = outgoing.send(line);
                }
            }
            Ok(JsonRpcMessage::Notification(notification)) => {
                debug!(server = %server, method = %notification.method, "MCP notification");
            }
            Err((_, error)) => {
                debug!(server = %server, "Ignoring non-JSON-RPC line: {}", error.message);
            }
        }
    }

    mark_closed(&connected, &pending);
    debug!(server = %server, "MCP stdout reader finished");
}

fn deliver(server: &str, pending: &Mutex<PendingMap>, response: JsonRpcResponse) {
    let Some(RequestId::Number(id)) = response.id else {
        debug!(server, "Response without a numeric id: {:?}", response.id);
        return;
    };

    let Some(sender) = pending.lock().remove(&id) else {
        debug!(server, id, "Response for unknown request");
        return;
    };

    let outcome = match response.error {
        Some(error) => Err(error),
        None => Ok(response.result.unwrap_or(Value::Null)),
    };
    let _ = sender.send(outcome);
}

/// 서버가 보낸 요청에 대한 응답. ping만 지원
fn answer_server_request(request: &JsonRpcRequest) -> JsonRpcResponse {
    match request.method.as_str() {
        "ping" => JsonRpcResponse::success(request.id.clone(), json!({})),
        other => JsonRpcResponse::failure(
            Some(request.id.clone()),
            JsonRpcError::method_not_found(other),
        ),
    }
}
