//! MCP Connection Manager - 설정된 서버마다 프로세스 + 전송 계층 + 클라이언트 하나
//!
//! ## 수명 주기
//!
//! ```text
//! Unconnected -> Connecting -> Connected -> Disconnected
//!                     │
//!                     └──────> Failed (핸드셰이크까지 가지 못함)
//! ```
//!
//! - `connect()`: 모든 서버를 동시에 시도. 일부 실패는 정상 동작
//! - 프로세스 모니터 / 전송 계층 감시 태스크는 이벤트를 채널로만 보냄
//! - 이벤트는 소유자(`next_event`, `sync_events`)가 적용: 연결 해제 + 도구 회수
//! - `disconnect()`: 연결마다 클라이언트 종료, 전송 계층 종료, 프로세스 종료를
//!   서로 독립적으로 수행한 뒤 모든 상태를 비움

use super::bridge::adapt_remote_tool;
use super::client::McpClient;
use super::process::{ConnectionEvent, ProcessHandle, ProcessSpec};
use super::transport::{McpTransport, StdioTransport};
use super::types::Implementation;
use futures::future::join_all;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tether_foundation::{McpServers, OrderedMap, Result, ServerLaunch, ToolDefinition};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

// ============================================================================
// Status
// ============================================================================

/// 서버 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Disabled,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

impl ConnectionState {
    /// 연결을 시도한 적이 있는지
    pub fn was_attempted(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Disconnected | ConnectionState::Failed
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionState::Unconnected => "unconnected",
            ConnectionState::Disabled => "disabled",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
        };
        f.pad(label)
    }
}

/// 서버별 상태 요약
#[derive(Debug, Clone, PartialEq)]
pub struct ServerStatus {
    pub name: String,
    pub state: ConnectionState,
    pub tool_count: usize,
    pub pid: Option<u32>,
    pub server_info: Option<Implementation>,
    /// 실패 / 연결 해제 사유
    pub error: Option<String>,
}

impl ServerStatus {
    fn new(name: &str, state: ConnectionState) -> Self {
        Self {
            name: name.to_string(),
            state,
            tool_count: 0,
            pid: None,
            server_info: None,
            error: None,
        }
    }
}

// ============================================================================
// ServerConnection
// ============================================================================

/// 하나의 서버 연결 (프로세스, 전송 계층, 클라이언트를 단독 소유)
pub struct ServerConnection {
    pub name: String,
    pub launch: ServerLaunch,
    pub connection_id: u64,
    pub process: ProcessHandle,
    pub transport: Arc<StdioTransport>,
    pub client: Arc<McpClient>,
    pub connected: bool,
}

impl ServerConnection {
    /// 연결 정리. 각 단계의 실패는 로그만 남기고 다음 단계를 계속 진행
    async fn teardown(&self) {
        if let Err(e) = self.client.close().await {
            warn!(server = %self.name, "Failed to close MCP client: {}", e);
        }
        if let Err(e) = self.transport.close().await {
            warn!(server = %self.name, "Failed to close MCP transport: {}", e);
        }
        if let Err(e) = self.process.terminate().await {
            warn!(server = %self.name, "Failed to terminate MCP process: {}", e);
        }
    }
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// MCP 연결 관리자
pub struct ConnectionManager {
    servers: McpServers,
    working_dir: PathBuf,
    connections: HashMap<String, Arc<Mutex<ServerConnection>>>,
    tools: HashMap<String, Vec<ToolDefinition>>,
    statuses: OrderedMap<ServerStatus>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    events_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    next_connection_id: u64,
}

impl ConnectionManager {
    /// 새 관리자 생성. 상대 경로(`cwd`, `./server`)는 `working_dir` 기준
    pub fn new(servers: McpServers, working_dir: impl Into<PathBuf>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let statuses = Self::initial_statuses(&servers);

        Self {
            servers,
            working_dir: working_dir.into(),
            connections: HashMap::new(),
            tools: HashMap::new(),
            statuses,
            events_tx,
            events_rx,
            next_connection_id: 0,
        }
    }

    fn initial_statuses(servers: &McpServers) -> OrderedMap<ServerStatus> {
        servers
            .iter()
            .map(|(name, launch)| {
                let state = if launch.enabled {
                    ConnectionState::Unconnected
                } else {
                    ConnectionState::Disabled
                };
                (name.clone(), ServerStatus::new(name, state))
            })
            .collect()
    }

    pub fn servers(&self) -> &McpServers {
        &self.servers
    }

    /// 모든 서버에 연결
    ///
    /// 시도는 동시에 진행되고 하나의 실패가 다른 서버에 영향을 주지 않습니다.
    /// 이미 연결된 서버와 비활성 서버는 건너뜁니다. 실패해도 에러를 반환하지 않으며,
    /// 결과는 `get_connection_status()`로 확인합니다.
    pub async fn connect(&mut self) -> Result<()> {
        if self.servers.is_empty() {
            debug!("No MCP servers configured");
            return Ok(());
        }

        if self.statuses.is_empty() {
            self.statuses = Self::initial_statuses(&self.servers);
        }

        let mut attempts = Vec::new();
        for (name, launch) in self.servers.iter() {
            if !launch.enabled {
                debug!(server = %name, "MCP server disabled, skipping");
                continue;
            }
            let already_connected = self
                .statuses
                .get(name)
                .map_or(false, |s| s.state == ConnectionState::Connected);
            if already_connected {
                continue;
            }
            self.next_connection_id += 1;
            attempts.push((name.clone(), launch.clone(), self.next_connection_id));
        }

        for (name, _, _) in &attempts {
            self.statuses
                .insert(name.clone(), ServerStatus::new(name, ConnectionState::Connecting));
        }

        // 1. 모든 서버 동시 연결 (spawn + handshake)
        let results = join_all(attempts.into_iter().map(|(name, launch, id)| {
            let working_dir = self.working_dir.clone();
            let events = self.events_tx.clone();
            async move {
                let result = connect_server(&name, &launch, id, &working_dir, events).await;
                (name, launch, id, result)
            }
        }))
        .await;

        let mut ready = Vec::new();
        for (name, launch, id, result) in results {
            match result {
                Ok((process, transport, client)) => {
                    let mut status = ServerStatus::new(&name, ConnectionState::Connected);
                    status.pid = process.pid();
                    status.server_info = client.server_info().map(|i| i.server_info);
                    self.statuses.insert(name.clone(), status);

                    ready.push((name.clone(), Arc::clone(&client)));
                    self.connections.insert(
                        name.clone(),
                        Arc::new(Mutex::new(ServerConnection {
                            name,
                            launch,
                            connection_id: id,
                            process,
                            transport,
                            client,
                            connected: true,
                        })),
                    );
                }
                Err(e) => {
                    warn!(server = %name, "Failed to connect to MCP server: {}", e);
                    let mut status = ServerStatus::new(&name, ConnectionState::Failed);
                    status.error = Some(e.to_string());
                    self.statuses.insert(name, status);
                }
            }
        }

        // 2. 연결된 서버의 도구 목록 동시 조회
        let listings = join_all(ready.into_iter().map(|(name, client)| async move {
            let result = client.list_tools().await;
            (name, client, result)
        }))
        .await;

        for (name, client, result) in listings {
            let tools: Vec<ToolDefinition> = match result {
                Ok(tools) => tools
                    .into_iter()
                    .map(|tool| adapt_remote_tool(&name, tool, Arc::clone(&client)))
                    .collect(),
                Err(e) => {
                    warn!(server = %name, "Failed to list MCP tools: {}", e);
                    Vec::new()
                }
            };

            if let Some(status) = self.statuses.get_mut(&name) {
                status.tool_count = tools.len();
            }
            self.tools.insert(name, tools);
        }

        let connected = self
            .statuses
            .values()
            .filter(|s| s.state == ConnectionState::Connected)
            .count();
        info!(
            "MCP servers: {}/{} connected, {} remote tools",
            connected,
            self.servers.len(),
            self.get_tools().len()
        );

        Ok(())
    }

    /// 연결된 서버의 도구 (서버 선언 순서, 서버 내에서는 목록 순서)
    pub fn get_tools(&self) -> Vec<ToolDefinition> {
        self.servers
            .keys()
            .filter_map(|name| self.tools.get(name))
            .flat_map(|tools| tools.iter().cloned())
            .collect()
    }

    /// 연결을 시도한 서버마다 마지막으로 알려진 연결 여부
    pub fn get_connection_status(&self) -> HashMap<String, bool> {
        self.statuses
            .values()
            .filter(|s| s.state.was_attempted())
            .map(|s| (s.name.clone(), s.state == ConnectionState::Connected))
            .collect()
    }

    /// 연결된 서버가 하나라도 있는지
    pub fn has_connections(&self) -> bool {
        self.statuses
            .values()
            .any(|s| s.state == ConnectionState::Connected)
    }

    /// 서버별 상세 상태 (선언 순서)
    pub fn server_statuses(&self) -> Vec<ServerStatus> {
        self.statuses.values().cloned().collect()
    }

    /// 서버 연결 핸들
    pub fn connection(&self, name: &str) -> Option<Arc<Mutex<ServerConnection>>> {
        self.connections.get(name).cloned()
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// 다음 이벤트 수신 (적용하지 않음, cancel-safe)
    pub async fn recv_event(&mut self) -> Option<ConnectionEvent> {
        self.events_rx.recv().await
    }

    /// 이벤트 적용. 상태가 바뀌었으면 true
    ///
    /// 연결된 서버에 대한 이벤트면 연결 해제로 표시하고, 클라이언트와 전송 계층을
    /// 닫고, 도구를 회수합니다. 오래된 연결 시도의 이벤트는 무시합니다.
    pub async fn apply_event(&mut self, event: &ConnectionEvent) -> bool {
        let Some(connection) = self.connections.get(&event.server).cloned() else {
            return false;
        };

        {
            let mut conn = connection.lock().await;
            if conn.connection_id != event.connection_id || !conn.connected {
                return false;
            }
            conn.connected = false;

            warn!(server = %event.server, "MCP server disconnected: {}", event.kind);
            if let Err(e) = conn.client.close().await {
                debug!(server = %event.server, "Client close after disconnect: {}", e);
            }
            let _ = conn.transport.close().await;
        }

        self.tools.remove(&event.server);
        if let Some(status) = self.statuses.get_mut(&event.server) {
            status.state = ConnectionState::Disconnected;
            status.tool_count = 0;
            status.error = Some(event.kind.to_string());
        }
        true
    }

    /// 상태를 바꾸는 다음 이벤트까지 대기하고 적용
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        loop {
            let event = self.recv_event().await?;
            if self.apply_event(&event).await {
                return Some(event);
            }
        }
    }

    /// 쌓인 이벤트를 모두 적용. 상태가 바뀌었으면 true
    pub async fn sync_events(&mut self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.events_rx.try_recv() {
            changed |= self.apply_event(&event).await;
        }
        changed
    }

    // ========================================================================
    // Disconnect
    // ========================================================================

    /// 모든 연결 종료 후 상태 초기화
    ///
    /// 연결마다 세 단계를 독립적으로 수행하며 실패는 로그로만 남습니다.
    /// 다시 사용하려면 `connect()`를 호출합니다.
    pub async fn disconnect(&mut self) -> Result<()> {
        let connections: Vec<_> = self.connections.drain().map(|(_, c)| c).collect();
        let count = connections.len();

        join_all(connections.iter().map(|connection| async move {
            let conn = connection.lock().await;
            conn.teardown().await;
        }))
        .await;

        self.tools.clear();
        self.statuses = OrderedMap::new();
        while self.events_rx.try_recv().is_ok() {}

        info!("Disconnected {} MCP server(s)", count);
        Ok(())
    }
}

/// 서버 하나 연결: spawn -> transport -> client -> handshake
///
/// 핸드셰이크가 실패하면 이미 만든 자원을 정리하고 에러를 반환합니다.
async fn connect_server(
    name: &str,
    launch: &ServerLaunch,
    connection_id: u64,
    working_dir: &Path,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) -> Result<(ProcessHandle, Arc<StdioTransport>, Arc<McpClient>)> {
    let cwd = launch.resolve_cwd(working_dir);
    let env = launch.merged_env(std::env::vars_os());
    let program = launch.resolve_command(&env, &cwd)?;

    let (process, stdin, stdout) = ProcessHandle::spawn(
        name,
        connection_id,
        ProcessSpec {
            program: &program,
            args: &launch.args,
            env: &env,
            cwd: &cwd,
        },
        events.clone(),
    )?;

    let transport = Arc::new(
        StdioTransport::new(name, stdout, stdin)
            .with_timeout(launch.timeout_secs.map(Duration::from_secs)),
    );

    let watcher = Arc::clone(&transport);
    let server = name.to_string();
    tokio::spawn(async move {
        watcher.closed().await;
        let _ = events.send(ConnectionEvent {
            server,
            connection_id,
            kind: super::process::ConnectionEventKind::TransportClosed,
        });
    });

    let client = Arc::new(McpClient::new(name, Arc::clone(&transport) as Arc<dyn McpTransport>));
    if let Err(e) = client.initialize().await {
        let _ = client.close().await;
        let _ = transport.close().await;
        let _ = process.terminate().await;
        return Err(e);
    }

    Ok((process, transport, client))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_config_connects_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = ConnectionManager::new(McpServers::new(), dir.path());

        manager.connect().await.unwrap();
        assert!(manager.get_tools().is_empty());
        assert!(manager.get_connection_status().is_empty());
        assert!(!manager.has_connections());
        manager.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_command_fails_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut servers = McpServers::new();
        servers.insert("ghost".into(), ServerLaunch::new("tether-test-no-such-server"));
        let mut manager = ConnectionManager::new(servers, dir.path());

        manager.connect().await.unwrap();
        assert_eq!(manager.get_connection_status().get("ghost"), Some(&false));

        let statuses = manager.server_statuses();
        assert_eq!(statuses[0].state, ConnectionState::Failed);
        assert!(statuses[0].error.is_some());
    }

    #[cfg(unix)]
    mod process_backed {
        use super::*;
        use crate::mcp::testing::{exiting_server, fake_server};
        use tether_foundation::ToolOutput;

        fn names(manager: &ConnectionManager) -> Vec<String> {
            manager
                .get_tools()
                .iter()
                .map(|t| t.name().to_string())
                .collect()
        }

        #[tokio::test]
        async fn test_partial_failure() {
            let dir = tempfile::tempdir().unwrap();
            let mut servers = McpServers::new();
            servers.insert("A".into(), ServerLaunch::new("tether-test-no-such-server"));
            servers.insert("B".into(), fake_server(dir.path()));
            let mut manager = ConnectionManager::new(servers, dir.path());

            manager.connect().await.unwrap();

            let status = manager.get_connection_status();
            assert_eq!(status.get("A"), Some(&false));
            assert_eq!(status.get("B"), Some(&true));
            assert!(manager.has_connections());
            assert_eq!(names(&manager), vec!["mcp_B_echo", "mcp_B_fail"]);

            let echo = &manager.get_tools()[0];
            assert_eq!(echo.description(), "Echo back");
            assert_eq!(echo.input_schema().required_names(), vec!["text"]);
            assert_eq!(manager.get_tools()[1].description(), "MCP tool fail from B");

            manager.disconnect().await.unwrap();
        }

        #[tokio::test]
        async fn test_remote_invocation() {
            let dir = tempfile::tempdir().unwrap();
            let mut servers = McpServers::new();
            servers.insert("B".into(), fake_server(dir.path()));
            let mut manager = ConnectionManager::new(servers, dir.path());
            manager.connect().await.unwrap();

            let tools = manager.get_tools();
            let output = tools[0].invoke(serde_json::json!({"text": "hi"})).await;
            assert_eq!(output, ToolOutput::Text("pong".into()));

            let failed = tools[1].invoke(serde_json::Value::Null).await;
            assert_eq!(failed.as_text(), "Error: tool 'mcp_B_fail' failed: boom");

            manager.disconnect().await.unwrap();

            // 종료 후 호출은 실패 텍스트로 끝남
            let after = tools[0].invoke(serde_json::json!({"text": "hi"})).await;
            assert!(after.as_text().starts_with("Error: tool 'mcp_B_echo' failed:"));
        }

        #[tokio::test]
        async fn test_declaration_order() {
            let dir = tempfile::tempdir().unwrap();
            let mut servers = McpServers::new();
            servers.insert("zeta".into(), fake_server(dir.path()));
            servers.insert("alpha".into(), fake_server(dir.path()));
            let mut manager = ConnectionManager::new(servers, dir.path());
            manager.connect().await.unwrap();

            assert_eq!(
                names(&manager),
                vec!["mcp_zeta_echo", "mcp_zeta_fail", "mcp_alpha_echo", "mcp_alpha_fail"]
            );
            manager.disconnect().await.unwrap();
        }

        #[tokio::test]
        async fn test_disabled_and_failed_handshake() {
            let dir = tempfile::tempdir().unwrap();
            let mut servers = McpServers::new();
            servers.insert("off".into(), fake_server(dir.path()).disabled());
            servers.insert("quits".into(), exiting_server());
            let mut manager = ConnectionManager::new(servers, dir.path());
            manager.connect().await.unwrap();

            let status = manager.get_connection_status();
            assert!(!status.contains_key("off"));
            assert_eq!(status.get("quits"), Some(&false));
            assert!(manager.connection("quits").is_none());

            let states: Vec<_> = manager.server_statuses().iter().map(|s| s.state).collect();
            assert_eq!(states, vec![ConnectionState::Disabled, ConnectionState::Failed]);
        }

        #[tokio::test]
        async fn test_process_exit_retracts_tools_and_disconnect_still_completes() {
            let dir = tempfile::tempdir().unwrap();
            let mut servers = McpServers::new();
            servers.insert("B".into(), fake_server(dir.path()));
            let mut manager = ConnectionManager::new(servers, dir.path());
            manager.connect().await.unwrap();
            assert_eq!(manager.get_tools().len(), 2);

            let pid = manager.server_statuses()[0].pid.unwrap();
            std::process::Command::new("kill")
                .arg("-9")
                .arg(pid.to_string())
                .status()
                .unwrap();

            let event = tokio::time::timeout(Duration::from_secs(10), manager.next_event())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event.server, "B");
            assert!(manager.get_tools().is_empty());
            assert_eq!(manager.get_connection_status().get("B"), Some(&false));
            assert!(!manager.has_connections());

            // 클라이언트는 이미 닫혀 있어 close가 실패하지만 나머지 단계는 계속 진행
            manager.disconnect().await.unwrap();
            assert!(manager.get_connection_status().is_empty());
            assert!(manager.connection("B").is_none());
            assert!(!manager.sync_events().await);
        }

        fn is_alive(pid: u32) -> bool {
            std::process::Command::new("kill")
                .arg("-0")
                .arg(pid.to_string())
                .stderr(std::process::Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false)
        }

        #[tokio::test]
        async fn test_disconnect_terminates_process_when_client_close_fails() {
            let dir = tempfile::tempdir().unwrap();
            let mut servers = McpServers::new();
            servers.insert("B".into(), fake_server(dir.path()));
            let mut manager = ConnectionManager::new(servers, dir.path());
            manager.connect().await.unwrap();

            let pid = manager.server_statuses()[0].pid.unwrap();
            assert!(is_alive(pid));

            // 미리 닫아 두면 teardown의 client.close()는 에러를 반환
            let connection = manager.connection("B").unwrap();
            connection.lock().await.client.close().await.unwrap();
            drop(connection);

            manager.disconnect().await.unwrap();
            assert!(!is_alive(pid));
            assert!(manager.get_tools().is_empty());
            assert!(manager.connection("B").is_none());
        }

        #[tokio::test]
        async fn test_non_utf8_parent_env_does_not_break_connect() {
            use std::os::unix::ffi::OsStrExt;

            let key = "TETHER_TEST_NON_UTF8";
            std::env::set_var(key, std::ffi::OsStr::from_bytes(&[0xff, 0xfe]));

            let dir = tempfile::tempdir().unwrap();
            let mut servers = McpServers::new();
            servers.insert("B".into(), fake_server(dir.path()));
            let mut manager = ConnectionManager::new(servers, dir.path());
            let result = manager.connect().await;
            std::env::remove_var(key);

            result.unwrap();
            assert_eq!(manager.get_connection_status().get("B"), Some(&true));
            assert_eq!(manager.get_tools().len(), 2);
            manager.disconnect().await.unwrap();
        }

        #[tokio::test]
        async fn test_reconnect_after_disconnect() {
            let dir = tempfile::tempdir().unwrap();
            let mut servers = McpServers::new();
            servers.insert("B".into(), fake_server(dir.path()));
            let mut manager = ConnectionManager::new(servers, dir.path());

            manager.connect().await.unwrap();
            manager.disconnect().await.unwrap();
            assert!(manager.get_tools().is_empty());

            manager.connect().await.unwrap();
            assert_eq!(manager.get_tools().len(), 2);
            // 이전 연결의 이벤트는 새 연결에 영향을 주지 않음
            assert!(!manager.sync_events().await);
            assert!(manager.has_connections());
            manager.disconnect().await.unwrap();
        }
    }
}
