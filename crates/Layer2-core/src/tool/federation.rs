//! Federation - 로컬 도구와 MCP 연결의 단일 소유자
//!
//! 로컬 도구 재로딩이나 연결 이벤트가 있으면 레지스트리를 새로 만들고 `watch`
//! 채널로 게시합니다. 구독자(agent, 인바운드 서버)는 읽기 전용 스냅샷만 봅니다.

use super::registry::ToolRegistry;
use crate::loader::{HandlerRegistry, LoadReport, LocalToolLoader};
use crate::mcp::{ConnectionEvent, ConnectionManager, ServerStatus};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tether_foundation::{Result, TetherConfig, ToolDefinition};
use tokio::sync::watch;
use tracing::{debug, info};

/// 도구 연합
pub struct Federation {
    tools_dir: PathBuf,
    working_dir: PathBuf,
    handlers: Arc<HandlerRegistry>,
    local: Vec<ToolDefinition>,
    manager: ConnectionManager,
    registry_tx: watch::Sender<Arc<ToolRegistry>>,
    shut_down: bool,
}

impl Federation {
    pub fn new(config: &TetherConfig, working_dir: impl Into<PathBuf>, handlers: Arc<HandlerRegistry>) -> Self {
        let working_dir = working_dir.into();
        let (registry_tx, _) = watch::channel(Arc::new(ToolRegistry::new()));

        Self {
            tools_dir: config.tools.directory.clone(),
            manager: ConnectionManager::new(config.mcp_servers.clone(), working_dir.clone()),
            working_dir,
            handlers,
            local: Vec::new(),
            registry_tx,
            shut_down: false,
        }
    }

    /// 로컬 도구 로딩과 서버 연결을 동시에 수행하고 첫 레지스트리 게시
    pub async fn start(&mut self) -> Result<Arc<ToolRegistry>> {
        let loader = self.loader();
        let (report, connected) = tokio::join!(loader.load(), self.manager.connect());
        connected?;

        self.local = report.tools;
        self.shut_down = false;
        Ok(self.rebuild())
    }

    fn loader(&self) -> LocalToolLoader {
        LocalToolLoader::new(&self.tools_dir, &self.working_dir, Arc::clone(&self.handlers))
    }

    /// 레지스트리 재계산 후 게시
    fn rebuild(&mut self) -> Arc<ToolRegistry> {
        let registry = Arc::new(ToolRegistry::build(&self.local, &self.manager));
        debug!("Publishing tool registry ({} tools)", registry.len());
        self.registry_tx.send_replace(Arc::clone(&registry));
        registry
    }

    /// 현재 레지스트리 스냅샷
    pub fn registry(&self) -> Arc<ToolRegistry> {
        Arc::clone(&self.registry_tx.borrow())
    }

    /// 레지스트리 변경 구독
    pub fn subscribe(&self) -> watch::Receiver<Arc<ToolRegistry>> {
        self.registry_tx.subscribe()
    }

    pub fn local_tools(&self) -> &[ToolDefinition] {
        &self.local
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// 로컬 도구만 다시 로딩
    pub async fn reload_local(&mut self) -> LoadReport {
        let mut report = self.loader().load().await;
        self.local = std::mem::take(&mut report.tools);
        let registry = self.rebuild();
        info!("Reloaded local tools, registry now has {} tools", registry.len());
        report.tools = self.local.clone();
        report
    }

    /// 다음 연결 이벤트 수신 (적용 전, cancel-safe)
    pub async fn recv_event(&mut self) -> Option<ConnectionEvent> {
        self.manager.recv_event().await
    }

    /// 이벤트 적용. 상태가 바뀌었으면 레지스트리를 다시 게시하고 true
    pub async fn apply_event(&mut self, event: &ConnectionEvent) -> bool {
        if self.manager.apply_event(event).await {
            self.rebuild();
            true
        } else {
            false
        }
    }

    /// 레지스트리를 바꾸는 다음 이벤트까지 대기
    pub async fn next_change(&mut self) -> Option<ConnectionEvent> {
        let event = self.manager.next_event().await?;
        self.rebuild();
        Some(event)
    }

    /// 쌓인 이벤트 반영. 바뀌었으면 true
    pub async fn sync(&mut self) -> bool {
        if self.manager.sync_events().await {
            self.rebuild();
            true
        } else {
            false
        }
    }

    pub fn statuses(&self) -> Vec<ServerStatus> {
        self.manager.server_statuses()
    }

    pub fn connection_status(&self) -> HashMap<String, bool> {
        self.manager.get_connection_status()
    }

    /// 모든 서버 연결 종료. 여러 번 호출해도 안전
    ///
    /// 종료 후 게시되는 레지스트리에는 로컬 도구만 남습니다.
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        self.manager.disconnect().await?;
        self.rebuild();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tether_foundation::ToolOutput;

    fn write_tool(dir: &std::path::Path, name: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join(format!("{}.toml", name)),
            format!(
                "name = \"{}\"\ndescription = \"\"\nfunc = \"handler:echo\"\n\n[schema.fields]\n",
                name
            ),
        )
        .unwrap();
    }

    fn federation(working_dir: &std::path::Path, config: &TetherConfig) -> Federation {
        Federation::new(config, working_dir, Arc::new(HandlerRegistry::with_builtins()))
    }

    #[tokio::test]
    async fn test_start_without_servers() {
        let dir = tempfile::tempdir().unwrap();
        write_tool(&dir.path().join("tools"), "local_one");

        let mut fed = federation(dir.path(), &TetherConfig::default());
        let mut rx = fed.subscribe();

        let registry = fed.start().await.unwrap();
        assert_eq!(registry.names(), vec!["local_one"]);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().names(), vec!["local_one"]);

        let output = fed.registry().invoke("local_one", json!({"k": 1})).await;
        assert_eq!(output, ToolOutput::Text(r#"{"k":1}"#.into()));

        fed.shutdown().await.unwrap();
        fed.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reload_local() {
        let dir = tempfile::tempdir().unwrap();
        let tools = dir.path().join("tools");
        write_tool(&tools, "first");

        let mut fed = federation(dir.path(), &TetherConfig::default());
        fed.start().await.unwrap();
        assert_eq!(fed.registry().len(), 1);

        write_tool(&tools, "second");
        let report = fed.reload_local().await;
        assert_eq!(report.names(), vec!["first", "second"]);
        assert_eq!(fed.registry().names(), vec!["first", "second"]);
        assert!(!fed.sync().await);
    }

    #[cfg(unix)]
    mod process_backed {
        use super::*;
        use crate::mcp::testing::fake_server;
        use std::time::Duration;

        #[tokio::test]
        async fn test_local_first_then_remote_and_retraction() {
            let dir = tempfile::tempdir().unwrap();
            write_tool(&dir.path().join("tools"), "local_one");

            let mut config = TetherConfig::default();
            config.mcp_servers.insert("B".into(), fake_server(dir.path()));

            let mut fed = federation(dir.path(), &config);
            let registry = fed.start().await.unwrap();
            assert_eq!(registry.names(), vec!["local_one", "mcp_B_echo", "mcp_B_fail"]);

            let pid = fed.statuses()[0].pid.unwrap();
            std::process::Command::new("kill")
                .args(["-9", &pid.to_string()])
                .status()
                .unwrap();

            let event = tokio::time::timeout(Duration::from_secs(10), fed.next_change())
                .await
                .unwrap();
            assert!(event.is_some());
            assert_eq!(fed.registry().names(), vec!["local_one"]);

            fed.shutdown().await.unwrap();
            assert!(fed.connection_status().is_empty());
        }
    }
}
