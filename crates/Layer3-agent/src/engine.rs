//! Engine orchestrator
//!
//! Startup order: resolve the LLM handle, load local tools and connect MCP
//! servers (in parallel, inside [`Federation::start`]), then build the agent.
//! Connection events observed between tasks rebuild the registry and the agent.
//! `shutdown()` tears every server down and may be called more than once.

use crate::agent::{Agent, AgentFactory, DirectAgentFactory, Turn};
use crate::model::LlmHandle;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{ConnectionEvent, Federation, HandlerRegistry, ServerStatus, ToolRegistry};
use tether_foundation::{Error, Result, TetherConfig};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const PROMPT: &str = "> ";

const HELP: &str = "\
Commands:
  /tools    list available tools
  /status   show MCP server status
  /reload   reload local tools
  /exit     quit
Anything else runs as a task: <tool-name> [json-args]";

/// Drives tool loading, the agent and teardown
pub struct Engine {
    config: TetherConfig,
    session_id: String,
    factory: Arc<dyn AgentFactory>,
    federation: Federation,
    llm: Option<Arc<LlmHandle>>,
    agent: Option<Arc<dyn Agent>>,
    task_timeout: Option<Duration>,
    cancel: CancellationToken,
    shut_down: bool,
}

impl Engine {
    pub fn new(config: TetherConfig, working_dir: impl Into<PathBuf>) -> Self {
        Self::with_handlers(config, working_dir, Arc::new(HandlerRegistry::with_builtins()))
    }

    /// Engine whose local tools may reference the given in-process handlers
    pub fn with_handlers(
        config: TetherConfig,
        working_dir: impl Into<PathBuf>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        let federation = Federation::new(&config, working_dir, handlers);
        let task_timeout = config.engine.task_timeout_secs.map(Duration::from_secs);

        Self {
            config,
            session_id: Uuid::new_v4().to_string(),
            factory: Arc::new(DirectAgentFactory),
            federation,
            llm: None,
            agent: None,
            task_timeout,
            cancel: CancellationToken::new(),
            shut_down: false,
        }
    }

    /// Swap the reasoning engine
    pub fn with_factory(mut self, factory: Arc<dyn AgentFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Override `engine.taskTimeoutSecs`
    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &TetherConfig {
        &self.config
    }

    pub fn federation(&self) -> &Federation {
        &self.federation
    }

    pub fn registry(&self) -> Arc<ToolRegistry> {
        self.federation.registry()
    }

    /// Registry snapshots, republished on every change
    pub fn subscribe(&self) -> watch::Receiver<Arc<ToolRegistry>> {
        self.federation.subscribe()
    }

    pub fn statuses(&self) -> Vec<ServerStatus> {
        self.federation.statuses()
    }

    pub fn is_started(&self) -> bool {
        self.agent.is_some()
    }

    /// Token that cancels a running task or the interactive loop
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolve the model, load tools, build the agent
    pub async fn start(&mut self) -> Result<()> {
        if self.is_started() {
            return Ok(());
        }
        info!(session = %self.session_id, "Starting engine");

        let llm = Arc::new(LlmHandle::from_config(&self.config.llm)?);
        if !llm.is_configured() {
            debug!("No LLM provider configured");
        }
        self.llm = Some(llm);

        let registry = self.federation.start().await?;
        self.shut_down = false;
        self.rebuild_agent(registry)?;

        info!(
            "Engine ready: {} tools ({} local)",
            self.registry().len(),
            self.federation.local_tools().len()
        );
        Ok(())
    }

    fn rebuild_agent(&mut self, registry: Arc<ToolRegistry>) -> Result<()> {
        let llm = self
            .llm
            .clone()
            .ok_or_else(|| Error::Agent("engine not started".to_string()))?;
        self.agent = Some(self.factory.build(llm, registry)?);
        Ok(())
    }

    /// Apply pending connection events; rebuild the agent if the registry changed
    async fn refresh(&mut self) -> Result<()> {
        if self.federation.sync().await {
            self.rebuild_agent(self.federation.registry())?;
        }
        Ok(())
    }

    /// Wait for the next connection change, then rebuild the agent
    ///
    /// Used by long-running modes that do not read user input (`serve`).
    pub async fn next_change(&mut self) -> Result<Option<ConnectionEvent>> {
        let Some(event) = self.federation.next_change().await else {
            return Ok(None);
        };
        self.rebuild_agent(self.federation.registry())?;
        Ok(Some(event))
    }

    /// Run one task headlessly
    ///
    /// Bounded by the task timeout when one is configured.
    pub async fn run_task(&mut self, task: &str) -> Result<Vec<Turn>> {
        self.refresh().await?;
        let agent = self
            .agent
            .clone()
            .ok_or_else(|| Error::Agent("engine not started".to_string()))?;

        let timeout = self.task_timeout;
        let run = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, agent.run(task))
                    .await
                    .map_err(|_| {
                        Error::Timeout(format!("task did not finish within {}s", limit.as_secs()))
                    })?,
                None => agent.run(task).await,
            }
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = run => result,
        }
    }

    /// Line-oriented interactive loop
    ///
    /// Returns on `/exit`, end of input or cancellation.
    pub async fn run_interactive<R, W>(&mut self, input: R, mut output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let cancel = self.cancel.clone();
        let mut lines = input.lines();
        let mut prompt = true;

        loop {
            if prompt {
                output.write_all(PROMPT.as_bytes()).await?;
                output.flush().await?;
                prompt = false;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(event) = self.federation.recv_event() => {
                    if self.federation.apply_event(&event).await {
                        self.rebuild_agent(self.federation.registry())?;
                        let notice = format!("\n[{}] {}\n", event.server, event.kind);
                        output.write_all(notice.as_bytes()).await?;
                        prompt = true;
                    }
                }
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    prompt = true;
                    if !self.handle_line(line.trim(), &mut output).await? {
                        break;
                    }
                }
            }
        }

        output.flush().await?;
        Ok(())
    }

    /// Returns false when the loop should stop
    async fn handle_line<W>(&mut self, line: &str, output: &mut W) -> Result<bool>
    where
        W: AsyncWrite + Unpin,
    {
        let text = match line {
            "" => return Ok(true),
            "/exit" | "/quit" => return Ok(false),
            "/help" => format!("{}\n", HELP),
            "/tools" => self.describe_tools(),
            "/status" => self.describe_status(),
            "/reload" => {
                let report = self.federation.reload_local().await;
                self.rebuild_agent(self.federation.registry())?;
                format!(
                    "Reloaded {} local tools ({} skipped)\n",
                    report.tools.len(),
                    report.skipped.len()
                )
            }
            task => match self.run_task(task).await {
                Ok(turns) => turns
                    .iter()
                    .filter(|t| t.tool.is_some())
                    .map(|t| format!("{}\n", t.content))
                    .collect(),
                Err(e) => {
                    warn!("Task failed: {}", e);
                    format!("Error: {}\n", e)
                }
            },
        };

        output.write_all(text.as_bytes()).await?;
        Ok(true)
    }

    fn describe_tools(&self) -> String {
        let registry = self.registry();
        if registry.is_empty() {
            return "No tools available\n".to_string();
        }
        registry
            .iter()
            .map(|tool| format!("{:<32} {}\n", tool.name(), tool.description()))
            .collect()
    }

    fn describe_status(&self) -> String {
        let statuses = self.statuses();
        if statuses.is_empty() {
            return "No MCP servers configured\n".to_string();
        }
        statuses
            .iter()
            .map(|s| {
                let mut line = format!("{:<20} {:<12} {} tools", s.name, s.state, s.tool_count);
                if let Some(error) = &s.error {
                    line.push_str(&format!("  ({})", error));
                }
                line.push('\n');
                line
            })
            .collect()
    }

    /// Disconnect every server; safe to call repeatedly
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        info!(session = %self.session_id, "Shutting down engine");

        self.agent = None;
        self.federation.shutdown().await
    }
}
