//! Tool Executors - 로컬 도구의 실제 실행 방식
//!
//! - 외부 명령: 인자를 JSON으로 stdin에 쓰고 stdout을 결과로 받음
//! - 인프로세스 핸들러: `HandlerRegistry`에 이름으로 등록된 async 함수

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tether_foundation::{Error, Result, Schema, ToolInvoker, ToolOutput};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

// ============================================================================
// CommandFunc
// ============================================================================

/// 외부 명령 실행 설정
///
/// ```toml
/// [func]
/// command = "./weather.sh"
/// args = ["--units", "metric"]
/// timeoutSecs = 10
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFunc {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl CommandFunc {
    /// 셸 단어 문자열 파싱 (`"python3 tool.py --fast"`)
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = shlex::split(line)?.into_iter();
        let command = words.next()?;
        Some(Self {
            command,
            args: words.collect(),
            env: HashMap::new(),
            timeout_secs: None,
        })
    }

    /// 명령 실행
    ///
    /// 경로 구분자가 있는 상대 경로 명령과 작업 디렉토리는 `base_dir` 기준입니다.
    pub async fn run(&self, args: &Value, base_dir: &Path) -> Result<String> {
        let program = self.resolve_program(base_dir);
        let input = serde_json::to_vec(args)?;

        let mut child = Command::new(&program)
            .args(&self.args)
            .envs(&self.env)
            .current_dir(base_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Tool(format!("failed to execute '{}': {}", program.display(), e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // 입력을 읽지 않는 명령은 파이프를 먼저 닫을 수 있음
            if let Err(e) = stdin.write_all(&input).await {
                debug!("Tool command did not read stdin: {}", e);
            }
        }

        let output = match self.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), child.wait_with_output())
                .await
                .map_err(|_| Error::Timeout(format!("command timed out after {}s", secs)))??,
            None => child.wait_with_output().await?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            Ok(stdout.trim_end().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                format!("command failed with exit code: {:?}", output.status.code())
            } else {
                stderr.trim().to_string()
            };
            Err(Error::Tool(message))
        }
    }

    fn resolve_program(&self, base_dir: &Path) -> PathBuf {
        let path = Path::new(&self.command);
        if path.is_relative() && path.components().count() > 1 {
            base_dir.join(path)
        } else {
            path.to_path_buf()
        }
    }
}

// ============================================================================
// HandlerRegistry
// ============================================================================

/// 인프로세스 핸들러
pub type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// 이름 -> 핸들러 등록소
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Handler>>,
}

impl HandlerRegistry {
    /// 빈 등록소
    pub fn new() -> Self {
        Self::default()
    }

    /// 기본 핸들러 포함 (`echo`: 인자를 JSON으로 그대로 반환)
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("echo", |args| async move { Ok(args.to_string()) });
        registry
    }

    pub fn register<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args| handler(args).boxed());
        self.handlers.write().insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Handler> {
        self.handlers.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

// ============================================================================
// LocalToolInvoker
// ============================================================================

/// 검증된 실행 방식
#[derive(Clone)]
pub enum Executor {
    Command(CommandFunc),
    Handler { name: String, handler: Handler },
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Executor::Command(func) => f.debug_tuple("Command").field(func).finish(),
            Executor::Handler { name, .. } => f.debug_tuple("Handler").field(name).finish(),
        }
    }
}

/// 로컬 도구 호출 래퍼
///
/// 인자 검증 실패, 실행 에러, 핸들러 panic을 모두 실패 텍스트로 바꿉니다.
pub struct LocalToolInvoker {
    name: String,
    schema: Schema,
    executor: Executor,
    base_dir: PathBuf,
}

impl LocalToolInvoker {
    pub fn new(name: impl Into<String>, schema: Schema, executor: Executor, base_dir: PathBuf) -> Self {
        Self {
            name: name.into(),
            schema,
            executor,
            base_dir,
        }
    }

    async fn execute(&self, args: Value) -> Result<String> {
        match &self.executor {
            Executor::Command(func) => func.run(&args, &self.base_dir).await,
            Executor::Handler { handler, .. } => handler(args).await,
        }
    }
}

#[async_trait]
impl ToolInvoker for LocalToolInvoker {
    async fn invoke(&self, args: Value) -> ToolOutput {
        let args = match self.schema.validate(&args) {
            Ok(args) => args,
            Err(e) => return ToolOutput::failure(&self.name, e),
        };

        match AssertUnwindSafe(self.execute(args)).catch_unwind().await {
            Ok(Ok(text)) => ToolOutput::Text(text),
            Ok(Err(e)) => {
                warn!(tool = %self.name, "Local tool failed: {}", e);
                ToolOutput::failure(&self.name, e)
            }
            Err(_) => {
                warn!(tool = %self.name, "Local tool panicked");
                ToolOutput::failure(&self.name, "tool panicked")
            }
        }
    }
}
