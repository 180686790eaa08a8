//! Local Tool Loader - 도구 디렉토리의 매니페스트를 ToolDefinition으로 로딩
//!
//! 후보 하나의 실패는 그 후보만 건너뜁니다. 디렉토리가 없으면 빈 목록입니다.
//! 이름이 겹치면 탐색 순서상 먼저 나온 도구를 유지합니다.

use super::contract::{parse_manifest, validate_document};
use super::discovery::{CandidateSource, DirectoryDiscovery, ToolDiscovery};
use super::func::{HandlerRegistry, LocalToolInvoker};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tether_foundation::{Error, Result, ToolDefinition, ToolSource};
use tracing::{debug, info, warn};

/// 건너뛴 후보
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedCandidate {
    pub path: PathBuf,
    pub reason: String,
}

/// 로딩 결과
#[derive(Debug, Default)]
pub struct LoadReport {
    pub tools: Vec<ToolDefinition>,
    pub skipped: Vec<SkippedCandidate>,
}

impl LoadReport {
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }
}

/// 로컬 도구 로더
pub struct LocalToolLoader {
    directory: PathBuf,
    discovery: Box<dyn ToolDiscovery>,
    handlers: Arc<HandlerRegistry>,
}

impl LocalToolLoader {
    /// `directory`가 상대 경로면 `working_dir` 기준으로 해석
    pub fn new(directory: impl AsRef<Path>, working_dir: impl AsRef<Path>, handlers: Arc<HandlerRegistry>) -> Self {
        let directory = working_dir.as_ref().join(directory.as_ref());
        Self {
            discovery: Box::new(DirectoryDiscovery::new(directory.clone())),
            directory,
            handlers,
        }
    }

    /// 탐색 방식 교체
    pub fn with_discovery(mut self, discovery: Box<dyn ToolDiscovery>) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// 모든 후보 로딩
    pub async fn load(&self) -> LoadReport {
        let mut report = LoadReport::default();

        let candidates = match self.discovery.discover() {
            Ok(candidates) => candidates,
            Err(Error::NotFound(_)) => {
                debug!("Tools directory {} not found", self.directory.display());
                return report;
            }
            Err(e) => {
                warn!("Failed to scan tools directory {}: {}", self.directory.display(), e);
                return report;
            }
        };

        let mut seen = HashSet::new();
        for candidate in candidates {
            match self.load_candidate(&candidate).await {
                Ok(tool) => {
                    if !seen.insert(tool.name().to_string()) {
                        warn!(
                            "Duplicate local tool '{}' in {}, keeping the first",
                            tool.name(),
                            candidate.relative.display()
                        );
                        report.skipped.push(SkippedCandidate {
                            path: candidate.path,
                            reason: format!("duplicate tool name '{}'", tool.name()),
                        });
                        continue;
                    }
                    debug!("Loaded local tool '{}' from {}", tool.name(), candidate.relative.display());
                    report.tools.push(tool);
                }
                Err(e) => {
                    warn!("Skipping tool candidate: {}", e);
                    report.skipped.push(SkippedCandidate {
                        path: candidate.path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Loaded {} local tools from {} ({} skipped)",
            report.tools.len(),
            self.directory.display(),
            report.skipped.len()
        );
        report
    }

    async fn load_candidate(&self, candidate: &CandidateSource) -> Result<ToolDefinition> {
        let fail = |message: String| Error::load(&candidate.relative, message);

        let text = tokio::fs::read_to_string(&candidate.path)
            .await
            .map_err(|e| fail(format!("read failed: {}", e)))?;
        let doc = parse_manifest(&text, candidate.format).map_err(|e| fail(format!("parse failed: {}", e)))?;
        let spec = validate_document(&doc, &self.handlers).map_err(|e| fail(e.to_string()))?;

        let base_dir = candidate
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.directory.clone());
        let invoker = LocalToolInvoker::new(&spec.name, spec.schema.clone(), spec.executor, base_dir);

        Ok(ToolDefinition::new(
            spec.name,
            spec.description,
            spec.schema,
            ToolSource::Local {
                path: candidate.path.clone(),
            },
            Arc::new(invoker),
        ))
    }
}

/// 로컬 도구 로딩 (건너뛴 후보 정보 없이)
pub async fn load_local_tools(
    directory: impl AsRef<Path>,
    working_dir: impl AsRef<Path>,
    handlers: Arc<HandlerRegistry>,
) -> Vec<ToolDefinition> {
    LocalToolLoader::new(directory, working_dir, handlers)
        .load()
        .await
        .tools
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tether_foundation::{Result, ToolOutput};

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn echo_manifest(name: &str) -> String {
        format!(
            "name = \"{}\"\ndescription = \"Echo tool\"\nfunc = \"handler:echo\"\n\n[schema.fields.text]\nkind = \"string\"\n",
            name
        )
    }

    fn handlers() -> Arc<HandlerRegistry> {
        Arc::new(HandlerRegistry::with_builtins())
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let tools = load_local_tools("tools", dir.path(), handlers()).await;
        assert!(tools.is_empty());
    }

    #[tokio::test]
    async fn test_valid_invalid_and_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let tools = dir.path().join("tools");
        write(&tools, "a.toml", &echo_manifest("alpha"));
        write(&tools, "b.json", r#"{"tool": {"name": "beta", "description": "b", "schema": {"fields": {}}, "func": "handler:echo"}}"#);
        write(&tools, "c.toml", "description = \"no name\"");
        write(&tools, "d.json", "{ broken");
        write(&tools, "index.json", r#"{"name": "idx", "description": "", "schema": {"fields": {}}, "func": "handler:echo"}"#);

        let report = LocalToolLoader::new("tools", dir.path(), handlers()).load().await;
        assert_eq!(report.names(), vec!["alpha", "beta"]);
        assert_eq!(report.skipped.len(), 2);
        assert!(report.skipped[0].reason.starts_with("Failed to load c.toml:"));
        assert!(report.skipped[1].reason.starts_with("Failed to load d.json: parse failed"));
    }

    #[tokio::test]
    async fn test_duplicate_names_first_wins() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.toml", &echo_manifest("same"));
        write(dir.path(), "b.toml", &echo_manifest("same"));

        let report = LocalToolLoader::new(dir.path(), "/", handlers()).load().await;
        assert_eq!(report.names(), vec!["same"]);
        match report.tools[0].source() {
            ToolSource::Local { path } => assert!(path.ends_with("a.toml")),
            other => panic!("unexpected source {:?}", other),
        }
        assert!(report.skipped[0].reason.contains("duplicate"));
    }

    #[tokio::test]
    async fn test_loaded_tool_validates_and_invokes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "echo.toml", &echo_manifest("echo_text"));

        let tools = load_local_tools(dir.path(), "/", handlers()).await;
        let tool = &tools[0];

        let output = tool.invoke(json!({"text": "hi"})).await;
        assert_eq!(output, ToolOutput::Text(r#"{"text":"hi"}"#.into()));

        let output = tool.invoke(json!({})).await;
        assert!(output.as_text().starts_with("Error: tool 'echo_text' failed:"));
    }

    #[tokio::test]
    async fn test_handler_panic_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "bad.json",
            r#"{"name": "bad", "description": "", "schema": {"fields": {}}, "func": {"handler": "explode"}}"#,
        );

        let registry = HandlerRegistry::new();
        registry.register("explode", |_| async move {
            let result: Result<String> = Err(Error::Internal("unreachable".into()));
            if result.is_err() {
                panic!("exploded");
            }
            result
        });

        let tools = load_local_tools(dir.path(), "/", Arc::new(registry)).await;
        let output = tools[0].invoke(json!({})).await;
        assert_eq!(output.as_text(), "Error: tool 'bad' failed: tool panicked");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_tool_relative_to_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bin/upper.sh", "tr a-z A-Z\n");
        write(
            dir.path(),
            "upper.toml",
            "name = \"upper\"\ndescription = \"Upper-case JSON\"\n\n[func]\ncommand = \"sh\"\nargs = [\"bin/upper.sh\"]\n\n[schema.fields]\n",
        );

        let tools = load_local_tools(dir.path(), "/", handlers()).await;
        let output = tools[0].invoke(json!({"a": "b"})).await;
        assert_eq!(output, ToolOutput::Text(r#"{"A":"B"}"#.into()));
    }
}
