//! MCP 서버 실행 설정
//!
//! 설정 파일의 `mcpServers` 항목 하나가 `ServerLaunch` 하나입니다.
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "filesystem": {
//!       "command": "npx",
//!       "args": ["-y", "@modelcontextprotocol/server-filesystem", "/path"],
//!       "env": { "TOKEN": "${GITHUB_TOKEN}", "DEBUG": null }
//!     }
//!   }
//! }
//! ```
//!
//! `env` 값이 `null`이면 부모 환경에서 해당 키를 제거합니다.

use crate::ordered::OrderedMap;
use crate::{Error, Result};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// 서버 이름 -> 실행 설정 (선언 순서 보존)
pub type McpServers = OrderedMap<ServerLaunch>;

/// 자식 프로세스 환경 (UTF-8이 아닌 값도 그대로 전달)
pub type ChildEnv = HashMap<OsString, OsString>;

/// MCP 서버 실행 설정 (stdio 전송)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerLaunch {
    /// 실행 명령어
    pub command: String,

    /// 명령어 인자
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// 환경 변수 오버라이드 (${VAR}, ${VAR:-default} 지원, null = 제거)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, Option<String>>,

    /// 작업 디렉토리
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// 활성화 여부
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// 요청당 타임아웃 (초). 없으면 무제한
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ServerLaunch {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            enabled: true,
            timeout_secs: None,
        }
    }

    // === Builder methods ===

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), Some(value.into()));
        self
    }

    /// 부모 환경에서 상속된 변수 제거
    pub fn unset_env(mut self, key: impl Into<String>) -> Self {
        self.env.insert(key.into(), None);
        self
    }

    pub fn cwd(mut self, path: impl Into<PathBuf>) -> Self {
        self.cwd = Some(path.into());
        self
    }

    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// 유효성 검증
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.command.trim().is_empty() {
            return Err("'command' must not be empty".to_string());
        }
        if self.timeout_secs == Some(0) {
            return Err("'timeoutSecs' must be greater than zero".to_string());
        }
        Ok(())
    }

    /// 자식 프로세스 환경 구성
    ///
    /// 부모 환경 위에 서버별 값을 덮어쓰고, `None` 값은 키를 제거합니다.
    /// 부모 환경은 `std::env::vars_os()`처럼 OS 문자열 그대로 받습니다.
    pub fn merged_env<I>(&self, parent: I) -> ChildEnv
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let mut env: ChildEnv = parent.into_iter().collect();
        for (key, value) in &self.env {
            match value {
                Some(value) => {
                    env.insert(OsString::from(key), OsString::from(expand_env_var(value)));
                }
                None => {
                    env.remove(std::ffi::OsStr::new(key));
                }
            }
        }
        env
    }

    /// 작업 디렉토리 결정 (상대 경로는 base 기준)
    pub fn resolve_cwd(&self, base: &Path) -> PathBuf {
        match &self.cwd {
            Some(cwd) if cwd.is_absolute() => cwd.clone(),
            Some(cwd) => base.join(cwd),
            None => base.to_path_buf(),
        }
    }

    /// 실행 파일 경로 결정
    ///
    /// 경로 구분자가 포함된 명령은 `cwd` 기준으로, 그 외는 자식 환경의 `PATH`에서 찾습니다.
    pub fn resolve_command(&self, env: &ChildEnv, cwd: &Path) -> Result<PathBuf> {
        let command = Path::new(&self.command);
        if command.components().count() > 1 {
            let path = if command.is_absolute() {
                command.to_path_buf()
            } else {
                cwd.join(command)
            };
            return if path.is_file() {
                Ok(path)
            } else {
                Err(Error::McpConnection(format!(
                    "command not found: {}",
                    path.display()
                )))
            };
        }

        which::which_in(&self.command, env.get(std::ffi::OsStr::new("PATH")), cwd).map_err(|e| {
            Error::McpConnection(format!("command '{}' not found: {}", self.command, e))
        })
    }
}

/// 모든 서버 설정 검증 (실패한 서버를 전부 보고)
pub fn validate_servers(servers: &McpServers) -> std::result::Result<(), Vec<String>> {
    let errors: Vec<String> = servers
        .iter()
        .filter_map(|(name, launch)| {
            let name_error = if name.trim().is_empty() {
                Some("server name must not be empty".to_string())
            } else {
                None
            };
            name_error
                .or_else(|| launch.validate().err())
                .map(|e| format!("{}: {}", name, e))
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// 환경변수 확장
/// - ${VAR}: 환경변수 값 (없으면 빈 문자열)
/// - ${VAR:-default}: 환경변수가 없으면 기본값
pub fn expand_env_var(value: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("env pattern is a valid regex")
    });

    pattern
        .replace_all(value, |caps: &Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| {
                caps.get(2)
                    .map(|default| default.as_str().to_string())
                    .unwrap_or_default()
            })
        })
        .into_owned()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_launch() {
        let servers: McpServers = serde_json::from_str(
            r#"{
                "zeta": {"command": "zeta-server", "timeoutSecs": 5},
                "alpha": {"command": "npx", "args": ["-y", "pkg"], "env": {"A": "1", "B": null}, "enabled": false}
            }"#,
        )
        .unwrap();

        let names: Vec<_> = servers.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);

        let zeta = servers.get("zeta").unwrap();
        assert!(zeta.enabled);
        assert_eq!(zeta.timeout_secs, Some(5));

        let alpha = servers.get("alpha").unwrap();
        assert!(!alpha.enabled);
        assert_eq!(alpha.args, vec!["-y", "pkg"]);
        assert_eq!(alpha.env.get("B"), Some(&None));
    }

    #[test]
    fn test_merged_env_overrides_and_removes() {
        let launch = ServerLaunch::new("srv")
            .env("MODE", "child")
            .unset_env("SECRET");

        let parent = vec![
            (OsString::from("MODE"), OsString::from("parent")),
            (OsString::from("SECRET"), OsString::from("hunter2")),
            (OsString::from("HOME"), OsString::from("/home/me")),
        ];

        let env = launch.merged_env(parent);
        assert_eq!(env.get(std::ffi::OsStr::new("MODE")), Some(&OsString::from("child")));
        assert_eq!(env.get(std::ffi::OsStr::new("HOME")), Some(&OsString::from("/home/me")));
        assert!(!env.contains_key(std::ffi::OsStr::new("SECRET")));
    }

    #[cfg(unix)]
    #[test]
    fn test_merged_env_keeps_non_utf8_values() {
        use std::os::unix::ffi::OsStringExt;

        let raw = OsString::from_vec(vec![0xff, 0xfe]);
        let parent = vec![
            (OsString::from("RAW"), raw.clone()),
            (OsString::from("PATH"), OsString::from("/usr/bin:/bin")),
        ];

        let launch = ServerLaunch::new("sh").env("MODE", "child");
        let env = launch.merged_env(parent);
        assert_eq!(env.get(std::ffi::OsStr::new("RAW")), Some(&raw));
        assert_eq!(env.get(std::ffi::OsStr::new("MODE")), Some(&OsString::from("child")));
    }

    #[test]
    fn test_env_expansion() {
        std::env::set_var("TETHER_TEST_EXPAND", "value");

        assert_eq!(expand_env_var("a_${TETHER_TEST_EXPAND}_b"), "a_value_b");
        assert_eq!(expand_env_var("${TETHER_TEST_MISSING:-fallback}"), "fallback");
        assert_eq!(expand_env_var("${TETHER_TEST_MISSING}"), "");
        assert_eq!(expand_env_var("plain"), "plain");

        std::env::remove_var("TETHER_TEST_EXPAND");
    }

    #[test]
    fn test_validate_reports_every_server() {
        let mut servers = McpServers::new();
        servers.insert("ok".into(), ServerLaunch::new("node"));
        servers.insert("blank".into(), ServerLaunch::new("  "));
        servers.insert("zero".into(), ServerLaunch::new("node").timeout(0));

        let errors = validate_servers(&servers).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("blank:"));
        assert!(errors[1].starts_with("zero:"));
    }

    #[test]
    fn test_resolve_missing_command() {
        let dir = tempfile::tempdir().unwrap();
        let launch = ServerLaunch::new("tether-definitely-not-installed");
        let env = launch.merged_env(std::env::vars_os());

        assert!(launch.resolve_command(&env, dir.path()).is_err());

        let relative = ServerLaunch::new("./missing.sh");
        assert!(relative.resolve_command(&env, dir.path()).is_err());
    }

    #[test]
    fn test_resolve_cwd() {
        let base = Path::new("/work");
        assert_eq!(ServerLaunch::new("x").resolve_cwd(base), PathBuf::from("/work"));
        assert_eq!(
            ServerLaunch::new("x").cwd("sub").resolve_cwd(base),
            PathBuf::from("/work/sub")
        );
        assert_eq!(
            ServerLaunch::new("x").cwd("/abs").resolve_cwd(base),
            PathBuf::from("/abs")
        );
    }
}
