//! Configuration Loader
//!
//! ## 검색 우선순위 (낮음 -> 높음)
//!
//! 1. User-level: `~/.tether/settings.{json,toml}`
//! 2. Project-level: `.tether/settings.{json,toml}`
//! 3. Local (gitignored): `.tether/settings.local.{json,toml}`
//! 4. 명시적 경로 (`--config`)
//!
//! 각 레벨의 설정이 이전 레벨을 오버라이드합니다. 자동 검색된 파일의 파싱 실패는
//! 경고 후 건너뛰지만, 명시적으로 지정한 파일은 없거나 잘못되면 에러입니다.

use super::types::TetherConfig;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 설정 폴더 이름
pub const CONFIG_DIR_NAME: &str = ".tether";

const SETTINGS_STEMS: [&str; 2] = ["settings", "settings.local"];
const SETTINGS_EXTENSIONS: [&str; 2] = ["json", "toml"];

// ============================================================================
// ConfigLoader
// ============================================================================

/// 설정 로더
pub struct ConfigLoader {
    search_paths: Vec<ConfigPath>,
}

#[derive(Debug, Clone)]
struct ConfigPath {
    path: PathBuf,
    description: &'static str,
    required: bool,
}

impl ConfigLoader {
    /// 기본 검색 경로로 생성
    pub fn new(working_dir: &Path) -> Self {
        let mut search_paths = Vec::new();

        if let Some(home) = dirs::home_dir() {
            for ext in SETTINGS_EXTENSIONS {
                search_paths.push(ConfigPath {
                    path: home.join(CONFIG_DIR_NAME).join(format!("settings.{}", ext)),
                    description: "User settings",
                    required: false,
                });
            }
        }

        let project_dir = working_dir.join(CONFIG_DIR_NAME);
        for (stem, description) in SETTINGS_STEMS
            .iter()
            .zip(["Project settings", "Local settings"])
        {
            for ext in SETTINGS_EXTENSIONS {
                search_paths.push(ConfigPath {
                    path: project_dir.join(format!("{}.{}", stem, ext)),
                    description,
                    required: false,
                });
            }
        }

        Self { search_paths }
    }

    /// 검색 없이 지정한 경로만 사용
    pub fn with_paths(paths: Vec<PathBuf>) -> Self {
        let search_paths = paths
            .into_iter()
            .map(|path| ConfigPath {
                path,
                description: "Custom settings",
                required: false,
            })
            .collect();

        Self { search_paths }
    }

    /// 가장 높은 우선순위로 명시적 설정 파일 추가
    pub fn with_explicit(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(ConfigPath {
            path: path.into(),
            description: "Explicit settings",
            required: true,
        });
        self
    }

    /// 모든 경로에서 설정을 로드하여 병합하고 검증
    pub fn load_all(&self) -> Result<TetherConfig> {
        let mut merged = TetherConfig::new();

        for config_path in &self.search_paths {
            if !config_path.path.exists() {
                if config_path.required {
                    return Err(Error::Config(format!(
                        "settings file not found: {}",
                        config_path.path.display()
                    )));
                }
                continue;
            }

            match load_config_from_file(&config_path.path) {
                Ok(config) => {
                    info!(
                        "Loaded {} from: {}",
                        config_path.description,
                        config_path.path.display()
                    );
                    merged = merged.merge(config);
                }
                Err(e) if config_path.required => return Err(e),
                Err(e) => {
                    warn!(
                        "Failed to load settings from {}: {}",
                        config_path.path.display(),
                        e
                    );
                }
            }
        }

        merged.validate()?;
        Ok(merged)
    }

    /// 존재하는 설정 파일 목록
    pub fn existing_files(&self) -> Vec<PathBuf> {
        self.search_paths
            .iter()
            .filter(|p| p.path.exists())
            .map(|p| p.path.clone())
            .collect()
    }
}

/// 파일에서 설정 로드 (확장자로 형식 결정, 기본 JSON)
pub fn load_config_from_file(path: &Path) -> Result<TetherConfig> {
    let content = std::fs::read_to_string(path)?;

    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));

    let config: TetherConfig = if is_toml {
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid {}: {}", path.display(), e)))?
    } else {
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid {}: {}", path.display(), e)))?
    };

    debug!(
        "Loaded config from {}: {} MCP servers, tools dir: {}",
        path.display(),
        config.mcp_servers.len(),
        config.tools.directory.display()
    );

    Ok(config)
}
