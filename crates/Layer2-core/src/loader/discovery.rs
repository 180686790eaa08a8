//! Tool Discovery - 로컬 도구 후보 파일 탐색
//!
//! 디렉토리를 재귀적으로 훑어 매니페스트 파일(`.toml`, `.json`, `.yaml`, `.yml`)을
//! 찾습니다. 선언 전용 파일, 인덱스 파일, 테스트 파일은 제외합니다.

use ignore::WalkBuilder;
use std::path::{Component, Path, PathBuf};
use tether_foundation::{Error, Result};
use tracing::{debug, warn};

/// 후보에서 제외할 파일 이름 패턴
const EXCLUDED_FILE_PATTERNS: &[&str] = &[
    "*.schema.*",
    "*.d.*",
    "index.*",
    "mod.*",
    "*.test.*",
    "*.spec.*",
    "*_test.*",
];

/// 이 이름의 디렉토리 아래는 모두 제외
const EXCLUDED_DIRS: &[&str] = &["tests", "__tests__"];

// ============================================================================
// CandidateSource
// ============================================================================

/// 매니페스트 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Toml,
    Json,
    Yaml,
}

impl ManifestFormat {
    /// 확장자로 형식 판별
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

/// 로딩 후보 파일
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSource {
    pub path: PathBuf,
    /// 탐색 루트 기준 상대 경로
    pub relative: PathBuf,
    pub format: ManifestFormat,
}

// ============================================================================
// ToolDiscovery
// ============================================================================

/// 후보 탐색 인터페이스
pub trait ToolDiscovery: Send + Sync {
    /// 후보 목록 (경로 순 정렬)
    fn discover(&self) -> Result<Vec<CandidateSource>>;
}

/// 디렉토리 기반 탐색
pub struct DirectoryDiscovery {
    root: PathBuf,
    excluded: Vec<glob::Pattern>,
}

impl DirectoryDiscovery {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let excluded = EXCLUDED_FILE_PATTERNS
            .iter()
            .filter_map(|p| match glob::Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!("Invalid exclusion pattern '{}': {}", p, e);
                    None
                }
            })
            .collect();

        Self {
            root: root.into(),
            excluded,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 제외 대상인지 확인 (루트 기준 상대 경로)
    pub fn is_excluded(&self, relative: &Path) -> bool {
        let in_excluded_dir = relative
            .parent()
            .map(|parent| {
                parent.components().any(|c| match c {
                    Component::Normal(name) => name
                        .to_str()
                        .map_or(false, |n| EXCLUDED_DIRS.contains(&n)),
                    _ => false,
                })
            })
            .unwrap_or(false);
        if in_excluded_dir {
            return true;
        }

        let Some(file_name) = relative.file_name().and_then(|n| n.to_str()) else {
            return true;
        };
        self.excluded.iter().any(|p| p.matches(file_name))
    }
}

impl ToolDiscovery for DirectoryDiscovery {
    fn discover(&self) -> Result<Vec<CandidateSource>> {
        if !self.root.is_dir() {
            return Err(Error::NotFound(format!(
                "tools directory {}",
                self.root.display()
            )));
        }

        // 숨김 파일만 제외. .gitignore / .ignore 규칙은 적용하지 않음
        let walker = WalkBuilder::new(&self.root)
            .hidden(true)
            .parents(false)
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .build();

        let mut candidates = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Failed to read tools directory entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().map_or(false, |t| t.is_file()) {
                continue;
            }

            let path = entry.into_path();
            let Some(format) = ManifestFormat::from_path(&path) else {
                continue;
            };
            let relative = path.strip_prefix(&self.root).unwrap_or(&path).to_path_buf();

            if self.is_excluded(&relative) {
                debug!("Excluded tool candidate: {}", relative.display());
                continue;
            }

            candidates.push(CandidateSource {
                path,
                relative,
                format,
            });
        }

        candidates.sort_by(|a, b| a.relative.cmp(&b.relative));
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ManifestFormat::from_path(Path::new("a.toml")), Some(ManifestFormat::Toml));
        assert_eq!(ManifestFormat::from_path(Path::new("a.YML")), Some(ManifestFormat::Yaml));
        assert_eq!(ManifestFormat::from_path(Path::new("a.json")), Some(ManifestFormat::Json));
        assert_eq!(ManifestFormat::from_path(Path::new("a.rs")), None);
    }

    #[test]
    fn test_exclusions() {
        let discovery = DirectoryDiscovery::new("/tools");
        for excluded in [
            "weather.schema.json",
            "types.d.toml",
            "index.json",
            "mod.toml",
            "weather.test.yaml",
            "weather.spec.json",
            "weather_test.toml",
            "tests/weather.toml",
            "nested/__tests__/weather.toml",
        ] {
            assert!(discovery.is_excluded(Path::new(excluded)), "{}", excluded);
        }

        for kept in ["weather.toml", "nested/search.json", "testing.toml", "latest.yaml"] {
            assert!(!discovery.is_excluded(Path::new(kept)), "{}", kept);
        }
    }

    #[test]
    fn test_discover_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "zeta.toml");
        touch(dir.path(), "alpha.json");
        touch(dir.path(), "nested/beta.yaml");
        touch(dir.path(), "index.json");
        touch(dir.path(), "README.md");
        touch(dir.path(), "tests/gamma.toml");

        let candidates = DirectoryDiscovery::new(dir.path()).discover().unwrap();
        let names: Vec<_> = candidates
            .iter()
            .map(|c| c.relative.to_string_lossy().replace('\\', "/"))
            .collect();

        assert_eq!(names, vec!["alpha.json", "nested/beta.yaml", "zeta.toml"]);
    }

    #[test]
    fn test_ignore_files_do_not_hide_candidates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".gitignore"), "zeta.toml\n").unwrap();
        std::fs::write(dir.path().join(".ignore"), "alpha.json\n").unwrap();
        touch(dir.path(), "zeta.toml");
        touch(dir.path(), "alpha.json");
        touch(dir.path(), ".hidden.toml");

        let candidates = DirectoryDiscovery::new(dir.path()).discover().unwrap();
        let names: Vec<_> = candidates
            .iter()
            .map(|c| c.relative.to_string_lossy().to_string())
            .collect();

        assert_eq!(names, vec!["alpha.json", "zeta.toml"]);
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = DirectoryDiscovery::new(dir.path().join("missing")).discover();
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
