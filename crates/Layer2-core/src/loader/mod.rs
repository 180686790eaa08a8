//! Local Tool Loader - 도구 디렉토리의 매니페스트 로딩
//!
//! - `discovery`: 후보 파일 탐색 (제외 규칙 포함)
//! - `contract`: 매니페스트 계약 검증
//! - `func`: 외부 명령 / 인프로세스 핸들러 실행
//! - `local`: 위 단계를 묶은 로더

mod contract;
mod discovery;
mod func;
mod local;

pub use contract::{parse_manifest, validate_document, validate_export, RejectReason, ToolSpec, HANDLER_PREFIX};
pub use discovery::{CandidateSource, DirectoryDiscovery, ManifestFormat, ToolDiscovery};
pub use func::{CommandFunc, Executor, Handler, HandlerRegistry, LocalToolInvoker};
pub use local::{load_local_tools, LoadReport, LocalToolLoader, SkippedCandidate};
