//! OrderedMap - 선언 순서를 보존하는 문자열 키 맵
//!
//! 설정 파일의 `mcpServers`와 스키마의 필드 목록은 선언 순서가 의미를 갖습니다.
//! (레지스트리 순서 = 서버 선언 순서, 스키마 필드 순서 = 선언 순서)
//!
//! 같은 키를 다시 넣으면 기존 위치에서 값만 바뀝니다. 설정 병합은 `extend`로
//! 이 성질을 그대로 씁니다.

/// 삽입 순서를 보존하는 맵
pub type OrderedMap<V> = indexmap::IndexMap<String, V>;
