//! 테스트용 가짜 MCP 서버 (sh 스크립트)
//!
//! `echo`와 `fail` 두 도구를 제공합니다. 요청 id는 숫자라고 가정합니다.

use std::path::Path;
use tether_foundation::ServerLaunch;

const FAKE_SERVER: &str = r##"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^.*"id":\([0-9][0-9]*\).*$/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake","version":"1.0"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"Echo back","inputSchema":{"type":"object","properties":{"text":{"type":"string"}},"required":["text"]}},{"name":"fail","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    *'"method":"tools/call"'*'"name":"fail"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"boom"}],"isError":true}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$id" ;;
  esac
done
"##;

/// `dir`에 스크립트를 쓰고 이를 실행하는 launch 설정 반환
pub(crate) fn fake_server(dir: &Path) -> ServerLaunch {
    let script = dir.join("fake_mcp_server.sh");
    if !script.exists() {
        std::fs::write(&script, FAKE_SERVER).unwrap();
    }
    ServerLaunch::new("sh").arg(script.display().to_string())
}

/// 핸드셰이크 전에 바로 종료하는 서버
pub(crate) fn exiting_server() -> ServerLaunch {
    ServerLaunch::new("sh").args(["-c", "exit 0"])
}
