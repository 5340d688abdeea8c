//! Helpers for tests that drive the shell stand-in for exiftool.

use super::protocol::ToolProtocol;

pub(crate) const MOCK_TOOL: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/mock-exiftool.sh");

pub(crate) fn mock_protocol() -> ToolProtocol {
    mock_protocol_with(&[])
}

/// Mock protocol with extra flags placed after the script path (`--broken`, `--slow-start N`).
pub(crate) fn mock_protocol_with(flags: &[&str]) -> ToolProtocol {
    let mut leading = vec![MOCK_TOOL.to_string()];
    leading.extend(flags.iter().map(|f| f.to_string()));
    ToolProtocol::exiftool("sh").with_leading_args(leading)
}
