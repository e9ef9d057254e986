//! Reply extraction from raw agent output.
//!
//! Agent output mixes tool narration, internal reasoning, and user-facing
//! text. Only the contents of `<reply>…</reply>` spans may reach the chat;
//! everything outside the tags is discarded unconditionally. The allowlist
//! tag is the contract between agent and bridge.

use std::sync::LazyLock;

use regex::Regex;

static REPLY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<reply>(.*?)</reply>").expect("reply pattern is valid")
});

/// Extract the allowlisted reply from raw agent output.
///
/// Every `<reply>` span is trimmed; empty spans are dropped; the survivors
/// are joined with single newlines. `None` means the agent stays silent.
pub fn extract_reply(raw: &str) -> Option<String> {
    let parts = REPLY_RE
        .captures_iter(raw)
        .filter_map(|cap| {
            let span = cap.get(1)?.as_str().trim();
            if span.is_empty() {
                None
            } else {
                Some(span.to_string())
            }
        })
        .collect::<Vec<_>>();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}
