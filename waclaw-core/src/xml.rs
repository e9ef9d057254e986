//! XML batch formatting for agent prompts.
//!
//! Message batches reach the agent as a single XML block:
//!
//! ```text
//! <messages>
//! <message sender="Alice" time="2024-01-01T12:00:00.000Z">Hello</message>
//! </messages>
//! ```
//!
//! Attribute values and text content are HTML-escaped so message text can
//! never break out of the tag structure.

use crate::store::StoredMessage;

/// Escape the five HTML-significant characters (`& < > " '`).
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Format a single message element.
pub fn format_xml_message(sender: &str, timestamp: &str, content: &str) -> String {
    format!(
        "<message sender=\"{}\" time=\"{}\">{}</message>",
        escape(sender),
        escape(timestamp),
        escape(content)
    )
}

/// Format a batch of messages as the `<messages>` block sent to the agent.
pub fn format_xml_messages(messages: &[StoredMessage]) -> String {
    let lines = messages
        .iter()
        .map(|m| format_xml_message(&m.sender, &m.timestamp, &m.text))
        .collect::<Vec<_>>()
        .join("\n");
    format!("<messages>\n{lines}\n</messages>")
}
