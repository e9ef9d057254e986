//! Hard-mention classification.
//!
//! A hard mention of agent name `N` is either `@N` anywhere in the text
//! (case-insensitive, word-bounded) or a bare `N` opening a sentence: at the
//! start of the text or right after `.` `!` `?` or a newline, optionally
//! preceded by whitespace, and followed by end-of-text, whitespace, or one of
//! `, : ! ?`. A bare name buried mid-sentence ("I told Andy yesterday") and
//! superstrings ("Andyman") are ambient, not hard.

use std::collections::BTreeSet;

use regex::Regex;

/// Build the hard-mention pattern for a single agent name.
fn mention_regex(name: &str) -> Regex {
    let escaped = regex::escape(name);
    let pattern =
        format!(r"(?i)@{escaped}\b|(?:^|[.!?\n])[ \t]*{escaped}(?:$|[\s,:!?])");
    Regex::new(&pattern).unwrap_or_else(|_| {
        // Fallback to a plain @-mention match
        Regex::new(&format!(r"(?i)@{}", regex::escape(name))).unwrap()
    })
}

/// True if `text` hard-mentions `name`.
pub fn is_hard_mention(text: &str, name: &str) -> bool {
    mention_regex(name).is_match(text)
}

/// The subset of `names` hard-mentioned in `text`.
pub fn find_hard_mentions(text: &str, names: &[String]) -> BTreeSet<String> {
    names
        .iter()
        .filter(|name| is_hard_mention(text, name))
        .cloned()
        .collect()
}

/// True if `chat_jid` is the authenticated account's own direct chat.
///
/// Compares the user part of both jids; a linked-device suffix
/// (`555:12@s.whatsapp.net`) on the self jid is ignored. Groups are never
/// self-chats.
pub fn is_self_chat(chat_jid: &str, self_jid: &str, is_group: bool) -> bool {
    if is_group {
        return false;
    }
    user_part(chat_jid) == user_part(self_jid)
}

fn user_part(jid: &str) -> &str {
    let user = jid.split('@').next().unwrap_or(jid);
    user.split(':').next().unwrap_or(user)
}
