//! Conversation title derivation.
//!
//! The title is taken from the most recent user message with Markdown noise
//! removed, falling back to the first user message when the latest one is
//! blank after cleaning.

use crate::types::{Role, Transcript};

/// Maximum title length in characters when the text contains CJK ideographs
pub const CJK_TITLE_CHARS: usize = 16;
/// Maximum title length in characters otherwise
pub const TITLE_CHARS: usize = 24;

const FENCE: &str = "```";
const MARKDOWN_PUNCTUATION: &[char] = &['#', '>', '*', '_', '~', '[', ']', '(', ')', '-', '!'];

/// Derive a display title for `transcript`, or `placeholder` if nothing usable remains.
pub fn derive_title(transcript: &Transcript, placeholder: &str) -> String {
    let user_texts: Vec<&str> = transcript
        .messages()
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.text())
        .collect();

    let mut base = user_texts.last().map(|t| clean_text(t)).unwrap_or_default();
    if base.is_empty() {
        base = user_texts.first().map(|t| clean_text(t)).unwrap_or_default();
    }
    if base.is_empty() {
        return placeholder.to_string();
    }

    let limit = if contains_cjk(&base) {
        CJK_TITLE_CHARS
    } else {
        TITLE_CHARS
    };
    base.chars().take(limit).collect()
}

/// Strip code fences, inline code spans and Markdown punctuation, then
/// collapse whitespace.
pub fn clean_text(text: &str) -> String {
    let without_fences = remove_delimited(text, FENCE);
    let without_code = remove_delimited(&without_fences, "`");
    let stripped: String = without_code
        .chars()
        .filter(|c| !MARKDOWN_PUNCTUATION.contains(c))
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Remove every `delim ... delim` span (shortest match). An unterminated
/// opening delimiter and everything after it are kept as-is.
fn remove_delimited(text: &str, delim: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(delim) {
        let after_open = &rest[start + delim.len()..];
        match after_open.find(delim) {
            Some(end) => {
                out.push_str(&rest[..start]);
                rest = &after_open[end + delim.len()..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}

/// Whether `text` contains a CJK unified ideograph (U+4E00..=U+9FA5).
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| ('\u{4e00}'..='\u{9fa5}').contains(&c))
}
