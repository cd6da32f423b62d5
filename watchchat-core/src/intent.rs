//! Navigation intents.
//!
//! Each front-end navigation may carry a one-shot instruction in a URL-style
//! fragment, e.g. `#send=aGk%3D`, `#load=1718000000000.json`,
//! `#edit=2&send=...`, `#resume` or `#reset`. The fragment is consumed when
//! read so that replaying the same navigation does not re-trigger it.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{Error, Result};
use crate::types::SessionId;

/// Decoded navigation instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingIntent {
    /// Text to send (already decoded)
    pub send: Option<String>,
    /// Archived session to load before anything else
    pub load: Option<SessionId>,
    /// Index of the user message to replace with `send`
    pub edit: Option<usize>,
    /// Keep the buffered conversation as-is
    pub resume: bool,
    /// Drop the buffered conversation first
    pub reset: bool,
}

impl PendingIntent {
    /// Parse a fragment such as `#edit=2&send=...`.
    ///
    /// Unknown keys are ignored. An `edit` value that is not an index, or an
    /// `edit` without `send`, is rejected.
    pub fn parse(fragment: &str) -> Result<Self> {
        let mut intent = PendingIntent::default();
        let trimmed = fragment.trim().trim_start_matches('#');

        for pair in trimmed.split('&').filter(|p| !p.is_empty()) {
            let (key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = urlencoding::decode(raw_value)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| raw_value.to_string());

            match key {
                // Kept even when blank: a send that is present is never a cold
                // start, and the blank text is rejected when it is applied.
                "send" => intent.send = Some(decode_send_payload(&value)),
                "load" => {
                    if !value.is_empty() {
                        intent.load = Some(SessionId::new(value));
                    }
                }
                "edit" => {
                    let index = value.trim().parse::<usize>().map_err(|_| {
                        Error::Validation(format!("edit index is not a number: {:?}", value))
                    })?;
                    intent.edit = Some(index);
                }
                "resume" => intent.resume = true,
                "reset" | "new" => intent.reset = true,
                other => {
                    tracing::debug!(key = other, "Ignoring unknown navigation key");
                }
            }
        }

        if intent.edit.is_some() && intent.send.is_none() {
            return Err(Error::Validation(
                "edit requires replacement text".to_string(),
            ));
        }

        Ok(intent)
    }

    /// Intent to keep the buffered conversation without changes.
    pub fn resume() -> Self {
        Self {
            resume: true,
            ..Default::default()
        }
    }

    /// No instruction at all: the navigation starts a fresh conversation.
    pub fn is_cold_start(&self) -> bool {
        self.send.is_none() && self.load.is_none() && self.edit.is_none() && !self.resume
    }
}

/// Decode a `send` payload: base64 of UTF-8, or the raw text if it is not.
fn decode_send_payload(value: &str) -> String {
    STANDARD
        .decode(value.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| value.to_string())
}

/// Fragment that hands `text` to the next navigation as a send.
pub fn send_fragment(text: &str) -> String {
    format!("#send={}", urlencoding::encode(&STANDARD.encode(text.as_bytes())))
}

/// Fragment that replaces the user message at `index` with `text` and resends.
pub fn edit_fragment(index: usize, text: &str) -> String {
    format!(
        "#edit={}&send={}",
        index,
        urlencoding::encode(&STANDARD.encode(text.as_bytes()))
    )
}

/// Fragment that loads an archived session.
pub fn load_fragment(session_id: &SessionId) -> String {
    format!("#load={}", urlencoding::encode(session_id.as_str()))
}

/// Holder for the inbound navigation fragment. Reading it strips it.
#[derive(Debug, Default)]
pub struct Navigation {
    fragment: Option<String>,
}

impl Navigation {
    pub fn new(fragment: impl Into<String>) -> Self {
        let fragment = fragment.into();
        Self {
            fragment: if fragment.trim().trim_start_matches('#').is_empty() {
                None
            } else {
                Some(fragment)
            },
        }
    }

    /// Navigation with no fragment (a cold start).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Take the fragment, leaving the navigation bare.
    pub fn take(&mut self) -> Option<String> {
        self.fragment.take()
    }

    pub fn is_empty(&self) -> bool {
        self.fragment.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_roundtrip_utf8() {
        let fragment = send_fragment("你好 **world** +/=");
        let intent = PendingIntent::parse(&fragment).unwrap();
        assert_eq!(intent.send.as_deref(), Some("你好 **world** +/="));
        assert!(!intent.is_cold_start());
    }

    #[test]
    fn test_send_raw_text_fallback() {
        let intent = PendingIntent::parse("#send=hello%20there!").unwrap();
        assert_eq!(intent.send.as_deref(), Some("hello there!"));
    }

    #[test]
    fn test_load_and_edit() {
        let intent = PendingIntent::parse(&load_fragment(&SessionId::new("12.json"))).unwrap();
        assert_eq!(intent.load, Some(SessionId::new("12.json")));

        let intent = PendingIntent::parse(&edit_fragment(2, "fixed")).unwrap();
        assert_eq!(intent.edit, Some(2));
        assert_eq!(intent.send.as_deref(), Some("fixed"));
    }

    #[test]
    fn test_edit_requires_send() {
        assert!(matches!(
            PendingIntent::parse("#edit=1"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            PendingIntent::parse("#edit=x&send=aGk="),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_blank_send_is_not_cold_start() {
        let intent = PendingIntent::parse(&send_fragment("   ")).unwrap();
        assert_eq!(intent.send.as_deref(), Some("   "));
        assert!(!intent.is_cold_start());

        let intent = PendingIntent::parse("#send=").unwrap();
        assert_eq!(intent.send.as_deref(), Some(""));
        assert!(!intent.is_cold_start());
    }

    #[test]
    fn test_flags_and_cold_start() {
        assert!(PendingIntent::parse("").unwrap().is_cold_start());
        assert!(PendingIntent::parse("#reset").unwrap().is_cold_start());
        assert!(PendingIntent::parse("#reset").unwrap().reset);
        assert!(!PendingIntent::parse("#resume").unwrap().is_cold_start());
    }

    #[test]
    fn test_navigation_take_strips_fragment() {
        let mut nav = Navigation::new("#resume");
        assert_eq!(nav.take().as_deref(), Some("#resume"));
        assert_eq!(nav.take(), None);
        assert!(Navigation::new("#").is_empty());
    }
}
