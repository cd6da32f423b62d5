//! Core domain types for watchchat
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Message** | One turn of a conversation, authored by the user or the model |
//! | **Transcript** | Ordered list of messages forming one conversation |
//! | **SessionId** | Key naming a persisted transcript in the remote archive |
//! | **Buffer** | The in-progress (transcript, session id) pair kept in the local store |
//! | **TitleIndex** | Mapping from session id to a short display title |
//!
//! Transcripts are persisted in the model service's wire shape
//! (`{"role": "user", "parts": [{"text": "..."}]}`) so an archived object can be
//! replayed upstream without conversion.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================
// Messages
// ============================================

/// Who authored a message.
///
/// `System` entries are display-only notices; they are never persisted or sent
/// to the model service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
            Role::System => "system",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "model" => Ok(Role::Model),
            "system" => Ok(Role::System),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

/// A text fragment inside a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: String,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part { text: text.into() }],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, text)
    }

    /// Text of the first part, or "" when the message has none.
    pub fn text(&self) -> &str {
        self.parts.first().map(|p| p.text.as_str()).unwrap_or("")
    }
}

// ============================================
// Transcript
// ============================================

/// Ordered sequence of messages for one conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Replace the message at `index` and drop everything after it.
    pub fn replace_and_truncate(&mut self, index: usize, message: Message) {
        self.messages.truncate(index + 1);
        if let Some(slot) = self.messages.get_mut(index) {
            *slot = message;
        }
    }

    /// Whether this transcript may be handed to the model service: non-empty
    /// and ending with a user turn.
    pub fn is_ready_for_reply(&self) -> bool {
        matches!(self.messages.last(), Some(m) if m.role == Role::User)
    }

    /// Messages that are sent upstream and archived (no system notices).
    pub fn conversation(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }

    /// Parse a serialized transcript leniently.
    ///
    /// Anything that is not a JSON array yields an empty transcript; array
    /// entries that are not messages are skipped.
    pub fn from_json_lenient(raw: &str) -> Self {
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(_) => return Self::default(),
        };
        let serde_json::Value::Array(items) = value else {
            return Self::default();
        };
        let messages = items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<Message>(item).ok())
            .collect();
        Self { messages }
    }

    /// Serialize the archivable part of the transcript.
    pub fn to_json(&self) -> crate::error::Result<String> {
        let conversation: Vec<&Message> = self.conversation().collect();
        Ok(serde_json::to_string(&conversation)?)
    }
}

// ============================================
// Session identity
// ============================================

/// Opaque key naming a persisted transcript, e.g. `"1718000000000.json"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Mint an identity from a creation time in epoch milliseconds.
    pub fn from_millis(millis: i64, suffix: &str) -> Self {
        Self(format!("{}{}", millis, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading integer of the key (the creation timestamp), if any.
    pub fn timestamp_millis(&self) -> Option<i64> {
        let digits: String = self.0.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            None
        } else {
            digits.parse().ok()
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mapping from session id to display title, stored as one archive object.
pub type TitleIndex = BTreeMap<String, String>;

// ============================================
// Generation parameters
// ============================================

/// Sampling parameters forwarded to the model service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// Reasoning budget forwarded to the model service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    pub thinking_budget: u32,
}

/// One logical reply request, shared by both transports.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRequest {
    pub conversation_history: Vec<Message>,
    pub generation_config: GenerationConfig,
    pub thinking_config: ThinkingConfig,
}

impl ReplyRequest {
    pub fn new(
        transcript: &Transcript,
        generation_config: GenerationConfig,
        thinking_config: ThinkingConfig,
    ) -> Self {
        Self {
            conversation_history: transcript.conversation().cloned().collect(),
            generation_config,
            thinking_config,
        }
    }
}
