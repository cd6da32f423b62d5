//! Server-sent event decoding and text extraction for streamed replies.
//!
//! Frames are JSON objects whose text may sit at any depth. Known shapes are
//! decoded through [`Frame`]; anything else is walked generically and every
//! `"text"` string is collected.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Terminal sentinel some upstreams emit after the last frame.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// `data:` payload of a regular frame
    Data(String),
    /// The `[DONE]` sentinel
    Done,
    /// Payload of an `event: error` frame
    Error(String),
}

/// Buffered SSE decoder that tolerates lines split across chunk boundaries.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event_type: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw chunk, returning every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
            if let Some(event) = self.decode_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a final unterminated line once the byte stream has ended.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest);
        self.decode_line(line.trim_end_matches(|c: char| c == '\n' || c == '\r'))
            .into_iter()
            .collect()
    }

    fn decode_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            self.event_type = None;
            return None;
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            self.event_type = Some(rest.trim().to_string());
            return None;
        }
        let payload = line.strip_prefix("data:")?.trim();
        if payload.is_empty() {
            return None;
        }
        if self.event_type.as_deref() == Some("error") {
            return Some(SseEvent::Error(error_message(payload)));
        }
        if payload == DONE_SENTINEL {
            return Some(SseEvent::Done);
        }
        Some(SseEvent::Data(payload.to_string()))
    }
}

// ============================================
// Frames
// ============================================

/// Known frame shapes, most specific first.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Frame {
    Error { error: Value },
    Candidates { candidates: Vec<Candidate> },
    Text { text: String },
    Other(Value),
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<FramePart>,
}

#[derive(Debug, Deserialize)]
struct FramePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

/// Text carried by one `data:` payload, or `None` for frames without text.
///
/// A payload that is not JSON, or an error frame, is a stream failure.
pub fn extract_fragment(payload: &str) -> Result<Option<String>> {
    let frame: Frame = serde_json::from_str(payload)
        .map_err(|e| Error::ModelService(format!("malformed stream frame: {}", e)))?;

    let texts = match frame {
        Frame::Error { error } => {
            return Err(Error::ModelService(describe_error(&error)));
        }
        Frame::Candidates { candidates } => candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|content| content.parts)
            .filter(|part| !part.thought)
            .filter_map(|part| part.text)
            .collect(),
        Frame::Text { text } => vec![text],
        Frame::Other(value) => {
            let mut texts = Vec::new();
            collect_text(&value, &mut texts);
            texts
        }
    };

    let joined = texts.concat();
    Ok(if joined.is_empty() { None } else { Some(joined) })
}

/// Collect every string stored under a `"text"` key, depth-first.
fn collect_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match child {
                    Value::String(s) if key == "text" => out.push(s.clone()),
                    _ => collect_text(child, out),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_text(item, out);
            }
        }
        _ => {}
    }
}

fn describe_error(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

fn error_message(payload: &str) -> String {
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => map
            .get("error")
            .map(describe_error)
            .or_else(|| {
                map.get("message")
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| payload.to_string()),
        _ => payload.to_string(),
    }
}

// ============================================
// Accumulation
// ============================================

/// Rebuilds reply text from fragments that may be cumulative snapshots or
/// true deltas.
#[derive(Debug, Default, Clone)]
pub struct Accumulator {
    text: String,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a fragment. A fragment that extends the accumulated text replaces
    /// it; any other fragment is appended. Returns whether the text changed.
    pub fn apply(&mut self, fragment: &str) -> bool {
        if fragment.is_empty() {
            return false;
        }
        if fragment.starts_with(self.text.as_str()) {
            if fragment.len() == self.text.len() {
                return false;
            }
            self.text = fragment.to_string();
        } else {
            self.text.push_str(fragment);
        }
        true
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_text(self) -> String {
        self.text
    }
}
