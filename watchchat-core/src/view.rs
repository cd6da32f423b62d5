//! Observer interface for front ends rendering a conversation.

use crate::types::{Message, Transcript};

/// Receives conversation updates as they happen. Every method defaults to a
/// no-op so a front end only implements what it draws.
pub trait ChatView {
    /// A message was added to the end of the transcript.
    fn message_appended(&mut self, _message: &Message) {}

    /// The transcript was replaced wholesale (boot, load, new, edit).
    fn transcript_replaced(&mut self, _transcript: &Transcript) {}

    /// A reply has been requested and nothing has arrived yet.
    fn reply_pending(&mut self) {}

    /// The streaming transport opened.
    fn stream_started(&mut self) {}

    /// Streamed text so far. Always the full accumulated text, not a delta.
    fn stream_progress(&mut self, _accumulated: &str) {}

    /// Streamed text shown so far is void; an atomic reply will replace it.
    fn stream_discarded(&mut self, _reason: &str) {}

    /// A display-only system notice, e.g. `**Error:** ...`.
    fn notice(&mut self, _text: &str) {}
}

/// View that ignores every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullView;

impl ChatView for NullView {}
