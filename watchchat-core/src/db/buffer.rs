//! Buffer store: the in-progress conversation kept across navigations.
//!
//! Writes are best-effort and reads are lenient. A failed write is logged and
//! dropped; an unreadable buffer comes back empty.

use super::Database;
use crate::types::{SessionId, Transcript};

/// Key holding the serialized transcript
pub const KEY_HISTORY: &str = "watchchat_cur_history";
/// Key holding the session id ("" while unsaved)
pub const KEY_SESSION: &str = "watchchat_cur_key";
/// One-shot fallback channel for text composed on another page
pub const KEY_PENDING_INPUT: &str = "watchchat_pending_input";

/// Durable projection of the session state.
pub struct BufferStore {
    db: Database,
}

impl BufferStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist transcript and session id. Never fails.
    pub fn save(&self, transcript: &Transcript, session_id: Option<&SessionId>) {
        let history = match transcript.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize buffer");
                return;
            }
        };
        let key = session_id.map(SessionId::as_str).unwrap_or("");
        if let Err(e) = self
            .db
            .set_values(&[(KEY_HISTORY, history.as_str()), (KEY_SESSION, key)])
        {
            tracing::warn!(error = %e, "Failed to write buffer");
        }
    }

    /// Read the buffer back. Any failure yields an empty transcript and no id.
    pub fn load(&self) -> (Transcript, Option<SessionId>) {
        let history = match self.db.get_value(KEY_HISTORY) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read buffer");
                return (Transcript::new(), None);
            }
        };
        let transcript = history
            .map(|raw| Transcript::from_json_lenient(&raw))
            .unwrap_or_default();

        let session_id = match self.db.get_value(KEY_SESSION) {
            Ok(Some(key)) if !key.is_empty() => Some(SessionId::new(key)),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read buffered session id");
                return (Transcript::new(), None);
            }
        };

        (transcript, session_id)
    }

    /// Remove the buffer. Idempotent.
    pub fn clear(&self) {
        if let Err(e) = self.db.remove_values(&[KEY_HISTORY, KEY_SESSION]) {
            tracing::warn!(error = %e, "Failed to clear buffer");
        }
    }

    /// Stash text for the next boot to send.
    pub fn stash_pending_input(&self, text: &str) {
        if let Err(e) = self.db.set_value(KEY_PENDING_INPUT, text) {
            tracing::warn!(error = %e, "Failed to stash pending input");
        }
    }

    /// Consume stashed text, if any. A second call returns `None`.
    pub fn take_pending_input(&self) -> Option<String> {
        match self.db.take_value(KEY_PENDING_INPUT) {
            Ok(value) => value.filter(|text| !text.is_empty()),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read pending input");
                None
            }
        }
    }

    /// Direct access for tests and diagnostics
    pub fn database(&self) -> &Database {
        &self.db
    }
}
