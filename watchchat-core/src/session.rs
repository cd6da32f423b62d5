//! Conversation session manager.
//!
//! [`SessionManager`] owns the live transcript and its session id. Every
//! mutation is mirrored to the [`BufferStore`] so the next navigation picks
//! up where this one left off. Remote and model failures never escape as
//! errors: they are shown through [`ChatView::notice`] and the state is left
//! ready for the next action. Only requests rejected up front (validation,
//! a flow already in flight) are returned as `Err`, and those mutate nothing.

use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::archive::RemoteArchive;
use crate::config::Config;
use crate::db::BufferStore;
use crate::error::{Error, Result};
use crate::format::format_session_label;
use crate::intent::{Navigation, PendingIntent};
use crate::reply::{ReplyAcquirer, Transport};
use crate::types::{
    GenerationConfig, Message, ReplyRequest, Role, SessionId, ThinkingConfig, Transcript,
};
use crate::view::ChatView;

/// Behavior knobs taken from configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub auto_save: bool,
    pub greeting: String,
    pub generation: GenerationConfig,
    pub thinking: ThinkingConfig,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            auto_save: config.archive.auto_save,
            greeting: config.chat.greeting.clone(),
            generation: config.generation.generation_config(),
            thinking: config.generation.thinking_config(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// ============================================
// In-flight guard
// ============================================

#[derive(Debug)]
struct Flight {
    token: Uuid,
    action: &'static str,
}

/// Admits one send/load/save/delete flow at a time. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FlightGate {
    current: Arc<Mutex<Option<Flight>>>,
}

impl FlightGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Flight>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a flow, or fail with [`Error::Busy`] if one is already running.
    pub fn try_begin(&self, action: &'static str) -> Result<FlightTicket> {
        let mut current = self.lock();
        if let Some(flight) = current.as_ref() {
            return Err(Error::Busy(format!(
                "cannot {} while {} is in progress",
                action, flight.action
            )));
        }
        let token = Uuid::new_v4();
        *current = Some(Flight { token, action });
        Ok(FlightTicket {
            gate: self.clone(),
            token,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.lock().is_some()
    }
}

/// Held for the duration of a flow; dropping it reopens the gate.
#[derive(Debug)]
pub struct FlightTicket {
    gate: FlightGate,
    token: Uuid,
}

impl Drop for FlightTicket {
    fn drop(&mut self) {
        let mut current = self.gate.lock();
        if current.as_ref().map(|f| f.token) == Some(self.token) {
            *current = None;
        }
    }
}

// ============================================
// Outcomes
// ============================================

/// What became of a send or edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// A model message was appended. `saved` is set when the conversation was
    /// written to the archive afterwards.
    Replied {
        transport: Transport,
        saved: Option<SessionId>,
    },
    /// Both transports failed; the user message stays, unanswered.
    ReplyFailed,
}

/// What became of a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    NotFound,
    Unavailable,
    Failed,
}

/// A saved conversation as shown in history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub id: SessionId,
    pub label: String,
}

/// Shown when a send supersedes a user message that never got a reply.
pub const UNANSWERED_REPLACED: &str = "Previous unanswered message replaced.";

fn error_notice(error: &Error) -> String {
    format!("**Error:** {}", error)
}

// ============================================
// Manager
// ============================================

pub struct SessionManager {
    transcript: Transcript,
    session_id: Option<SessionId>,
    buffer: BufferStore,
    archive: RemoteArchive,
    replies: ReplyAcquirer,
    settings: SessionSettings,
    gate: FlightGate,
}

impl SessionManager {
    pub fn new(
        buffer: BufferStore,
        archive: RemoteArchive,
        replies: ReplyAcquirer,
        settings: SessionSettings,
    ) -> Self {
        Self {
            transcript: Transcript::new(),
            session_id: None,
            buffer,
            archive,
            replies,
            settings,
            gate: FlightGate::new(),
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn archive(&self) -> &RemoteArchive {
        &self.archive
    }

    pub fn buffer(&self) -> &BufferStore {
        &self.buffer
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Shared handle to the in-flight guard.
    pub fn gate(&self) -> FlightGate {
        self.gate.clone()
    }

    fn persist(&self) {
        self.buffer.save(&self.transcript, self.session_id.as_ref());
    }

    /// Start of a navigation: restore or reset the buffer, connect the
    /// archive, then apply the navigation's one-shot intent.
    ///
    /// Returns the outcome of the send the intent carried, if any.
    pub async fn boot(
        &mut self,
        navigation: &mut Navigation,
        view: &mut dyn ChatView,
    ) -> Result<Option<SendOutcome>> {
        let intent = match navigation.take() {
            None => PendingIntent::default(),
            Some(fragment) => PendingIntent::parse(&fragment).unwrap_or_else(|e| {
                tracing::warn!(fragment = %fragment, error = %e, "Ignoring malformed navigation");
                view.notice(&error_notice(&e));
                PendingIntent::resume()
            }),
        };
        tracing::debug!(?intent, "Booting session");

        if intent.reset || intent.is_cold_start() {
            self.buffer.clear();
        }
        let (transcript, session_id) = self.buffer.load();
        self.transcript = transcript;
        self.session_id = session_id;

        self.init_archive(view).await;

        // The stash is consumed even when the fragment carries its own send.
        let stashed = self.buffer.take_pending_input();
        let pending_send = intent.send.clone().or(stashed);

        if self.transcript.is_empty() {
            self.seed_greeting();
            self.persist();
        }
        view.transcript_replaced(&self.transcript);

        if let Some(id) = &intent.load {
            self.load(id, view).await?;
        }

        let Some(text) = pending_send else {
            return Ok(None);
        };
        let result = match intent.edit {
            Some(index) => self.edit_and_resend(index, &text, view).await,
            None => self.send(&text, view).await,
        };
        match result {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e @ Error::Validation(_)) => {
                view.notice(&error_notice(&e));
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Connect the archive and load its title index. A credential failure is
    /// reported and chat carries on without persistence.
    pub async fn init_archive(&mut self, view: &mut dyn ChatView) -> bool {
        if self.archive.is_initialized() {
            return true;
        }
        match self.archive.init().await {
            Ok(()) => {
                self.archive.load_title_index().await;
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Archive unavailable");
                view.notice(&error_notice(&e));
                false
            }
        }
    }

    fn seed_greeting(&mut self) {
        if !self.settings.greeting.is_empty() {
            self.transcript
                .push(Message::model(self.settings.greeting.clone()));
        }
    }

    /// Append a user message and obtain the model's reply.
    ///
    /// If the transcript already ends with an unanswered user message (a
    /// previous reply failed), that message is replaced rather than followed.
    pub async fn send(&mut self, text: &str, view: &mut dyn ChatView) -> Result<SendOutcome> {
        if text.trim().is_empty() {
            return Err(Error::Validation("message is empty".to_string()));
        }
        let _ticket = self.gate.try_begin("send")?;

        let message = Message::user(text);
        if self.transcript.is_ready_for_reply() {
            let last = self.transcript.len() - 1;
            tracing::debug!(index = last, "Replacing unanswered user message");
            self.transcript.replace_and_truncate(last, message.clone());
            view.notice(UNANSWERED_REPLACED);
            view.transcript_replaced(&self.transcript);
        } else {
            self.transcript.push(message.clone());
            view.message_appended(&message);
        }
        self.persist();

        self.reply_and_record(view).await
    }

    /// Replace the user message at `index`, drop everything after it, and
    /// obtain a fresh reply.
    pub async fn edit_and_resend(
        &mut self,
        index: usize,
        text: &str,
        view: &mut dyn ChatView,
    ) -> Result<SendOutcome> {
        if text.trim().is_empty() {
            return Err(Error::Validation("message is empty".to_string()));
        }
        match self.transcript.get(index).map(|m| m.role) {
            Some(Role::User) => {}
            Some(role) => {
                return Err(Error::Validation(format!(
                    "message {} is a {} message; only user messages can be edited",
                    index,
                    role.as_str()
                )))
            }
            None => {
                return Err(Error::Validation(format!(
                    "no message at index {} (transcript has {})",
                    index,
                    self.transcript.len()
                )))
            }
        }
        let _ticket = self.gate.try_begin("edit")?;

        self.transcript
            .replace_and_truncate(index, Message::user(text));
        self.persist();
        view.transcript_replaced(&self.transcript);

        self.reply_and_record(view).await
    }

    async fn reply_and_record(&mut self, view: &mut dyn ChatView) -> Result<SendOutcome> {
        let request = ReplyRequest::new(
            &self.transcript,
            self.settings.generation.clone(),
            self.settings.thinking.clone(),
        );
        view.reply_pending();

        let reply = match self.replies.acquire(&request, view).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "Reply failed");
                view.notice(&error_notice(&e));
                return Ok(SendOutcome::ReplyFailed);
            }
        };

        let message = Message::model(reply.text);
        self.transcript.push(message.clone());
        self.persist();
        view.message_appended(&message);

        let saved = if self.settings.auto_save {
            self.save_to_archive(view).await
        } else {
            None
        };
        Ok(SendOutcome::Replied {
            transport: reply.transport,
            saved,
        })
    }

    async fn save_to_archive(&mut self, view: &mut dyn ChatView) -> Option<SessionId> {
        if !self.archive.is_initialized() {
            return None;
        }
        match self
            .archive
            .save_session(&self.transcript, self.session_id.as_ref())
            .await
        {
            Ok(Some(saved)) => {
                if self.session_id.is_none() {
                    self.session_id = Some(saved.id.clone());
                    self.persist();
                }
                if let Some(e) = &saved.index_error {
                    view.notice(&error_notice(e));
                }
                Some(saved.id)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Save failed");
                view.notice(&error_notice(&e));
                None
            }
        }
    }

    /// Save the conversation now, regardless of the auto-save setting.
    pub async fn save(&mut self, view: &mut dyn ChatView) -> Result<Option<SessionId>> {
        let _ticket = self.gate.try_begin("save")?;
        if !self.archive.is_initialized() {
            view.notice("**Error:** the archive is not available");
            return Ok(None);
        }
        Ok(self.save_to_archive(view).await)
    }

    /// Replace the conversation wholesale with an archived one.
    pub async fn load(&mut self, id: &SessionId, view: &mut dyn ChatView) -> Result<LoadOutcome> {
        let _ticket = self.gate.try_begin("load")?;
        if !self.archive.is_initialized() {
            view.notice("**Error:** the archive is not available");
            return Ok(LoadOutcome::Unavailable);
        }

        match self.archive.load_session(id).await {
            Ok(Some(transcript)) => {
                self.transcript = transcript;
                self.session_id = Some(id.clone());
                self.persist();
                view.transcript_replaced(&self.transcript);
                tracing::info!(session = %id, messages = self.transcript.len(), "Loaded session");
                Ok(LoadOutcome::Loaded)
            }
            Ok(None) => {
                view.notice(&format!("**Error:** conversation {} was not found", id));
                Ok(LoadOutcome::NotFound)
            }
            Err(e) => {
                view.notice(&error_notice(&e));
                Ok(LoadOutcome::Failed)
            }
        }
    }

    /// Start over: empty transcript, no session id, fresh greeting.
    pub fn new_session(&mut self, view: &mut dyn ChatView) -> Result<()> {
        let _ticket = self.gate.try_begin("start a new conversation")?;
        self.reset(view);
        Ok(())
    }

    fn reset(&mut self, view: &mut dyn ChatView) {
        self.buffer.clear();
        self.transcript.clear();
        self.session_id = None;
        self.seed_greeting();
        self.persist();
        view.transcript_replaced(&self.transcript);
    }

    /// Delete an archived conversation. Deleting the current one starts a new
    /// conversation. Returns whether the object was deleted.
    pub async fn delete(&mut self, id: &SessionId, view: &mut dyn ChatView) -> Result<bool> {
        let _ticket = self.gate.try_begin("delete")?;
        if !self.archive.is_initialized() {
            view.notice("**Error:** the archive is not available");
            return Ok(false);
        }

        match self.archive.delete_session(id).await {
            Ok(deleted) => {
                if let Some(e) = &deleted.index_error {
                    view.notice(&error_notice(e));
                }
                if self.session_id.as_ref() == Some(id) {
                    self.reset(view);
                }
                Ok(true)
            }
            Err(e) => {
                view.notice(&error_notice(&e));
                Ok(false)
            }
        }
    }

    /// Saved conversations, newest first, with display labels.
    pub async fn list_sessions(&mut self, view: &mut dyn ChatView) -> Vec<SessionEntry> {
        if !self.archive.is_initialized() {
            return Vec::new();
        }
        let ids = match self.archive.list_sessions().await {
            Ok(ids) => ids,
            Err(e) => {
                view.notice(&error_notice(&e));
                return Vec::new();
            }
        };
        let titles = self.archive.titles();
        ids.into_iter()
            .map(|id| SessionEntry {
                label: format_session_label(&id, titles),
                id,
            })
            .collect()
    }

    /// Stash text for the next navigation and return the fragment that sends it.
    pub fn compose(&self, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Err(Error::Validation("message is empty".to_string()));
        }
        self.buffer.stash_pending_input(text);
        Ok(crate::intent::send_fragment(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_admits_one_flow() {
        let gate = FlightGate::new();
        let ticket = gate.try_begin("send").unwrap();
        assert!(gate.is_busy());

        let err = gate.clone().try_begin("load").unwrap_err();
        assert!(matches!(err, Error::Busy(_)));
        assert!(err.to_string().contains("send is in progress"));

        drop(ticket);
        assert!(!gate.is_busy());
        assert!(gate.try_begin("load").is_ok());
    }

    #[test]
    fn test_error_notice_format() {
        let notice = error_notice(&Error::ModelService("503".to_string()));
        assert_eq!(notice, "**Error:** model service error: 503");
    }
}
