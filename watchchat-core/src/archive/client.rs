//! Remote archive of saved conversations and their title index.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Utc;

use crate::config::ArchiveConfig;
use crate::error::{Error, Result};
use crate::title::derive_title;
use crate::types::{SessionId, TitleIndex, Transcript};

use super::store::{ArchiveConnector, ObjectStore};

/// Transcripts shorter than this are never written to the archive.
pub const MIN_SAVED_MESSAGES: usize = 2;

/// Result of a successful conversation write.
#[derive(Debug)]
pub struct SavedSession {
    pub id: SessionId,
    pub title: String,
    /// Set when the conversation object was written but the title index was not.
    pub index_error: Option<Error>,
}

/// Result of a successful conversation delete.
#[derive(Debug)]
pub struct DeletedSession {
    /// Set when the object was removed but its title index entry was not.
    pub index_error: Option<Error>,
}

/// Client for the remote archive.
///
/// Every operation is a no-op returning an empty result until [`init`]
/// succeeds.
///
/// [`init`]: RemoteArchive::init
pub struct RemoteArchive {
    config: ArchiveConfig,
    placeholder_title: String,
    connector: Box<dyn ArchiveConnector>,
    store: Option<Arc<dyn ObjectStore>>,
    titles: TitleIndex,
    titles_loaded: bool,
}

impl RemoteArchive {
    pub fn new(
        config: ArchiveConfig,
        placeholder_title: impl Into<String>,
        connector: Box<dyn ArchiveConnector>,
    ) -> Self {
        Self {
            config,
            placeholder_title: placeholder_title.into(),
            connector,
            store: None,
            titles: TitleIndex::new(),
            titles_loaded: false,
        }
    }

    /// Obtain storage access. Fails with [`Error::Credential`] when the
    /// credential service refuses.
    pub async fn init(&mut self) -> Result<()> {
        let store = self.connector.connect().await?;
        self.store = Some(store);
        self.titles_loaded = false;
        tracing::info!("Remote archive initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.store.is_some()
    }

    /// Title index as last loaded or written.
    pub fn titles(&self) -> &TitleIndex {
        &self.titles
    }

    /// Saved conversation ids, newest first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionId>> {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };
        let keys = store.list_keys().await?;
        let mut ids: Vec<SessionId> = keys
            .into_iter()
            .filter(|key| self.is_conversation_key(key))
            .map(SessionId::new)
            .collect();
        sort_newest_first(&mut ids);
        Ok(ids)
    }

    fn is_conversation_key(&self, key: &str) -> bool {
        key != self.config.index_key && key.ends_with(&self.config.object_suffix)
    }

    /// Load the title index. A missing or unreadable index yields an empty map.
    pub async fn load_title_index(&mut self) -> TitleIndex {
        match self.fetch_title_index().await {
            Ok(titles) => {
                self.titles = titles;
                self.titles_loaded = self.store.is_some();
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load title index");
                self.titles = TitleIndex::new();
                self.titles_loaded = false;
            }
        }
        self.titles.clone()
    }

    /// Fetch the index object. Only transport failures are errors.
    async fn fetch_title_index(&self) -> Result<TitleIndex> {
        let Some(store) = &self.store else {
            return Ok(TitleIndex::new());
        };
        let Some(body) = store.get_object(&self.config.index_key).await? else {
            return Ok(TitleIndex::new());
        };
        Ok(serde_json::from_str(&body).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Title index is malformed, starting fresh");
            TitleIndex::new()
        }))
    }

    /// Overwrite the title index object.
    pub async fn save_title_index(&mut self, titles: &TitleIndex) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let body = serde_json::to_string(titles)?;
        store.put_object(&self.config.index_key, &body).await?;
        self.titles = titles.clone();
        self.titles_loaded = true;
        Ok(())
    }

    /// Fetch a saved conversation. `None` when the archive is not initialized
    /// or the object does not exist; malformed content yields an empty transcript.
    pub async fn load_session(&self, id: &SessionId) -> Result<Option<Transcript>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let body = store.get_object(id.as_str()).await?;
        Ok(body.map(|raw| Transcript::from_json_lenient(&raw)))
    }

    /// Write `transcript`, minting an id when `id` is `None`, and upsert its
    /// title. Returns `None` without writing when the archive is not
    /// initialized or the transcript is too short to keep.
    pub async fn save_session(
        &mut self,
        transcript: &Transcript,
        id: Option<&SessionId>,
    ) -> Result<Option<SavedSession>> {
        let Some(store) = self.store.clone() else {
            return Ok(None);
        };
        let kept = transcript.conversation().count();
        if kept < MIN_SAVED_MESSAGES {
            tracing::debug!(messages = kept, "Transcript too short to archive");
            return Ok(None);
        }

        let id = id.cloned().unwrap_or_else(|| {
            SessionId::from_millis(Utc::now().timestamp_millis(), &self.config.object_suffix)
        });
        store.put_object(id.as_str(), &transcript.to_json()?).await?;

        let title = derive_title(transcript, &self.placeholder_title);
        let index_error = self.upsert_title(&id, &title).await.err();
        if let Some(e) = &index_error {
            tracing::warn!(session = %id, error = %e, "Saved session without updating title index");
        }

        tracing::info!(session = %id, title = %title, "Saved session");
        Ok(Some(SavedSession {
            id,
            title,
            index_error,
        }))
    }

    async fn upsert_title(&mut self, id: &SessionId, title: &str) -> Result<()> {
        let mut titles = self.current_titles().await?;
        titles.insert(id.to_string(), title.to_string());
        self.save_title_index(&titles).await
    }

    /// Cached index, loading it first so an upsert never drops other entries.
    async fn current_titles(&mut self) -> Result<TitleIndex> {
        if !self.titles_loaded {
            self.titles = self.fetch_title_index().await?;
            self.titles_loaded = true;
        }
        Ok(self.titles.clone())
    }

    /// Delete a saved conversation and drop its title index entry.
    pub async fn delete_session(&mut self, id: &SessionId) -> Result<DeletedSession> {
        let Some(store) = self.store.clone() else {
            return Ok(DeletedSession { index_error: None });
        };
        store.delete_object(id.as_str()).await?;
        tracing::info!(session = %id, "Deleted session");

        let index_error = self.remove_title(id).await.err();
        if let Some(e) = &index_error {
            tracing::warn!(session = %id, error = %e, "Failed to drop title index entry");
        }
        Ok(DeletedSession { index_error })
    }

    async fn remove_title(&mut self, id: &SessionId) -> Result<()> {
        let mut titles = self.current_titles().await?;
        if titles.remove(id.as_str()).is_some() {
            self.save_title_index(&titles).await?;
        }
        Ok(())
    }
}

/// Order ids by their leading integer, newest first. Ids without one go last,
/// in string order.
pub fn sort_newest_first(ids: &mut [SessionId]) {
    ids.sort_by(|a, b| match (a.timestamp_millis(), b.timestamp_millis()) {
        (Some(x), Some(y)) => y.cmp(&x).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    });
}
