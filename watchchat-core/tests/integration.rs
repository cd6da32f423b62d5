//! Integration tests for the session manager
//!
//! These tests wire a real SQLite buffer store (in a temp dir) to an
//! in-memory object store and a scripted model service, and drive whole
//! navigations through `SessionManager::boot`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use tempfile::TempDir;

use watchchat_core::archive::{MemoryConnector, MemoryStore, RemoteArchive, UnavailableConnector};
use watchchat_core::config::ArchiveConfig;
use watchchat_core::db::{BufferStore, Database};
use watchchat_core::intent::{edit_fragment, load_fragment, send_fragment, Navigation};
use watchchat_core::reply::{FragmentStream, ModelService, ReplyAcquirer, ReplyPolicy, Transport};
use watchchat_core::session::{
    LoadOutcome, SendOutcome, SessionManager, SessionSettings, UNANSWERED_REPLACED,
};
use watchchat_core::types::{Message, ReplyRequest, Role, SessionId, Transcript};
use watchchat_core::view::ChatView;
use watchchat_core::{Error, Result};

const INDEX_KEY: &str = "meta/watch-index.json";

// ============================================
// Fakes
// ============================================

enum StreamScript {
    Refuse,
    Fragments(Vec<&'static str>),
    Stall(Vec<&'static str>),
    FailAfter(Vec<&'static str>),
}

/// Model service whose atomic replies are `answer 1`, `answer 2`, ...
struct FakeModel {
    stream: Mutex<StreamScript>,
    atomic_up: Mutex<bool>,
    atomic_calls: AtomicUsize,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl FakeModel {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            stream: Mutex::new(StreamScript::Refuse),
            atomic_up: Mutex::new(true),
            atomic_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn set_stream(&self, script: StreamScript) {
        *self.stream.lock().unwrap() = script;
    }

    fn set_atomic_up(&self, up: bool) {
        *self.atomic_up.lock().unwrap() = up;
    }

    fn last_request(&self) -> Vec<Message> {
        self.requests.lock().unwrap().last().cloned().unwrap_or_default()
    }

    fn record(&self, request: &ReplyRequest) {
        self.requests
            .lock()
            .unwrap()
            .push(request.conversation_history.clone());
    }
}

#[async_trait]
impl ModelService for FakeModel {
    async fn generate(&self, request: &ReplyRequest) -> Result<String> {
        self.record(request);
        let n = self.atomic_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if *self.atomic_up.lock().unwrap() {
            Ok(format!("answer {}", n))
        } else {
            Err(Error::ModelService("upstream 503".to_string()))
        }
    }

    async fn generate_stream(&self, request: &ReplyRequest) -> Result<FragmentStream> {
        self.record(request);
        let items = |fragments: &Vec<&'static str>| {
            fragments
                .iter()
                .map(|f| Ok::<String, Error>(f.to_string()))
                .collect::<VecDeque<_>>()
        };
        match &*self.stream.lock().unwrap() {
            StreamScript::Refuse => Err(Error::ModelService("stream refused".to_string())),
            StreamScript::Fragments(f) => Ok(stream::iter(items(f)).boxed()),
            StreamScript::Stall(f) => Ok(stream::iter(items(f))
                .chain(stream::pending::<Result<String>>())
                .boxed()),
            StreamScript::FailAfter(f) => {
                let mut items = items(f);
                items.push_back(Err(Error::ModelService("connection reset".to_string())));
                Ok(stream::iter(items).boxed())
            }
        }
    }
}

/// View that records what a front end would have drawn.
#[derive(Default)]
struct RecordingView {
    notices: Vec<String>,
    appended: Vec<Message>,
    progress: Vec<String>,
    discarded: usize,
    replaced: usize,
}

impl ChatView for RecordingView {
    fn message_appended(&mut self, message: &Message) {
        self.appended.push(message.clone());
    }

    fn transcript_replaced(&mut self, _transcript: &Transcript) {
        self.replaced += 1;
    }

    fn stream_progress(&mut self, accumulated: &str) {
        self.progress.push(accumulated.to_string());
    }

    fn stream_discarded(&mut self, _reason: &str) {
        self.discarded += 1;
    }

    fn notice(&mut self, text: &str) {
        self.notices.push(text.to_string());
    }
}

struct Harness {
    dir: TempDir,
    store: MemoryStore,
    model: Arc<FakeModel>,
}

impl Harness {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            store: MemoryStore::new(),
            model: FakeModel::new(),
        }
    }

    fn buffer(&self) -> BufferStore {
        let db = Database::open(&self.dir.path().join("buffer.db")).unwrap();
        db.migrate().unwrap();
        BufferStore::new(db)
    }

    fn archive(&self) -> RemoteArchive {
        RemoteArchive::new(
            ArchiveConfig::default(),
            "New conversation",
            Box::new(MemoryConnector::new(self.store.clone())),
        )
    }

    fn manager_with(&self, archive: RemoteArchive, policy: ReplyPolicy) -> SessionManager {
        SessionManager::new(
            self.buffer(),
            archive,
            ReplyAcquirer::new(self.model.clone(), policy),
            SessionSettings::default(),
        )
    }

    fn manager(&self) -> SessionManager {
        self.manager_with(self.archive(), ReplyPolicy::atomic_only())
    }

    /// One navigation: a fresh manager booted with `fragment`.
    async fn navigate(&self, fragment: &str, view: &mut RecordingView) -> SessionManager {
        let mut manager = self.manager();
        manager
            .boot(&mut Navigation::new(fragment), view)
            .await
            .expect("boot should succeed");
        manager
    }
}

fn texts(transcript: &Transcript) -> Vec<(Role, String)> {
    transcript
        .messages()
        .iter()
        .map(|m| (m.role, m.text().to_string()))
        .collect()
}

// ============================================
// Boot and buffer
// ============================================

#[tokio::test]
async fn test_cold_start_seeds_greeting() {
    let h = Harness::new();
    let mut view = RecordingView::default();
    let manager = h.navigate("", &mut view).await;

    assert_eq!(manager.transcript().len(), 1);
    assert_eq!(manager.transcript().messages()[0].role, Role::Model);
    assert!(manager.session_id().is_none());
    assert!(view.notices.is_empty());

    let (buffered, id) = h.buffer().load();
    assert_eq!(buffered, *manager.transcript());
    assert!(id.is_none());
}

#[tokio::test]
async fn test_send_intent_replies_and_autosaves() {
    let h = Harness::new();
    let mut view = RecordingView::default();
    let manager = h.navigate(&send_fragment("plan a trip"), &mut view).await;

    let roles: Vec<Role> = manager.transcript().messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::Model, Role::User, Role::Model]);
    assert_eq!(manager.transcript().messages()[2].text(), "answer 1");

    let id = manager.session_id().cloned().expect("auto-save assigns an id");
    assert!(h.store.get(id.as_str()).is_some());
    let index = h.store.get(INDEX_KEY).unwrap();
    assert!(index.contains("plan a trip"));

    let (buffered, buffered_id) = h.buffer().load();
    assert_eq!(buffered, *manager.transcript());
    assert_eq!(buffered_id, Some(id));
}

#[tokio::test]
async fn test_resume_keeps_buffer_and_cold_start_clears_it() {
    let h = Harness::new();
    let mut view = RecordingView::default();
    let first = h.navigate(&send_fragment("hello"), &mut view).await;

    let resumed = h.navigate("#resume", &mut view).await;
    assert_eq!(resumed.transcript(), first.transcript());
    assert_eq!(resumed.session_id(), first.session_id());

    let fresh = h.navigate("", &mut view).await;
    assert_eq!(fresh.transcript().len(), 1);
    assert!(fresh.session_id().is_none());
}

#[tokio::test]
async fn test_saved_session_roundtrip() {
    let h = Harness::new();
    let mut view = RecordingView::default();
    let mut manager = h.navigate(&send_fragment("first"), &mut view).await;
    manager.send("second", &mut view).await.unwrap();
    let id = manager.session_id().cloned().unwrap();
    let expected = texts(manager.transcript());

    let loaded = h.navigate(&load_fragment(&id), &mut view).await;
    assert_eq!(texts(loaded.transcript()), expected);
    assert_eq!(loaded.session_id(), Some(&id));
}

#[tokio::test]
async fn test_pending_input_used_when_fragment_lost() {
    let h = Harness::new();
    let manager = h.manager();
    let fragment = manager.compose("stashed question").unwrap();
    assert!(fragment.starts_with("#send="));
    drop(manager);

    let mut view = RecordingView::default();
    let manager = h.navigate("", &mut view).await;
    assert_eq!(manager.transcript().messages()[1].text(), "stashed question");
    assert!(h.buffer().take_pending_input().is_none());
}

#[tokio::test]
async fn test_fragment_send_consumes_stash() {
    let h = Harness::new();
    let fragment = h.manager().compose("only once").unwrap();

    let mut view = RecordingView::default();
    let manager = h.navigate(&fragment, &mut view).await;
    assert_eq!(manager.transcript().len(), 3);
    drop(manager);

    let manager = h.navigate("#resume", &mut view).await;
    assert_eq!(manager.transcript().len(), 3);
}

#[tokio::test]
async fn test_blank_send_intent_keeps_conversation() {
    let h = Harness::new();
    let mut view = RecordingView::default();
    let first = h.navigate(&send_fragment("hello"), &mut view).await;
    let id = first.session_id().cloned().unwrap();

    let mut view = RecordingView::default();
    let after = h.navigate(&send_fragment("   "), &mut view).await;
    assert_eq!(after.transcript(), first.transcript());
    assert_eq!(after.session_id(), Some(&id));
    assert_eq!(view.notices.len(), 1);
    assert!(view.notices[0].starts_with("**Error:**"));
    assert!(view.notices[0].contains("message is empty"));

    let (buffered, buffered_id) = h.buffer().load();
    assert_eq!(buffered, *first.transcript());
    assert_eq!(buffered_id, Some(id));
    assert_eq!(h.model.atomic_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_malformed_navigation_is_reported_and_resumes() {
    let h = Harness::new();
    let mut view = RecordingView::default();
    let first = h.navigate(&send_fragment("keep me"), &mut view).await;

    let mut view = RecordingView::default();
    let manager = h.navigate("#edit=oops&send=eA==", &mut view).await;
    assert_eq!(manager.transcript(), first.transcript());
    assert_eq!(view.notices.len(), 1);
    assert!(view.notices[0].starts_with("**Error:**"));
}

// ============================================
// Edits
// ============================================

#[tokio::test]
async fn test_edit_truncates_and_replays() {
    let h = Harness::new();
    let seeded = Transcript::from_messages(vec![
        Message::user("U0"),
        Message::model("M0"),
        Message::user("U1"),
        Message::model("M1"),
        Message::user("U2"),
    ]);
    h.buffer().save(&seeded, None);

    let mut view = RecordingView::default();
    let mut manager = h.navigate("#resume", &mut view).await;

    let err = manager.edit_and_resend(1, "T", &mut view).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(*manager.transcript(), seeded);
    assert_eq!(h.model.atomic_calls.load(Ordering::SeqCst), 0);

    manager.edit_and_resend(2, "T", &mut view).await.unwrap();
    let sent: Vec<String> = h.model.last_request().iter().map(|m| m.text().to_string()).collect();
    assert_eq!(sent, vec!["U0", "M0", "T"]);
    assert_eq!(
        texts(manager.transcript()),
        vec![
            (Role::User, "U0".to_string()),
            (Role::Model, "M0".to_string()),
            (Role::User, "T".to_string()),
            (Role::Model, "answer 1".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_edit_intent_via_navigation() {
    let h = Harness::new();
    let mut view = RecordingView::default();
    h.navigate(&send_fragment("original"), &mut view).await;

    let manager = h.navigate(&edit_fragment(1, "revised"), &mut view).await;
    assert_eq!(manager.transcript().len(), 3);
    assert_eq!(manager.transcript().messages()[1].text(), "revised");
    assert_eq!(manager.transcript().messages()[2].text(), "answer 2");
}

#[tokio::test]
async fn test_empty_and_out_of_range_requests_rejected() {
    let h = Harness::new();
    let mut view = RecordingView::default();
    let mut manager = h.navigate("", &mut view).await;
    let before = manager.transcript().clone();

    assert!(matches!(
        manager.send("   ", &mut view).await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        manager.edit_and_resend(9, "x", &mut view).await,
        Err(Error::Validation(_))
    ));
    assert_eq!(*manager.transcript(), before);
}

// ============================================
// Reply acquisition
// ============================================

#[tokio::test(start_paused = true)]
async fn test_stalled_stream_persists_only_atomic_reply() {
    let h = Harness::new();
    h.model.set_stream(StreamScript::Stall(vec!["partial"]));
    let mut view = RecordingView::default();
    let mut manager = h.manager_with(h.archive(), ReplyPolicy::default());
    manager
        .boot(&mut Navigation::new(send_fragment("question")), &mut view)
        .await
        .unwrap();

    assert_eq!(view.progress, vec!["partial"]);
    assert_eq!(view.discarded, 1);
    let reply = manager.transcript().last().unwrap();
    assert_eq!(reply.text(), "answer 1");

    let id = manager.session_id().unwrap();
    let archived = h.store.get(id.as_str()).unwrap();
    assert!(!archived.contains("partial"));
    let (buffered, _) = h.buffer().load();
    assert_eq!(buffered.last().unwrap().text(), "answer 1");
}

#[tokio::test(start_paused = true)]
async fn test_stream_error_after_partial_persists_only_atomic_reply() {
    let h = Harness::new();
    h.model.set_stream(StreamScript::FailAfter(vec!["partial"]));
    let mut view = RecordingView::default();
    let mut manager = h.manager_with(h.archive(), ReplyPolicy::default());
    manager.boot(&mut Navigation::empty(), &mut view).await.unwrap();

    let outcome = manager.send("question", &mut view).await.unwrap();
    assert!(matches!(
        outcome,
        SendOutcome::Replied {
            transport: Transport::Atomic,
            saved: Some(_)
        }
    ));
    assert_eq!(view.progress, vec!["partial"]);
    assert_eq!(view.discarded, 1);
    assert_eq!(h.model.atomic_calls.load(Ordering::SeqCst), 1);

    let models: Vec<&str> = manager
        .transcript()
        .messages()
        .iter()
        .skip(1)
        .filter(|m| m.role == Role::Model)
        .map(|m| m.text())
        .collect();
    assert_eq!(models, vec!["answer 1"]);
    let id = manager.session_id().unwrap();
    assert!(!h.store.get(id.as_str()).unwrap().contains("partial"));
    let (buffered, _) = h.buffer().load();
    assert_eq!(buffered.last().unwrap().text(), "answer 1");
}

#[tokio::test(start_paused = true)]
async fn test_streamed_reply_appended_once() {
    let h = Harness::new();
    h.model
        .set_stream(StreamScript::Fragments(vec!["Hel", "Hello", " world"]));
    let mut view = RecordingView::default();
    let mut manager = h.manager_with(h.archive(), ReplyPolicy::default());
    manager.boot(&mut Navigation::empty(), &mut view).await.unwrap();

    let outcome = manager.send("hi", &mut view).await.unwrap();
    assert!(matches!(
        outcome,
        SendOutcome::Replied {
            transport: Transport::Streaming,
            saved: Some(_)
        }
    ));
    assert_eq!(manager.transcript().len(), 3);
    assert_eq!(manager.transcript().last().unwrap().text(), "Hello world");
    assert_eq!(h.model.atomic_calls.load(Ordering::SeqCst), 0);
    let models = view.appended.iter().filter(|m| m.role == Role::Model).count();
    assert_eq!(models, 1);
}

#[tokio::test]
async fn test_reply_failure_keeps_user_message_and_notifies() {
    let h = Harness::new();
    h.model.set_atomic_up(false);
    let mut view = RecordingView::default();
    let mut manager = h.navigate("", &mut view).await;

    let outcome = manager.send("are you there?", &mut view).await.unwrap();
    assert_eq!(outcome, SendOutcome::ReplyFailed);
    assert_eq!(manager.transcript().len(), 2);
    assert_eq!(manager.transcript().last().unwrap().role, Role::User);
    assert!(view.notices.iter().any(|n| n.contains("upstream 503")));
    assert!(h.store.keys().is_empty());

    // Retrying replaces the unanswered message instead of stacking another.
    h.model.set_atomic_up(true);
    let mut view = RecordingView::default();
    manager.send("hello?", &mut view).await.unwrap();
    assert_eq!(view.notices, vec![UNANSWERED_REPLACED.to_string()]);
    assert_eq!(view.replaced, 1);
    let roles: Vec<Role> = manager.transcript().messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::Model, Role::User, Role::Model]);
    assert_eq!(manager.transcript().messages()[1].text(), "hello?");
}

#[tokio::test]
async fn test_concurrent_flow_rejected() {
    let h = Harness::new();
    let mut view = RecordingView::default();
    let mut manager = h.navigate("", &mut view).await;
    let before = manager.transcript().clone();

    let _in_flight = manager.gate().try_begin("send").unwrap();
    let result = manager.send("second send", &mut view).await;
    assert!(matches!(result, Err(Error::Busy(_))));
    assert!(matches!(
        manager.load(&SessionId::new("1.json"), &mut view).await,
        Err(Error::Busy(_))
    ));
    assert_eq!(*manager.transcript(), before);
    assert_eq!(h.model.atomic_calls.load(Ordering::SeqCst), 0);
}

// ============================================
// Archive
// ============================================

#[tokio::test]
async fn test_archive_unavailable_chat_continues() {
    let h = Harness::new();
    let mut view = RecordingView::default();
    let mut manager = h.manager_with(
        RemoteArchive::new(
            ArchiveConfig::default(),
            "New conversation",
            Box::new(UnavailableConnector::new("credential service returned 500")),
        ),
        ReplyPolicy::atomic_only(),
    );
    manager
        .boot(&mut Navigation::new(send_fragment("offline?")), &mut view)
        .await
        .unwrap();

    assert!(view.notices[0].contains("credential service returned 500"));
    assert_eq!(manager.transcript().len(), 3);
    assert!(manager.session_id().is_none());
    assert!(manager.list_sessions(&mut view).await.is_empty());
    assert_eq!(manager.save(&mut view).await.unwrap(), None);
}

#[tokio::test]
async fn test_greeting_only_never_saved() {
    let h = Harness::new();
    let mut view = RecordingView::default();
    let mut manager = h.navigate("", &mut view).await;

    assert_eq!(manager.save(&mut view).await.unwrap(), None);
    assert!(manager.session_id().is_none());
    assert!(h.store.keys().is_empty());
}

#[tokio::test]
async fn test_session_id_assigned_once() {
    let h = Harness::new();
    let mut view = RecordingView::default();
    let mut manager = h.navigate(&send_fragment("one"), &mut view).await;
    let id = manager.session_id().cloned().unwrap();

    manager.send("two", &mut view).await.unwrap();
    manager.save(&mut view).await.unwrap();
    assert_eq!(manager.session_id(), Some(&id));
    let conversations = h.store.keys().into_iter().filter(|k| k != INDEX_KEY).count();
    assert_eq!(conversations, 1);
}

#[tokio::test]
async fn test_history_lists_newest_first_with_labels() {
    let h = Harness::new();
    for key in ["2.json", "10.json", "3.json"] {
        h.store.insert(key, "[]");
    }
    h.store.insert(INDEX_KEY, r#"{"3.json":"third chat"}"#);

    let mut view = RecordingView::default();
    let mut manager = h.navigate("", &mut view).await;
    let entries = manager.list_sessions(&mut view).await;

    let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["10.json", "3.json", "2.json"]);
    assert_eq!(entries[1].label, "third chat");
}

#[tokio::test]
async fn test_load_replaces_buffer_wholesale() {
    let h = Harness::new();
    let archived = Transcript::from_messages(vec![
        Message::model("hi"),
        Message::user("archived question"),
        Message::model("archived answer"),
    ]);
    h.store.insert("5.json", archived.to_json().unwrap());

    let mut view = RecordingView::default();
    let mut manager = h.navigate(&send_fragment("current chat"), &mut view).await;
    let outcome = manager.load(&SessionId::new("5.json"), &mut view).await.unwrap();

    assert_eq!(outcome, LoadOutcome::Loaded);
    assert_eq!(*manager.transcript(), archived);
    assert_eq!(manager.session_id(), Some(&SessionId::new("5.json")));
    let (buffered, id) = h.buffer().load();
    assert_eq!(buffered, archived);
    assert_eq!(id, Some(SessionId::new("5.json")));
}

#[tokio::test]
async fn test_load_missing_session_reports_and_keeps_state() {
    let h = Harness::new();
    let mut view = RecordingView::default();
    let mut manager = h.navigate("", &mut view).await;
    let before = manager.transcript().clone();

    let outcome = manager
        .load(&SessionId::new("404.json"), &mut view)
        .await
        .unwrap();
    assert_eq!(outcome, LoadOutcome::NotFound);
    assert_eq!(*manager.transcript(), before);
    assert!(view.notices.iter().any(|n| n.contains("404.json")));
}

#[tokio::test]
async fn test_delete_current_session_resets() {
    let h = Harness::new();
    let mut view = RecordingView::default();
    let mut manager = h.navigate(&send_fragment("delete me"), &mut view).await;
    let id = manager.session_id().cloned().unwrap();

    assert!(manager.delete(&id, &mut view).await.unwrap());
    assert!(h.store.get(id.as_str()).is_none());
    assert!(!h.store.get(INDEX_KEY).unwrap().contains(id.as_str()));
    assert!(manager.session_id().is_none());
    assert_eq!(manager.transcript().len(), 1);
    assert_eq!(manager.transcript().messages()[0].role, Role::Model);

    let (_, buffered_id) = h.buffer().load();
    assert!(buffered_id.is_none());
}

#[tokio::test]
async fn test_delete_other_session_keeps_current() {
    let h = Harness::new();
    h.store.insert("1.json", "[]");
    let mut view = RecordingView::default();
    let mut manager = h.navigate(&send_fragment("keep"), &mut view).await;
    let before = manager.transcript().clone();

    assert!(manager
        .delete(&SessionId::new("1.json"), &mut view)
        .await
        .unwrap());
    assert_eq!(*manager.transcript(), before);
    assert!(manager.session_id().is_some());
}

#[tokio::test]
async fn test_remote_failure_surfaces_as_notice() {
    let h = Harness::new();
    let mut view = RecordingView::default();
    let mut manager = h.navigate("", &mut view).await;
    h.store.set_unavailable(true);

    let outcome = manager.send("hi", &mut view).await.unwrap();
    assert!(matches!(outcome, SendOutcome::Replied { saved: None, .. }));
    assert!(view.notices.iter().any(|n| n.contains("object store unavailable")));
    assert!(manager.list_sessions(&mut view).await.is_empty());
    assert!(!manager.delete(&SessionId::new("1.json"), &mut view).await.unwrap());
}
