//! # watchchat-core
//!
//! Core library for watchchat - a chat client for a generative-language model
//! that keeps its conversations in an S3-compatible object store.
//!
//! This library provides:
//! - Domain types for messages, transcripts and session ids
//! - The buffer store: the in-progress conversation in a local SQLite file
//! - The remote archive client (temporary credentials, SigV4, title index)
//! - Reply acquisition over a streaming transport with an atomic fallback
//! - The session manager that reconciles sends, edits, loads and deletes
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Every front-end invocation is one navigation:
//! - **Boot:** the navigation intent is read and stripped, the buffer is
//!   restored or cleared, the archive is connected
//! - **Apply:** a load supersedes the buffer, then an edit or send asks the
//!   model service for a reply
//! - **Persist:** every mutation lands in the buffer; with auto-save on, each
//!   reply is also written to the archive
//!
//! ## Example
//!
//! ```rust,no_run
//! use watchchat_core::{BufferStore, Config, Database};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open the buffer database
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//! let buffer = BufferStore::new(db);
//! let (transcript, session_id) = buffer.load();
//! ```

// Re-export commonly used items at the crate root
pub use archive::RemoteArchive;
pub use config::Config;
pub use db::{BufferStore, Database};
pub use error::{Error, Result};
pub use intent::{Navigation, PendingIntent};
pub use reply::{ReplyAcquirer, ReplyPolicy, Transport};
pub use session::{LoadOutcome, SendOutcome, SessionEntry, SessionManager, SessionSettings};
pub use types::*;
pub use view::{ChatView, NullView};

// Public modules
pub mod archive;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod intent;
pub mod logging;
pub mod reply;
pub mod session;
pub mod title;
pub mod types;
pub mod view;
