//! Remote archive: saved conversations and their title index in an
//! S3-compatible bucket reached with short-lived credentials.

pub mod client;
pub mod credentials;
pub mod memory;
pub mod sigv4;
pub mod store;

pub use client::{sort_newest_first, DeletedSession, RemoteArchive, SavedSession};
pub use credentials::{CredentialProvider, HttpCredentialProvider, TemporaryCredentials};
pub use memory::{MemoryConnector, MemoryStore, UnavailableConnector};
pub use store::{ArchiveConnector, CosConnector, CosObjectStore, ObjectStore};
