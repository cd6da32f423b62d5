//! Local storage layer for watchchat
//!
//! This module provides the durable local store using SQLite with:
//! - Schema migrations
//! - A key/value repository
//! - The conversation buffer built on top of it

pub mod buffer;
pub mod repo;
pub mod schema;

pub use buffer::BufferStore;
pub use repo::Database;
