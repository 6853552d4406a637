//! Storage backends for openlink
//!
//! Requests, their dispatch records and responses are persisted through the
//! `RequestStore` trait. The primary implementation is `SqliteStore`.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{OpenStore, RequestStore, StorageError, StorageResult};
