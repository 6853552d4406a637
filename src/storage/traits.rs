//! Storage trait definitions

use crate::model::{
    DispatchStatus, Origin, OriginId, Request, RequestId, Response, ResponseId, Subject,
    SubjectId, TypeTag,
};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request not found: {0}")]
    RequestNotFound(String),

    #[error("Subject not found: {0}")]
    SubjectNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for request storage backends
///
/// Implementations must be thread-safe (Send + Sync): services running
/// concurrently write status and responses for the same request.
///
/// Inserts of uniquely-keyed entities report a lost race by returning
/// `Ok(false)` instead of failing; the caller re-reads the winner.
pub trait RequestStore: Send + Sync {
    // === Subject Operations ===

    /// Find a subject by its identity key
    fn find_subject(&self, identity_key: &str) -> StorageResult<Option<Subject>>;

    /// Insert a subject. Returns false if one with the same identity exists.
    fn insert_subject(&self, subject: &Subject) -> StorageResult<bool>;

    /// Load a subject by ID
    fn load_subject(&self, id: &SubjectId) -> StorageResult<Option<Subject>>;

    /// Set a metadata field only if the subject does not have it yet.
    /// Returns true if the field was set.
    fn enrich_subject(&self, id: &SubjectId, field: &str, value: &str) -> StorageResult<bool>;

    // === Origin Operations ===

    /// Find an origin by its identifier
    fn find_origin(&self, identifier: &str) -> StorageResult<Option<Origin>>;

    /// Insert an origin. Returns false if the identifier is taken.
    fn insert_origin(&self, origin: &Origin) -> StorageResult<bool>;

    /// Load an origin by ID
    fn load_origin(&self, id: &OriginId) -> StorageResult<Option<Origin>>;

    // === Request Operations ===

    /// Find the request for a (session, canonical key) pair, with its records
    fn find_request(&self, session_id: &str, params: &str) -> StorageResult<Option<Request>>;

    /// Insert a request. Returns false if (session, params) is taken.
    fn insert_request(&self, request: &Request) -> StorageResult<bool>;

    /// Load a request by ID, with its dispatch and response records
    fn load_request(&self, id: &RequestId) -> StorageResult<Option<Request>>;

    // === Dispatch Operations ===

    /// Load the status of one service for one request
    fn load_dispatch(
        &self,
        request_id: &RequestId,
        service_id: &str,
    ) -> StorageResult<Option<DispatchStatus>>;

    /// Create the record with `status` only if none exists.
    /// Returns true if a record was created.
    fn insert_dispatch_if_absent(
        &self,
        request_id: &RequestId,
        status: &DispatchStatus,
    ) -> StorageResult<bool>;

    /// Create or overwrite the record
    fn upsert_dispatch(&self, request_id: &RequestId, status: &DispatchStatus)
        -> StorageResult<()>;

    // === Response Operations ===

    /// Save a response and one tag join row per tag, atomically
    fn insert_response(&self, response: &Response, tags: &[TypeTag]) -> StorageResult<()>;

    /// Load a response by ID
    fn load_response(&self, id: &ResponseId) -> StorageResult<Option<Response>>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: RequestStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
