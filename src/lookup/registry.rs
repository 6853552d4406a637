//! Request registry: one request per (session, canonical key)

use super::key::KeyBuilder;
use super::params::LookupParams;
use super::resolver::SubjectResolver;
use super::LookupResult;
use crate::model::Request;
use crate::storage::{RequestStore, StorageError};
use std::sync::Arc;

/// Finds the request a lookup already made in a session, or creates it.
pub struct RequestRegistry {
    store: Arc<dyn RequestStore>,
    keys: KeyBuilder,
    resolver: SubjectResolver,
}

impl RequestRegistry {
    pub fn new(store: Arc<dyn RequestStore>, keys: KeyBuilder) -> Self {
        Self {
            resolver: SubjectResolver::new(store.clone()),
            store,
            keys,
        }
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    /// Return the session's request for these parameters, creating it if needed.
    ///
    /// An existing request is returned as stored: its subject and origin are
    /// not resolved again and nothing is re-dispatched. When two identical
    /// lookups race to create the request, the store's uniqueness constraint
    /// picks one and the loser returns the winner's request.
    pub fn find_or_create(&self, session_id: &str, params: &LookupParams) -> LookupResult<Request> {
        let key = self.keys.encode(params);

        if let Some(existing) = self.store.find_request(session_id, &key)? {
            tracing::debug!(request = %existing.id, session_id, "reusing request");
            return Ok(existing);
        }

        let resolved = self.resolver.resolve(params)?;
        let request = Request::new(
            session_id,
            key.clone(),
            resolved.subject.id,
            resolved.origin.map(|o| o.id),
        );

        if self.store.insert_request(&request)? {
            tracing::info!(request = %request.id, session_id, "created request");
            return Ok(request);
        }

        tracing::debug!(session_id, "request created concurrently, returning the stored one");
        self.store
            .find_request(session_id, &key)?
            .ok_or_else(|| StorageError::RequestNotFound(key).into())
    }
}
