//! Response aggregator: stores service responses and their type tags

use crate::model::{RequestId, Response, ResponseData, ResponseId, TypeTag};
use crate::storage::{RequestStore, StorageError, StorageResult};
use std::sync::Arc;
use thiserror::Error;

/// Errors from adding a response
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response data is empty")]
    Empty,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Collects the responses of one request.
///
/// Responses are append-only and never deduplicated here: submitting the
/// same data twice stores two responses. A service that wants to avoid
/// duplicates checks before submitting.
#[derive(Clone)]
pub struct ResponseAggregator {
    store: Arc<dyn RequestStore>,
    request_id: RequestId,
}

impl ResponseAggregator {
    pub fn new(store: Arc<dyn RequestStore>, request_id: RequestId) -> Self {
        Self { store, request_id }
    }

    /// Store a response from `service_id`, tagged with each of `tags`.
    ///
    /// Tags may be given as `TypeTag` values or their names. With no tags
    /// the response is stored untagged: reachable by id, absent from every
    /// category listing.
    pub fn add_response<I, T>(
        &self,
        service_id: &str,
        data: ResponseData,
        tags: I,
    ) -> Result<Response, ResponseError>
    where
        I: IntoIterator<Item = T>,
        T: Into<TypeTag>,
    {
        if data.is_empty() {
            return Err(ResponseError::Empty);
        }
        let tags: Vec<TypeTag> = tags.into_iter().map(Into::into).collect();
        let response = Response::new(self.request_id.clone(), service_id, data);
        self.store.insert_response(&response, &tags)?;

        tracing::debug!(
            request = %self.request_id,
            service = service_id,
            response = %response.id,
            tags = tags.len(),
            "response added"
        );
        Ok(response)
    }

    /// Direct lookup of a response, tagged or not
    pub fn response(&self, id: &ResponseId) -> StorageResult<Option<Response>> {
        self.store.load_response(id)
    }
}
