//! Dispatch tracker: per-service status records of one request

use crate::model::{DispatchState, DispatchStatus, Request, RequestId};
use crate::storage::{RequestStore, StorageError, StorageResult};
use std::sync::Arc;

/// Reads and writes the dispatch records of one request.
///
/// Every check goes to the store, so it sees writes made by other tasks.
/// A check followed by a status write is still not atomic: two callers may
/// both pass `can_dispatch` for the same service and both run it.
#[derive(Clone)]
pub struct DispatchTracker {
    store: Arc<dyn RequestStore>,
    request_id: RequestId,
}

impl DispatchTracker {
    pub fn new(store: Arc<dyn RequestStore>, request_id: RequestId) -> Self {
        Self { store, request_id }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Current status record of a service
    pub fn status(&self, service_id: &str) -> StorageResult<Option<DispatchStatus>> {
        self.store.load_dispatch(&self.request_id, service_id)
    }

    /// True if the service was handled or is being handled.
    ///
    /// A temporary failure does not count: it is worth running again.
    pub fn is_dispatched(&self, service_id: &str) -> StorageResult<bool> {
        Ok(self
            .status(service_id)?
            .is_some_and(|s| s.state != DispatchState::FailedTemporary))
    }

    /// Whether the service may be invoked now.
    ///
    /// Allowed when it was never considered, is queued but not started, or
    /// failed temporarily. Running, successful and fatally failed services
    /// are not dispatched again.
    pub fn can_dispatch(&self, service_id: &str) -> StorageResult<bool> {
        Ok(self
            .status(service_id)?
            .map_or(true, |s| s.state.permits_dispatch()))
    }

    /// Record the service as queued, unless it already has a record.
    ///
    /// Never replaces an existing status. Returns true if a record was created.
    pub fn mark_queued(&self, service_id: &str) -> StorageResult<bool> {
        let created = self.store.insert_dispatch_if_absent(
            &self.request_id,
            &DispatchStatus::new(service_id, DispatchState::Queued),
        )?;
        if created {
            tracing::debug!(request = %self.request_id, service = service_id, "queued");
        }
        Ok(created)
    }

    /// Create or overwrite the status of a service
    pub fn set_status(
        &self,
        service_id: &str,
        state: DispatchState,
        error_detail: Option<&str>,
    ) -> StorageResult<()> {
        let mut status = DispatchStatus::new(service_id, state);
        status.error_detail = error_detail.map(str::to_string);
        self.store.upsert_dispatch(&self.request_id, &status)?;

        match error_detail {
            Some(detail) => tracing::info!(
                request = %self.request_id,
                service = service_id,
                %state,
                detail,
                "dispatch status"
            ),
            None => tracing::debug!(
                request = %self.request_id,
                service = service_id,
                %state,
                "dispatch status"
            ),
        }
        Ok(())
    }

    /// Fresh snapshot of the request with all of its records
    pub fn snapshot(&self) -> StorageResult<Request> {
        self.store
            .load_request(&self.request_id)?
            .ok_or_else(|| StorageError::RequestNotFound(self.request_id.to_string()))
    }
}
