//! The handle a running service reports through

use crate::model::{DispatchState, Origin, Request, Response, ResponseData, Subject, TypeTag};
use crate::storage::{RequestStore, StorageResult};
use crate::tracker::{DispatchTracker, ResponseAggregator, ResponseError};
use std::sync::Arc;

/// What one service invocation sees of its request, and where it reports.
///
/// `request`, `subject` and `origin` are snapshots taken when the service
/// was dispatched; enrichment writes go to the store and are not reflected
/// in `subject()`.
pub struct ServiceContext {
    service_id: String,
    request: Request,
    subject: Subject,
    origin: Option<Origin>,
    store: Arc<dyn RequestStore>,
    tracker: DispatchTracker,
    responses: ResponseAggregator,
}

impl ServiceContext {
    pub fn new(
        service_id: impl Into<String>,
        request: Request,
        subject: Subject,
        origin: Option<Origin>,
        store: Arc<dyn RequestStore>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            tracker: DispatchTracker::new(store.clone(), request.id.clone()),
            responses: ResponseAggregator::new(store.clone(), request.id.clone()),
            request,
            subject,
            origin,
            store,
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    /// Whether this service may act on the request.
    ///
    /// The dispatcher records `InProgress` before `handle` runs, so that
    /// status is taken as this invocation's own and permits acting. Any other
    /// status answers as `DispatchTracker::can_dispatch` does.
    pub fn can_dispatch(&self) -> StorageResult<bool> {
        match self.tracker.status(&self.service_id)? {
            Some(status) if status.state == DispatchState::InProgress => Ok(true),
            _ => self.tracker.can_dispatch(&self.service_id),
        }
    }

    /// Contribute a response, tagged with each of `tags`
    pub fn add_response<I, T>(&self, data: ResponseData, tags: I) -> Result<Response, ResponseError>
    where
        I: IntoIterator<Item = T>,
        T: Into<TypeTag>,
    {
        self.responses.add_response(&self.service_id, data, tags)
    }

    /// Report this service's status
    pub fn set_status(&self, state: DispatchState, error_detail: Option<&str>) -> StorageResult<()> {
        self.tracker.set_status(&self.service_id, state, error_detail)
    }

    /// Report successful completion
    pub fn succeed(&self) -> StorageResult<()> {
        self.set_status(DispatchState::Successful, None)
    }

    /// Add a metadata field to the subject unless it is already set.
    /// Returns true if the field was set.
    pub fn enrich(&self, field: &str, value: &str) -> StorageResult<bool> {
        let set = self.store.enrich_subject(&self.subject.id, field, value)?;
        if set {
            tracing::debug!(
                subject = %self.subject.id,
                service = %self.service_id,
                field,
                "subject enriched"
            );
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{OpenStore, SqliteStore};

    fn context() -> ServiceContext {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let subject = Subject::new("journal").with_metadata("title", "X");
        store.insert_subject(&subject).unwrap();
        let request = Request::new("s1", "[]", subject.id.clone(), None);
        store.insert_request(&request).unwrap();
        ServiceContext::new("sfx", request, subject, None, store)
    }

    #[test]
    fn own_invocation_counts_as_eligible() {
        let ctx = context();
        assert!(ctx.can_dispatch().unwrap());

        ctx.set_status(DispatchState::InProgress, None).unwrap();
        assert!(ctx.can_dispatch().unwrap());

        ctx.set_status(DispatchState::FailedTemporary, Some("503")).unwrap();
        assert!(ctx.can_dispatch().unwrap());

        ctx.succeed().unwrap();
        assert!(!ctx.can_dispatch().unwrap());

        ctx.set_status(DispatchState::FailedFatal, Some("bad issn")).unwrap();
        assert!(!ctx.can_dispatch().unwrap());
    }

    #[test]
    fn enrich_never_overwrites() {
        let ctx = context();
        assert!(ctx.enrich("publisher", "Example Press").unwrap());
        assert!(!ctx.enrich("title", "Y").unwrap());
        assert!(!ctx.enrich("publisher", "Other Press").unwrap());
    }
}
