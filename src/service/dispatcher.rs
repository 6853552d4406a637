//! Dispatcher: fans a request out to every eligible service
//!
//! Eligible services run concurrently, one task each. Background services
//! are queued first so that pollers see them pending, then run after the
//! foreground services have finished, without blocking the caller.

use super::context::ServiceContext;
use super::registry::{Registration, ServiceRegistry, Tier};
use super::traits::{Service, ServiceError};
use crate::model::{DispatchState, RequestId};
use crate::storage::{RequestStore, StorageError, StorageResult};
use crate::tracker::DispatchTracker;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};

/// Default per-service timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// What one round of dispatching did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// Services that were run
    pub invoked: Vec<String>,
    /// Services not run: not eligible (running or finished), or their
    /// start could not be recorded
    pub skipped: Vec<String>,
    /// Background services queued to run after the foreground ones
    pub queued: Vec<String>,
    /// Services that ended in a failure status, with the recorded detail
    pub failures: Vec<(String, DispatchState, String)>,
}

/// Result of `Dispatcher::dispatch`
pub struct Dispatched {
    /// Report on the foreground services, which have finished
    pub report: DispatchReport,
    /// The background run, if any background service was queued
    pub background: Option<JoinHandle<StorageResult<DispatchReport>>>,
}

/// Runs the registered services for a request under a timeout.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn RequestStore>,
    services: Arc<ServiceRegistry>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn RequestStore>, services: Arc<ServiceRegistry>) -> Self {
        Self {
            store,
            services,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the per-service timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// Dispatch every eligible service for the request.
    ///
    /// Foreground services have finished when this returns; background
    /// services have been queued and are running on the returned handle.
    ///
    /// Eligibility is checked and recorded per service without a lock across
    /// the pair, so two concurrent dispatches of the same request may both
    /// run a service.
    pub async fn dispatch(&self, request_id: &RequestId) -> StorageResult<Dispatched> {
        let tracker = DispatchTracker::new(self.store.clone(), request_id.clone());
        let mut report = DispatchReport::default();

        let mut background = Vec::new();
        for registration in self.services.tier(Tier::Background) {
            let id = registration.service.id();
            if tracker.can_dispatch(id)? {
                if !tracker.mark_queued(id)? && retrying(&tracker, id)? {
                    tracker.set_status(id, DispatchState::Queued, None)?;
                }
                report.queued.push(id.to_string());
                background.push(registration.clone());
            } else {
                report.skipped.push(id.to_string());
            }
        }

        let mut foreground = Vec::new();
        for registration in self.services.tier(Tier::Foreground) {
            let id = registration.service.id();
            if tracker.can_dispatch(id)? {
                foreground.push(registration.clone());
            } else {
                report.skipped.push(id.to_string());
            }
        }

        let ran = self.run(&tracker, foreground).await?;
        report.invoked = ran.invoked;
        report.failures = ran.failures;

        let background = if background.is_empty() {
            None
        } else {
            let this = self.clone();
            Some(tokio::spawn(async move { this.run(&tracker, background).await }))
        };

        Ok(Dispatched { report, background })
    }

    /// Run `registrations` concurrently and wait for all of them
    async fn run(
        &self,
        tracker: &DispatchTracker,
        registrations: Vec<Registration>,
    ) -> StorageResult<DispatchReport> {
        let mut report = DispatchReport::default();
        if registrations.is_empty() {
            return Ok(report);
        }

        let request = tracker.snapshot()?;
        let subject = self
            .store
            .load_subject(&request.subject_id)?
            .ok_or_else(|| StorageError::SubjectNotFound(request.subject_id.to_string()))?;
        let origin = match &request.origin_id {
            Some(id) => self.store.load_origin(id)?,
            None => None,
        };

        let mut tasks = JoinSet::new();
        for registration in registrations {
            let service = registration.service;
            // Tasks already spawned must still be joined, so no early return
            if let Err(e) = tracker.set_status(service.id(), DispatchState::InProgress, None) {
                tracing::error!(
                    request = %request.id,
                    service = service.id(),
                    error = %e,
                    "could not mark service in progress, not running it"
                );
                report.skipped.push(service.id().to_string());
                continue;
            }
            report.invoked.push(service.id().to_string());

            let ctx = ServiceContext::new(
                service.id(),
                request.clone(),
                subject.clone(),
                origin.clone(),
                self.store.clone(),
            );
            tasks.spawn(invoke(service, ctx, self.timeout));
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(Some(failure))) => report.failures.push(failure),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    tracing::error!(request = %request.id, error = %e, "could not record service outcome")
                }
                Err(e) => tracing::error!(request = %request.id, error = %e, "dispatch task failed"),
            }
        }
        Ok(report)
    }
}

/// Whether the service's record is a temporary failure about to be retried
fn retrying(tracker: &DispatchTracker, service_id: &str) -> StorageResult<bool> {
    Ok(tracker
        .status(service_id)?
        .is_some_and(|s| s.state == DispatchState::FailedTemporary))
}

/// Run one service and record the failure status its outcome calls for.
///
/// Returns the failure that was recorded, if any.
async fn invoke(
    service: Arc<dyn Service>,
    ctx: ServiceContext,
    timeout: Duration,
) -> StorageResult<Option<(String, DispatchState, String)>> {
    let ctx = Arc::new(ctx);
    let task = {
        let service = service.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { service.handle(&ctx).await })
    };
    let abort = task.abort_handle();

    let failure = match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(()))) => None,
        Ok(Ok(Err(ServiceError::Temporary(detail)))) => Some((DispatchState::FailedTemporary, detail)),
        Ok(Ok(Err(ServiceError::Fatal(detail)))) => Some((DispatchState::FailedFatal, detail)),
        Ok(Ok(Err(ServiceError::Storage(e)))) => Some((DispatchState::FailedTemporary, e.to_string())),
        Ok(Err(e)) => Some((DispatchState::FailedFatal, format!("service task failed: {}", e))),
        Err(_) => {
            abort.abort();
            Some((
                DispatchState::FailedTemporary,
                format!("timed out after {}s", timeout.as_secs_f64()),
            ))
        }
    };

    match failure {
        Some((state, detail)) => {
            tracing::warn!(service = service.id(), %state, %detail, "service failed");
            ctx.set_status(state, Some(&detail))?;
            Ok(Some((service.id().to_string(), state, detail)))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::{params_from_pairs, KeyBuilder, RequestRegistry};
    use crate::model::{
        DispatchStatus, Origin, OriginId, Request, Response, ResponseData, ResponseId, Subject,
        SubjectId, TypeTag,
    };
    use crate::storage::{OpenStore, SqliteStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Test service with a scripted outcome
    struct Scripted {
        id: &'static str,
        tags: Vec<TypeTag>,
        outcome: Outcome,
        calls: AtomicUsize,
    }

    #[derive(Clone, Copy)]
    enum Outcome {
        Fulltext,
        Temporary,
        Fatal,
        Hang,
        Panic,
        /// Checks its own eligibility before acting
        Guarded,
    }

    impl Scripted {
        fn new(id: &'static str, outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                id,
                tags: vec![TypeTag::Fulltext],
                outcome,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Service for Scripted {
        fn id(&self) -> &str {
            self.id
        }
        fn type_tags(&self) -> &[TypeTag] {
            &self.tags
        }
        async fn handle(&self, ctx: &ServiceContext) -> Result<(), ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Outcome::Fulltext => {
                    ctx.add_response(
                        ResponseData::new().with_url(format!("http://{}.example.org", self.id)),
                        [TypeTag::Fulltext],
                    )?;
                    ctx.succeed()?;
                    Ok(())
                }
                Outcome::Temporary => Err(ServiceError::Temporary("503 from upstream".into())),
                Outcome::Fatal => Err(ServiceError::Fatal("malformed issn".into())),
                Outcome::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    ctx.succeed()?;
                    Ok(())
                }
                Outcome::Panic => panic!("adapter bug"),
                Outcome::Guarded => {
                    if !ctx.can_dispatch()? {
                        return Err(ServiceError::Fatal("not eligible".into()));
                    }
                    ctx.add_response(ResponseData::new().with_display_text("checked"), [TypeTag::Fulltext])?;
                    ctx.succeed()?;
                    Ok(())
                }
            }
        }
    }

    fn setup(services: ServiceRegistry) -> (Dispatcher, Arc<SqliteStore>, Request) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let registry = RequestRegistry::new(store.clone(), KeyBuilder::new());
        let request = registry
            .find_or_create("s1", &params_from_pairs([("title", "X")]))
            .unwrap();
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(services))
            .with_timeout(Duration::from_millis(200));
        (dispatcher, store, request)
    }

    fn state_of(store: &SqliteStore, request: &Request, service: &str) -> DispatchState {
        store.load_dispatch(&request.id, service).unwrap().unwrap().state
    }

    #[tokio::test]
    async fn outcomes_become_statuses() {
        let services = ServiceRegistry::new()
            .with(Scripted::new("ok", Outcome::Fulltext), Tier::Foreground)
            .with(Scripted::new("flaky", Outcome::Temporary), Tier::Foreground)
            .with(Scripted::new("broken", Outcome::Fatal), Tier::Foreground);
        let (dispatcher, store, request) = setup(services);

        let dispatched = dispatcher.dispatch(&request.id).await.unwrap();
        assert!(dispatched.background.is_none());
        assert_eq!(dispatched.report.invoked.len(), 3);
        assert_eq!(dispatched.report.failures.len(), 2);

        assert_eq!(state_of(&store, &request, "ok"), DispatchState::Successful);
        assert_eq!(state_of(&store, &request, "flaky"), DispatchState::FailedTemporary);
        assert_eq!(state_of(&store, &request, "broken"), DispatchState::FailedFatal);

        let loaded = store.load_request(&request.id).unwrap().unwrap();
        assert_eq!(loaded.responses_by_type("fulltext").len(), 1);
        assert_eq!(
            loaded.dispatch_status("broken").unwrap().error_detail.as_deref(),
            Some("malformed issn")
        );
    }

    #[tokio::test]
    async fn timeout_records_temporary_failure() {
        let services = ServiceRegistry::new().with(Scripted::new("slow", Outcome::Hang), Tier::Foreground);
        let (dispatcher, store, request) = setup(services);

        dispatcher.dispatch(&request.id).await.unwrap();

        let status = store.load_dispatch(&request.id, "slow").unwrap().unwrap();
        assert_eq!(status.state, DispatchState::FailedTemporary);
        assert!(status.error_detail.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn panicking_service_fails_fatally() {
        let services = ServiceRegistry::new().with(Scripted::new("buggy", Outcome::Panic), Tier::Foreground);
        let (dispatcher, store, request) = setup(services);

        dispatcher.dispatch(&request.id).await.unwrap();
        assert_eq!(state_of(&store, &request, "buggy"), DispatchState::FailedFatal);
    }

    #[tokio::test]
    async fn redispatch_only_retries_temporary_failures() {
        let ok = Scripted::new("ok", Outcome::Fulltext);
        let flaky = Scripted::new("flaky", Outcome::Temporary);
        let broken = Scripted::new("broken", Outcome::Fatal);
        let services = ServiceRegistry::new()
            .with(ok.clone(), Tier::Foreground)
            .with(flaky.clone(), Tier::Foreground)
            .with(broken.clone(), Tier::Foreground);
        let (dispatcher, _store, request) = setup(services);

        dispatcher.dispatch(&request.id).await.unwrap();
        let second = dispatcher.dispatch(&request.id).await.unwrap();

        assert_eq!(second.report.invoked, vec!["flaky"]);
        assert_eq!(second.report.skipped.len(), 2);
        assert_eq!(ok.calls.load(Ordering::SeqCst), 1);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
        assert_eq!(broken.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn background_services_are_queued_first() {
        let services = ServiceRegistry::new()
            .with(Scripted::new("fast", Outcome::Fulltext), Tier::Foreground)
            .with(Scripted::new("slow", Outcome::Fulltext), Tier::Background);
        let (dispatcher, store, request) = setup(services);

        let dispatched = dispatcher.dispatch(&request.id).await.unwrap();
        assert_eq!(dispatched.report.queued, vec!["slow"]);
        assert_eq!(dispatched.report.invoked, vec!["fast"]);

        // On the current-thread runtime the background task has not run yet
        let snapshot = store.load_request(&request.id).unwrap().unwrap();
        assert_eq!(snapshot.services_in_progress(), vec!["slow"]);

        let background = dispatched.background.unwrap().await.unwrap().unwrap();
        assert_eq!(background.invoked, vec!["slow"]);

        let snapshot = store.load_request(&request.id).unwrap().unwrap();
        assert!(!snapshot.any_in_progress());
        assert_eq!(snapshot.responses_by_type("fulltext").len(), 2);
    }

    #[tokio::test]
    async fn check_then_set_is_not_atomic() {
        let services = ServiceRegistry::new().with(Scripted::new("ok", Outcome::Fulltext), Tier::Foreground);
        let (_dispatcher, store, request) = setup(services);
        let first = DispatchTracker::new(store.clone(), request.id.clone());
        let second = DispatchTracker::new(store.clone(), request.id.clone());

        // Both callers check before either records a status: both may run
        assert!(first.can_dispatch("ok").unwrap());
        assert!(second.can_dispatch("ok").unwrap());
        first.set_status("ok", DispatchState::InProgress, None).unwrap();
        second.set_status("ok", DispatchState::InProgress, None).unwrap();

        assert!(!first.can_dispatch("ok").unwrap());
        let snapshot = store.load_request(&request.id).unwrap().unwrap();
        assert_eq!(snapshot.dispatches.len(), 1);
    }

    #[tokio::test]
    async fn service_may_check_its_own_eligibility() {
        let services = ServiceRegistry::new().with(Scripted::new("careful", Outcome::Guarded), Tier::Foreground);
        let (dispatcher, store, request) = setup(services);

        let dispatched = dispatcher.dispatch(&request.id).await.unwrap();
        assert!(dispatched.report.failures.is_empty());
        assert_eq!(state_of(&store, &request, "careful"), DispatchState::Successful);
    }

    #[tokio::test]
    async fn background_retry_is_visible_before_it_runs() {
        let services = ServiceRegistry::new().with(Scripted::new("bg", Outcome::Temporary), Tier::Background);
        let (dispatcher, store, request) = setup(services);

        let first = dispatcher.dispatch(&request.id).await.unwrap();
        first.background.unwrap().await.unwrap().unwrap();
        assert_eq!(state_of(&store, &request, "bg"), DispatchState::FailedTemporary);

        let retry = dispatcher.dispatch(&request.id).await.unwrap();
        assert_eq!(retry.report.queued, vec!["bg"]);

        // The retry has not started yet, but pollers must keep waiting
        let snapshot = store.load_request(&request.id).unwrap().unwrap();
        assert_eq!(snapshot.services_in_progress(), vec!["bg"]);
        assert!(snapshot.failed_dispatches().is_empty());
        assert!(snapshot.dispatch_status("bg").unwrap().error_detail.is_none());

        retry.background.unwrap().await.unwrap().unwrap();
        assert_eq!(state_of(&store, &request, "bg"), DispatchState::FailedTemporary);
    }

    /// Store whose writes of `InProgress` fail for one service
    struct RefusingStore {
        inner: SqliteStore,
        refuse: &'static str,
    }

    impl RequestStore for RefusingStore {
        fn find_subject(&self, identity_key: &str) -> StorageResult<Option<Subject>> {
            self.inner.find_subject(identity_key)
        }
        fn insert_subject(&self, subject: &Subject) -> StorageResult<bool> {
            self.inner.insert_subject(subject)
        }
        fn load_subject(&self, id: &SubjectId) -> StorageResult<Option<Subject>> {
            self.inner.load_subject(id)
        }
        fn enrich_subject(&self, id: &SubjectId, field: &str, value: &str) -> StorageResult<bool> {
            self.inner.enrich_subject(id, field, value)
        }
        fn find_origin(&self, identifier: &str) -> StorageResult<Option<Origin>> {
            self.inner.find_origin(identifier)
        }
        fn insert_origin(&self, origin: &Origin) -> StorageResult<bool> {
            self.inner.insert_origin(origin)
        }
        fn load_origin(&self, id: &OriginId) -> StorageResult<Option<Origin>> {
            self.inner.load_origin(id)
        }
        fn find_request(&self, session_id: &str, params: &str) -> StorageResult<Option<Request>> {
            self.inner.find_request(session_id, params)
        }
        fn insert_request(&self, request: &Request) -> StorageResult<bool> {
            self.inner.insert_request(request)
        }
        fn load_request(&self, id: &RequestId) -> StorageResult<Option<Request>> {
            self.inner.load_request(id)
        }
        fn load_dispatch(
            &self,
            request_id: &RequestId,
            service_id: &str,
        ) -> StorageResult<Option<DispatchStatus>> {
            self.inner.load_dispatch(request_id, service_id)
        }
        fn insert_dispatch_if_absent(
            &self,
            request_id: &RequestId,
            status: &DispatchStatus,
        ) -> StorageResult<bool> {
            self.inner.insert_dispatch_if_absent(request_id, status)
        }
        fn upsert_dispatch(&self, request_id: &RequestId, status: &DispatchStatus) -> StorageResult<()> {
            if status.service_id == self.refuse && status.state == DispatchState::InProgress {
                return Err(StorageError::InvalidValue("disk full".to_string()));
            }
            self.inner.upsert_dispatch(request_id, status)
        }
        fn insert_response(&self, response: &Response, tags: &[TypeTag]) -> StorageResult<()> {
            self.inner.insert_response(response, tags)
        }
        fn load_response(&self, id: &ResponseId) -> StorageResult<Option<Response>> {
            self.inner.load_response(id)
        }
    }

    #[tokio::test]
    async fn failed_start_does_not_abandon_running_services() {
        let store = Arc::new(RefusingStore {
            inner: SqliteStore::open_in_memory().unwrap(),
            refuse: "second",
        });
        let request = RequestRegistry::new(store.clone(), KeyBuilder::new())
            .find_or_create("s1", &params_from_pairs([("title", "X")]))
            .unwrap();
        let services = ServiceRegistry::new()
            .with(Scripted::new("first", Outcome::Fulltext), Tier::Foreground)
            .with(Scripted::new("second", Outcome::Fulltext), Tier::Foreground)
            .with(Scripted::new("third", Outcome::Fulltext), Tier::Foreground);
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(services));

        let dispatched = dispatcher.dispatch(&request.id).await.unwrap();
        assert_eq!(dispatched.report.invoked, vec!["first", "third"]);
        assert_eq!(dispatched.report.skipped, vec!["second"]);

        let snapshot = store.load_request(&request.id).unwrap().unwrap();
        assert_eq!(
            snapshot.dispatch_status("first").unwrap().state,
            DispatchState::Successful
        );
        assert_eq!(
            snapshot.dispatch_status("third").unwrap().state,
            DispatchState::Successful
        );
        assert!(snapshot.dispatch_status("second").is_none());
    }
}
