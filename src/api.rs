//! Entry point for callers: look up, dispatch, poll.
//!
//! `Resolver` ties the request registry, the dispatcher and the progress
//! queries together. Transports (the CLI, an HTTP layer) call `Resolver`
//! methods and never reach into the store directly.

use crate::config::{Config, ConfigError};
use crate::lookup::{KeyBuilder, LookupParams, LookupResult, RequestRegistry};
use crate::model::{DispatchState, Request, RequestId, Response, TypeTag};
use crate::service::{DispatchReport, Dispatched, Dispatcher, ServiceRegistry};
use crate::storage::{RequestStore, StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A failed dispatch as reported to pollers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedDispatch {
    pub service_id: String,
    pub state: DispatchState,
    pub error_detail: Option<String>,
}

/// What a poller needs to render a request's current state.
///
/// Built from one snapshot; poll again for later changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub request_id: RequestId,
    /// Responses for each requested tag, in the order they were tagged
    pub responses: BTreeMap<String, Vec<Response>>,
    /// Requested tags some queued or running service may still produce
    pub tags_in_progress: Vec<TypeTag>,
    pub any_in_progress: bool,
    /// Services queued or running
    pub in_progress: Vec<String>,
    pub failed_dispatches: Vec<FailedDispatch>,
}

impl Progress {
    pub fn from_request(request: &Request, tags: &[TypeTag], services: &ServiceRegistry) -> Self {
        let responses = tags
            .iter()
            .map(|tag| {
                let found = request.responses_by_type(tag).into_iter().cloned().collect();
                (tag.to_string(), found)
            })
            .collect();

        let tags_in_progress = tags
            .iter()
            .filter(|tag| request.is_type_in_progress(*tag, services))
            .cloned()
            .collect();

        let failed_dispatches = request
            .failed_dispatches()
            .into_iter()
            .map(|(service_id, state)| FailedDispatch {
                service_id: service_id.to_string(),
                state,
                error_detail: request
                    .dispatch_status(service_id)
                    .and_then(|d| d.error_detail.clone()),
            })
            .collect();

        Self {
            request_id: request.id.clone(),
            responses,
            tags_in_progress,
            any_in_progress: request.any_in_progress(),
            in_progress: request
                .services_in_progress()
                .into_iter()
                .map(String::from)
                .collect(),
            failed_dispatches,
        }
    }
}

/// Outcome of `Resolver::resolve`
pub struct Resolution {
    /// Snapshot taken after the foreground services finished
    pub request: Request,
    pub report: DispatchReport,
    /// Background services still running, if any were queued
    pub background: Option<JoinHandle<StorageResult<DispatchReport>>>,
}

/// Single entry point for lookups and progress polling.
#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn RequestStore>,
    registry: Arc<RequestRegistry>,
    dispatcher: Dispatcher,
}

impl Resolver {
    pub fn new(store: Arc<dyn RequestStore>, services: ServiceRegistry, keys: KeyBuilder) -> Self {
        Self {
            registry: Arc::new(RequestRegistry::new(store.clone(), keys)),
            dispatcher: Dispatcher::new(store.clone(), Arc::new(services)),
            store,
        }
    }

    /// Build a resolver with the configured services, keys and timeout
    pub fn from_config(store: Arc<dyn RequestStore>, config: &Config) -> Result<Self, ConfigError> {
        let resolver = Self::new(store, config.service_registry()?, config.key_builder());
        Ok(resolver.with_timeout(config.timeout()))
    }

    /// Set the per-service timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.dispatcher = self.dispatcher.with_timeout(timeout);
        self
    }

    pub fn services(&self) -> &ServiceRegistry {
        self.dispatcher.services()
    }

    /// Find or create the session's request for these parameters
    pub fn lookup(&self, session_id: &str, params: &LookupParams) -> LookupResult<Request> {
        self.registry.find_or_create(session_id, params)
    }

    /// Dispatch every eligible service for a request
    pub async fn dispatch(&self, request_id: &RequestId) -> StorageResult<Dispatched> {
        self.dispatcher.dispatch(request_id).await
    }

    /// Look up and dispatch in one step.
    ///
    /// A repeated lookup dispatches only services that are still eligible,
    /// so finished services are not run again.
    pub async fn resolve(&self, session_id: &str, params: &LookupParams) -> LookupResult<Resolution> {
        let request = self.lookup(session_id, params)?;
        let Dispatched { report, background } = self.dispatch(&request.id).await?;
        let request = self.snapshot(&request.id)?;
        Ok(Resolution {
            request,
            report,
            background,
        })
    }

    /// Look up, dispatch, and wait for the background services as well.
    ///
    /// For callers that exit once they have an answer: background services
    /// dropped mid-run would stay `InProgress` and never be retried.
    pub async fn resolve_and_wait(
        &self,
        session_id: &str,
        params: &LookupParams,
    ) -> LookupResult<Resolution> {
        let Resolution {
            request,
            mut report,
            background,
        } = self.resolve(session_id, params).await?;
        let Some(background) = background else {
            return Ok(Resolution {
                request,
                report,
                background: None,
            });
        };

        match background.await {
            Ok(ran) => {
                let ran = ran?;
                report.invoked.extend(ran.invoked);
                report.skipped.extend(ran.skipped);
                report.failures.extend(ran.failures);
            }
            Err(e) => tracing::error!(request = %request.id, error = %e, "background dispatch failed"),
        }
        Ok(Resolution {
            request: self.snapshot(&request.id)?,
            report,
            background: None,
        })
    }

    /// Current snapshot of a request
    pub fn snapshot(&self, request_id: &RequestId) -> StorageResult<Request> {
        self.store
            .load_request(request_id)?
            .ok_or_else(|| StorageError::RequestNotFound(request_id.to_string()))
    }

    /// Progress of a request for the tags a poller is interested in
    pub fn progress(&self, request_id: &RequestId, tags: &[TypeTag]) -> StorageResult<Progress> {
        let request = self.snapshot(request_id)?;
        Ok(Progress::from_request(&request, tags, self.services()))
    }
}
