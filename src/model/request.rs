//! Request: one deduplicated resolution attempt tied to a session

use super::dispatch::{DispatchState, DispatchStatus};
use super::ids::{OriginId, RequestId, ResponseId, SubjectId};
use super::response::{Capabilities, Response, ResponseTag, TypeTag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A resolution attempt together with its dispatch and response records.
///
/// A `Request` value is a snapshot: the progress queries below read the
/// records loaded with it and never go back to storage. A status that flips
/// after the snapshot was taken is not reflected, so pollers must reload and
/// ask again rather than treat one answer as final.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    /// Opaque session identifier
    pub session_id: String,
    /// Canonical serialized lookup parameters
    pub params: String,
    pub subject_id: SubjectId,
    pub origin_id: Option<OriginId>,
    pub created_at: DateTime<Utc>,
    /// One record per service considered, in creation order
    #[serde(default)]
    pub dispatches: Vec<DispatchStatus>,
    /// Every response, tagged or not, in creation order
    #[serde(default)]
    pub responses: Vec<Response>,
    /// Response/tag join rows in insertion order
    #[serde(default)]
    pub tags: Vec<ResponseTag>,
}

impl Request {
    pub fn new(
        session_id: impl Into<String>,
        params: impl Into<String>,
        subject_id: SubjectId,
        origin_id: Option<OriginId>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            session_id: session_id.into(),
            params: params.into(),
            subject_id,
            origin_id,
            created_at: Utc::now(),
            dispatches: Vec::new(),
            responses: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// The status record for a service, if it has been considered
    pub fn dispatch_status(&self, service_id: &str) -> Option<&DispatchStatus> {
        self.dispatches.iter().find(|d| d.service_id == service_id)
    }

    /// Services that are queued or running
    pub fn services_in_progress(&self) -> Vec<&str> {
        self.dispatches
            .iter()
            .filter(|d| d.state.is_in_progress())
            .map(|d| d.service_id.as_str())
            .collect()
    }

    pub fn any_in_progress(&self) -> bool {
        !self.services_in_progress().is_empty()
    }

    /// Services that failed, with the kind of failure
    pub fn failed_dispatches(&self) -> Vec<(&str, DispatchState)> {
        self.dispatches
            .iter()
            .filter(|d| d.state.is_failure())
            .map(|d| (d.service_id.as_str(), d.state))
            .collect()
    }

    /// Direct lookup of a response, tagged or not
    pub fn response(&self, id: &ResponseId) -> Option<&Response> {
        self.responses.iter().find(|r| &r.id == id)
    }

    /// Responses carrying `tag`, in the order they were tagged
    pub fn responses_by_type(&self, tag: impl Into<TypeTag>) -> Vec<&Response> {
        let tag = tag.into();
        self.tags
            .iter()
            .filter(|t| t.tag == tag)
            .filter_map(|t| self.response(&t.response_id))
            .collect()
    }

    /// Whether any queued or running service is capable of producing `tag`
    pub fn is_type_in_progress(
        &self,
        tag: impl Into<TypeTag>,
        capabilities: &dyn Capabilities,
    ) -> bool {
        let tag = tag.into();
        self.services_in_progress()
            .into_iter()
            .any(|service| capabilities.produces(service, &tag))
    }
}
