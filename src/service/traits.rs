//! Service trait: the contract backend adapters implement
//!
//! A service looks up one request's subject in some external system and
//! reports what it found through its `ServiceContext`.

use super::context::ServiceContext;
use crate::model::TypeTag;
use crate::storage::StorageError;
use crate::tracker::ResponseError;
use async_trait::async_trait;
use thiserror::Error;

/// Failures a service reports instead of setting a failure status itself.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Likely transient (timeout, temporary unavailability); retried later
    #[error("temporary failure: {0}")]
    Temporary(String),

    /// Permanent for this request; never retried automatically
    #[error("fatal failure: {0}")]
    Fatal(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<ResponseError> for ServiceError {
    fn from(err: ResponseError) -> Self {
        match err {
            ResponseError::Storage(e) => Self::Storage(e),
            other => Self::Fatal(other.to_string()),
        }
    }
}

/// The contract services implement.
///
/// The dispatcher only invokes a service after `can_dispatch` allowed it.
/// During `handle` the service adds zero or more responses and then sets a
/// terminal status exactly once, normally `Successful`. Returning an error
/// instead lets the dispatcher record the matching failure status. Returning
/// `Ok(())` without setting any status is a bug in the service; the
/// dispatcher does not detect it.
#[async_trait]
pub trait Service: Send + Sync {
    /// Unique identifier for this service
    fn id(&self) -> &str;

    /// Tags this service is capable of producing
    fn type_tags(&self) -> &[TypeTag];

    /// Look up the request's subject and report through `ctx`
    async fn handle(&self, ctx: &ServiceContext) -> Result<(), ServiceError>;
}
