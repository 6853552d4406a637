//! Lookup handling: canonical keys, subject resolution, request registry

mod key;
mod params;
mod registry;
mod resolver;

use crate::storage::StorageError;
use thiserror::Error;

pub use key::{KeyBuilder, DEFAULT_EXCLUDED_PARAMS, REQUEST_ID_PARAM};
pub use params::{params_from_pairs, LookupParams, ParamValue};
pub use registry::RequestRegistry;
pub use resolver::{origin_identifier, subject_from_params, Resolved, SubjectResolver};

/// Errors surfaced to the caller of a lookup
#[derive(Debug, Error)]
pub enum LookupError {
    /// The parameters cannot be interpreted as a lookup; no request was created
    #[error("invalid lookup: {0}")]
    InvalidLookup(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for lookup operations
pub type LookupResult<T> = Result<T, LookupError>;
