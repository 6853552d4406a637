//! openlink: citation lookup resolution and service fan-out
//!
//! A lookup (OpenURL-style key/value parameters) is deduplicated per session
//! into a `Request` about a `Subject`. The request is fanned out to a set of
//! independent services whose dispatch status and typed responses are
//! recorded, so that callers can poll for results while slow services are
//! still running.
//!
//! # Core Concepts
//!
//! - **Request**: one deduplicated resolution attempt, keyed by session and
//!   canonical parameters
//! - **Subject**: the cited item, shared between requests
//! - **Dispatch status**: per-service progress (`queued` through `failed_fatal`)
//! - **Response**: a service result tagged with what it satisfies
//!   (`fulltext`, `holding`, …)
//!
//! # Example
//!
//! ```
//! use openlink::{params_from_pairs, KeyBuilder, OpenStore, Resolver, ServiceRegistry, SqliteStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(SqliteStore::open_in_memory().unwrap());
//! let resolver = Resolver::new(store, ServiceRegistry::new(), KeyBuilder::new());
//! let request = resolver
//!     .lookup("session-1", &params_from_pairs([("title", "Origin of Species")]))
//!     .unwrap();
//! assert!(!request.any_in_progress());
//! ```

pub mod api;
pub mod config;
pub mod lookup;
pub mod model;
pub mod service;
pub mod storage;
pub mod tracker;

pub use api::{FailedDispatch, Progress, Resolution, Resolver};
pub use config::{Config, ConfigError};
pub use lookup::{params_from_pairs, KeyBuilder, LookupError, LookupParams, LookupResult};
pub use model::{
    DispatchState, DispatchStatus, Request, RequestId, Response, ResponseData, Subject, TypeTag,
};
pub use service::{
    Dispatcher, LinkTemplateService, Service, ServiceContext, ServiceError, ServiceRegistry, Tier,
};
pub use storage::{OpenStore, RequestStore, SqliteStore, StorageError, StorageResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
