//! Services: the backends a request is fanned out to, and the dispatcher
//! that runs them.

mod context;
mod dispatcher;
mod link_template;
mod registry;
mod traits;

pub use context::ServiceContext;
pub use dispatcher::{DispatchReport, Dispatched, Dispatcher, DEFAULT_TIMEOUT};
pub use link_template::{LinkTemplateService, LinkTemplateSpec};
pub use registry::{Registration, ServiceRegistry, Tier};
pub use traits::{Service, ServiceError};
