//! Core resolution data structures

mod dispatch;
mod ids;
mod request;
mod response;
mod subject;

#[cfg(test)]
mod tests;

pub use dispatch::{DispatchState, DispatchStatus};
pub use ids::{OriginId, RequestId, ResponseId, SubjectId};
pub use request::Request;
pub use response::{Capabilities, Response, ResponseData, ResponseTag, TypeTag};
pub use subject::{Origin, Subject, DEFAULT_FORMAT};
