//! Per-request write side: dispatch status records and responses
//!
//! The read side (what is in progress, what failed, responses by tag) lives
//! on the `Request` snapshot.

mod aggregator;
mod dispatch;

pub use aggregator::{ResponseAggregator, ResponseError};
pub use dispatch::DispatchTracker;
