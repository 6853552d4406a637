//! Per-service dispatch status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Progress of one service for one request.
///
/// No transition table is enforced: a service is the sole source of truth
/// about its own progress, so any state may replace any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    /// Enumerated for background work, not started yet
    Queued,
    InProgress,
    Successful,
    /// Transient failure (timeout, temporary unavailability); worth retrying
    FailedTemporary,
    /// Permanent failure for this request; never retried automatically
    FailedFatal,
}

impl DispatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Successful => "successful",
            Self::FailedTemporary => "failed_temporary",
            Self::FailedFatal => "failed_fatal",
        }
    }

    /// Queued or running
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Queued | Self::InProgress)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::FailedTemporary | Self::FailedFatal)
    }

    /// Whether a service in this state may be invoked (again).
    ///
    /// Queued work has not run yet and temporary failures are retried;
    /// everything else is running or finished.
    pub fn permits_dispatch(&self) -> bool {
        matches!(self, Self::Queued | Self::FailedTemporary)
    }
}

impl std::fmt::Display for DispatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DispatchState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "in_progress" => Ok(Self::InProgress),
            "successful" => Ok(Self::Successful),
            "failed_temporary" => Ok(Self::FailedTemporary),
            "failed_fatal" => Ok(Self::FailedFatal),
            other => Err(format!("unknown dispatch state: {}", other)),
        }
    }
}

/// The status record of one (request, service) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchStatus {
    pub service_id: String,
    pub state: DispatchState,
    /// Detail of the last failure, if any
    pub error_detail: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DispatchStatus {
    pub fn new(service_id: impl Into<String>, state: DispatchState) -> Self {
        Self {
            service_id: service_id.into(),
            state,
            error_detail: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_error(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }
}
