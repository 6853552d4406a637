//! Registry of configured services and their declared capabilities

use super::traits::Service;
use crate::model::{Capabilities, TypeTag};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Whether a dispatch waits for the service before returning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Run and awaited during dispatch
    #[default]
    Foreground,
    /// Queued during dispatch, run afterwards without blocking the caller
    Background,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Foreground => "foreground",
            Self::Background => "background",
        }
    }
}

/// A service and the tier it runs in
#[derive(Clone)]
pub struct Registration {
    pub service: Arc<dyn Service>,
    pub tier: Tier,
}

/// The static list of services a request is fanned out to.
///
/// Services are deduplicated by `id()`; the first registration wins.
/// Registration order is dispatch order.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: Vec<Registration>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service. Returns false if the id is already taken.
    pub fn register(&mut self, service: Arc<dyn Service>, tier: Tier) -> bool {
        if self.get(service.id()).is_some() {
            tracing::warn!(service = service.id(), "duplicate service id ignored");
            return false;
        }
        self.services.push(Registration { service, tier });
        true
    }

    /// Builder form of `register`
    pub fn with(mut self, service: Arc<dyn Service>, tier: Tier) -> Self {
        self.register(service, tier);
        self
    }

    pub fn get(&self, id: &str) -> Option<&Registration> {
        self.services.iter().find(|r| r.service.id() == id)
    }

    pub fn services(&self) -> &[Registration] {
        &self.services
    }

    /// Services of one tier, in registration order
    pub fn tier(&self, tier: Tier) -> impl Iterator<Item = &Registration> {
        self.services.iter().filter(move |r| r.tier == tier)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl Capabilities for ServiceRegistry {
    fn produces(&self, service_id: &str, tag: &TypeTag) -> bool {
        self.get(service_id)
            .map(|r| r.service.type_tags().contains(tag))
            .unwrap_or(false)
    }
}
