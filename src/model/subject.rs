//! Subject (the item being looked up) and Origin (the system that sent the lookup)

use super::ids::{OriginId, SubjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Format assigned when a lookup carries no usable format hint
pub const DEFAULT_FORMAT: &str = "journal";

/// Identifier prefixes naming a journal or book rather than a single item
const CONTAINER_PREFIXES: [&str; 2] = ["urn:issn:", "urn:isbn:"];

fn is_container_identifier(id: &str) -> bool {
    CONTAINER_PREFIXES.iter().any(|prefix| id.starts_with(prefix))
}

/// Canonical description of the thing being looked up.
///
/// Shared by every request that resolves to the same identity. Services may
/// add metadata fields the subject does not have yet; a field that is already
/// present is never replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    /// Format tag, e.g. "journal" or "book"
    pub format: String,
    /// Standard identifiers as URIs (`urn:issn:…`, `info:doi/…`)
    pub identifiers: BTreeSet<String>,
    /// Metadata fields (title, volume, issue, date, …)
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Subject {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            id: SubjectId::new(),
            format: format.into(),
            identifiers: BTreeSet::new(),
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifiers.insert(identifier.into());
        self
    }

    pub fn with_metadata(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(field.into(), value.into());
        self
    }

    /// Look up a metadata field
    pub fn get(&self, field: &str) -> Option<&str> {
        self.metadata.get(field).map(String::as_str)
    }

    /// True if the subject carries neither identifiers nor metadata
    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty() && self.metadata.is_empty()
    }

    /// Key under which two lookups are considered the same subject.
    ///
    /// Item-level identifiers (DOI, PMID, …) identify the subject on their
    /// own. ISSNs and ISBNs name the containing journal or book, so when they
    /// are the only identifiers they are combined with the format and the
    /// full metadata map, as is the metadata of a subject without any
    /// identifiers.
    pub fn identity_key(&self) -> String {
        let (container, item): (Vec<&str>, Vec<&str>) = self
            .identifiers
            .iter()
            .map(String::as_str)
            .partition(|id| is_container_identifier(id));
        if !item.is_empty() {
            return format!("id:{}", item.join("|"));
        }
        let metadata: Map<String, Value> = self
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let container: Vec<Value> = container.into_iter().map(Value::from).collect();
        format!(
            "meta:{}:{}",
            self.format,
            Value::Array(vec![Value::Array(container), Value::Object(metadata)])
        )
    }

    /// Set `field` only if it is not already set. Returns true if it was set.
    pub fn enrich(&mut self, field: impl Into<String>, value: impl Into<String>) -> bool {
        let field = field.into();
        if self.metadata.contains_key(&field) {
            return false;
        }
        self.metadata.insert(field, value.into());
        true
    }
}

/// The system or link that produced a lookup. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub id: OriginId,
    /// Stable identifier, e.g. `info:sid/example.org:catalog`
    pub identifier: String,
    pub created_at: DateTime<Utc>,
}

impl Origin {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            id: OriginId::new(),
            identifier: identifier.into(),
            created_at: Utc::now(),
        }
    }
}
