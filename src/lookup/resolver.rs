//! Subject resolution: from raw lookup parameters to canonical entities
//!
//! Parameters follow OpenURL conventions. Both the 1.0 key/value form
//! (`rft.jtitle`, `rft_id`, `rfr_id`) and the older 0.1 form (`title`, `id`,
//! `sid`) are understood.

use super::params::LookupParams;
use super::{LookupError, LookupResult};
use crate::model::{Origin, Subject, DEFAULT_FORMAT};
use crate::storage::{RequestStore, StorageError};
use std::sync::Arc;

/// Metadata fields accepted without the `rft.` prefix
const BARE_FIELDS: [&str; 13] = [
    "title", "atitle", "volume", "issue", "spage", "epage", "date", "aulast", "aufirst", "issn",
    "eissn", "isbn", "genre",
];

/// A resolved subject and, if the lookup named one, its origin
#[derive(Debug, Clone)]
pub struct Resolved {
    pub subject: Subject,
    pub origin: Option<Origin>,
}

/// Finds or creates the subject and origin a lookup refers to.
pub struct SubjectResolver {
    store: Arc<dyn RequestStore>,
}

impl SubjectResolver {
    pub fn new(store: Arc<dyn RequestStore>) -> Self {
        Self { store }
    }

    /// Resolve `params` to a subject and optional origin.
    ///
    /// Creates rows only when no entity with the same identity exists yet.
    pub fn resolve(&self, params: &LookupParams) -> LookupResult<Resolved> {
        let subject = self.find_or_create_subject(subject_from_params(params)?)?;
        let origin = match origin_identifier(params) {
            Some(identifier) => Some(self.find_or_create_origin(identifier)?),
            None => None,
        };
        Ok(Resolved { subject, origin })
    }

    fn find_or_create_subject(&self, candidate: Subject) -> LookupResult<Subject> {
        let identity = candidate.identity_key();
        if let Some(existing) = self.store.find_subject(&identity)? {
            return Ok(existing);
        }
        if self.store.insert_subject(&candidate)? {
            tracing::debug!(subject = %candidate.id, %identity, "created subject");
            return Ok(candidate);
        }
        // Another lookup created the same identity in between
        self.store
            .find_subject(&identity)?
            .ok_or_else(|| StorageError::SubjectNotFound(identity).into())
    }

    fn find_or_create_origin(&self, identifier: &str) -> LookupResult<Origin> {
        if let Some(existing) = self.store.find_origin(identifier)? {
            return Ok(existing);
        }
        let origin = Origin::new(identifier);
        if self.store.insert_origin(&origin)? {
            tracing::debug!(origin = %origin.id, identifier, "created origin");
            return Ok(origin);
        }
        self.store.find_origin(identifier)?.ok_or_else(|| {
            LookupError::Storage(StorageError::InvalidValue(format!(
                "origin vanished after conflict: {}",
                identifier
            )))
        })
    }
}

/// The origin identifier of a lookup, if present and non-blank
pub fn origin_identifier(params: &LookupParams) -> Option<&str> {
    ["rfr_id", "sid"]
        .iter()
        .find_map(|key| params.get(*key).and_then(|v| v.first()))
}

/// Interpret lookup parameters as an (unsaved) subject.
///
/// Fails with `InvalidLookup` if the parameters carry neither a standard
/// identifier nor any metadata.
pub fn subject_from_params(params: &LookupParams) -> LookupResult<Subject> {
    let mut subject = Subject::new(format_from_params(params));

    for (key, value) in params {
        let Some(value) = value.first() else { continue };
        if let Some(field) = key.strip_prefix("rft.") {
            if !field.is_empty() {
                subject.metadata.insert(field.to_string(), value.to_string());
            }
        }
    }
    for field in BARE_FIELDS {
        if subject.metadata.contains_key(field) {
            continue;
        }
        if let Some(value) = params.get(field).and_then(|v| v.first()) {
            subject.metadata.insert(field.to_string(), value.to_string());
        }
    }

    for key in ["rft_id", "id"] {
        if let Some(values) = params.get(key) {
            for value in values.values() {
                if let Some(id) = normalize_uri(value) {
                    subject.identifiers.insert(id);
                }
            }
        }
    }
    for field in ["issn", "eissn"] {
        if let Some(issn) = subject.metadata.get(field) {
            subject.identifiers.insert(format!("urn:issn:{}", issn.to_uppercase()));
        }
    }
    if let Some(isbn) = subject.metadata.get("isbn") {
        let digits: String = isbn.chars().filter(|c| !matches!(c, '-' | ' ')).collect();
        subject.identifiers.insert(format!("urn:isbn:{}", digits.to_uppercase()));
    }

    if subject.is_empty() {
        return Err(LookupError::InvalidLookup(
            "no identifier or citation metadata in lookup".to_string(),
        ));
    }
    Ok(subject)
}

/// Format from `rft_val_fmt` (its last segment), else from `genre`
fn format_from_params(params: &LookupParams) -> String {
    if let Some(fmt) = params.get("rft_val_fmt").and_then(|v| v.first()) {
        if let Some(last) = fmt.rsplit(':').next().filter(|s| !s.is_empty()) {
            return last.to_lowercase();
        }
    }
    let genre = params
        .get("rft.genre")
        .or_else(|| params.get("genre"))
        .and_then(|v| v.first())
        .map(str::to_lowercase);
    match genre.as_deref() {
        Some("book") | Some("bookitem") => "book".to_string(),
        _ => DEFAULT_FORMAT.to_string(),
    }
}

/// Normalize an identifier to URI form; blank values yield nothing
fn normalize_uri(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    for scheme in ["doi", "pmid", "oclcnum", "lccn"] {
        if let Some(rest) = value.strip_prefix(scheme).and_then(|r| r.strip_prefix(':')) {
            return Some(format!("info:{}/{}", scheme, rest.trim()));
        }
    }
    Some(value.to_string())
}
