//! Snapshot query and serialization tests

use super::*;
use serde_json::{json, Value};
use std::collections::HashMap;

struct StaticCapabilities(HashMap<&'static str, Vec<TypeTag>>);

impl Capabilities for StaticCapabilities {
    fn produces(&self, service_id: &str, tag: &TypeTag) -> bool {
        self.0.get(service_id).map(|tags| tags.contains(tag)).unwrap_or(false)
    }
}

fn request_with(dispatches: &[(&str, DispatchState)]) -> Request {
    let mut request = Request::new("s1", "[]", SubjectId::new(), None);
    for (service, state) in dispatches {
        request.dispatches.push(DispatchStatus::new(*service, *state));
    }
    request
}

fn tagged(request: &mut Request, service: &str, url: &str, tags: &[&str]) -> ResponseId {
    let response = Response::new(request.id.clone(), service, ResponseData::new().with_url(url));
    let id = response.id.clone();
    request.responses.push(response);
    for tag in tags {
        request.tags.push(ResponseTag {
            response_id: id.clone(),
            tag: TypeTag::from(*tag),
        });
    }
    id
}

#[test]
fn services_in_progress_covers_queued_and_running() {
    let request = request_with(&[
        ("a", DispatchState::Queued),
        ("b", DispatchState::InProgress),
        ("c", DispatchState::Successful),
        ("d", DispatchState::FailedTemporary),
    ]);

    assert_eq!(request.services_in_progress(), vec!["a", "b"]);
    assert!(request.any_in_progress());
}

#[test]
fn finished_request_has_nothing_in_progress() {
    let request = request_with(&[
        ("a", DispatchState::Successful),
        ("b", DispatchState::FailedFatal),
    ]);
    assert!(!request.any_in_progress());
    assert_eq!(request.failed_dispatches(), vec![("b", DispatchState::FailedFatal)]);
}

#[test]
fn responses_by_type_follows_tag_order() {
    let mut request = request_with(&[]);
    let first = tagged(&mut request, "p", "http://a", &["fulltext"]);
    let _toc = tagged(&mut request, "p", "http://b", &["table_of_contents"]);
    let second = tagged(&mut request, "q", "http://c", &["fulltext", "abstract"]);

    let fulltext: Vec<_> = request
        .responses_by_type(TypeTag::Fulltext)
        .into_iter()
        .map(|r| r.id.clone())
        .collect();
    assert_eq!(fulltext, vec![first, second.clone()]);

    let abstracts = request.responses_by_type("abstract");
    assert_eq!(abstracts.len(), 1);
    assert_eq!(abstracts[0].id, second);
}

#[test]
fn untagged_response_only_reachable_directly() {
    let mut request = request_with(&[]);
    let id = tagged(&mut request, "p", "http://a", &[]);

    assert!(request.response(&id).is_some());
    assert!(request.responses_by_type("fulltext").is_empty());
    assert!(request.responses_by_type("holding").is_empty());
}

#[test]
fn type_in_progress_uses_declared_capabilities() {
    let capabilities = StaticCapabilities(HashMap::from([
        ("catalog", vec![TypeTag::Holding]),
        ("resolver", vec![TypeTag::Fulltext, TypeTag::TableOfContents]),
    ]));
    let request = request_with(&[
        ("catalog", DispatchState::InProgress),
        ("resolver", DispatchState::Successful),
    ]);

    assert!(request.is_type_in_progress("holding", &capabilities));
    assert!(!request.is_type_in_progress(TypeTag::Fulltext, &capabilities));
}

#[test]
fn subject_enrichment_never_overwrites() {
    let mut subject = Subject::new("journal").with_metadata("jtitle", "Nature");

    assert!(!subject.enrich("jtitle", "Something Else"));
    assert_eq!(subject.get("jtitle"), Some("Nature"));

    assert!(subject.enrich("issn", "0028-0836"));
    assert_eq!(subject.get("issn"), Some("0028-0836"));
}

#[test]
fn item_identifiers_define_identity() {
    let a = Subject::new("journal")
        .with_identifier("info:doi/10.1038/35079151")
        .with_identifier("urn:issn:0028-0836")
        .with_metadata("volume", "411");
    let b = Subject::new("journal")
        .with_identifier("info:doi/10.1038/35079151")
        .with_metadata("atitle", "Initial sequencing");
    assert_eq!(a.identity_key(), b.identity_key());

    let c = Subject::new("journal").with_metadata("jtitle", "Nature");
    let d = Subject::new("book").with_metadata("jtitle", "Nature");
    assert_ne!(c.identity_key(), d.identity_key());
}

#[test]
fn container_identifiers_need_citation_metadata() {
    let volume = |v: &str| {
        Subject::new("journal")
            .with_identifier("urn:issn:0028-0836")
            .with_metadata("issn", "0028-0836")
            .with_metadata("volume", v)
    };
    assert_eq!(volume("1").identity_key(), volume("1").identity_key());
    assert_ne!(volume("1").identity_key(), volume("2").identity_key());

    let other_journal = Subject::new("journal")
        .with_identifier("urn:issn:1234-5678")
        .with_metadata("volume", "1");
    let bare = Subject::new("journal").with_metadata("volume", "1");
    assert_ne!(other_journal.identity_key(), bare.identity_key());
}

#[test]
fn dispatch_state_round_trips_through_str() {
    for state in [
        DispatchState::Queued,
        DispatchState::InProgress,
        DispatchState::Successful,
        DispatchState::FailedTemporary,
        DispatchState::FailedFatal,
    ] {
        assert_eq!(state.as_str().parse::<DispatchState>(), Ok(state));
    }
    assert!("done".parse::<DispatchState>().is_err());
}

#[test]
fn type_tag_serializes_as_name() {
    let value = serde_json::to_value(TypeTag::TableOfContents).unwrap();
    assert_eq!(value, json!("table_of_contents"));

    let tag: TypeTag = serde_json::from_value(json!("excerpts")).unwrap();
    assert_eq!(tag, TypeTag::Other("excerpts".to_string()));
}

#[test]
fn response_serializes_flat() {
    let response = Response::new(
        RequestId::from("req-1"),
        "resolver",
        ResponseData::new()
            .with_display_text("Publisher site")
            .with_url("http://example.org/article"),
    );
    let value: Value = serde_json::to_value(&response).unwrap();

    assert_eq!(value["request_id"], json!("req-1"));
    assert_eq!(value["display_text"], json!("Publisher site"));
    assert_eq!(value["url"], json!("http://example.org/article"));
    assert_eq!(value["notes"], Value::Null);
}
