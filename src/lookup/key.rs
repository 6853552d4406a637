//! Canonical keys: the comparable form of a lookup's parameters
//!
//! Two lookups with the same semantic parameters must produce byte-identical
//! keys whatever order their parameters arrived in, so that a reload in the
//! same session finds the request it already made.

use super::params::{LookupParams, ParamValue};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Parameter injected into rebuilt parameters to point back at a request
pub const REQUEST_ID_PARAM: &str = "openlink.request_id";

/// Control parameters that never take part in a canonical key
pub const DEFAULT_EXCLUDED_PARAMS: [&str; 3] = ["action", "controller", REQUEST_ID_PARAM];

/// Serializes lookup parameters into a canonical key.
///
/// The key is a compact JSON array of single-entry objects, one per
/// parameter, sorted by parameter name:
///
/// ```
/// use openlink::lookup::{params_from_pairs, KeyBuilder};
///
/// let params = params_from_pairs([("title", "X"), ("controller", "resolve")]);
/// assert_eq!(KeyBuilder::new().encode(&params), r#"[{"title":"X"}]"#);
/// ```
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    excluded: BTreeSet<String>,
}

impl KeyBuilder {
    /// Builder excluding only the default control parameters
    pub fn new() -> Self {
        Self {
            excluded: DEFAULT_EXCLUDED_PARAMS.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Exclude further parameters. The defaults always stay excluded.
    pub fn with_excluded<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn is_excluded(&self, key: &str) -> bool {
        self.excluded.contains(key)
    }

    /// Canonical key for `params`
    pub fn encode(&self, params: &LookupParams) -> String {
        let sorted: BTreeMap<&str, &ParamValue> = params
            .iter()
            .filter(|(key, _)| !self.is_excluded(key))
            .map(|(key, value)| (key.as_str(), value))
            .collect();

        let entries = sorted
            .into_iter()
            .map(|(key, value)| {
                let mut entry = Map::new();
                entry.insert(key.to_string(), param_to_json(value));
                Value::Object(entry)
            })
            .collect();

        Value::Array(entries).to_string()
    }

    /// Rebuild the parameters a canonical key was made from
    pub fn decode(key: &str) -> Result<LookupParams, serde_json::Error> {
        let entries: Vec<LookupParams> = serde_json::from_str(key)?;
        Ok(entries.into_iter().flatten().collect())
    }

    /// Rebuild parameters and point them back at `request_id`.
    ///
    /// The injected parameter is excluded from keys, so encoding the result
    /// gives back the original key.
    pub fn decode_with_request_id(
        key: &str,
        request_id: &str,
    ) -> Result<LookupParams, serde_json::Error> {
        let mut params = Self::decode(key)?;
        params.insert(REQUEST_ID_PARAM.to_string(), ParamValue::from(request_id));
        Ok(params)
    }
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn param_to_json(value: &ParamValue) -> Value {
    match value {
        ParamValue::Single(v) => Value::String(v.clone()),
        ParamValue::Multi(vs) => Value::Array(vs.iter().cloned().map(Value::String).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::params_from_pairs;

    #[test]
    fn key_ignores_input_order() {
        let builder = KeyBuilder::new();
        let a = params_from_pairs([("rft.jtitle", "Nature"), ("rft.volume", "1"), ("rft.issue", "2")]);
        let b = params_from_pairs([("rft.issue", "2"), ("rft.jtitle", "Nature"), ("rft.volume", "1")]);

        assert_eq!(builder.encode(&a), builder.encode(&b));
    }

    #[test]
    fn key_is_sorted_single_entry_pairs() {
        let params = params_from_pairs([("b", "2"), ("a", "1")]);
        assert_eq!(KeyBuilder::new().encode(&params), r#"[{"a":"1"},{"b":"2"}]"#);
    }

    #[test]
    fn excluded_keys_never_change_the_key() {
        let builder = KeyBuilder::new();
        let plain = params_from_pairs([("title", "X")]);
        let base = builder.encode(&plain);

        for excluded in DEFAULT_EXCLUDED_PARAMS {
            for value in ["", "index", "something else"] {
                let mut params = plain.clone();
                params.insert(excluded.to_string(), ParamValue::from(value));
                assert_eq!(builder.encode(&params), base, "{} = {:?}", excluded, value);
            }
        }
    }

    #[test]
    fn configured_exclusions_add_to_defaults() {
        let builder = KeyBuilder::new().with_excluded(["utm_source"]);
        let params = params_from_pairs([("title", "X"), ("utm_source", "mail"), ("action", "index")]);

        assert_eq!(builder.encode(&params), r#"[{"title":"X"}]"#);
        assert!(builder.is_excluded("controller"));
    }

    #[test]
    fn values_differ_keys_differ() {
        let builder = KeyBuilder::new();
        let a = params_from_pairs([("title", "X")]);
        let b = params_from_pairs([("title", "Y")]);
        assert_ne!(builder.encode(&a), builder.encode(&b));
    }

    #[test]
    fn list_order_is_significant() {
        let builder = KeyBuilder::new();
        let a = params_from_pairs([("rft_id", "a"), ("rft_id", "b")]);
        let b = params_from_pairs([("rft_id", "b"), ("rft_id", "a")]);
        assert_ne!(builder.encode(&a), builder.encode(&b));
    }

    #[test]
    fn decode_restores_kept_params() {
        let builder = KeyBuilder::new();
        let params = params_from_pairs([
            ("rft.jtitle", "Nature"),
            ("rft_id", "info:doi/10.1038/1"),
            ("rft_id", "info:pmid/1"),
            ("controller", "resolve"),
        ]);
        let key = builder.encode(&params);

        let decoded = KeyBuilder::decode(&key).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded["rft.jtitle"], ParamValue::from("Nature"));
        assert_eq!(decoded["rft_id"].values(), vec!["info:doi/10.1038/1", "info:pmid/1"]);
    }

    #[test]
    fn injected_request_id_keeps_key_stable() {
        let builder = KeyBuilder::new();
        let key = builder.encode(&params_from_pairs([("title", "X")]));

        let decoded = KeyBuilder::decode_with_request_id(&key, "req-1").unwrap();
        assert_eq!(decoded[REQUEST_ID_PARAM], ParamValue::from("req-1"));
        assert_eq!(builder.encode(&decoded), key);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(KeyBuilder::decode("not json").is_err());
    }
}
