//! Raw lookup parameters

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Value of one lookup parameter.
///
/// Repeated query parameters (several `rft_id`s) arrive as a list whose order
/// is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Single(String),
    Multi(Vec<String>),
}

impl ParamValue {
    /// All values, in order
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::Single(v) => vec![v.as_str()],
            Self::Multi(vs) => vs.iter().map(String::as_str).collect(),
        }
    }

    /// The first non-blank value
    pub fn first(&self) -> Option<&str> {
        self.values().into_iter().map(str::trim).find(|v| !v.is_empty())
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        Self::Single(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        Self::Single(s)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(vs: Vec<String>) -> Self {
        Self::Multi(vs)
    }
}

/// Raw lookup parameters, as received
pub type LookupParams = HashMap<String, ParamValue>;

/// Build parameters from `key=value` pairs, merging repeated keys into a list
pub fn params_from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> LookupParams
where
    K: Into<String>,
    V: Into<String>,
{
    let mut params = LookupParams::new();
    for (key, value) in pairs {
        let value = value.into();
        params
            .entry(key.into())
            .and_modify(|existing| {
                let mut values: Vec<String> =
                    existing.values().into_iter().map(str::to_string).collect();
                values.push(value.clone());
                *existing = ParamValue::Multi(values);
            })
            .or_insert_with(|| ParamValue::Single(value.clone()));
    }
    params
}
