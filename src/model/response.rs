//! Responses contributed by services and the tags that classify them

use super::ids::{RequestId, ResponseId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Semantic category a response satisfies.
///
/// Accepts its string name anywhere a tag is expected: `"fulltext"` and
/// `TypeTag::Fulltext` are the same tag. Unknown names are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TypeTag {
    Fulltext,
    Holding,
    TableOfContents,
    Abstract,
    CoverImage,
    HighlightedLink,
    Other(String),
}

impl TypeTag {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Fulltext => "fulltext",
            Self::Holding => "holding",
            Self::TableOfContents => "table_of_contents",
            Self::Abstract => "abstract",
            Self::CoverImage => "cover_image",
            Self::HighlightedLink => "highlighted_link",
            Self::Other(name) => name,
        }
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for TypeTag {
    fn from(s: &str) -> Self {
        match s {
            "fulltext" => Self::Fulltext,
            "holding" => Self::Holding,
            "table_of_contents" => Self::TableOfContents,
            "abstract" => Self::Abstract,
            "cover_image" => Self::CoverImage,
            "highlighted_link" => Self::HighlightedLink,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for TypeTag {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<&TypeTag> for TypeTag {
    fn from(tag: &TypeTag) -> Self {
        tag.clone()
    }
}

impl From<TypeTag> for String {
    fn from(tag: TypeTag) -> Self {
        tag.as_str().to_string()
    }
}

/// Lookup of the tags each service declares it can produce
pub trait Capabilities {
    /// Whether `service_id` is capable of producing responses tagged `tag`
    fn produces(&self, service_id: &str, tag: &TypeTag) -> bool;
}

/// The fields a service fills in for one response.
///
/// `value_text` is an opaque blob whose shape only the producing service
/// knows; the core stores and returns it untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseData {
    /// Service-defined short key, e.g. an external record id
    pub key: Option<String>,
    pub display_text: Option<String>,
    pub url: Option<String>,
    pub notes: Option<String>,
    pub value_string: Option<String>,
    pub value_alt_string: Option<String>,
    pub value_text: Option<String>,
}

impl ResponseData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_display_text(mut self, text: impl Into<String>) -> Self {
        self.display_text = Some(text.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_value_string(mut self, value: impl Into<String>) -> Self {
        self.value_string = Some(value.into());
        self
    }

    pub fn with_value_alt_string(mut self, value: impl Into<String>) -> Self {
        self.value_alt_string = Some(value.into());
        self
    }

    pub fn with_value_text(mut self, value: impl Into<String>) -> Self {
        self.value_text = Some(value.into());
        self
    }

    /// True if no field is set
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// One unit of result contributed by a service. Immutable once saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: ResponseId,
    pub request_id: RequestId,
    pub service_id: String,
    #[serde(flatten)]
    pub data: ResponseData,
    pub created_at: DateTime<Utc>,
}

impl Response {
    pub fn new(request_id: RequestId, service_id: impl Into<String>, data: ResponseData) -> Self {
        Self {
            id: ResponseId::new(),
            request_id,
            service_id: service_id.into(),
            data,
            created_at: Utc::now(),
        }
    }
}

/// A row of the response/tag join
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseTag {
    pub response_id: ResponseId,
    pub tag: TypeTag,
}
