//! LinkTemplateService: a configuration-driven service
//!
//! Builds one link per request by filling a URL template with subject data.
//! Templates reference the subject via `{field}` for a metadata field,
//! `{format}` for the format tag and `{id:scheme}` for the value of a
//! standard identifier (`{id:doi}`, `{id:issn}`, `{id:isbn}`, …). Values are
//! URL-encoded in the URL and inserted verbatim in the display text.
//!
//! A subject lacking a referenced field is simply not covered by the
//! service: it succeeds without contributing a response.

use super::context::ServiceContext;
use super::registry::Tier;
use super::traits::{Service, ServiceError};
use crate::model::{ResponseData, Subject, TypeTag};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

/// Declarative description of a link template service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkTemplateSpec {
    /// Unique service id
    pub id: String,
    /// Tags the produced link carries
    #[serde(default)]
    pub type_tags: Vec<TypeTag>,
    /// URL template
    pub url: String,
    /// Display text template; defaults to the service id
    #[serde(default)]
    pub display_text: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Metadata fields that must be present besides those the templates use
    #[serde(default)]
    pub requires: Vec<String>,
    /// Formats this service handles; empty means all
    #[serde(default)]
    pub formats: Vec<String>,
    #[serde(default)]
    pub tier: Tier,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Format,
    Field(String),
    Identifier(String),
}

/// A parsed template
#[derive(Debug, Clone, PartialEq)]
struct Template {
    segments: Vec<Segment>,
}

impl Template {
    fn parse(source: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars();

        while let Some(ch) = chars.next() {
            if ch != '{' {
                literal.push(ch);
                continue;
            }
            let mut expr = String::new();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(c) => expr.push(c),
                    None => return Err(format!("unclosed template expression in: {}", source)),
                }
            }
            let expr = expr.trim();
            if expr.is_empty() {
                return Err(format!("empty template expression in: {}", source));
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(match expr.strip_prefix("id:") {
                Some(scheme) => Segment::Identifier(scheme.trim().to_string()),
                None if expr == "format" => Segment::Format,
                None => Segment::Field(expr.to_string()),
            });
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { segments })
    }

    /// Render against `subject`; `None` if a referenced value is missing
    fn render(&self, subject: &Subject, encode: bool) -> Option<String> {
        let mut out = String::new();
        for segment in &self.segments {
            let value = match segment {
                Segment::Literal(text) => {
                    out.push_str(text);
                    continue;
                }
                Segment::Format => subject.format.as_str(),
                Segment::Field(field) => subject.get(field)?,
                Segment::Identifier(scheme) => identifier_value(subject, scheme)?,
            };
            if encode {
                out.extend(form_urlencoded::byte_serialize(value.as_bytes()));
            } else {
                out.push_str(value);
            }
        }
        Some(out)
    }
}

/// Value of the subject's identifier in `scheme`, without its URI prefix
fn identifier_value<'a>(subject: &'a Subject, scheme: &str) -> Option<&'a str> {
    let info = format!("info:{}/", scheme);
    let urn = format!("urn:{}:", scheme);
    subject
        .identifiers
        .iter()
        .find_map(|id| id.strip_prefix(&info).or_else(|| id.strip_prefix(&urn)))
}

/// Service that contributes one templated link per request
pub struct LinkTemplateService {
    spec: LinkTemplateSpec,
    url: Template,
    display_text: Option<Template>,
}

impl LinkTemplateService {
    /// Build the service, rejecting malformed templates
    pub fn new(spec: LinkTemplateSpec) -> Result<Self, String> {
        if spec.id.trim().is_empty() {
            return Err("service id must not be empty".to_string());
        }
        let url = Template::parse(&spec.url)?;
        let display_text = spec.display_text.as_deref().map(Template::parse).transpose()?;
        Ok(Self {
            spec,
            url,
            display_text,
        })
    }

    pub fn spec(&self) -> &LinkTemplateSpec {
        &self.spec
    }

    /// The response this service would contribute for `subject`, if any
    pub fn link_for(&self, subject: &Subject) -> Option<ResponseData> {
        if !self.spec.formats.is_empty() && !self.spec.formats.contains(&subject.format) {
            return None;
        }
        if self.spec.requires.iter().any(|f| subject.get(f).is_none()) {
            return None;
        }

        let url = self.url.render(subject, true)?;
        let display_text = match &self.display_text {
            Some(template) => template.render(subject, false)?,
            None => self.spec.id.clone(),
        };

        let mut data = ResponseData::new()
            .with_key(self.spec.id.clone())
            .with_url(url)
            .with_display_text(display_text);
        data.notes = self.spec.notes.clone();
        Some(data)
    }
}

#[async_trait]
impl Service for LinkTemplateService {
    fn id(&self) -> &str {
        &self.spec.id
    }

    fn type_tags(&self) -> &[TypeTag] {
        &self.spec.type_tags
    }

    async fn handle(&self, ctx: &ServiceContext) -> Result<(), ServiceError> {
        if let Some(data) = self.link_for(ctx.subject()) {
            ctx.add_response(data, &self.spec.type_tags)?;
        }
        ctx.succeed()?;
        Ok(())
    }
}
