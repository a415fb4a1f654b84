//! Declarative operation descriptors.
//!
//! An [`OperationDescriptor`] captures everything needed to turn runtime arguments into a
//! wire request and a raw response back into a value: HTTP method, path template, media
//! types, an optional payload template, the extraction rule, and the fallback policy.
//! Descriptors are validated once when built and shared read-only afterwards.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;

use crate::error::{Error, Result};
use crate::fallback::FallbackPolicy;

/// Media type tag used for `Accept` and `Content-Type` headers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// `application/json`
    Json,
    /// `application/octet-stream`
    OctetStream,
    /// `*/*`
    Any,
    /// Provider specific media type, e.g. `application/vnd.vmware.vcloud.task+json`
    Vendor(String),
}

impl MediaType {
    /// Returns the media type as a header value string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Json => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Any => "*/*",
            Self::Vendor(value) => value,
        }
    }

    /// Whether bodies of this type can be parsed into an addressable tree.
    #[must_use]
    pub fn supports_subtree(&self) -> bool {
        match self {
            Self::Json => true,
            Self::Vendor(value) => value.split(';').next().unwrap_or_default().ends_with("+json"),
            Self::OctetStream | Self::Any => false,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule applied to a successful response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionRule {
    /// The whole structured body
    WholeBody,
    /// The subtree reached by following the given keys
    NamedSubtree(Vec<String>),
    /// A boolean leaf reached by following the given keys
    BooleanFromNestedField(Vec<String>),
    /// The body bytes, unparsed
    Raw,
    /// Nothing; the body is never read
    Ignore,
}

impl ExtractionRule {
    /// Subtree selection from a dotted path such as `"connectionThrottle"`.
    #[must_use]
    pub fn subtree(path: &str) -> Self {
        Self::NamedSubtree(split_path(path))
    }

    /// Nested boolean selection from a dotted path such as `"connectionLogging.enabled"`.
    #[must_use]
    pub fn nested_bool(path: &str) -> Self {
        Self::BooleanFromNestedField(split_path(path))
    }

    /// Whether this rule needs the body parsed into structured data.
    #[must_use]
    pub const fn needs_tree(&self) -> bool {
        matches!(self, Self::NamedSubtree(_) | Self::BooleanFromNestedField(_))
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Placeholder(String),
}

/// Text with `{name}` placeholders.
///
/// Path templates are parsed strictly: every `{` must open a well-formed placeholder.
/// Payload templates are parsed leniently so literal JSON braces survive; only
/// `{identifier}` sequences are treated as placeholders there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    raw: String,
    pieces: Vec<Piece>,
}

impl Template {
    /// Parse a path template.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDescriptor`] on an empty, unterminated, or stray placeholder.
    pub fn path(raw: &str) -> Result<Self> {
        Self::parse(raw, true)
    }

    /// Parse a payload template.
    ///
    /// # Errors
    ///
    /// Never fails for lenient templates; the signature matches [`Template::path`].
    pub fn payload(raw: &str) -> Result<Self> {
        Self::parse(raw, false)
    }

    fn parse(raw: &str, strict: bool) -> Result<Self> {
        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut rest = raw;

        while let Some(ch) = rest.chars().next() {
            match ch {
                '{' => match placeholder_at(rest) {
                    Some((name, consumed)) => {
                        if !literal.is_empty() {
                            pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                        }
                        pieces.push(Piece::Placeholder(name.to_string()));
                        rest = &rest[consumed..];
                    }
                    None if strict => {
                        return Err(Error::InvalidDescriptor(format!(
                            "malformed placeholder in template `{raw}`"
                        )));
                    }
                    None => {
                        literal.push(ch);
                        rest = &rest[1..];
                    }
                },
                '}' if strict => {
                    return Err(Error::InvalidDescriptor(format!(
                        "unbalanced `}}` in template `{raw}`"
                    )));
                }
                _ => {
                    literal.push(ch);
                    rest = &rest[ch.len_utf8()..];
                }
            }
        }

        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }

        Ok(Self {
            raw: raw.to_string(),
            pieces,
        })
    }

    /// The template text as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Placeholder names in order of appearance.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.pieces.iter().filter_map(|piece| match piece {
            Piece::Placeholder(name) => Some(name.as_str()),
            Piece::Literal(_) => None,
        })
    }

    /// Render the template, resolving each placeholder through `resolve`.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `resolve`.
    pub fn render<F>(&self, mut resolve: F) -> Result<String>
    where
        F: FnMut(&str) -> Result<String>,
    {
        let mut out = String::with_capacity(self.raw.len());
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Placeholder(name) => out.push_str(&resolve(name)?),
            }
        }
        Ok(out)
    }
}

/// Returns the placeholder name and the number of bytes consumed, if `input` starts with one.
fn placeholder_at(input: &str) -> Option<(&str, usize)> {
    let body = input.strip_prefix('{')?;
    let end = body.find('}')?;
    let name = &body[..end];
    let mut chars = name.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return None;
    }
    Some((name, end + 2))
}

/// Request body specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Static text with optional `{name}` placeholders filled from arguments
    Template(Template),
    /// The argument body wrapped in a single-key object
    WrapWith(String),
    /// The argument body sent as-is
    Body,
}

/// Immutable description of one API operation.
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    name: String,
    method: Method,
    path: Template,
    params: Vec<String>,
    query: Vec<(String, String)>,
    headers: Vec<(HeaderName, HeaderValue)>,
    consumes: Option<MediaType>,
    produces: Option<MediaType>,
    payload: Option<Payload>,
    extraction: ExtractionRule,
    fallback: FallbackPolicy,
    timeout: Option<Duration>,
}

impl OperationDescriptor {
    /// Start building a descriptor.
    #[must_use]
    pub fn builder(
        name: impl Into<String>,
        method: Method,
        path: impl Into<String>,
    ) -> DescriptorBuilder {
        DescriptorBuilder::new(name, method, path)
    }

    /// Logical operation name, e.g. `connectionthrottle:get`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// HTTP method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Path template.
    #[must_use]
    pub const fn path(&self) -> &Template {
        &self.path
    }

    /// Declared argument names.
    #[must_use]
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Static query pairs.
    #[must_use]
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Static headers.
    #[must_use]
    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    /// Media type accepted from the server.
    #[must_use]
    pub const fn consumes(&self) -> Option<&MediaType> {
        self.consumes.as_ref()
    }

    /// Media type of the request body.
    #[must_use]
    pub const fn produces(&self) -> Option<&MediaType> {
        self.produces.as_ref()
    }

    /// Request body specification.
    #[must_use]
    pub const fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// Extraction rule for successful responses.
    #[must_use]
    pub const fn extraction(&self) -> &ExtractionRule {
        &self.extraction
    }

    /// Fallback policy for failed responses.
    #[must_use]
    pub const fn fallback(&self) -> &FallbackPolicy {
        &self.fallback
    }

    /// Per-request timeout override.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[derive(Debug, Clone)]
enum PayloadSpec {
    Template(String),
    WrapWith(String),
    Body,
}

/// Builder for [`OperationDescriptor`].
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    name: String,
    method: Method,
    path: String,
    params: Vec<String>,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    consumes: Option<MediaType>,
    produces: Option<MediaType>,
    payload: Option<PayloadSpec>,
    extraction: ExtractionRule,
    fallback: FallbackPolicy,
    timeout: Option<Duration>,
}

impl DescriptorBuilder {
    fn new(name: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method,
            path: path.into(),
            params: Vec::new(),
            query: Vec::new(),
            headers: Vec::new(),
            consumes: None,
            produces: None,
            payload: None,
            extraction: ExtractionRule::WholeBody,
            fallback: FallbackPolicy::propagate(),
            timeout: None,
        }
    }

    /// Declare an argument used by the path or payload template.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(name.into());
        self
    }

    /// Add a static query pair.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a static header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Media type accepted from the server (`Accept`).
    #[must_use]
    pub fn consumes(mut self, media: MediaType) -> Self {
        self.consumes = Some(media);
        self
    }

    /// Media type of the request body (`Content-Type`).
    #[must_use]
    pub fn produces(mut self, media: MediaType) -> Self {
        self.produces = Some(media);
        self
    }

    /// Static payload template.
    #[must_use]
    pub fn payload(mut self, template: impl Into<String>) -> Self {
        self.payload = Some(PayloadSpec::Template(template.into()));
        self
    }

    /// Wrap the argument body under `key`.
    #[must_use]
    pub fn wrap_with(mut self, key: impl Into<String>) -> Self {
        self.payload = Some(PayloadSpec::WrapWith(key.into()));
        self
    }

    /// Send the argument body unchanged.
    #[must_use]
    pub fn body(mut self) -> Self {
        self.payload = Some(PayloadSpec::Body);
        self
    }

    /// Set the extraction rule.
    #[must_use]
    pub fn extract(mut self, rule: ExtractionRule) -> Self {
        self.extraction = rule;
        self
    }

    /// Shorthand for [`ExtractionRule::subtree`].
    #[must_use]
    pub fn select(self, path: &str) -> Self {
        self.extract(ExtractionRule::subtree(path))
    }

    /// Set the fallback policy.
    #[must_use]
    pub fn fallback(mut self, policy: FallbackPolicy) -> Self {
        self.fallback = policy;
        self
    }

    /// Override the request timeout for this operation.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Validate and build the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDescriptor`] when placeholders and declared parameters
    /// disagree, a template or header is malformed, or a tree extraction is paired
    /// with a media type that cannot be addressed.
    pub fn build(self) -> Result<OperationDescriptor> {
        let name = self.name;
        let path = Template::path(&self.path)
            .map_err(|err| Error::InvalidDescriptor(format!("`{name}`: {err}")))?;

        let payload = match self.payload {
            None => None,
            Some(PayloadSpec::Template(text)) => Some(Payload::Template(Template::payload(&text)?)),
            Some(PayloadSpec::WrapWith(key)) if key.is_empty() => {
                return Err(Error::InvalidDescriptor(format!(
                    "`{name}`: wrapper key must not be empty"
                )));
            }
            Some(PayloadSpec::WrapWith(key)) => Some(Payload::WrapWith(key)),
            Some(PayloadSpec::Body) => Some(Payload::Body),
        };

        let mut declared = BTreeSet::new();
        for param in &self.params {
            if !declared.insert(param.as_str()) {
                return Err(Error::InvalidDescriptor(format!(
                    "`{name}`: parameter `{param}` declared twice"
                )));
            }
        }

        let mut used: BTreeSet<&str> = path.placeholders().collect();
        if let Some(Payload::Template(template)) = &payload {
            used.extend(template.placeholders());
        }

        if let Some(missing) = used.difference(&declared).next() {
            return Err(Error::InvalidDescriptor(format!(
                "`{name}`: placeholder `{missing}` has no declared parameter"
            )));
        }
        if let Some(unused) = declared.difference(&used).next() {
            return Err(Error::InvalidDescriptor(format!(
                "`{name}`: parameter `{unused}` does not appear in the path or payload"
            )));
        }

        if self.extraction.needs_tree()
            && !self.consumes.as_ref().is_some_and(MediaType::supports_subtree)
        {
            return Err(Error::InvalidDescriptor(format!(
                "`{name}`: subtree extraction requires a structured media type"
            )));
        }

        let headers = self
            .headers
            .into_iter()
            .map(|(key, value)| {
                let header = HeaderName::from_bytes(key.as_bytes()).map_err(|err| {
                    Error::InvalidDescriptor(format!("`{name}`: invalid header `{key}`: {err}"))
                })?;
                let value = HeaderValue::from_str(&value).map_err(|err| {
                    Error::InvalidDescriptor(format!("`{name}`: invalid value for `{key}`: {err}"))
                })?;
                Ok((header, value))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(OperationDescriptor {
            name,
            method: self.method,
            path,
            params: self.params,
            query: self.query,
            headers,
            consumes: self.consumes,
            produces: self.produces,
            payload,
            extraction: self.extraction,
            fallback: self.fallback,
            timeout: self.timeout,
        })
    }
}
