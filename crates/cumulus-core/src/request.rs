//! Request synthesis.
//!
//! Binds [`Arguments`] to an [`OperationDescriptor`] to produce a [`ConcreteRequest`],
//! then runs the configured [`RequestFilter`]s in declaration order.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::descriptor::{MediaType, OperationDescriptor, Payload};
use crate::error::{Error, Result};

/// Runtime arguments for one invocation.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    values: BTreeMap<String, String>,
    query: Vec<(String, String)>,
    body: Option<Value>,
}

impl Arguments {
    /// Create an empty argument set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a named argument.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Display) -> Self {
        self.values.insert(name.into(), value.to_string());
        self
    }

    /// Append a query pair.
    pub fn push_query<T>(&mut self, key: impl Into<String>, value: T)
    where
        T: Display,
    {
        self.query.push((key.into(), value.to_string()));
    }

    /// Append a query pair when the value is present.
    pub fn push_query_opt<T>(&mut self, key: impl Into<String>, value: Option<T>)
    where
        T: Display,
    {
        if let Some(value) = value {
            self.push_query(key, value);
        }
    }

    /// Attach a serializable body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the body cannot be serialized.
    pub fn with_body<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        let value = serde_json::to_value(body)
            .map_err(|err| Error::InvalidRequest(format!("unserializable body: {err}")))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Look up a named argument.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Query pairs supplied at runtime.
    #[must_use]
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Body supplied at runtime.
    #[must_use]
    pub const fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }
}

/// A fully resolved request, built fresh for every invocation.
#[derive(Debug, Clone)]
pub struct ConcreteRequest {
    /// Logical operation name
    pub operation: String,
    /// HTTP method
    pub method: Method,
    /// Fully resolved URL
    pub url: Url,
    /// Request headers
    pub headers: HeaderMap,
    /// Request body
    pub body: Option<Bytes>,
    /// Timeout override for this request
    pub timeout: Option<Duration>,
}

/// Cross-cutting decoration applied after structural synthesis.
///
/// Filters may add headers or rewrite the URL. Changing the method or body is
/// rejected by the synthesizer.
#[async_trait]
pub trait RequestFilter: Send + Sync {
    /// Decorate the request.
    async fn filter(
        &self,
        descriptor: &OperationDescriptor,
        request: ConcreteRequest,
    ) -> Result<ConcreteRequest>;
}

/// Places an authentication token into a named header.
pub struct HeaderTokenFilter {
    header: HeaderName,
    token: SecretString,
}

impl HeaderTokenFilter {
    /// Create a filter for `header`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the header name or token is not a valid header.
    pub fn new(header: &str, token: impl Into<String>) -> Result<Self> {
        let header = HeaderName::from_bytes(header.as_bytes())
            .map_err(|err| Error::ConfigError(format!("Invalid token header `{header}`: {err}")))?;
        let token: String = token.into();
        HeaderValue::from_str(&token)
            .map_err(|_| Error::ConfigError("Token is not a valid header value".to_string()))?;
        Ok(Self {
            header,
            token: SecretString::from(token),
        })
    }
}

#[async_trait]
impl RequestFilter for HeaderTokenFilter {
    async fn filter(
        &self,
        _descriptor: &OperationDescriptor,
        mut request: ConcreteRequest,
    ) -> Result<ConcreteRequest> {
        let mut value = HeaderValue::from_str(self.token.expose_secret())
            .map_err(|err| Error::InvalidRequest(format!("Invalid token header value: {err}")))?;
        value.set_sensitive(true);
        request.headers.insert(self.header.clone(), value);
        Ok(request)
    }
}

/// Tags each request with an `x-request-id` unless one is already present.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdFilter;

/// Header carrying the request identifier.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[async_trait]
impl RequestFilter for RequestIdFilter {
    async fn filter(
        &self,
        _descriptor: &OperationDescriptor,
        mut request: ConcreteRequest,
    ) -> Result<ConcreteRequest> {
        if !request.headers.contains_key(REQUEST_ID_HEADER) {
            let id = HeaderValue::from_str(&Uuid::new_v4().to_string())
                .map_err(|err| Error::InternalError(format!("Invalid request id: {err}")))?;
            request
                .headers
                .insert(HeaderName::from_static(REQUEST_ID_HEADER), id);
        }
        Ok(request)
    }
}

/// Builds concrete requests from descriptors and arguments.
#[derive(Clone)]
pub struct RequestSynthesizer {
    base_url: Url,
    filters: Vec<Arc<dyn RequestFilter>>,
}

impl RequestSynthesizer {
    /// Create a synthesizer rooted at `base_url`.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            filters: Vec::new(),
        }
    }

    /// Append a filter; filters run in the order they are added.
    #[must_use]
    pub fn with_filter(mut self, filter: Arc<dyn RequestFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Base URL every path is resolved against.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Structural synthesis only, without filters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingArgument`] if a placeholder or required body is unbound and
    /// [`Error::InvalidEndpoint`] if the resulting URL is invalid.
    pub fn build(
        &self,
        descriptor: &OperationDescriptor,
        args: &Arguments,
    ) -> Result<ConcreteRequest> {
        let operation = descriptor.name();
        let path = descriptor.path().render(|name| {
            args.get(name)
                .map(|value| urlencoding::encode(value).into_owned())
                .ok_or_else(|| missing(operation, name))
        })?;

        let joined = format!("{}{path}", self.base_url.as_str().trim_end_matches('/'));
        let mut url = Url::parse(&joined).map_err(|err| {
            Error::InvalidEndpoint(format!("Invalid URL `{joined}` for `{operation}`: {err}"))
        })?;

        if !descriptor.query().is_empty() || !args.query().is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in descriptor.query().iter().chain(args.query()) {
                pairs.append_pair(key, value);
            }
        }

        let mut headers = HeaderMap::new();
        let accept = descriptor.consumes().unwrap_or(&MediaType::Any);
        headers.insert(ACCEPT, media_header(accept)?);
        for (name, value) in descriptor.headers() {
            headers.append(name.clone(), value.clone());
        }

        let body = render_body(descriptor, args)?;
        if body.is_some() {
            let content_type = descriptor.produces().unwrap_or(&MediaType::Json);
            headers.insert(CONTENT_TYPE, media_header(content_type)?);
        }

        Ok(ConcreteRequest {
            operation: operation.to_string(),
            method: descriptor.method().clone(),
            url,
            headers,
            body,
            timeout: descriptor.timeout(),
        })
    }

    /// Structural synthesis followed by every filter.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`RequestSynthesizer::build`], any filter error, and
    /// [`Error::InvalidRequest`] if a filter altered the method or body.
    pub async fn synthesize(
        &self,
        descriptor: &OperationDescriptor,
        args: &Arguments,
    ) -> Result<ConcreteRequest> {
        let mut request = self.build(descriptor, args)?;

        for filter in &self.filters {
            let method = request.method.clone();
            let body = request.body.clone();
            request = filter.filter(descriptor, request).await?;
            if request.method != method || request.body != body {
                return Err(Error::InvalidRequest(format!(
                    "request filter altered the method or body of `{}`",
                    descriptor.name()
                )));
            }
        }

        Ok(request)
    }
}

fn missing(operation: &str, name: &str) -> Error {
    Error::MissingArgument(format!("`{name}` for operation `{operation}`"))
}

fn media_header(media: &MediaType) -> Result<HeaderValue> {
    HeaderValue::from_str(media.as_str())
        .map_err(|err| Error::InvalidDescriptor(format!("Invalid media type `{media}`: {err}")))
}

fn render_body(descriptor: &OperationDescriptor, args: &Arguments) -> Result<Option<Bytes>> {
    let operation = descriptor.name();
    let rendered = match descriptor.payload() {
        None => return Ok(None),
        Some(Payload::Template(template)) => template.render(|name| {
            let value = args.get(name).ok_or_else(|| missing(operation, name))?;
            json_escape(value)
        })?,
        Some(Payload::WrapWith(key)) => {
            let body = args.body().ok_or_else(|| missing(operation, "body"))?;
            let mut wrapper = serde_json::Map::new();
            wrapper.insert(key.clone(), body.clone());
            serde_json::to_string(&Value::Object(wrapper))
                .map_err(|err| Error::InvalidRequest(err.to_string()))?
        }
        Some(Payload::Body) => {
            let body = args.body().ok_or_else(|| missing(operation, "body"))?;
            serde_json::to_string(body).map_err(|err| Error::InvalidRequest(err.to_string()))?
        }
    };
    Ok(Some(Bytes::from(rendered)))
}

/// JSON string escaping without the surrounding quotes.
fn json_escape(value: &str) -> Result<String> {
    let quoted =
        serde_json::to_string(value).map_err(|err| Error::InvalidRequest(err.to_string()))?;
    Ok(quoted[1..quoted.len() - 1].to_string())
}
