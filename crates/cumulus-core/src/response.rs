//! Response resolution.
//!
//! The [`ResponseResolver`] turns a [`RawResponse`] into a [`Resolved`] value by either
//! substituting a fallback, applying the descriptor's [`ExtractionRule`], or failing with
//! a typed error.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::descriptor::ExtractionRule;
use crate::error::{Error, Result};
use crate::fallback::{self, FallbackKind, FallbackPolicy};
use crate::transport::RawResponse;

/// Longest body excerpt carried by [`Error::UnexpectedStatus`].
pub const BODY_SNIPPET_LIMIT: usize = 512;

/// Decodes raw bodies into structured data.
#[cfg_attr(test, mockall::automock)]
pub trait DomainParser: Send + Sync {
    /// Parse a successful response body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] if the body is not valid structured data.
    fn parse<'a>(&self, content_type: Option<&'a str>, body: &[u8]) -> Result<Value>;

    /// Parse an error response body into the provider's error object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] if the body is not a recognizable error.
    fn parse_error<'a>(
        &self,
        status: u16,
        content_type: Option<&'a str>,
        body: &[u8],
    ) -> Result<Value>;
}

/// JSON implementation of [`DomainParser`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl DomainParser for JsonParser {
    fn parse(&self, _content_type: Option<&str>, body: &[u8]) -> Result<Value> {
        if body.is_empty() {
            return Err(Error::MalformedResponse("empty response body".to_string()));
        }
        serde_json::from_slice(body)
            .map_err(|err| Error::MalformedResponse(format!("invalid JSON body: {err}")))
    }

    fn parse_error(&self, status: u16, content_type: Option<&str>, body: &[u8]) -> Result<Value> {
        self.parse(content_type, body).map_err(|err| {
            Error::MalformedResponse(format!("undecodable error body for status {status}: {err}"))
        })
    }
}

/// Outcome of resolving a response.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// Structured value
    Value(Value),
    /// Boolean value
    Bool(bool),
    /// Unparsed bytes
    Raw(Bytes),
    /// Absent value
    Null,
    /// No value
    Void,
}

impl Resolved {
    /// Deserialize a required value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] if no value is present or it does not match `T`.
    pub fn into_value<T: DeserializeOwned>(self) -> Result<T> {
        match self.into_optional()? {
            Some(value) => Ok(value),
            None => Err(Error::MalformedResponse(
                "expected a value but the response had none".to_string(),
            )),
        }
    }

    /// Deserialize an optional value; fallbacks and JSON `null` become `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] if the value does not match `T`.
    pub fn into_optional<T: DeserializeOwned>(self) -> Result<Option<T>> {
        match self {
            Self::Value(Value::Null) | Self::Null | Self::Void => Ok(None),
            Self::Value(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|err| Error::MalformedResponse(err.to_string())),
            Self::Bool(flag) => serde_json::from_value(Value::Bool(flag))
                .map(Some)
                .map_err(|err| Error::MalformedResponse(err.to_string())),
            Self::Raw(_) => Err(Error::MalformedResponse(
                "raw body cannot be deserialized".to_string(),
            )),
        }
    }

    /// Interpret as a boolean.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] for anything but a boolean.
    pub fn into_bool(self) -> Result<bool> {
        match self {
            Self::Bool(flag) | Self::Value(Value::Bool(flag)) => Ok(flag),
            other => Err(Error::MalformedResponse(format!(
                "expected a boolean, got {other:?}"
            ))),
        }
    }

    /// Discard the value.
    ///
    /// # Errors
    ///
    /// Never fails; the signature keeps call sites uniform.
    pub fn into_unit(self) -> Result<()> {
        Ok(())
    }

    /// Interpret as a success flag: a substituted `false` stays `false`, any other
    /// outcome means the call succeeded.
    #[must_use]
    pub fn into_success(self) -> bool {
        !matches!(self, Self::Bool(false))
    }

    /// Interpret as raw bytes; fallbacks become `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] for structured values.
    pub fn into_bytes(self) -> Result<Option<Bytes>> {
        match self {
            Self::Raw(bytes) => Ok(Some(bytes)),
            Self::Null | Self::Void => Ok(None),
            other => Err(Error::MalformedResponse(format!(
                "expected raw bytes, got {other:?}"
            ))),
        }
    }
}

/// Applies extraction rules and fallback policies.
#[derive(Clone)]
pub struct ResponseResolver {
    parser: Arc<dyn DomainParser>,
}

impl ResponseResolver {
    /// Create a resolver using `parser`.
    #[must_use]
    pub fn new(parser: Arc<dyn DomainParser>) -> Self {
        Self { parser }
    }

    /// Resolve a raw response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderError`] for triggered [`FallbackKind::PropagateError`]
    /// policies, [`Error::UnexpectedStatus`] for other failures, and
    /// [`Error::MalformedResponse`] when extraction fails.
    pub fn resolve(
        &self,
        response: RawResponse,
        extraction: &ExtractionRule,
        fallback: &FallbackPolicy,
    ) -> Result<Resolved> {
        let status = response.status.as_u16();

        if fallback.is_triggered(status, &response.body) {
            return match fallback::substitute(status, fallback.kind()) {
                Some(value) => Ok(value),
                None => Err(self.decode_error(&response)),
            };
        }

        if response.status.is_success() {
            return self.extract(&response, extraction);
        }

        Err(unexpected(&response))
    }

    fn decode_error(&self, response: &RawResponse) -> Error {
        let status = response.status.as_u16();
        match self
            .parser
            .parse_error(status, content_type(response), &response.body)
        {
            Ok(error) => {
                debug!(status, "Decoded provider error");
                Error::ProviderError { status, error }
            }
            Err(err) => {
                warn!(status, %err, "Could not decode provider error body");
                unexpected(response)
            }
        }
    }

    fn extract(&self, response: &RawResponse, rule: &ExtractionRule) -> Result<Resolved> {
        match rule {
            ExtractionRule::Raw => Ok(Resolved::Raw(response.body.clone())),
            ExtractionRule::Ignore => Ok(Resolved::Void),
            ExtractionRule::WholeBody if response.body.is_empty() => Ok(Resolved::Void),
            ExtractionRule::WholeBody => self
                .parser
                .parse(content_type(response), &response.body)
                .map(Resolved::Value),
            ExtractionRule::NamedSubtree(path) => {
                let tree = self.parser.parse(content_type(response), &response.body)?;
                match traverse(tree, path)? {
                    Value::Null => Ok(Resolved::Null),
                    value => Ok(Resolved::Value(value)),
                }
            }
            ExtractionRule::BooleanFromNestedField(path) => {
                let tree = self.parser.parse(content_type(response), &response.body)?;
                match traverse(tree, path)? {
                    Value::Bool(flag) => Ok(Resolved::Bool(flag)),
                    other => Err(Error::MalformedResponse(format!(
                        "field `{}` is not a boolean: {other}",
                        path.join(".")
                    ))),
                }
            }
        }
    }
}

impl Default for ResponseResolver {
    fn default() -> Self {
        Self::new(Arc::new(JsonParser))
    }
}

fn content_type(response: &RawResponse) -> Option<&str> {
    response
        .headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
}

fn unexpected(response: &RawResponse) -> Error {
    let text = String::from_utf8_lossy(&response.body);
    let body = if text.len() > BODY_SNIPPET_LIMIT {
        let mut cut = BODY_SNIPPET_LIMIT;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &text[..cut])
    } else {
        text.into_owned()
    };
    Error::UnexpectedStatus {
        status: response.status.as_u16(),
        body,
    }
}

/// Follow `path` through objects (by key) and arrays (by index).
fn traverse(mut node: Value, path: &[String]) -> Result<Value> {
    for segment in path {
        node = match node {
            Value::Object(mut map) => map.remove(segment),
            Value::Array(mut items) => segment
                .parse::<usize>()
                .ok()
                .filter(|index| *index < items.len())
                .map(|index| items.swap_remove(index)),
            _ => None,
        }
        .ok_or_else(|| {
            Error::MalformedResponse(format!("path `{}` not found in response", path.join(".")))
        })?;
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use serde::Deserialize;
    use serde_json::json;

    fn ok(body: &'static str) -> RawResponse {
        RawResponse::new(StatusCode::OK, body)
    }

    fn resolver() -> ResponseResolver {
        ResponseResolver::default()
    }

    #[test]
    fn whole_body_extraction() {
        let resolved = resolver()
            .resolve(
                ok(r#"{"a":1}"#),
                &ExtractionRule::WholeBody,
                &FallbackPolicy::propagate(),
            )
            .unwrap();
        assert_eq!(resolved, Resolved::Value(json!({"a": 1})));
    }

    #[test]
    fn empty_whole_body_is_void() {
        let resolved = resolver()
            .resolve(
                RawResponse::new(StatusCode::NO_CONTENT, ""),
                &ExtractionRule::WholeBody,
                &FallbackPolicy::propagate(),
            )
            .unwrap();
        assert_eq!(resolved, Resolved::Void);
    }

    #[test]
    fn named_subtree_extraction() {
        #[derive(Debug, Deserialize, PartialEq)]
        #[serde(rename_all = "camelCase")]
        struct Throttle {
            max_connections: u32,
        }

        let resolved = resolver()
            .resolve(
                ok(r#"{"connectionThrottle":{"maxConnections":100}}"#),
                &ExtractionRule::subtree("connectionThrottle"),
                &FallbackPolicy::null_on([404]),
            )
            .unwrap();
        assert_eq!(
            resolved.into_value::<Throttle>().unwrap(),
            Throttle {
                max_connections: 100
            }
        );
    }

    #[test]
    fn missing_subtree_is_malformed() {
        let err = resolver()
            .resolve(
                ok(r#"{"other":{}}"#),
                &ExtractionRule::subtree("connectionThrottle"),
                &FallbackPolicy::propagate(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[test]
    fn subtree_traverses_arrays() {
        let resolved = resolver()
            .resolve(
                ok(r#"{"items":[{"id":"a"},{"id":"b"}]}"#),
                &ExtractionRule::subtree("items.1.id"),
                &FallbackPolicy::propagate(),
            )
            .unwrap();
        assert_eq!(resolved, Resolved::Value(json!("b")));
    }

    #[test]
    fn nested_boolean_extraction() {
        let resolved = resolver()
            .resolve(
                ok(r#"{"connectionLogging":{"enabled":true}}"#),
                &ExtractionRule::nested_bool("connectionLogging.enabled"),
                &FallbackPolicy::false_on([404]),
            )
            .unwrap();
        assert!(resolved.into_bool().unwrap());
    }

    #[test]
    fn nested_non_boolean_is_malformed() {
        let err = resolver()
            .resolve(
                ok(r#"{"connectionLogging":{"enabled":"yes"}}"#),
                &ExtractionRule::nested_bool("connectionLogging.enabled"),
                &FallbackPolicy::propagate(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[test]
    fn raw_extraction_keeps_bytes() {
        let resolved = resolver()
            .resolve(ok("binary"), &ExtractionRule::Raw, &FallbackPolicy::propagate())
            .unwrap();
        assert_eq!(
            resolved.into_bytes().unwrap(),
            Some(Bytes::from_static(b"binary"))
        );
    }

    #[test]
    fn ignore_extraction_never_parses() {
        let mut parser = MockDomainParser::new();
        parser.expect_parse().never();
        let resolver = ResponseResolver::new(Arc::new(parser));

        let resolved = resolver
            .resolve(
                RawResponse::new(StatusCode::ACCEPTED, "Accepted"),
                &ExtractionRule::Ignore,
                &FallbackPolicy::void_on([404]),
            )
            .unwrap();
        assert_eq!(resolved, Resolved::Void);
    }

    #[test]
    fn fallback_does_not_invoke_extraction() {
        let mut parser = MockDomainParser::new();
        parser.expect_parse().never();
        parser.expect_parse_error().never();
        let resolver = ResponseResolver::new(Arc::new(parser));

        let cases = [
            (FallbackPolicy::false_on([404, 422]), 422, Resolved::Bool(false)),
            (FallbackPolicy::null_on([404]), 404, Resolved::Null),
            (FallbackPolicy::void_on([404]), 404, Resolved::Void),
        ];

        for (policy, status, expected) in cases {
            let response =
                RawResponse::new(StatusCode::from_u16(status).unwrap(), r#"{"not":"parsed"}"#);
            let resolved = resolver
                .resolve(
                    response,
                    &ExtractionRule::nested_bool("connectionLogging.enabled"),
                    &policy,
                )
                .unwrap();
            assert_eq!(resolved, expected);
        }
    }

    #[test]
    fn propagate_decodes_provider_error() {
        let response = RawResponse::new(
            StatusCode::BAD_REQUEST,
            r#"{"message":"validation error","majorErrorCode":400,"minorErrorCode":"BAD_REQUEST"}"#,
        );
        let err = resolver()
            .resolve(
                response,
                &ExtractionRule::WholeBody,
                &FallbackPolicy::propagate_on([400, 403]),
            )
            .unwrap_err();

        match err {
            Error::ProviderError { status, error } => {
                assert_eq!(status, 400);
                assert_eq!(error["minorErrorCode"], "BAD_REQUEST");
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[test]
    fn undecodable_provider_error_is_unexpected_status() {
        let response = RawResponse::new(StatusCode::FORBIDDEN, "<html>denied</html>");
        let err = resolver()
            .resolve(
                response,
                &ExtractionRule::WholeBody,
                &FallbackPolicy::propagate_on([403]),
            )
            .unwrap_err();
        assert_eq!(
            err,
            Error::UnexpectedStatus {
                status: 403,
                body: "<html>denied</html>".to_string()
            }
        );
    }

    #[test]
    fn untriggered_failure_is_unexpected_status() {
        let err = resolver()
            .resolve(
                RawResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "x".repeat(600)),
                &ExtractionRule::WholeBody,
                &FallbackPolicy::null_on([404]),
            )
            .unwrap_err();
        match err {
            Error::UnexpectedStatus { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body.len(), BODY_SNIPPET_LIMIT + 3);
            }
            other => panic!("expected unexpected status, got {other:?}"),
        }
    }

    #[test]
    fn snippet_is_cut_on_a_char_boundary_within_the_byte_limit() {
        // 'é' is two bytes, so byte 512 falls inside the 257th character.
        let body = format!("a{}", "é".repeat(300));
        let err = resolver()
            .resolve(
                RawResponse::new(StatusCode::BAD_GATEWAY, body),
                &ExtractionRule::WholeBody,
                &FallbackPolicy::propagate(),
            )
            .unwrap_err();
        match err {
            Error::UnexpectedStatus { body, .. } => {
                let snippet = body.strip_suffix("...").unwrap();
                assert_eq!(snippet.len(), 511);
                assert_eq!(snippet, format!("a{}", "é".repeat(255)));
            }
            other => panic!("expected unexpected status, got {other:?}"),
        }

        let exact = "é".repeat(256);
        let err = resolver()
            .resolve(
                RawResponse::new(StatusCode::BAD_GATEWAY, exact.clone()),
                &ExtractionRule::WholeBody,
                &FallbackPolicy::propagate(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            Error::UnexpectedStatus {
                status: 502,
                body: exact
            }
        );
    }

    #[test]
    fn resolved_conversions() {
        assert_eq!(Resolved::Null.into_optional::<String>().unwrap(), None);
        assert_eq!(Resolved::Void.into_optional::<String>().unwrap(), None);
        assert_eq!(
            Resolved::Value(Value::Null).into_optional::<String>().unwrap(),
            None
        );
        assert!(Resolved::Null.into_value::<String>().is_err());
        assert!(!Resolved::Bool(false).into_bool().unwrap());
        assert!(Resolved::Null.into_bool().is_err());
        assert!(Resolved::Value(json!(1)).into_unit().is_ok());
        assert!(Resolved::Value(json!(1)).into_bytes().is_err());
        assert!(Resolved::Raw(Bytes::new()).into_success());
        assert!(!Resolved::Bool(false).into_success());
    }
}
