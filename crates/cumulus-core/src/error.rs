//! Error types for cumulus operations.
//!
//! This module provides the error taxonomy shared by the invocation engine and every
//! provider binding, including transport failures, protocol surprises, and decoded
//! provider error objects.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Main error type for cumulus operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Operation descriptor failed validation at construction time
    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// A placeholder had no bound argument
    #[error("Missing argument: {0}")]
    MissingArgument(String),

    /// Could not reach the remote endpoint
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Request did not complete within its timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Request was cancelled by the caller
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Response status not covered by the operation's fallback policy
    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
        /// Leading part of the response body
        body: String,
    },

    /// Response body could not be extracted
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Provider returned a structured error object
    #[error("Provider error {status}: {error}")]
    ProviderError {
        /// HTTP status code
        status: u16,
        /// Decoded provider error object
        error: serde_json::Value,
    },

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Resource not found by a lookup collaborator
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid endpoint
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Specialized result type for cumulus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Serializable envelope for reporting an [`Error`] to callers outside Rust.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorResponse {
    /// The error itself
    pub error: ErrorDetail,
    /// `x-request-id` of the failed invocation, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Body of an [`ErrorResponse`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorDetail {
    /// Stable code from [`Error::error_code`]
    pub code: String,
    /// Display form of the error
    pub message: String,
    /// Decoded provider error object, for [`Error::ProviderError`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Error {
    /// Stable, upper-case code naming the variant.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidDescriptor(_) => "INVALID_DESCRIPTOR",
            Self::MissingArgument(_) => "MISSING_ARGUMENT",
            Self::ConnectionError(_) => "CONNECTION_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Cancelled(_) => "CANCELLED",
            Self::UnexpectedStatus { .. } => "UNEXPECTED_STATUS",
            Self::MalformedResponse(_) => "MALFORMED_RESPONSE",
            Self::ProviderError { .. } => "PROVIDER_ERROR",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::NotFound(_) => "NOT_FOUND",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::InvalidEndpoint(_) => "INVALID_ENDPOINT",
            Self::HttpError(_) => "HTTP_ERROR",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true for transport failures a caller may retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::ConnectionError(_))
    }

    /// HTTP status carried by this error, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatus { status, .. } | Self::ProviderError { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Deserialize the provider error object carried by [`Error::ProviderError`].
    ///
    /// Returns `None` for every other variant or when the object does not match `T`.
    #[must_use]
    pub fn provider_error<T: DeserializeOwned>(&self) -> Option<T> {
        match self {
            Self::ProviderError { error, .. } => serde_json::from_value(error.clone()).ok(),
            _ => None,
        }
    }

    /// Wrap into an [`ErrorResponse`] without a request id.
    #[must_use]
    pub fn into_error_response(self) -> ErrorResponse {
        self.into_error_response_with_id(None)
    }

    /// Wrap into an [`ErrorResponse`] tagged with `request_id`.
    #[must_use]
    pub fn into_error_response_with_id(self, request_id: Option<String>) -> ErrorResponse {
        let details = match &self {
            Self::ProviderError { error, .. } => Some(error.clone()),
            _ => None,
        };
        ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
                details,
            },
            request_id,
        }
    }

    /// Whether the error points at a bug or misconfiguration rather than the remote side.
    #[must_use]
    pub const fn should_log(&self) -> bool {
        matches!(
            self,
            Self::InternalError(_) | Self::ConfigError(_) | Self::InvalidDescriptor(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::ConnectionError(err.to_string())
        } else {
            Self::HttpError(err.to_string())
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidEndpoint(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedResponse(err.to_string())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ConfigError(err.to_string())
    }
}
