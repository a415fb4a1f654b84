//! Configuration structures for provider clients.
//!
//! This module provides the endpoint, credential, transport, and fan-out settings a
//! provider binding needs, with validation.

use crate::client::RetryPolicy;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;
use validator::Validate;

/// Header carrying the session token unless a provider overrides it.
pub const DEFAULT_TOKEN_HEADER: &str = "X-Auth-Token";

/// Configuration for a provider client instance.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProviderConfig {
    /// Provider base URL
    #[validate(url)]
    pub endpoint: String,

    /// Optional session token
    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    /// Header the token is sent in
    #[validate(length(min = 1))]
    #[serde(default = "default_token_header")]
    pub token_header: String,

    /// Verify server certificates
    #[serde(default = "default_tls_verify")]
    pub tls_verify: bool,

    /// Extra PEM root certificate to trust
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_ca_cert: Option<std::path::PathBuf>,

    /// Default per-request timeout, in seconds
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum number of retry attempts; zero disables retries
    #[validate(range(min = 0, max = 10))]
    #[serde(default)]
    pub max_retries: u32,

    /// Concurrent workers used by fan-out listings
    #[validate(range(min = 1, max = 64))]
    #[serde(default = "default_fanout_workers")]
    pub fanout_workers: usize,
}

fn default_token_header() -> String {
    DEFAULT_TOKEN_HEADER.to_string()
}

const fn default_tls_verify() -> bool {
    true
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_fanout_workers() -> usize {
    4
}

impl ProviderConfig {
    /// Configuration for `endpoint` (e.g. `https://lb.example.com/v1.0/1234`) with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if `endpoint` is not a URL.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, Error> {
        let config = Self {
            endpoint: endpoint.into(),
            ..Self::default()
        };

        config
            .validate()
            .map_err(|err| Error::ConfigError(format!("Invalid configuration: {err}")))?;

        Ok(config)
    }

    /// Set the session token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the header the token is sent in.
    #[must_use]
    pub fn with_token_header(mut self, header: impl Into<String>) -> Self {
        self.token_header = header.into();
        self
    }

    /// Toggle certificate verification.
    #[must_use]
    pub const fn with_tls_verify(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Trust an extra root certificate.
    #[must_use]
    pub fn with_ca_cert(mut self, path: std::path::PathBuf) -> Self {
        self.tls_ca_cert = Some(path);
        self
    }

    /// Set the default timeout, in seconds.
    #[must_use]
    pub const fn with_timeout(mut self, seconds: u64) -> Self {
        self.request_timeout_secs = seconds;
        self
    }

    /// Set the retry count; zero disables retries.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the fan-out worker count.
    #[must_use]
    pub const fn with_fanout_workers(mut self, workers: usize) -> Self {
        self.fanout_workers = workers;
        self
    }

    /// Default timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Retry policy derived from `max_retries`.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        if self.max_retries == 0 {
            RetryPolicy::no_retry()
        } else {
            RetryPolicy::new().with_max_retries(self.max_retries)
        }
    }

    /// Parse and validate the endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    pub fn parse_endpoint(&self) -> Result<Url, Error> {
        Url::parse(&self.endpoint)
            .map_err(|err| Error::ConfigError(format!("Invalid endpoint URL: {err}")))
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            token: None,
            token_header: default_token_header(),
            tls_verify: default_tls_verify(),
            tls_ca_cert: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: 0,
            fanout_workers: default_fanout_workers(),
        }
    }
}
