//! Transport dispatch.
//!
//! A [`Dispatcher`] performs exactly one attempt per call. Retrying is layered on top
//! with [`RetryingDispatcher`] by callers that want it.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, ClientBuilder, Method, StatusCode};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::client::{ClientConfig, RetryPolicy};
use crate::error::{Error, Result};
use crate::request::ConcreteRequest;

/// Raw HTTP response handed to the resolver.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
}

impl RawResponse {
    /// Create a response without headers.
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Attach headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Sends a request and returns the raw response.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Perform a single attempt.
    async fn dispatch(&self, request: ConcreteRequest) -> Result<RawResponse>;
}

/// Dispatcher backed by a pooled [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    http: Client,
    log_requests: bool,
}

impl HttpDispatcher {
    /// Build a dispatcher from HTTP settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig, user_agent: &str) -> Result<Self> {
        Self::with_tls(config, user_agent, true, None)
    }

    /// Build a dispatcher with explicit TLS settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the CA certificate cannot be read or the HTTP
    /// client cannot be built.
    pub fn with_tls(
        config: &ClientConfig,
        user_agent: &str,
        tls_verify: bool,
        ca_cert: Option<&Path>,
    ) -> Result<Self> {
        let mut builder = ClientBuilder::new()
            .user_agent(user_agent)
            .timeout(config.timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .connect_timeout(Duration::from_secs(10))
            .gzip(config.enable_compression);

        if !tls_verify {
            warn!("TLS verification disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(ca_cert) = ca_cert {
            debug!("loading CA certificate from {}", ca_cert.display());
            let bytes = std::fs::read(ca_cert).map_err(|err| {
                Error::ConfigError(format!(
                    "Failed to read CA certificate {}: {err}",
                    ca_cert.display()
                ))
            })?;
            let cert = reqwest::Certificate::from_pem(&bytes)
                .map_err(|err| Error::ConfigError(format!("Invalid CA certificate: {err}")))?;
            builder = builder.add_root_certificate(cert);
        }

        let http = builder
            .build()
            .map_err(|err| Error::ConfigError(format!("Failed to build HTTP client: {err}")))?;

        Ok(Self {
            http,
            log_requests: config.enable_logging,
        })
    }

    /// Wrap an existing HTTP client.
    #[must_use]
    pub const fn from_client(http: Client) -> Self {
        Self {
            http,
            log_requests: true,
        }
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, request: ConcreteRequest) -> Result<RawResponse> {
        if self.log_requests {
            debug!(
                operation = %request.operation,
                method = %request.method,
                url = %request.url,
                "Sending request"
            );
        }

        let mut builder = self
            .http
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        if self.log_requests {
            debug!(
                operation = %request.operation,
                %status,
                bytes = body.len(),
                "Received response"
            );
        }

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

/// Race a dispatch against a cancellation signal.
///
/// # Errors
///
/// Returns [`Error::Cancelled`] if `cancel` completes first, otherwise the dispatch result.
pub async fn dispatch_cancellable<D, C>(
    dispatcher: &D,
    request: ConcreteRequest,
    cancel: C,
) -> Result<RawResponse>
where
    D: Dispatcher + ?Sized,
    C: Future<Output = ()>,
{
    let operation = request.operation.clone();
    tokio::select! {
        response = dispatcher.dispatch(request) => response,
        () = cancel => {
            warn!(operation = %operation, "Request cancelled");
            Err(Error::Cancelled(format!("request for `{operation}` was cancelled")))
        }
    }
}

/// Statuses worth another attempt.
fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

// Replaying these cannot apply the operation twice.
fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS | Method::TRACE
    )
}

/// Dispatcher decorator applying a [`RetryPolicy`].
///
/// Each attempt sends a fresh copy of the request. Retryable statuses are only retried
/// for idempotent methods; a `POST` answered with 503 is returned as is.
#[derive(Clone)]
pub struct RetryingDispatcher {
    inner: Arc<dyn Dispatcher>,
    policy: RetryPolicy,
}

impl RetryingDispatcher {
    /// Wrap `inner` with `policy`.
    #[must_use]
    pub fn new(inner: Arc<dyn Dispatcher>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The retry policy in use.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl Dispatcher for RetryingDispatcher {
    async fn dispatch(&self, request: ConcreteRequest) -> Result<RawResponse> {
        let mut attempt = 0;

        loop {
            let outcome = self.inner.dispatch(request.clone()).await;
            let retry = match &outcome {
                Ok(response) => {
                    is_idempotent(&request.method) && is_retryable_status(response.status)
                }
                Err(err) => err.is_retryable(),
            };

            if !retry || attempt >= self.policy.max_retries {
                return outcome;
            }

            attempt += 1;
            let delay = self.policy.delay_for_attempt(attempt);
            warn!(
                operation = %request.operation,
                attempt,
                ?delay,
                "Retrying request"
            );
            if delay > Duration::from_millis(0) {
                sleep(delay).await;
            }
        }
    }
}
