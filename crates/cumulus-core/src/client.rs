//! HTTP client configuration, retry logic, and the invocation facade.
//!
//! [`ApiClient`] composes request synthesis, dispatch, and response resolution into a
//! single `invoke` call. [`ClientConfig`] and [`RetryPolicy`] configure the transport
//! underneath it.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use url::Url;
use validator::Validate;

use crate::config::ProviderConfig;
use crate::descriptor::OperationDescriptor;
use crate::error::{Error, Result};
use crate::request::{
    Arguments, HeaderTokenFilter, RequestFilter, RequestIdFilter, RequestSynthesizer,
};
use crate::response::{DomainParser, Resolved, ResponseResolver};
use crate::transport::{
    dispatch_cancellable, Dispatcher, HttpDispatcher, RawResponse, RetryingDispatcher,
};

/// Load balancer request timeout, in seconds
pub const LOADBALANCER_DEFAULT_TIMEOUT: u64 = 30;

/// Compute request timeout, in seconds
pub const COMPUTE_DEFAULT_TIMEOUT: u64 = 30;

/// Chef server request timeout, in seconds
pub const CHEF_DEFAULT_TIMEOUT: u64 = 20;

/// Director request timeout, in seconds
pub const DIRECTOR_DEFAULT_TIMEOUT: u64 = 60;

/// User agent sent when none is configured
pub const DEFAULT_USER_AGENT: &str = concat!("cumulus/", env!("CARGO_PKG_VERSION"));

/// Seconds an idle pooled connection is kept open
pub const DEFAULT_POOL_IDLE_TIMEOUT: u64 = 90;

/// Idle connections kept per host
pub const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 10;

/// Retries attempted by [`RetryPolicy::new`]
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// First backoff delay, in milliseconds
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Backoff ceiling, in milliseconds
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5000;

/// Exponential backoff for [`RetryingDispatcher`].
///
/// Only consulted when a client opts in; the plain dispatcher makes one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub backoff_multiplier: u32,
}

impl RetryPolicy {
    /// Three retries starting at 500ms, doubling up to 5s.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
            backoff_multiplier: 2,
        }
    }

    /// Single attempt.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(0),
            max_delay: Duration::from_millis(0),
            backoff_multiplier: 1,
        }
    }

    /// Set the retry count.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the first delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay ceiling.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub const fn with_backoff_multiplier(mut self, multiplier: u32) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay before retry number `attempt` (1-based); attempt 0 is the initial try.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(exponent) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };
        self.initial_delay
            .saturating_mul(self.backoff_multiplier.saturating_pow(exponent))
            .min(self.max_delay)
    }

    /// Whether any retry is allowed.
    #[must_use]
    pub const fn has_retries(&self) -> bool {
        self.max_retries > 0
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Settings for the underlying `reqwest` client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Timeout for requests whose descriptor sets none
    pub timeout: Duration,
    /// Retries applied by the client builder
    pub retry_policy: RetryPolicy,
    /// Idle pooled connection lifetime
    pub pool_idle_timeout: Duration,
    /// Idle connections kept per host
    pub pool_max_idle_per_host: usize,
    /// Emit an `info!` event per invocation
    pub enable_logging: bool,
    /// Accept gzip responses
    pub enable_compression: bool,
}

impl ClientConfig {
    /// 30s timeout, default retries, pooled connections, logging and gzip on.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::new(),
            pool_idle_timeout: Duration::from_secs(DEFAULT_POOL_IDLE_TIMEOUT),
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            enable_logging: true,
            enable_compression: true,
        }
    }

    /// Set the default timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Single attempt per request.
    #[must_use]
    pub const fn without_retries(mut self) -> Self {
        self.retry_policy = RetryPolicy::no_retry();
        self
    }

    /// Set the idle connection lifetime.
    #[must_use]
    pub const fn with_pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }

    /// Set the idle connections kept per host.
    #[must_use]
    pub const fn with_pool_max_idle(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    /// Toggle per-invocation logging.
    #[must_use]
    pub const fn with_logging(mut self, enabled: bool) -> Self {
        self.enable_logging = enabled;
        self
    }

    /// Toggle gzip.
    #[must_use]
    pub const fn with_compression(mut self, enabled: bool) -> Self {
        self.enable_compression = enabled;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Invocation facade: synthesize, dispatch, resolve.
///
/// Cloning is cheap; clones share the dispatcher and its connection pool.
#[derive(Clone)]
pub struct ApiClient {
    synthesizer: RequestSynthesizer,
    dispatcher: Arc<dyn Dispatcher>,
    resolver: ResponseResolver,
    log_requests: bool,
}

impl ApiClient {
    /// Start building a client for `base_url`.
    #[must_use]
    pub fn builder(base_url: impl Into<String>, default_timeout_secs: u64) -> ApiClientBuilder {
        ApiClientBuilder::new(base_url, default_timeout_secs)
    }

    /// Base URL operations are resolved against.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        self.synthesizer.base_url()
    }

    /// Invoke an operation.
    ///
    /// # Errors
    ///
    /// Returns synthesis, transport, and resolution errors.
    pub async fn invoke(
        &self,
        descriptor: &OperationDescriptor,
        args: &Arguments,
    ) -> Result<Resolved> {
        let request = self.synthesizer.synthesize(descriptor, args).await?;
        self.log_invocation(descriptor, &request.url);
        let response = self.dispatcher.dispatch(request).await;
        self.finish(descriptor, response)
    }

    /// Invoke an operation, abandoning it if `cancel` completes first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] on cancellation, otherwise as [`ApiClient::invoke`].
    pub async fn invoke_cancellable<C>(
        &self,
        descriptor: &OperationDescriptor,
        args: &Arguments,
        cancel: C,
    ) -> Result<Resolved>
    where
        C: Future<Output = ()> + Send,
    {
        let request = self.synthesizer.synthesize(descriptor, args).await?;
        self.log_invocation(descriptor, &request.url);
        let response = dispatch_cancellable(self.dispatcher.as_ref(), request, cancel).await;
        self.finish(descriptor, response)
    }

    fn log_invocation(&self, descriptor: &OperationDescriptor, url: &Url) {
        if self.log_requests {
            info!(
                operation = descriptor.name(),
                method = %descriptor.method(),
                %url,
                "Invoking operation"
            );
        }
    }

    fn finish(
        &self,
        descriptor: &OperationDescriptor,
        response: Result<RawResponse>,
    ) -> Result<Resolved> {
        let resolved = response.and_then(|response| {
            self.resolver
                .resolve(response, descriptor.extraction(), descriptor.fallback())
        });
        if let Err(err) = &resolved {
            if self.log_requests {
                warn!(
                    operation = descriptor.name(),
                    code = err.error_code(),
                    %err,
                    "Operation failed"
                );
            }
        }
        resolved
    }
}

/// Builder for [`ApiClient`].
pub struct ApiClientBuilder {
    base_url: String,
    user_agent: String,
    http: ClientConfig,
    tls_verify: bool,
    ca_cert: Option<PathBuf>,
    token: Option<(String, String)>,
    request_ids: bool,
    filters: Vec<Arc<dyn RequestFilter>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    parser: Option<Arc<dyn DomainParser>>,
}

impl ApiClientBuilder {
    /// Create a builder; the client makes a single attempt per invocation unless a
    /// retry policy is configured.
    #[must_use]
    pub fn new(base_url: impl Into<String>, default_timeout_secs: u64) -> Self {
        Self {
            base_url: base_url.into(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http: ClientConfig::new()
                .with_timeout(Duration::from_secs(default_timeout_secs))
                .without_retries(),
            tls_verify: true,
            ca_cert: None,
            token: None,
            request_ids: false,
            filters: Vec::new(),
            dispatcher: None,
            parser: None,
        }
    }

    /// Seed a builder from a validated [`ProviderConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the configuration fails validation.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        config.validate()?;
        let mut builder = Self::new(config.endpoint.clone(), config.request_timeout_secs)
            .with_retry_policy(config.retry_policy())
            .with_tls_verify(config.tls_verify);
        if let Some(path) = &config.tls_ca_cert {
            builder = builder.with_ca_cert(path.clone());
        }
        if let Some(token) = &config.token {
            builder = builder.with_token(config.token_header.clone(), token.clone());
        }
        Ok(builder)
    }

    /// Set the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Replace the HTTP settings, keeping the configured retry policy.
    #[must_use]
    pub fn with_http_config(mut self, config: ClientConfig) -> Self {
        let retry_policy = self.http.retry_policy;
        self.http = config.with_retry_policy(retry_policy);
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.http = self.http.with_retry_policy(policy);
        self
    }

    /// Set whether to verify TLS certificates.
    #[must_use]
    pub const fn with_tls_verify(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Trust an additional CA certificate.
    #[must_use]
    pub fn with_ca_cert(mut self, path: PathBuf) -> Self {
        self.ca_cert = Some(path);
        self
    }

    /// Send `token` in `header` on every request.
    #[must_use]
    pub fn with_token(mut self, header: impl Into<String>, token: impl Into<String>) -> Self {
        self.token = Some((header.into(), token.into()));
        self
    }

    /// Tag every request with an `x-request-id`.
    #[must_use]
    pub const fn with_request_ids(mut self) -> Self {
        self.request_ids = true;
        self
    }

    /// Append a request filter; custom filters run after the token and request-id filters.
    #[must_use]
    pub fn with_filter(mut self, filter: Arc<dyn RequestFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Use a custom dispatcher instead of HTTP.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Use a custom body parser.
    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn DomainParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] for a bad base URL and [`Error::ConfigError`] if
    /// the token or HTTP client cannot be set up.
    pub fn build(self) -> Result<ApiClient> {
        let base_url = Url::parse(&self.base_url).map_err(|err| {
            Error::InvalidEndpoint(format!("Invalid base URL `{}`: {err}", self.base_url))
        })?;

        let mut synthesizer = RequestSynthesizer::new(base_url);
        if let Some((header, token)) = self.token {
            synthesizer =
                synthesizer.with_filter(Arc::new(HeaderTokenFilter::new(&header, token)?));
        }
        if self.request_ids {
            synthesizer = synthesizer.with_filter(Arc::new(RequestIdFilter));
        }
        for filter in self.filters {
            synthesizer = synthesizer.with_filter(filter);
        }

        let dispatcher: Arc<dyn Dispatcher> = match self.dispatcher {
            Some(dispatcher) => dispatcher,
            None => Arc::new(HttpDispatcher::with_tls(
                &self.http,
                &self.user_agent,
                self.tls_verify,
                self.ca_cert.as_deref(),
            )?),
        };
        let dispatcher: Arc<dyn Dispatcher> = if self.http.retry_policy.has_retries() {
            Arc::new(RetryingDispatcher::new(dispatcher, self.http.retry_policy))
        } else {
            dispatcher
        };

        let resolver = self
            .parser
            .map_or_else(ResponseResolver::default, ResponseResolver::new);

        Ok(ApiClient {
            synthesizer,
            dispatcher,
            resolver,
            log_requests: self.http.enable_logging,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::MediaType;
    use crate::fallback::FallbackPolicy;
    use crate::transport::MockDispatcher;
    use reqwest::{Method, StatusCode};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_timeout_constants() {
        assert_eq!(LOADBALANCER_DEFAULT_TIMEOUT, 30);
        assert_eq!(COMPUTE_DEFAULT_TIMEOUT, 30);
        assert_eq!(CHEF_DEFAULT_TIMEOUT, 20);
        assert_eq!(DIRECTOR_DEFAULT_TIMEOUT, 60);
    }

    #[test]
    fn test_retry_policy_builder() {
        let policy = RetryPolicy::new()
            .with_max_retries(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(10))
            .with_backoff_multiplier(3);

        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
        assert_eq!(policy.backoff_multiplier, 3);
        assert!(!RetryPolicy::no_retry().has_retries());
    }

    #[test]
    fn test_retry_policy_delay_is_capped() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350));

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(0));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(12), Duration::from_millis(350));
    }

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::new()
            .with_timeout(Duration::from_secs(60))
            .without_retries()
            .with_pool_idle_timeout(Duration::from_secs(120))
            .with_pool_max_idle(20)
            .with_logging(false)
            .with_compression(false);

        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.retry_policy.max_retries, 0);
        assert_eq!(config.pool_idle_timeout, Duration::from_secs(120));
        assert_eq!(config.pool_max_idle_per_host, 20);
        assert!(!config.enable_logging);
        assert!(!config.enable_compression);
    }

    fn throttle_get() -> OperationDescriptor {
        OperationDescriptor::builder(
            "connectionthrottle:get",
            Method::GET,
            "/loadbalancers/{id}/connectionthrottle",
        )
        .param("id")
        .consumes(MediaType::Json)
        .select("connectionThrottle")
        .fallback(FallbackPolicy::null_on([404]))
        .build()
        .unwrap()
    }

    #[tokio::test]
    async fn test_invoke_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/1234/loadbalancers/7/connectionthrottle"))
            .and(header("x-auth-token", "token"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "connectionThrottle": {"maxConnections": 10}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::builder(format!("{}/v1.0/1234", server.uri()), 5)
            .with_token("X-Auth-Token", "token")
            .build()
            .unwrap();

        let resolved = client
            .invoke(&throttle_get(), &Arguments::new().with("id", 7))
            .await
            .unwrap();
        assert_eq!(resolved, Resolved::Value(json!({"maxConnections": 10})));
    }

    #[tokio::test]
    async fn test_invoke_substitutes_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
            .mount(&server)
            .await;

        let client = ApiClient::builder(server.uri(), 5).build().unwrap();
        let resolved = client
            .invoke(&throttle_get(), &Arguments::new().with("id", 7))
            .await
            .unwrap();
        assert_eq!(resolved, Resolved::Null);
    }

    #[tokio::test]
    async fn test_single_attempt_by_default() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::builder(server.uri(), 5).build().unwrap();
        let err = client
            .invoke(&throttle_get(), &Arguments::new().with("id", 7))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
    }

    #[tokio::test]
    async fn test_retry_policy_is_opt_in() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "connectionThrottle": {"maxConnections": 1}
            })))
            .mount(&server)
            .await;

        let client = ApiClient::builder(server.uri(), 5)
            .with_retry_policy(
                RetryPolicy::new()
                    .with_max_retries(2)
                    .with_initial_delay(Duration::from_millis(1)),
            )
            .build()
            .unwrap();

        let resolved = client
            .invoke(&throttle_get(), &Arguments::new().with("id", 7))
            .await
            .unwrap();
        assert_eq!(resolved, Resolved::Value(json!({"maxConnections": 1})));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invoke_cancellable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let client = ApiClient::builder(server.uri(), 30).build().unwrap();
        let err = client
            .invoke_cancellable(
                &throttle_get(),
                &Arguments::new().with("id", 7),
                tokio::time::sleep(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_custom_dispatcher_and_request_ids() {
        let mut dispatcher = MockDispatcher::new();
        dispatcher
            .expect_dispatch()
            .withf(|request| {
                request.headers.contains_key(crate::request::REQUEST_ID_HEADER)
                    && request.url.as_str()
                        == "http://provider.test/loadbalancers/3/connectionthrottle"
            })
            .times(1)
            .returning(|_| {
                Ok(RawResponse::new(
                    StatusCode::OK,
                    r#"{"connectionThrottle":null}"#,
                ))
            });

        let client = ApiClient::builder("http://provider.test", 5)
            .with_request_ids()
            .with_dispatcher(Arc::new(dispatcher))
            .build()
            .unwrap();

        let resolved = client
            .invoke(&throttle_get(), &Arguments::new().with("id", 3))
            .await
            .unwrap();
        assert_eq!(resolved, Resolved::Null);
        assert_eq!(client.base_url().as_str(), "http://provider.test/");
    }

    #[test]
    fn test_builder_from_config() {
        let config = ProviderConfig::new("https://lb.example.com/v1.0/1234")
            .unwrap()
            .with_token("token")
            .with_max_retries(2);

        let builder = ApiClientBuilder::from_config(&config).unwrap();
        assert_eq!(builder.http.retry_policy.max_retries, 2);
        assert_eq!(builder.http.timeout, Duration::from_secs(30));
        assert!(builder.token.is_some());
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_builder_rejects_bad_base_url() {
        let err = ApiClient::builder("not a url", 5).build().err().unwrap();
        assert!(matches!(err, Error::InvalidEndpoint(_)));
    }
}
