//! Asynchronous load balancer connection client.

use crate::models::ConnectionThrottle;
use crate::Result;
use cumulus_core::client::{
    ApiClient, ApiClientBuilder, ClientConfig, RetryPolicy, LOADBALANCER_DEFAULT_TIMEOUT,
};
use cumulus_core::config::{ProviderConfig, DEFAULT_TOKEN_HEADER};
use cumulus_core::{Arguments, ExtractionRule, FallbackPolicy, MediaType, OperationDescriptor};
use reqwest::Method;
use std::sync::Arc;
use tracing::debug;
use url::Url;

const USER_AGENT: &str = concat!("cumulus-loadbalancer/", env!("CARGO_PKG_VERSION"));

const THROTTLE_PATH: &str = "/loadbalancers/{id}/connectionthrottle";
const LOGGING_PATH: &str = "/loadbalancers/{id}/connectionlogging";

/// Descriptors for every connection operation, built once per client.
struct Operations {
    create_throttle: OperationDescriptor,
    get_throttle: OperationDescriptor,
    delete_throttle: OperationDescriptor,
    logging_state: OperationDescriptor,
    enable_logging: OperationDescriptor,
    disable_logging: OperationDescriptor,
}

impl Operations {
    fn new() -> Result<Self> {
        Ok(Self {
            create_throttle: OperationDescriptor::builder(
                "connectionthrottle:create",
                Method::PUT,
                THROTTLE_PATH,
            )
            .param("id")
            .consumes(MediaType::Json)
            .wrap_with("connectionThrottle")
            .extract(ExtractionRule::Ignore)
            .fallback(FallbackPolicy::void_on([404]))
            .build()?,
            get_throttle: OperationDescriptor::builder(
                "connectionthrottle:get",
                Method::GET,
                THROTTLE_PATH,
            )
            .param("id")
            .consumes(MediaType::Json)
            .select("connectionThrottle")
            .fallback(FallbackPolicy::null_on([404]))
            .build()?,
            delete_throttle: OperationDescriptor::builder(
                "connectionthrottle:delete",
                Method::DELETE,
                THROTTLE_PATH,
            )
            .param("id")
            .consumes(MediaType::Any)
            .extract(ExtractionRule::Raw)
            .fallback(FallbackPolicy::false_on([404, 422]))
            .build()?,
            logging_state: OperationDescriptor::builder(
                "connectionlogging:state",
                Method::GET,
                LOGGING_PATH,
            )
            .param("id")
            .consumes(MediaType::Json)
            .extract(ExtractionRule::nested_bool("connectionLogging.enabled"))
            .fallback(FallbackPolicy::false_on([404]))
            .build()?,
            enable_logging: logging_toggle("connectionlogging:enable", true)?,
            disable_logging: logging_toggle("connectionlogging:disable", false)?,
        })
    }
}

fn logging_toggle(name: &str, enabled: bool) -> Result<OperationDescriptor> {
    OperationDescriptor::builder(name, Method::PUT, LOGGING_PATH)
        .param("id")
        .consumes(MediaType::Json)
        .produces(MediaType::Json)
        .payload(format!(r#"{{"connectionLogging":{{"enabled":{enabled}}}}}"#))
        .extract(ExtractionRule::Ignore)
        .fallback(FallbackPolicy::void_on([404]))
        .build()
}

/// Builder for [`LoadBalancerClient`].
pub struct LoadBalancerClientBuilder {
    inner: ApiClientBuilder,
}

impl LoadBalancerClientBuilder {
    /// Create a builder for the account-scoped base URL
    /// (e.g. `https://lb.example.com/v1.0/123456`).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            inner: ApiClient::builder(base_url, LOADBALANCER_DEFAULT_TIMEOUT)
                .with_user_agent(USER_AGENT),
        }
    }

    /// Create a builder from provider configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            inner: ApiClientBuilder::from_config(config)?.with_user_agent(USER_AGENT),
        })
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.inner = self.inner.with_retry_policy(retry);
        self
    }

    /// Override the HTTP client configuration.
    #[must_use]
    pub fn with_http_config(mut self, config: ClientConfig) -> Self {
        self.inner = self.inner.with_http_config(config);
        self
    }

    /// Configure an X-Auth-Token header.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.inner = self.inner.with_token(DEFAULT_TOKEN_HEADER, token);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn build(self) -> Result<LoadBalancerClient> {
        Ok(LoadBalancerClient {
            inner: self.inner.build()?,
            operations: Arc::new(Operations::new()?),
        })
    }
}

/// Asynchronous client for load balancer connection settings.
#[derive(Clone)]
pub struct LoadBalancerClient {
    inner: ApiClient,
    operations: Arc<Operations>,
}

impl LoadBalancerClient {
    /// Construct a client directly from the base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        LoadBalancerClientBuilder::new(base_url).build()
    }

    /// Return the base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        self.inner.base_url()
    }

    /// Create or replace the connection throttle of a load balancer.
    ///
    /// Succeeds without effect if the load balancer does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or unexpected statuses.
    pub async fn create_or_update_connection_throttle(
        &self,
        load_balancer_id: u64,
        throttle: &ConnectionThrottle,
    ) -> Result<()> {
        let args = Arguments::new()
            .with("id", load_balancer_id)
            .with_body(throttle)?;
        self.inner
            .invoke(&self.operations.create_throttle, &args)
            .await?
            .into_unit()
    }

    /// Fetch the connection throttle, or `None` if the load balancer does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures, unexpected statuses, or a malformed body.
    pub async fn get_connection_throttle(
        &self,
        load_balancer_id: u64,
    ) -> Result<Option<ConnectionThrottle>> {
        self.inner
            .invoke(&self.operations.get_throttle, &by_id(load_balancer_id))
            .await?
            .into_optional()
    }

    /// Remove the connection throttle.
    ///
    /// Returns `false` if there was nothing to delete.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or unexpected statuses.
    pub async fn delete_connection_throttle(&self, load_balancer_id: u64) -> Result<bool> {
        let deleted = self
            .inner
            .invoke(&self.operations.delete_throttle, &by_id(load_balancer_id))
            .await?
            .into_success();
        debug!(load_balancer_id, deleted, "Deleted connection throttle");
        Ok(deleted)
    }

    /// Whether the load balancer logs connections; `false` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures, unexpected statuses, or a malformed body.
    pub async fn is_connection_logging(&self, load_balancer_id: u64) -> Result<bool> {
        self.inner
            .invoke(&self.operations.logging_state, &by_id(load_balancer_id))
            .await?
            .into_bool()
    }

    /// Turn connection logging on.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or unexpected statuses.
    pub async fn enable_connection_logging(&self, load_balancer_id: u64) -> Result<()> {
        self.inner
            .invoke(&self.operations.enable_logging, &by_id(load_balancer_id))
            .await?
            .into_unit()
    }

    /// Turn connection logging off.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or unexpected statuses.
    pub async fn disable_connection_logging(&self, load_balancer_id: u64) -> Result<()> {
        self.inner
            .invoke(&self.operations.disable_logging, &by_id(load_balancer_id))
            .await?
            .into_unit()
    }
}

fn by_id(load_balancer_id: u64) -> Arguments {
    Arguments::new().with("id", load_balancer_id)
}
