//! Asynchronous director task client.
//!
//! Every operation decodes error responses for the statuses the director documents
//! (400, 401, 403, 404 and 500) into a [`DirectorError`](crate::DirectorError),
//! reachable through [`DirectorError::from_error`](crate::DirectorError::from_error).

use crate::models::{Reference, Task, TasksList};
use crate::Result;
use cumulus_core::client::{
    ApiClient, ApiClientBuilder, ClientConfig, RetryPolicy, DIRECTOR_DEFAULT_TIMEOUT,
};
use cumulus_core::config::{ProviderConfig, DEFAULT_TOKEN_HEADER};
use cumulus_core::{
    Arguments, Error, ExtractionRule, FallbackPolicy, MediaType, OperationDescriptor,
};
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};
use url::Url;

const USER_AGENT: &str = concat!("cumulus-director/", env!("CARGO_PKG_VERSION"));

/// Header carrying the director session token.
pub const VCLOUD_TOKEN_HEADER: &str = "x-vcloud-authorization";

const ERROR_STATUSES: [u16; 5] = [400, 401, 403, 404, 500];

struct Operations {
    get_tasks_list: OperationDescriptor,
    get_task: OperationDescriptor,
    cancel_task: OperationDescriptor,
}

impl Operations {
    fn new() -> Result<Self> {
        Ok(Self {
            get_tasks_list: OperationDescriptor::builder(
                "tasksList:get",
                Method::GET,
                "/tasksList/{orgId}",
            )
            .param("orgId")
            .consumes(MediaType::Any)
            .fallback(FallbackPolicy::propagate_on(ERROR_STATUSES))
            .build()?,
            get_task: OperationDescriptor::builder("task:get", Method::GET, "/task/{taskId}")
                .param("taskId")
                .consumes(MediaType::Any)
                .fallback(FallbackPolicy::propagate_on(ERROR_STATUSES))
                .build()?,
            cancel_task: OperationDescriptor::builder(
                "task:cancel",
                Method::POST,
                "/task/{taskId}/action/cancel",
            )
            .param("taskId")
            .consumes(MediaType::Any)
            .extract(ExtractionRule::Raw)
            .fallback(FallbackPolicy::propagate_on(ERROR_STATUSES))
            .build()?,
        })
    }
}

/// Builder for [`DirectorClient`].
pub struct DirectorClientBuilder {
    inner: ApiClientBuilder,
}

impl DirectorClientBuilder {
    /// Create a builder for the API root (e.g. `https://vcloud.example.com/api`).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            inner: ApiClient::builder(base_url, DIRECTOR_DEFAULT_TIMEOUT)
                .with_user_agent(USER_AGENT),
        }
    }

    /// Create a builder from provider configuration.
    ///
    /// A token configured under the default header is sent as
    /// [`VCLOUD_TOKEN_HEADER`] instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let inner = if config.token_header == DEFAULT_TOKEN_HEADER {
            ApiClientBuilder::from_config(&config.clone().with_token_header(VCLOUD_TOKEN_HEADER))?
        } else {
            ApiClientBuilder::from_config(config)?
        };
        Ok(Self {
            inner: inner.with_user_agent(USER_AGENT),
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

    /// Authenticate with a session token.
    #[must_use]
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.inner = self.inner.with_token(VCLOUD_TOKEN_HEADER, token);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn build(self) -> Result<DirectorClient> {
        Ok(DirectorClient {
            inner: self.inner.build()?,
            operations: Arc::new(Operations::new()?),
        })
    }
}

/// Asynchronous director task client.
#[derive(Clone)]
pub struct DirectorClient {
    inner: ApiClient,
    operations: Arc<Operations>,
}

impl DirectorClient {
    /// Construct a client directly from the base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        DirectorClientBuilder::new(base_url).build()
    }

    /// Return the base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        self.inner.base_url()
    }

    /// Tasks of an organization.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderError`] for documented director errors and other
    /// errors on transport failures or malformed bodies.
    pub async fn get_task_list(&self, org_id: &str) -> Result<TasksList> {
        let args = Arguments::new().with("orgId", org_id);
        self.inner
            .invoke(&self.operations.get_tasks_list, &args)
            .await?
            .into_value()
    }

    /// Tasks of the referenced organization.
    ///
    /// # Errors
    ///
    /// As [`DirectorClient::get_task_list`], plus [`Error::InvalidRequest`] for an
    /// unusable href.
    pub async fn get_task_list_by_ref(&self, org: &Reference) -> Result<TasksList> {
        self.get_task_list(&org.entity_id()?).await
    }

    /// One task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderError`] for documented director errors and other
    /// errors on transport failures or malformed bodies.
    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        self.inner
            .invoke(&self.operations.get_task, &by_task(task_id))
            .await?
            .into_value()
    }

    /// The referenced task.
    ///
    /// # Errors
    ///
    /// As [`DirectorClient::get_task`], plus [`Error::InvalidRequest`] for an
    /// unusable href.
    pub async fn get_task_by_ref(&self, task: &Reference) -> Result<Task> {
        self.get_task(&task.entity_id()?).await
    }

    /// Ask the director to cancel a task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderError`] for documented director errors and other
    /// errors on transport failures.
    pub async fn cancel_task(&self, task_id: &str) -> Result<()> {
        self.inner
            .invoke(&self.operations.cancel_task, &by_task(task_id))
            .await?
            .into_unit()?;
        info!(task_id, "Requested task cancellation");
        Ok(())
    }

    /// Ask the director to cancel the referenced task.
    ///
    /// # Errors
    ///
    /// As [`DirectorClient::cancel_task`], plus [`Error::InvalidRequest`] for an
    /// unusable href.
    pub async fn cancel_task_by_ref(&self, task: &Reference) -> Result<()> {
        self.cancel_task(&task.entity_id()?).await
    }

    /// Poll a task every `interval` until it reaches a terminal status.
    ///
    /// The returned task may have failed; inspect its status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the task is still active after `timeout`, or
    /// the first polling error.
    pub async fn await_task(
        &self,
        task_id: &str,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Task> {
        let deadline = Instant::now() + timeout;
        loop {
            let task = self.get_task(task_id).await?;
            if task.status.is_terminal() {
                debug!(task_id, status = ?task.status, "Task finished");
                return Ok(task);
            }
            if Instant::now() + interval > deadline {
                return Err(Error::Timeout(format!(
                    "task {task_id} still {:?} after {timeout:?}",
                    task.status
                )));
            }
            sleep(interval).await;
        }
    }
}

fn by_task(task_id: &str) -> Arguments {
    Arguments::new().with("taskId", task_id)
}
