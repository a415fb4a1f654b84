//! Asynchronous Chef server cookbook client.

use crate::models::CookbookVersion;
use crate::Result;
use cumulus_core::client::{
    ApiClient, ApiClientBuilder, ClientConfig, RetryPolicy, CHEF_DEFAULT_TIMEOUT,
};
use cumulus_core::config::ProviderConfig;
use cumulus_core::{Arguments, FallbackPolicy, MediaType, OperationDescriptor, RequestFilter};
use reqwest::Method;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use url::Url;

const USER_AGENT: &str = concat!("cumulus-chef/", env!("CARGO_PKG_VERSION"));

/// Chef server API version announced on every request.
pub const CHEF_API_VERSION: &str = "0.10.4";

#[derive(Deserialize)]
struct CookbookEntry {
    #[serde(default)]
    versions: Vec<VersionEntry>,
}

#[derive(Deserialize)]
struct VersionEntry {
    version: String,
}

struct Operations {
    list_cookbooks: OperationDescriptor,
    list_versions: OperationDescriptor,
    get_cookbook: OperationDescriptor,
}

impl Operations {
    fn new() -> Result<Self> {
        Ok(Self {
            list_cookbooks: OperationDescriptor::builder(
                "cookbooks:list",
                Method::GET,
                "/cookbooks",
            )
            .header("X-Chef-Version", CHEF_API_VERSION)
            .consumes(MediaType::Json)
            .fallback(FallbackPolicy::null_on([404]))
            .build()?,
            list_versions: OperationDescriptor::builder(
                "cookbook:versions",
                Method::GET,
                "/cookbooks/{cookbook}",
            )
            .param("cookbook")
            .header("X-Chef-Version", CHEF_API_VERSION)
            .consumes(MediaType::Json)
            .fallback(FallbackPolicy::null_on([404]))
            .build()?,
            get_cookbook: OperationDescriptor::builder(
                "cookbook:get",
                Method::GET,
                "/cookbooks/{cookbook}/{version}",
            )
            .param("cookbook")
            .param("version")
            .header("X-Chef-Version", CHEF_API_VERSION)
            .consumes(MediaType::Json)
            .fallback(FallbackPolicy::null_on([404]))
            .build()?,
        })
    }
}

/// Builder for [`ChefClient`].
pub struct ChefClientBuilder {
    inner: ApiClientBuilder,
}

impl ChefClientBuilder {
    /// Create a builder for the Chef server URL
    /// (e.g. `https://chef.example.com/organizations/acme`).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            inner: ApiClient::builder(base_url, CHEF_DEFAULT_TIMEOUT).with_user_agent(USER_AGENT),
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

    /// Sign requests with the given authenticator.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Arc<dyn RequestFilter>) -> Self {
        self.inner = self.inner.with_filter(authenticator);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn build(self) -> Result<ChefClient> {
        Ok(ChefClient {
            inner: self.inner.build()?,
            operations: Arc::new(Operations::new()?),
        })
    }
}

/// Asynchronous Chef server client.
#[derive(Clone)]
pub struct ChefClient {
    inner: ApiClient,
    operations: Arc<Operations>,
}

impl ChefClient {
    /// Construct a client directly from the base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        ChefClientBuilder::new(base_url).build()
    }

    /// Return the base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        self.inner.base_url()
    }

    /// Names of every cookbook on the server.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures, unexpected statuses, or a malformed body.
    pub async fn list_cookbooks(&self) -> Result<Vec<String>> {
        let cookbooks: Option<BTreeMap<String, serde_json::Value>> = self
            .inner
            .invoke(&self.operations.list_cookbooks, &Arguments::new())
            .await?
            .into_optional()?;
        Ok(cookbooks.unwrap_or_default().into_keys().collect())
    }

    /// Versions of `cookbook`, newest first as the server reports them.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures, unexpected statuses, or a malformed body.
    pub async fn list_versions_of_cookbook(&self, cookbook: &str) -> Result<Vec<String>> {
        let args = Arguments::new().with("cookbook", cookbook);
        let mut entries: BTreeMap<String, CookbookEntry> = self
            .inner
            .invoke(&self.operations.list_versions, &args)
            .await?
            .into_optional()?
            .unwrap_or_default();

        Ok(entries
            .remove(cookbook)
            .map(|entry| entry.versions.into_iter().map(|v| v.version).collect())
            .unwrap_or_default())
    }

    /// One cookbook version, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures, unexpected statuses, or a malformed body.
    pub async fn get_cookbook(
        &self,
        cookbook: &str,
        version: &str,
    ) -> Result<Option<CookbookVersion>> {
        let args = Arguments::new()
            .with("cookbook", cookbook)
            .with("version", version);
        self.inner
            .invoke(&self.operations.get_cookbook, &args)
            .await?
            .into_optional()
    }

    /// Every existing version of `cookbook`, fetched one after another.
    ///
    /// Versions deleted between listing and fetching are skipped.
    ///
    /// # Errors
    ///
    /// Returns the first listing or fetch error.
    pub async fn cookbook_versions(&self, cookbook: &str) -> Result<Vec<CookbookVersion>> {
        let mut found = Vec::new();
        for version in self.list_versions_of_cookbook(cookbook).await? {
            match self.get_cookbook(cookbook, &version).await? {
                Some(cookbook_version) => found.push(cookbook_version),
                None => debug!(cookbook, %version, "Cookbook version vanished; skipping"),
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cumulus_core::Error;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> ChefClient {
        ChefClient::new(server.uri()).unwrap()
    }

    #[tokio::test]
    async fn list_cookbooks_returns_names() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cookbooks"))
            .and(header("x-chef-version", CHEF_API_VERSION))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "nginx": {"url": "http://chef/cookbooks/nginx", "versions": []},
                "apache2": {"url": "http://chef/cookbooks/apache2", "versions": []}
            })))
            .mount(&server)
            .await;

        let names = test_client(&server).list_cookbooks().await.unwrap();
        assert_eq!(names, vec!["apache2".to_string(), "nginx".to_string()]);
    }

    #[tokio::test]
    async fn list_cookbooks_empty_on_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cookbooks"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(test_client(&server).list_cookbooks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_versions_reads_nested_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cookbooks/apache2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apache2": {
                    "url": "http://chef/cookbooks/apache2",
                    "versions": [
                        {"url": "http://chef/cookbooks/apache2/5.1.0", "version": "5.1.0"},
                        {"url": "http://chef/cookbooks/apache2/5.0.0", "version": "5.0.0"}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let versions = test_client(&server)
            .list_versions_of_cookbook("apache2")
            .await
            .unwrap();
        assert_eq!(versions, vec!["5.1.0".to_string(), "5.0.0".to_string()]);
    }

    #[tokio::test]
    async fn get_cookbook_null_on_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cookbooks/apache2/9.9.9"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": ["Cannot find a cookbook named apache2 with version 9.9.9"]
            })))
            .mount(&server)
            .await;

        let found = test_client(&server)
            .get_cookbook("apache2", "9.9.9")
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn get_cookbook_parses_version() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cookbooks/apache2/5.1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cookbook_name": "apache2",
                "name": "apache2-5.1.0",
                "version": "5.1.0",
                "frozen?": true,
                "metadata": {
                    "name": "apache2",
                    "description": "Installs apache2",
                    "dependencies": {"iptables": ">= 0.0.0"}
                },
                "recipes": [{
                    "name": "default.rb",
                    "path": "recipes/default.rb",
                    "checksum": "abc123",
                    "specificity": "default"
                }]
            })))
            .mount(&server)
            .await;

        let cookbook = test_client(&server)
            .get_cookbook("apache2", "5.1.0")
            .await
            .unwrap()
            .unwrap();
        assert!(cookbook.frozen);
        assert_eq!(cookbook.metadata.dependencies["iptables"], ">= 0.0.0");
        assert_eq!(cookbook.recipes[0].path, "recipes/default.rb");
        assert!(cookbook.templates.is_empty());
    }

    #[tokio::test]
    async fn server_errors_are_unexpected_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unsigned"))
            .mount(&server)
            .await;

        let err = test_client(&server).list_cookbooks().await.unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert!(matches!(err, Error::UnexpectedStatus { .. }));
    }
}
