//! Listing every version of every cookbook.

use crate::client::ChefClient;
use crate::models::CookbookVersion;
use crate::Result;
use cumulus_core::{fan_out, fan_out_partial, PartialListing, WorkerPool};
use tracing::{info, instrument};

/// Lists cookbook versions, one cookbook per fan-out task.
#[derive(Clone)]
pub struct ListCookbookVersions {
    client: ChefClient,
}

impl ListCookbookVersions {
    /// Create the strategy over `client`.
    #[must_use]
    pub fn new(client: ChefClient) -> Self {
        Self { client }
    }

    /// Every version of every cookbook on the server.
    ///
    /// # Errors
    ///
    /// Returns the first listing or fetch error.
    #[instrument(skip_all)]
    pub async fn list(&self, pool: Option<&WorkerPool>) -> Result<Vec<CookbookVersion>> {
        let names = self.client.list_cookbooks().await?;
        info!(cookbooks = names.len(), "Listing cookbook versions");
        self.list_for(names, pool).await
    }

    /// Every version of the named cookbooks.
    ///
    /// # Errors
    ///
    /// Returns the first listing or fetch error.
    pub async fn list_for<I, S>(
        &self,
        names: I,
        pool: Option<&WorkerPool>,
    ) -> Result<Vec<CookbookVersion>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = &self.client;
        fan_out(names.into_iter().map(Into::into), pool, |name: String| {
            let client = client.clone();
            async move { client.cookbook_versions(&name).await }
        })
        .await
    }

    /// Like [`ListCookbookVersions::list_for`], but keeps going past cookbooks that fail.
    pub async fn list_for_partial<I, S>(
        &self,
        names: I,
        pool: Option<&WorkerPool>,
    ) -> PartialListing<CookbookVersion>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = &self.client;
        fan_out_partial(names.into_iter().map(Into::into), pool, |name: String| {
            let client = client.clone();
            async move { client.cookbook_versions(&name).await }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn versions_body(cookbook: &str, versions: &[&str]) -> Value {
        let versions: Vec<Value> = versions
            .iter()
            .map(|version| {
                json!({
                    "url": format!("http://chef/cookbooks/{cookbook}/{version}"),
                    "version": version
                })
            })
            .collect();
        json!({
            cookbook: {
                "url": format!("http://chef/cookbooks/{cookbook}"),
                "versions": versions
            }
        })
    }

    fn version_body(cookbook: &str, version: &str) -> Value {
        json!({
            "cookbook_name": cookbook,
            "name": format!("{cookbook}-{version}"),
            "version": version
        })
    }

    async fn mount_cookbook(server: &MockServer, cookbook: &str, versions: &[&str]) {
        Mock::given(method("GET"))
            .and(path(format!("/cookbooks/{cookbook}")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(versions_body(cookbook, versions)),
            )
            .mount(server)
            .await;
        for version in versions {
            Mock::given(method("GET"))
                .and(path(format!("/cookbooks/{cookbook}/{version}")))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(version_body(cookbook, version)),
                )
                .mount(server)
                .await;
        }
    }

    fn names(versions: &[CookbookVersion]) -> Vec<String> {
        let mut names: Vec<String> = versions.iter().map(|v| v.name.clone()).collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn lists_every_version_sequentially() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cookbooks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apache2": {"url": "http://chef/cookbooks/apache2", "versions": []},
                "mysql": {"url": "http://chef/cookbooks/mysql", "versions": []}
            })))
            .mount(&server)
            .await;
        mount_cookbook(&server, "apache2", &["5.1.0", "5.0.0"]).await;
        mount_cookbook(&server, "mysql", &["8.0.0"]).await;

        let strategy = ListCookbookVersions::new(ChefClient::new(server.uri()).unwrap());
        let versions = strategy.list(None).await.unwrap();

        let listed: Vec<&str> = versions.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(listed, vec!["apache2-5.1.0", "apache2-5.0.0", "mysql-8.0.0"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pooled_listing_covers_every_cookbook() {
        let server = MockServer::start().await;
        mount_cookbook(&server, "apache2", &["5.1.0"]).await;
        mount_cookbook(&server, "mysql", &["8.0.0", "7.0.0"]).await;
        mount_cookbook(&server, "nginx", &["2.7.6"]).await;

        let strategy = ListCookbookVersions::new(ChefClient::new(server.uri()).unwrap());
        let pool = WorkerPool::new(2).unwrap();
        let versions = strategy
            .list_for(["apache2", "mysql", "nginx"], Some(&pool))
            .await
            .unwrap();

        assert_eq!(
            names(&versions),
            vec!["apache2-5.1.0", "mysql-7.0.0", "mysql-8.0.0", "nginx-2.7.6"]
        );
    }

    #[tokio::test]
    async fn vanished_version_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cookbooks/apache2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(versions_body("apache2", &["5.1.0", "5.0.0"])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cookbooks/apache2/5.1.0"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(version_body("apache2", "5.1.0")),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cookbooks/apache2/5.0.0"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let strategy = ListCookbookVersions::new(ChefClient::new(server.uri()).unwrap());
        let versions = strategy.list_for(["apache2"], None).await.unwrap();
        assert_eq!(names(&versions), vec!["apache2-5.1.0"]);
    }

    #[tokio::test]
    async fn failing_cookbook_fails_the_listing() {
        let server = MockServer::start().await;
        mount_cookbook(&server, "apache2", &["5.1.0"]).await;
        Mock::given(method("GET"))
            .and(path("/cookbooks/broken"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let strategy = ListCookbookVersions::new(ChefClient::new(server.uri()).unwrap());
        let pool = WorkerPool::new(2).unwrap();
        let err = strategy
            .list_for(["apache2", "broken"], Some(&pool))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));

        let partial = strategy
            .list_for_partial(["apache2", "broken"], Some(&pool))
            .await;
        assert!(!partial.is_complete());
        assert_eq!(partial.failures.len(), 1);
        assert_eq!(names(&partial.items), vec!["apache2-5.1.0"]);
    }

    #[tokio::test]
    async fn no_cookbooks_lists_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cookbooks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let strategy = ListCookbookVersions::new(ChefClient::new(server.uri()).unwrap());
        assert!(strategy.list(None).await.unwrap().is_empty());
    }
}
