use async_trait::async_trait;
use cumulus_chef::{ChefClientBuilder, ListCookbookVersions};
use cumulus_core::request::ConcreteRequest;
use cumulus_core::{OperationDescriptor, ProviderConfig, RequestFilter, WorkerPool};
use reqwest::header::HeaderValue;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Stand-in for request signing: tags every request with the client name.
struct UserIdSigner(&'static str);

#[async_trait]
impl RequestFilter for UserIdSigner {
    async fn filter(
        &self,
        _descriptor: &OperationDescriptor,
        mut request: ConcreteRequest,
    ) -> cumulus_core::Result<ConcreteRequest> {
        request
            .headers
            .insert("x-ops-userid", HeaderValue::from_static(self.0));
        Ok(request)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn signed_fan_out_lists_every_version() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/organizations/acme/cookbooks"))
        .and(header("x-ops-userid", "deployer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "apache2": {"url": "u", "versions": []},
            "mysql": {"url": "u", "versions": []}
        })))
        .expect(1)
        .mount(&server)
        .await;
    for (cookbook, version) in [("apache2", "5.1.0"), ("mysql", "8.0.0")] {
        Mock::given(method("GET"))
            .and(path(format!("/organizations/acme/cookbooks/{cookbook}")))
            .and(header("x-ops-userid", "deployer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                cookbook: {"url": "u", "versions": [{"url": "u", "version": version}]}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/organizations/acme/cookbooks/{cookbook}/{version}")))
            .and(header("x-ops-userid", "deployer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cookbook_name": cookbook,
                "name": format!("{cookbook}-{version}"),
                "version": version
            })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let config = ProviderConfig::new(format!("{}/organizations/acme", server.uri()))
        .unwrap()
        .with_fanout_workers(2);
    let client = ChefClientBuilder::from_config(&config)
        .unwrap()
        .with_authenticator(Arc::new(UserIdSigner("deployer")))
        .build()
        .unwrap();
    let pool = WorkerPool::from_config(&config).unwrap();

    let mut versions: Vec<String> = ListCookbookVersions::new(client)
        .list(Some(&pool))
        .await
        .unwrap()
        .into_iter()
        .map(|cookbook| cookbook.name)
        .collect();
    versions.sort();

    assert_eq!(versions, vec!["apache2-5.1.0", "mysql-8.0.0"]);
}
