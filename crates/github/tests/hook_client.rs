//! GithubHookClient against a mock GitHub API.

use std::collections::BTreeSet;

use github::GithubHookClient;
use serde_json::json;
use webhooks::{
    CallbackUrl, CreateHookRequest, EventType, HookApi, HookApiError, HookId, HookKind,
    RepositoryIdentity,
};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "ghp_test";

fn widgets() -> RepositoryIdentity {
    RepositoryIdentity::parse("https://github.com/acme/widgets").unwrap()
}

fn client(server: &MockServer) -> GithubHookClient {
    GithubHookClient::new(&server.uri(), Some(TOKEN.to_string())).unwrap()
}

fn hook_json(id: u64, name: &str, url: &str) -> serde_json::Value {
    json!({
        "type": "Repository",
        "id": id,
        "name": name,
        "active": true,
        "events": ["push", "pull_request"],
        "config": {"url": url, "content_type": "json", "insecure_ssl": "0"},
        "updated_at": "2019-06-03T00:57:16Z",
        "created_at": "2019-06-03T00:57:16Z",
    })
}

#[tokio::test]
async fn test_repository_reports_admin_permission() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets"))
        .and(header("authorization", "Bearer ghp_test"))
        .and(header("accept", "application/vnd.github+json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "full_name": "acme/widgets",
            "permissions": {"admin": true, "push": true, "pull": true},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let repo = client(&server).repository(&widgets()).await.unwrap().unwrap();
    assert!(repo.admin);
    assert_eq!(repo.identity, widgets());
}

#[tokio::test]
async fn test_repository_without_permissions_is_not_admin() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"full_name": "acme/widgets"})))
        .mount(&server)
        .await;

    let repo = client(&server).repository(&widgets()).await.unwrap().unwrap();
    assert!(!repo.admin);
}

#[tokio::test]
async fn test_missing_repository_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
        .mount(&server)
        .await;

    assert_eq!(client(&server).repository(&widgets()).await.unwrap(), None);
}

#[tokio::test]
async fn test_list_hooks_follows_pagination() {
    let server = MockServer::start().await;
    let second_page = format!("{}/repositories/1/hooks?page=2", server.uri());

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/hooks"))
        .and(query_param("per_page", "100"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("link", format!(r#"<{second_page}>; rel="next""#).as_str())
                .set_body_json(json!([hook_json(1, "web", "https://ci.example.com/github-webhook/")])),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repositories/1/hooks"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": 2,
                "name": "jenkins",
                "active": true,
                "events": ["push"],
                "config": {"jenkins_hook_url": "https://ci.example.com/github-webhook/"},
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let hooks = client(&server).list_hooks(&widgets()).await.unwrap();

    assert_eq!(hooks.len(), 2);
    let callback = CallbackUrl::new("https://ci.example.com/github-webhook/").unwrap();
    assert!(hooks[0].is(HookKind::ManagedWebhook, &callback));
    assert!(hooks[1].is(HookKind::LegacyServiceHook, &callback));
    assert_eq!(
        hooks[0].events,
        BTreeSet::from([EventType::Push, EventType::PullRequest])
    );
}

#[tokio::test]
async fn test_create_hook_posts_webhook_config() {
    let server = MockServer::start().await;
    let callback = CallbackUrl::new("https://ci.example.com/github-webhook/").unwrap();

    Mock::given(method("POST"))
        .and(path("/repos/acme/widgets/hooks"))
        .and(body_partial_json(json!({
            "name": "web",
            "active": true,
            "events": ["push"],
            "config": {
                "url": "https://ci.example.com/github-webhook/",
                "content_type": "json",
                "secret": "s3cr3t",
            },
        })))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(hook_json(77, "web", "https://ci.example.com/github-webhook/")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let request = CreateHookRequest::webhook(&callback, BTreeSet::from([EventType::Push]), Some("s3cr3t"));
    let created = client(&server).create_hook(&widgets(), &request).await.unwrap();

    assert_eq!(created.id, HookId::new(77));
}

#[tokio::test]
async fn test_delete_hook_targets_hook_id() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/repos/acme/widgets/hooks/12"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .delete_hook(&widgets(), HookId::new(12))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_forbidden_maps_to_unauthorized_with_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/hooks"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "4999")
                .set_body_json(json!({"message": "Must have admin rights to Repository."})),
        )
        .mount(&server)
        .await;

    let err = client(&server).list_hooks(&widgets()).await.unwrap_err();
    assert_eq!(
        err,
        HookApiError::Unauthorized {
            status: 403,
            message: "Must have admin rights to Repository.".to_string(),
        }
    );
}

#[tokio::test]
async fn test_exhausted_rate_limit_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/hooks"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("retry-after", "60")
                .set_body_json(json!({"message": "API rate limit exceeded"})),
        )
        .mount(&server)
        .await;

    let err = client(&server).list_hooks(&widgets()).await.unwrap_err();
    assert_eq!(
        err,
        HookApiError::RateLimited {
            retry_after: Some(std::time::Duration::from_secs(60)),
        }
    );
}

#[tokio::test]
async fn test_server_error_carries_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/repos/acme/widgets/hooks/3"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = client(&server)
        .delete_hook(&widgets(), HookId::new(3))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        HookApiError::UnexpectedStatus {
            status: 502,
            body: "bad gateway".to_string(),
        }
    );
}

#[tokio::test]
async fn test_malformed_hook_list_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/hooks"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    assert!(matches!(
        client(&server).list_hooks(&widgets()).await,
        Err(HookApiError::Decode { .. })
    ));
}
