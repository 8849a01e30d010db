// Platform client tests against a mock API
//
// Token acquisition and the single refresh on 401, target validation, schema
// registration and the presign/upload/confirm calls.

#[path = "integration/mocks/mod.rs"]
mod mocks;
#[path = "integration/helpers/mod.rs"]
mod helpers;

use catalyst_sdk::{CatalystConfig, CatalystError, PlatformClient, TraceBackend, TraceTarget};
use helpers::create_test_config;
use mocks::{requests_to, setup_platform_mock, PlatformBehaviour};
use serde_json::json;
use tempfile::TempDir;
use wiremock::{
    matchers::{body_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn key_config(base_url: &str, token: Option<&str>) -> CatalystConfig {
    CatalystConfig {
        access_key: Some("ak".to_string()),
        secret_key: Some("sk".to_string()),
        token: token.map(str::to_string),
        ..CatalystConfig::with_base_url(base_url)
    }
}

fn projects_page() -> serde_json::Value {
    json!({"success": true, "data": {"content": [{"name": "demo", "id": 7}]}})
}

async fn mount_token(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_json(json!({"accessKey": "ak", "secretKey": "sk"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": {"token": token}})),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_connect_requests_token_with_keys() {
    let server = MockServer::start().await;
    mount_token(&server, "fresh").await;

    let client = PlatformClient::new(&key_config(&server.uri(), None)).unwrap();
    assert!(!client.has_token());

    client.connect().await.unwrap();

    assert!(client.has_token());
    assert_eq!(client.bearer_token().await.unwrap(), "fresh");
    assert_eq!(requests_to(&server, "/token").await.len(), 1);
}

#[tokio::test]
async fn test_connect_with_preset_token_does_no_io() {
    let server = MockServer::start().await;
    let client = PlatformClient::new(&key_config(&server.uri(), Some("preset"))).unwrap();

    client.connect().await.unwrap();

    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_token_request_is_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad keys"))
        .mount(&server)
        .await;

    let client = PlatformClient::new(&key_config(&server.uri(), None)).unwrap();
    let err = client.connect().await.unwrap_err();

    assert!(matches!(err, CatalystError::Unauthorized(_)), "got {:?}", err);
    assert!(!client.has_token());
}

#[tokio::test]
async fn test_expired_token_is_refreshed_once() {
    let server = MockServer::start().await;
    mount_token(&server, "fresh").await;
    Mock::given(method("GET"))
        .and(path("/projects"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/projects"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(projects_page()))
        .expect(1)
        .mount(&server)
        .await;

    let client = PlatformClient::new(&key_config(&server.uri(), Some("stale"))).unwrap();
    let project = client.find_project("demo").await.unwrap();

    assert_eq!(project.name, "demo");
    assert_eq!(project.id_header().as_deref(), Some("7"));
    assert_eq!(client.tokens().current().unwrap().as_str(), "fresh");
    assert_eq!(requests_to(&server, "/token").await.len(), 1);
}

#[tokio::test]
async fn test_second_401_is_unauthorized() {
    let server = MockServer::start().await;
    mount_token(&server, "fresh").await;
    Mock::given(method("GET"))
        .and(path("/projects"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let client = PlatformClient::new(&key_config(&server.uri(), Some("stale"))).unwrap();
    let err = client.list_projects().await.unwrap_err();

    assert!(matches!(err, CatalystError::Unauthorized(_)), "got {:?}", err);
    assert_eq!(requests_to(&server, "/token").await.len(), 1);
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true, "data": {"token": "fresh"}}))
                .set_delay(std::time::Duration::from_millis(200)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/projects"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/projects"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(projects_page()))
        .expect(2)
        .mount(&server)
        .await;

    let client = PlatformClient::new(&key_config(&server.uri(), Some("stale"))).unwrap();
    let (first, second) = tokio::join!(client.list_projects(), client.list_projects());

    assert_eq!(first.unwrap().len(), 1);
    assert_eq!(second.unwrap().len(), 1);
    assert_eq!(requests_to(&server, "/token").await.len(), 1);
}

#[tokio::test]
async fn test_401_without_keys_is_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let config = CatalystConfig {
        token: Some("stale".to_string()),
        ..CatalystConfig::with_base_url(server.uri())
    };
    let client = PlatformClient::new(&config).unwrap();

    let err = client.list_projects().await.unwrap_err();
    assert!(matches!(err, CatalystError::Unauthorized(_)));
    assert!(requests_to(&server, "/token").await.is_empty());
}

#[tokio::test]
async fn test_validate_target() {
    let server = setup_platform_mock(PlatformBehaviour::default()).await;
    let spool_root = TempDir::new().unwrap();
    let client = PlatformClient::new(&create_test_config(&server.uri(), spool_root.path())).unwrap();

    client.validate_target(&TraceTarget::project("demo")).await.unwrap();
    client
        .validate_target(&TraceTarget::dataset("demo", "golden"))
        .await
        .unwrap();

    let err = client
        .validate_target(&TraceTarget::project("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, CatalystError::NotFound(_)));

    let err = client
        .validate_target(&TraceTarget::dataset("demo", "nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, CatalystError::NotFound(ref m) if m.contains("nope")));

    let listings = requests_to(&server, "/v1/llm/sub-datasets").await;
    assert!(!listings.is_empty());
    let first = &listings[0];
    assert_eq!(first.headers.get("x-project-name").unwrap().to_str().unwrap(), "demo");
    assert_eq!(first.headers.get("x-project-id").unwrap().to_str().unwrap(), "1");
    assert_eq!(first.url.query(), Some("projectName=demo"));
}

#[tokio::test]
async fn test_missing_schema_is_created() {
    let server = setup_platform_mock(PlatformBehaviour {
        schema_exists: false,
        ..PlatformBehaviour::default()
    })
    .await;
    let spool_root = TempDir::new().unwrap();
    let client = PlatformClient::new(&create_test_config(&server.uri(), spool_root.path())).unwrap();

    assert!(!client.check_schema("demo").await.unwrap());
    client.ensure_schema(&TraceTarget::project("demo")).await.unwrap();

    let created = requests_to(&server, "/v1/llm/master-dataset").await;
    assert_eq!(created.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&created[0].body).unwrap();
    assert_eq!(body["projectName"], "demo");
    assert!(body["schemaMapping"].is_object());
}

#[tokio::test]
async fn test_existing_schema_is_not_recreated() {
    let server = setup_platform_mock(PlatformBehaviour::default()).await;
    let spool_root = TempDir::new().unwrap();
    let client = PlatformClient::new(&create_test_config(&server.uri(), spool_root.path())).unwrap();

    client.ensure_schema(&TraceTarget::project("demo")).await.unwrap();

    assert!(requests_to(&server, "/v1/llm/master-dataset").await.is_empty());
}

#[tokio::test]
async fn test_dataset_schema_is_registered() {
    let server = setup_platform_mock(PlatformBehaviour::default()).await;
    let spool_root = TempDir::new().unwrap();
    let client = PlatformClient::new(&create_test_config(&server.uri(), spool_root.path())).unwrap();

    client
        .ensure_schema(&TraceTarget::dataset("demo", "golden"))
        .await
        .unwrap();

    let registered = requests_to(&server, "/v1/llm/dataset/logs").await;
    assert_eq!(registered.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&registered[0].body).unwrap();
    assert_eq!(body["datasetName"], "golden");
}

#[tokio::test]
async fn test_presign_upload_and_confirm() {
    let server = setup_platform_mock(PlatformBehaviour::default()).await;
    let spool_root = TempDir::new().unwrap();
    let client = PlatformClient::new(&create_test_config(&server.uri(), spool_root.path())).unwrap();
    let target = TraceTarget::dataset("demo", "golden");

    let batch = client.presigned_urls(&target, 3).await.unwrap();
    assert_eq!(batch.presigned_urls.len(), 3);

    let url = &batch.presigned_urls[0];
    client.upload_file(url, b"{\"a\":1}\n".to_vec()).await.unwrap();
    client.insert_trace(&target, url, "abc123").await.unwrap();

    let presign = &requests_to(&server, "/v1/llm/presigned-url").await[0];
    let presign_body: serde_json::Value = serde_json::from_slice(&presign.body).unwrap();
    assert_eq!(presign_body, json!({"datasetName": "golden", "numFiles": 3}));

    let insert = &requests_to(&server, "/v1/llm/insert/trace").await[0];
    assert_eq!(insert.headers.get("idempotency-key").unwrap().to_str().unwrap(), "abc123");
    let insert_body: serde_json::Value = serde_json::from_slice(&insert.body).unwrap();
    assert_eq!(insert_body, json!({"datasetName": "golden", "presignedUrl": url}));
}

#[tokio::test]
async fn test_rejected_upload_is_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/storage/file.json"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(403).set_body_string("signature expired"))
        .mount(&server)
        .await;

    let spool_root = TempDir::new().unwrap();
    let client = PlatformClient::new(&create_test_config(&server.uri(), spool_root.path())).unwrap();

    let err = client
        .upload_file(&format!("{}/storage/file.json", server.uri()), b"{}".to_vec())
        .await
        .unwrap_err();

    match err {
        CatalystError::Upstream { status, message } => {
            assert_eq!(status.as_u16(), 403);
            assert!(message.contains("signature expired"));
        }
        other => panic!("expected upstream error, got {:?}", other),
    }
}
