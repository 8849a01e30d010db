use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    matchers::{method, path, path_regex},
    Mock, MockServer, Request, ResponseTemplate,
};

pub const TOKEN: &str = "test-token-0123456789";

/// Behaviour knobs for the mock platform
#[derive(Debug, Clone)]
pub struct PlatformBehaviour {
    /// Projects returned by `GET /projects`
    pub projects: Vec<&'static str>,
    /// Whether the schema lookup answers 200 (else 404)
    pub schema_exists: bool,
    /// Cap on URLs per presign call
    pub max_urls: Option<usize>,
    /// Delay on storage PUTs
    pub upload_delay: Duration,
}

impl Default for PlatformBehaviour {
    fn default() -> Self {
        Self {
            projects: vec!["demo"],
            schema_exists: true,
            max_urls: None,
            upload_delay: Duration::ZERO,
        }
    }
}

/// Start a mock platform accepting the whole presign/upload/confirm cycle
pub async fn setup_platform_mock(behaviour: PlatformBehaviour) -> MockServer {
    let server = MockServer::start().await;
    mount_platform(&server, behaviour).await;
    server
}

pub async fn mount_platform(server: &MockServer, behaviour: PlatformBehaviour) {
    let projects: Vec<_> = behaviour
        .projects
        .iter()
        .enumerate()
        .map(|(i, name)| json!({"name": name, "id": i + 1}))
        .collect();

    Mock::given(method("GET"))
        .and(path("/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {"content": projects}
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/llm/sub-datasets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {"content": [{"name": "golden"}]}
        })))
        .mount(server)
        .await;

    let schema_status = if behaviour.schema_exists { 200 } else { 404 };
    Mock::given(method("GET"))
        .and(path_regex(r"^/v1/llm/master-dataset/schema/.+$"))
        .respond_with(ResponseTemplate::new(schema_status).set_body_json(json!({"success": true})))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/llm/master-dataset"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/llm/dataset/logs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(server)
        .await;

    let base = server.uri();
    let issued = Arc::new(AtomicUsize::new(0));
    let max_urls = behaviour.max_urls;
    Mock::given(method("GET"))
        .and(path("/v1/llm/presigned-url"))
        .respond_with(move |req: &Request| {
            let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap_or_default();
            let requested = body["numFiles"].as_u64().unwrap_or(1) as usize;
            let count = max_urls.map_or(requested, |m| m.min(requested));
            let urls: Vec<String> = (0..count)
                .map(|_| {
                    let n = issued.fetch_add(1, Ordering::SeqCst);
                    format!("{}/storage/trace-{}.json?sig=secret", base, n)
                })
                .collect();
            ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"presignedUrls": urls, "traceFolderUrl": format!("{}/storage", base)}
            }))
        })
        .mount(server)
        .await;

    Mock::given(method("PUT"))
        .and(path_regex(r"^/storage/.+$"))
        .respond_with(ResponseTemplate::new(201).set_delay(behaviour.upload_delay))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/llm/insert/trace"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(server)
        .await;
}

/// Requests received on `path`, in arrival order
pub async fn requests_to(server: &MockServer, wanted: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == wanted)
        .collect()
}
