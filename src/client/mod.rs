//! Remote platform client
//!
//! Only the calls the trace pipeline needs: token acquisition, project and
//! dataset lookup, schema registration, presigned-URL issuance, raw upload and
//! ingestion confirmation. Every authenticated call goes through
//! [`execute_with_refresh`], so a 401 refreshes the token once.

pub mod auth;
pub mod types;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::config::CatalystConfig;
use crate::error::{CatalystError, Result};
use crate::logging::{redact_url, SensitiveToken};
use crate::retry::execute_with_refresh;

pub use auth::TokenStore;
pub use types::{
    dataset_schema_mapping, project_schema_mapping, DatasetSummary, Envelope, Page,
    PresignedBatch, ProjectSummary, TokenData, TraceTarget,
};

use types::TokenRequest;

/// Page size used when listing projects
const PROJECT_PAGE_SIZE: usize = 100;

/// Header carrying the upload's content hash on ingestion confirmation
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Remote operations the upload worker depends on
///
/// [`PlatformClient`] is the production implementation; tests can drive the
/// worker with their own.
#[async_trait]
pub trait TraceBackend: Send + Sync {
    /// Whether a bearer token is available without network I/O
    fn has_token(&self) -> bool;

    /// Request up to `count` presigned upload URLs
    async fn presigned_urls(&self, target: &TraceTarget, count: usize) -> Result<PresignedBatch>;

    /// PUT raw file bytes to a presigned URL
    async fn upload_file(&self, presigned_url: &str, body: Vec<u8>) -> Result<()>;

    /// Confirm ingestion of an uploaded file
    async fn insert_trace(
        &self,
        target: &TraceTarget,
        presigned_url: &str,
        idempotency_key: &str,
    ) -> Result<()>;
}

/// HTTP client for the platform API
///
/// Cheap to clone. Clones and forks share the same [`TokenStore`].
#[derive(Clone, Debug)]
pub struct PlatformClient {
    http: reqwest::Client,
    base: Url,
    tokens: Arc<TokenStore>,
    request_timeout: Duration,
}

impl PlatformClient {
    /// Build a client from config
    ///
    /// Fails with `Config` when the base URL is invalid or no credentials are
    /// configured. No network I/O happens here; see [`PlatformClient::connect`].
    pub fn new(config: &CatalystConfig) -> Result<Self> {
        config.validate()?;
        let base = Url::parse(&config.base_url)
            .map_err(|e| CatalystError::Config(format!("invalid base_url: {}", e)))?;
        let tokens = Arc::new(TokenStore::from_config(config)?);
        let request_timeout = config.request_timeout();

        Ok(Self {
            http: build_http(request_timeout)?,
            base,
            tokens,
            request_timeout,
        })
    }

    /// Same endpoint and token slot on a fresh connection pool
    ///
    /// The upload worker runs its own tokio runtime; reqwest pools are bound
    /// to the runtime that created their connections.
    pub fn fork(&self) -> Result<Self> {
        Ok(Self {
            http: build_http(self.request_timeout)?,
            base: self.base.clone(),
            tokens: Arc::clone(&self.tokens),
            request_timeout: self.request_timeout,
        })
    }

    /// Unauthenticated PUT of a spool file to a presigned storage URL
    ///
    /// Azure Blob Storage needs the blob type on every PUT.
    fn upload_request(&self, presigned_url: &str, body: Vec<u8>) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .put(presigned_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if is_azure_blob(presigned_url) {
            request = request.header("x-ms-blob-type", "BlockBlob");
        }
        request.body(body)
    }

    /// Make sure a bearer token is available, requesting one if needed
    pub async fn connect(&self) -> Result<()> {
        if !self.tokens.has_token() {
            self.refresh_token(None).await?;
        }
        Ok(())
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Current token, requesting one when the slot is empty
    pub async fn bearer_token(&self) -> Result<String> {
        match self.tokens.current() {
            Some(token) => Ok(token.as_str().to_owned()),
            None => self.refresh_token(None).await,
        }
    }

    /// Request a new token with the configured access/secret keys
    ///
    /// `rejected` is the token the caller saw fail. When another task already
    /// replaced it while this one waited on the refresh lock, the replacement
    /// is returned without a new request.
    pub async fn refresh_token(&self, rejected: Option<&str>) -> Result<String> {
        let (access_key, secret_key) = self.tokens.credentials().ok_or_else(|| {
            CatalystError::Unauthorized(
                "token rejected and no access/secret key configured to renew it".to_string(),
            )
        })?;

        let _guard = self.tokens.refresh_lock.lock().await;
        if let Some(current) = self.tokens.current() {
            if Some(current.as_str()) != rejected {
                return Ok(current.as_str().to_owned());
            }
        }

        let url = self.endpoint(&["token"])?;
        let response = self
            .http
            .post(url)
            .json(&TokenRequest {
                access_key,
                secret_key,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            self.tokens.clear();
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    CatalystError::Unauthorized(format!("token request rejected: {}", message))
                }
                _ => CatalystError::Upstream { status, message },
            });
        }

        let envelope: Envelope<TokenData> = response.json().await?;
        match envelope.data {
            Some(data) if envelope.success && !data.token.is_empty() => {
                debug!(token = %SensitiveToken::new(&data.token), "Obtained platform token");
                self.tokens.set(data.token.clone());
                Ok(data.token)
            }
            _ => {
                self.tokens.clear();
                Err(CatalystError::Unauthorized(
                    envelope
                        .message
                        .unwrap_or_else(|| "token request was not successful".to_string()),
                ))
            }
        }
    }

    /// List LLM projects visible to the token
    pub async fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        let url = self.endpoint(&["projects"])?;
        let page_size = PROJECT_PAGE_SIZE.to_string();

        let response = execute_with_refresh(self, "list projects", |token| {
            self.http
                .get(url.clone())
                .bearer_auth(token)
                .query(&[("size", page_size.as_str()), ("page", "0"), ("type", "llm")])
                .send()
        })
        .await?;

        let page: Page<ProjectSummary> = parse_data(response, "list projects").await?;
        Ok(page.content)
    }

    /// Look up a project by exact name
    pub async fn find_project(&self, name: &str) -> Result<ProjectSummary> {
        self.list_projects()
            .await?
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| CatalystError::NotFound(format!("project '{}'", name)))
    }

    /// List datasets of a project
    pub async fn list_datasets(&self, project: &ProjectSummary) -> Result<Vec<DatasetSummary>> {
        let url = self.endpoint(&["v1", "llm", "sub-datasets"])?;
        let project_id = project.id_header();

        let response = execute_with_refresh(self, "list datasets", |token| {
            let mut request = self
                .http
                .get(url.clone())
                .bearer_auth(token)
                .header("X-Project-Name", &project.name)
                .query(&[("projectName", project.name.as_str())]);
            if let Some(id) = &project_id {
                request = request.header("X-Project-Id", id);
            }
            request.send()
        })
        .await?;

        let page: Page<DatasetSummary> = parse_data(response, "list datasets").await?;
        Ok(page.content)
    }

    /// Fail with `NotFound` unless the tracer's project (and dataset) exist
    pub async fn validate_target(&self, target: &TraceTarget) -> Result<()> {
        let project = self.find_project(target.project_name()).await?;

        if let Some(dataset) = target.dataset_name() {
            let datasets = self.list_datasets(&project).await?;
            if !datasets.iter().any(|d| d.name == dataset) {
                return Err(CatalystError::NotFound(format!(
                    "dataset '{}' in project '{}'",
                    dataset, project.name
                )));
            }
        }

        Ok(())
    }

    /// Whether the project's trace schema is registered
    pub async fn check_schema(&self, project: &str) -> Result<bool> {
        let url = self.endpoint(&["v1", "llm", "master-dataset", "schema", project])?;

        let response = execute_with_refresh(self, "check schema", |token| {
            self.http
                .get(url.clone())
                .bearer_auth(token)
                .header("X-Project-Name", project)
                .send()
        })
        .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(upstream_error(response, "check schema").await),
        }
    }

    /// Register the trace schema of a project
    pub async fn create_schema(&self, project: &str) -> Result<()> {
        let url = self.endpoint(&["v1", "llm", "master-dataset"])?;
        let body = json!({
            "projectName": project,
            "schemaMapping": project_schema_mapping(),
            "traceFolderUrl": null,
        });

        let response = execute_with_refresh(self, "create schema", |token| {
            self.http
                .post(url.clone())
                .bearer_auth(token)
                .header("X-Project-Name", project)
                .json(&body)
                .send()
        })
        .await?;

        ensure_success(response, "create schema").await?;
        info!(project = project, "Registered trace schema");
        Ok(())
    }

    /// Register the trace schema mapping of a dataset
    pub async fn register_dataset_schema(&self, project: &str, dataset: &str) -> Result<()> {
        let url = self.endpoint(&["v1", "llm", "dataset", "logs"])?;
        let body = json!({
            "datasetName": dataset,
            "schemaMapping": dataset_schema_mapping(),
            "traceFolderUrl": null,
        });

        let response = execute_with_refresh(self, "register dataset schema", |token| {
            self.http
                .post(url.clone())
                .bearer_auth(token)
                .header("X-Project-Name", project)
                .json(&body)
                .send()
        })
        .await?;

        ensure_success(response, "register dataset schema").await
    }

    /// Check-then-create for projects, unconditional registration for datasets
    pub async fn ensure_schema(&self, target: &TraceTarget) -> Result<()> {
        match target {
            TraceTarget::Project { project } => {
                if !self.check_schema(project).await? {
                    self.create_schema(project).await?;
                }
                Ok(())
            }
            TraceTarget::Dataset { project, dataset } => {
                self.register_dataset_schema(project, dataset).await
            }
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| CatalystError::Config(format!("base_url '{}' cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl TraceBackend for PlatformClient {
    fn has_token(&self) -> bool {
        self.tokens.has_token()
    }

    async fn presigned_urls(&self, target: &TraceTarget, count: usize) -> Result<PresignedBatch> {
        let url = self.endpoint(&["v1", "llm", "presigned-url"])?;
        let body = target.presign_body(count);

        let response = execute_with_refresh(self, "presign", |token| {
            self.http
                .get(url.clone())
                .bearer_auth(token)
                .header("X-Project-Name", target.project_name())
                .json(&body)
                .send()
        })
        .await?;

        let mut batch: PresignedBatch = parse_data(response, "presign").await?;
        batch.presigned_urls.truncate(count);
        debug!(
            requested = count,
            issued = batch.presigned_urls.len(),
            "Received presigned URLs"
        );
        Ok(batch)
    }

    async fn upload_file(&self, presigned_url: &str, body: Vec<u8>) -> Result<()> {
        let response = self.upload_request(presigned_url, body).send().await?;
        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            debug!(url = %redact_url(presigned_url), "Uploaded trace file");
            Ok(())
        } else {
            Err(upstream_error(response, "upload").await)
        }
    }

    async fn insert_trace(
        &self,
        target: &TraceTarget,
        presigned_url: &str,
        idempotency_key: &str,
    ) -> Result<()> {
        let url = self.endpoint(&["v1", "llm", "insert", "trace"])?;
        let body = target.insert_body(presigned_url);

        let response = execute_with_refresh(self, "insert trace", |token| {
            self.http
                .post(url.clone())
                .bearer_auth(token)
                .header("X-Project-Name", target.project_name())
                .header(IDEMPOTENCY_HEADER, idempotency_key)
                .json(&body)
                .send()
        })
        .await?;

        ensure_success(response, "insert trace").await
    }
}

fn build_http(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

async fn upstream_error(response: Response, context: &str) -> CatalystError {
    let status = response.status();
    let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
    CatalystError::Upstream {
        status,
        message: format!("{}: {}", context, body),
    }
}

async fn ensure_success(response: Response, context: &str) -> Result<()> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(upstream_error(response, context).await)
    }
}

/// Unwrap the `data` field of a successful envelope
async fn parse_data<T: serde::de::DeserializeOwned>(response: Response, context: &str) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(upstream_error(response, context).await);
    }

    let envelope: Envelope<T> = response.json().await?;
    match envelope.data {
        Some(data) if envelope.success => Ok(data),
        _ => Err(CatalystError::Upstream {
            status,
            message: format!(
                "{}: {}",
                context,
                envelope.message.unwrap_or_else(|| "request was not successful".to_string())
            ),
        }),
    }
}

fn is_azure_blob(presigned_url: &str) -> bool {
    Url::parse(presigned_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.ends_with(".blob.core.windows.net")))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> PlatformClient {
        let config = CatalystConfig {
            token: Some("test-token".to_string()),
            ..CatalystConfig::with_base_url(base_url)
        };
        PlatformClient::new(&config).unwrap()
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let c = client("https://catalyst.example.com/api");
        assert_eq!(
            c.endpoint(&["v1", "llm", "presigned-url"]).unwrap().as_str(),
            "https://catalyst.example.com/api/v1/llm/presigned-url"
        );

        let c = client("http://127.0.0.1:8080");
        assert_eq!(c.endpoint(&["token"]).unwrap().as_str(), "http://127.0.0.1:8080/token");
    }

    #[test]
    fn test_endpoint_escapes_project_names() {
        let c = client("http://localhost/api/");
        let url = c
            .endpoint(&["v1", "llm", "master-dataset", "schema", "my project"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost/api/v1/llm/master-dataset/schema/my%20project"
        );
    }

    #[test]
    fn test_new_requires_credentials() {
        let err = PlatformClient::new(&CatalystConfig::default()).unwrap_err();
        assert!(matches!(err, CatalystError::Config(_)));
    }

    #[test]
    fn test_fork_shares_token_slot() {
        let c = client("http://localhost");
        let forked = c.fork().unwrap();
        c.tokens().set("rotated".to_string());
        assert_eq!(forked.tokens().current().as_deref().map(String::as_str), Some("rotated"));
    }

    #[test]
    fn test_azure_upload_sets_blob_type() {
        let c = client("http://localhost");
        let request = c
            .upload_request(
                "https://acct.blob.core.windows.net/traces/trace_demo.json?sv=2024&sig=abc",
                b"{}".to_vec(),
            )
            .build()
            .unwrap();

        assert_eq!(request.method(), reqwest::Method::PUT);
        assert_eq!(request.headers()["x-ms-blob-type"], "BlockBlob");
        assert_eq!(request.headers()[reqwest::header::CONTENT_TYPE], "application/json");
        assert!(request.headers().get(reqwest::header::AUTHORIZATION).is_none());
    }

    #[test]
    fn test_other_storage_has_no_blob_type() {
        let c = client("http://localhost");
        for url in [
            "https://bucket.s3.amazonaws.com/traces/trace_demo.json?X-Amz-Signature=abc",
            "http://127.0.0.1:9000/storage/file.json",
            "https://evil.example.com/blob.core.windows.net/file.json",
        ] {
            let request = c.upload_request(url, b"{}".to_vec()).build().unwrap();
            assert!(request.headers().get("x-ms-blob-type").is_none(), "{}", url);
            assert_eq!(request.headers()[reqwest::header::CONTENT_TYPE], "application/json");
        }
    }

    #[tokio::test]
    async fn test_refresh_without_keys_is_unauthorized() {
        let c = client("http://localhost");
        let err = c.refresh_token(Some("test-token")).await.unwrap_err();
        assert!(matches!(err, CatalystError::Unauthorized(_)));
    }
}
