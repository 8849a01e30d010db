use crate::client::PlatformClient;
use crate::error::{CatalystError, Result};
use reqwest::{Response, StatusCode};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Execute an authenticated platform request with one token refresh on 401
///
/// This function:
/// 1. Obtains the current bearer token (requesting one if none is cached)
/// 2. Executes the request with that token
/// 3. On HTTP 401, refreshes the token once and repeats the request
/// 4. Treats a second 401 as a hard `Unauthorized` failure
///
/// Any other status is returned to the caller untouched; interpreting it is
/// endpoint-specific.
pub async fn execute_with_refresh<F, Fut>(
    client: &PlatformClient,
    context: &str,
    request_fn: F,
) -> Result<Response>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = std::result::Result<Response, reqwest::Error>>,
{
    let token = client.bearer_token().await?;
    let response = request_fn(token.clone()).await?;

    if response.status() != StatusCode::UNAUTHORIZED {
        return Ok(response);
    }

    tracing::warn!(context = context, "Received 401, refreshing token and retrying once");

    let token = client.refresh_token(Some(&token)).await?;
    let response = request_fn(token).await?;

    if response.status() == StatusCode::UNAUTHORIZED {
        return Err(CatalystError::Unauthorized(format!(
            "{} rejected after token refresh",
            context
        )));
    }

    Ok(response)
}

/// Run a future under a deadline, mapping expiry to `CatalystError::Timeout`
pub async fn with_deadline<T, Fut>(limit: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CatalystError::Timeout(limit.as_secs())),
    }
}

/// Determine if an error is transient
///
/// Transient failures may succeed when the same spool file is driven again
/// later (next process start or a manual `spool retry`):
/// - Connection failures and request timeouts
/// - Our own upload deadline
/// - HTTP 5xx from the platform or the storage backend
///
/// Everything else (bad credentials, missing project, 4xx, local I/O or JSON
/// errors) needs operator attention first.
pub fn is_transient(error: &CatalystError) -> bool {
    match error {
        CatalystError::Http(e) => {
            if e.is_connect() || e.is_timeout() {
                return true;
            }
            e.status().is_some_and(|s| s.is_server_error())
        }
        CatalystError::Upstream { status, .. } => status.is_server_error(),
        CatalystError::Timeout(_) => true,
        CatalystError::Config(_)
        | CatalystError::InvalidArgument(_)
        | CatalystError::Unauthorized(_)
        | CatalystError::NotFound(_)
        | CatalystError::Io(_)
        | CatalystError::Json(_) => false,
    }
}
