//! HTTP adapter for the remote commit and read APIs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Method, Response, StatusCode};
use serde_json::Value;
use tallysync_core::{CommitRequest, RemoteCommitApi, RemoteError, RemoteReadApi};
use tallysync_domain::constants::IDEMPOTENCY_HEADER;
use tallysync_domain::{CacheKey, CommittedRecord, RemoteConfig, Result, TallySyncError};
use tracing::{debug, instrument, warn};
use url::Url;

use super::client::HttpClient;

/// Reads are retried in place; commits are retried by the sync engine.
const READ_ATTEMPTS: usize = 2;
const READ_BACKOFF: Duration = Duration::from_millis(200);

/// Talks to `POST {base}/mutations/{kind}` and `GET {base}/views/{key}`.
#[derive(Debug, Clone)]
pub struct HttpRemoteApi {
    client: HttpClient,
    base: Url,
}

impl HttpRemoteApi {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = HttpClient::builder()
            .timeout(config.request_timeout())
            .max_attempts(READ_ATTEMPTS)
            .base_backoff(READ_BACKOFF)
            .user_agent(concat!("tallysync/", env!("CARGO_PKG_VERSION")))
            .bearer_token(config.bearer_token.clone())
            .build()?;
        Self::with_client(client, &config.base_url)
    }

    pub fn with_client(client: HttpClient, base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| TallySyncError::Config(format!("invalid remote base url {base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(TallySyncError::Config(format!("remote base url {base_url} cannot carry a path")));
        }
        Ok(Self { client, base })
    }

    fn endpoint(&self, collection: &str, item: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(collection).push(item);
        }
        url
    }
}

#[async_trait]
impl RemoteCommitApi for HttpRemoteApi {
    #[instrument(skip_all, fields(kind = %request.kind, client_sequence = %request.client_sequence))]
    async fn commit(&self, request: &CommitRequest) -> std::result::Result<CommittedRecord, RemoteError> {
        let url = self.endpoint("mutations", &request.kind.to_string());
        let builder = self
            .client
            .request(Method::POST, url)
            .header(IDEMPOTENCY_HEADER, request.idempotency_token.as_str())
            .json(request);

        let response = self.client.send_once(builder).await.map_err(transport_error)?;
        let body = success_body(response).await?;

        // accept both `{ "committed": record }` and a bare record
        let record = match body {
            Value::Object(mut map) if map.contains_key("committed") => {
                map.remove("committed").unwrap_or(Value::Null)
            }
            other => other,
        };
        serde_json::from_value(record).map_err(|e| {
            warn!(error = %e, "Commit acknowledged with an unreadable record");
            RemoteError::Network(format!("malformed commit response: {e}"))
        })
    }
}

#[async_trait]
impl RemoteReadApi for HttpRemoteApi {
    #[instrument(skip_all, fields(key = %key))]
    async fn fetch(&self, key: &CacheKey) -> std::result::Result<Value, RemoteError> {
        let url = self.endpoint("views", key.as_str());
        let response =
            self.client.send(self.client.request(Method::GET, url)).await.map_err(transport_error)?;
        success_body(response).await
    }
}

async fn success_body(response: Response) -> std::result::Result<Value, RemoteError> {
    let status = response.status();
    if status.is_success() {
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        return response
            .json::<Value>()
            .await
            .map_err(|e| RemoteError::Network(format!("unreadable response body: {e}")));
    }

    let retry_after = parse_retry_after(&response);
    let message = error_message(response).await;
    debug!(status = status.as_u16(), %message, "Remote returned an error status");
    Err(classify_status(status, message, retry_after))
}

/// 408, 429 and 5xx are transient; every other non-success status is final.
pub(crate) fn classify_status(
    status: StatusCode,
    message: String,
    retry_after: Option<Duration>,
) -> RemoteError {
    let code = status.as_u16();
    match code {
        408 | 429 | 500..=599 => RemoteError::Unavailable { status: code, message, retry_after },
        400..=499 => RemoteError::Rejected { status: Some(code), message },
        _ => RemoteError::Unavailable { status: code, message, retry_after },
    }
}

fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

async fn error_message(response: Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let from_json = serde_json::from_str::<Value>(&text).ok().and_then(|body| {
        ["error", "message"]
            .iter()
            .find_map(|field| body.get(field).and_then(Value::as_str).map(str::to_owned))
    });
    match from_json {
        Some(message) => message,
        None if !text.trim().is_empty() => text.trim().to_owned(),
        None => status.canonical_reason().unwrap_or("unknown status").to_owned(),
    }
}

fn transport_error(err: TallySyncError) -> RemoteError {
    match err {
        TallySyncError::Timeout(message) => RemoteError::Timeout(message),
        TallySyncError::Config(message) | TallySyncError::InvalidInput(message) => {
            RemoteError::Rejected { status: None, message }
        }
        other => RemoteError::Network(other.to_string()),
    }
}
