//! Thin reqwest wrapper shared by the remote adapters.
//!
//! Reads go through [`HttpClient::send`], which retries connection failures
//! and 5xx answers. Commits use [`HttpClient::send_once`]; their retries
//! belong to the sync engine, which owns the backoff schedule.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, IntoUrl, Method, RequestBuilder, Response};
use tallysync_domain::TallySyncError;
use tracing::debug;

use crate::errors::InfraError;

/// Doubling stops after this many retries.
const MAX_BACKOFF_DOUBLINGS: u32 = 8;

/// reqwest client plus the in-place retry policy for idempotent reads.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    max_attempts: usize,
    base_backoff: Duration,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("max_attempts", &self.max_attempts)
            .field("base_backoff", &self.base_backoff)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    pub fn request(&self, method: Method, url: impl IntoUrl) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Send with up to `max_attempts` tries. The last 5xx response is
    /// returned as is; the caller classifies it.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, TallySyncError> {
        self.execute(builder, self.max_attempts).await
    }

    /// Send exactly once.
    pub async fn send_once(&self, builder: RequestBuilder) -> Result<Response, TallySyncError> {
        self.execute(builder, 1).await
    }

    async fn execute(
        &self,
        builder: RequestBuilder,
        attempts: usize,
    ) -> Result<Response, TallySyncError> {
        let mut attempt = 1;
        loop {
            let request = builder
                .try_clone()
                .ok_or_else(|| {
                    TallySyncError::Internal("streamed request bodies cannot be resent".into())
                })?
                .build()
                .map_err(transport_error)?;
            debug!(attempt, method = %request.method(), url = %request.url(), "Sending request");

            let outcome = self.client.execute(request).await;
            let retryable = match &outcome {
                Ok(response) => response.status().is_server_error(),
                Err(err) => err.is_connect() || err.is_timeout() || err.is_request(),
            };
            if !retryable || attempt >= attempts {
                return outcome.map_err(transport_error);
            }

            let delay = self.retry_delay(attempt);
            match &outcome {
                Ok(response) => {
                    debug!(attempt, status = %response.status(), ?delay, "Server error, retrying");
                }
                Err(err) => debug!(attempt, error = %err, ?delay, "Request failed, retrying"),
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// `base_backoff` doubled once per earlier retry.
    fn retry_delay(&self, attempt: usize) -> Duration {
        let doublings = u32::try_from(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX)
            .min(MAX_BACKOFF_DOUBLINGS);
        self.base_backoff.saturating_mul(1 << doublings)
    }
}

fn transport_error(err: reqwest::Error) -> TallySyncError {
    TallySyncError::from(InfraError::from(err))
}

/// Builder for [`HttpClient`].
#[derive(Debug)]
pub struct HttpClientBuilder {
    timeout: Duration,
    max_attempts: usize,
    base_backoff: Duration,
    user_agent: Option<String>,
    bearer_token: Option<String>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            user_agent: None,
            bearer_token: None,
        }
    }
}

impl HttpClientBuilder {
    /// Whole-request timeout, connect through body.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Tries per [`HttpClient::send`], the first one included.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Attach `Authorization: Bearer <token>` to every request.
    pub fn bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }

    pub fn build(self) -> Result<HttpClient, TallySyncError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.bearer_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                TallySyncError::Config("bearer token contains invalid header characters".into())
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = Client::builder().timeout(self.timeout).no_proxy().default_headers(headers);
        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        Ok(HttpClient {
            client: builder.build().map_err(transport_error)?,
            max_attempts: self.max_attempts,
            base_backoff: self.base_backoff,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use reqwest::{Method, StatusCode};
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_with_defaults() -> HttpClient {
        HttpClient::builder()
            .base_backoff(Duration::from_millis(10))
            .max_attempts(3)
            .build()
            .expect("http client")
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_an_answer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_defaults();
        let response =
            client.send(client.request(Method::GET, server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn last_server_error_is_returned_when_attempts_run_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_with_defaults();
        let response =
            client.send(client.request(Method::GET, server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn send_once_returns_server_error_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_defaults();
        let response =
            client.send_once(client.request(Method::POST, server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn attaches_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::builder()
            .bearer_token(Some("secret-token".into()))
            .build()
            .expect("http client");
        let response =
            client.send(client.request(Method::GET, server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn retry_delay_doubles_then_levels_off() {
        let client = client_with_defaults();
        assert_eq!(client.retry_delay(1), Duration::from_millis(10));
        assert_eq!(client.retry_delay(3), Duration::from_millis(40));
        assert_eq!(client.retry_delay(40), client.retry_delay(9));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_defaults();
        let response =
            client.send(client.request(Method::GET, server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn connection_refused_is_a_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let url = format!("http://{addr}");

        let client = HttpClient::builder()
            .base_backoff(Duration::from_millis(5))
            .max_attempts(2)
            .build()
            .expect("http client");

        let result = client.send(client.request(Method::GET, &url)).await;
        assert!(matches!(result, Err(TallySyncError::Network(_))), "got {result:?}");
    }
}
