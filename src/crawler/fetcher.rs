//! HTTP fetcher implementation
//!
//! This module handles the scheduler → processor hop of the pipeline:
//! - The `Fetcher` capability consumed by fetch workers
//! - `HttpFetcher`, a reqwest-backed implementation with a polite user agent
//! - The fetch worker loop moving requests from the fetch queue to the
//!   process queue
//!
//! Transport failures never surface as errors: they are carried inside the
//! [`FetchResponse`] so the processor can report them to the scheduler.

use crate::config::{FetcherConfig, UserAgentConfig};
use crate::queue::Queue;
use crate::task::{FetchOutcome, FetchRequest, FetchResponse};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{redirect::Policy, Client, Method, RequestBuilder};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

/// Maximum redirect hops followed for a single request
const MAX_REDIRECTS: usize = 10;

/// Errors raised while preparing a request
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Invalid header '{0}'")]
    InvalidHeader(String),

    #[error("Unsupported HTTP method '{0}'")]
    InvalidMethod(String),
}

/// Fetches the resource a request describes
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Performs the request
    ///
    /// Always returns a response; transport errors are stored in
    /// [`FetchResponse::error`].
    async fn fetch(&self, request: &FetchRequest) -> FetchResponse;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `user_agent` - The user agent configuration
/// * `config` - Fetcher settings; `timeout-secs` becomes the default timeout
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    config: &FetcherConfig,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent.header_value())
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.timeout_secs.min(10)))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetcher backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &UserAgentConfig, config: &FetcherConfig) -> Result<Self, FetchError> {
        Ok(Self::with_client(build_http_client(user_agent, config)?))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Translates a fetch request into a reqwest request
    fn build_request(&self, request: &FetchRequest) -> Result<RequestBuilder, FetchError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| FetchError::InvalidMethod(request.method.clone()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &request.fetch_params.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| FetchError::InvalidHeader(name.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| FetchError::InvalidHeader(name.as_str().to_string()))?;
            headers.insert(name, value);
        }

        let mut builder = self.client.request(method, &request.url).headers(headers);
        if let Some(body) = &request.fetch_params.body {
            builder = builder.body(body.clone());
        }
        if let Some(secs) = request.fetch_params.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(builder)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> FetchResponse {
        let builder = match self.build_request(request) {
            Ok(builder) => builder,
            Err(e) => return FetchResponse::from_error(e.to_string()),
        };

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return FetchResponse::from_error(classify_error(&e)),
        };

        let status_code = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();

        match response.bytes().await {
            Ok(body) => FetchResponse {
                status_code: Some(status_code),
                headers,
                body: body.to_vec(),
                error: None,
            },
            Err(e) => FetchResponse {
                status_code: Some(status_code),
                headers,
                body: Vec::new(),
                error: Some(classify_error(&e)),
            },
        }
    }
}

/// Maps a reqwest error to the message carried in the response
fn classify_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "Request timeout".to_string()
    } else if error.is_connect() {
        format!("Connection failed: {}", error)
    } else if error.is_redirect() {
        format!("Redirect error: {}", error)
    } else {
        error.to_string()
    }
}

/// A fetch worker: fetch queue in, process queue out
pub struct FetchWorker {
    id: usize,
    fetcher: Arc<dyn Fetcher>,
    input: Arc<Queue<FetchRequest>>,
    output: Arc<Queue<FetchOutcome>>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl FetchWorker {
    pub fn new(
        id: usize,
        fetcher: Arc<dyn Fetcher>,
        input: Arc<Queue<FetchRequest>>,
        output: Arc<Queue<FetchOutcome>>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            id,
            fetcher,
            input,
            output,
            shutdown_rx,
        }
    }

    /// Runs until shutdown or until a queue is closed
    ///
    /// Waits on the process queue when it is full, so a slow processor pool
    /// throttles fetching.
    ///
    /// # Returns
    ///
    /// The number of requests fetched
    pub async fn run(mut self) -> u64 {
        tracing::debug!("Fetch worker {} started", self.id);
        let mut fetched = 0;

        loop {
            let request = tokio::select! {
                _ = self.shutdown_rx.recv() => break,
                received = self.input.get(None) => match received {
                    Ok(request) => request,
                    Err(_) => break,
                },
            };

            tracing::debug!(
                "Worker {} fetching {} {} ({}:{})",
                self.id,
                request.method,
                request.url,
                request.project,
                request.task_id
            );
            let response = self.fetcher.fetch(&request).await;
            if let Some(error) = &response.error {
                tracing::debug!("Fetch of {} failed: {}", request.url, error);
            }
            fetched += 1;

            let priority = request.priority;
            let outcome = FetchOutcome {
                task: request,
                fetch_result: response,
            };
            let put = tokio::select! {
                _ = self.shutdown_rx.recv() => break,
                put = self.output.put(outcome, priority, None) => put,
            };
            if let Err(e) = put {
                tracing::warn!(
                    "Fetch worker {} could not hand over {}: {}",
                    self.id,
                    e.item.task.task_id,
                    e.reason
                );
                break;
            }
        }

        tracing::debug!("Fetch worker {} stopped after {} fetches", self.id, fetched);
        fetched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::FetchParams;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_user_agent() -> UserAgentConfig {
        UserAgentConfig {
            crawler_name: "TestCrawler".to_string(),
            crawler_version: "1.0".to_string(),
            contact_url: "https://example.com/about".to_string(),
            contact_email: "admin@example.com".to_string(),
        }
    }

    fn create_test_fetcher() -> HttpFetcher {
        HttpFetcher::new(&create_test_user_agent(), &FetcherConfig::default()).unwrap()
    }

    fn request(url: String) -> FetchRequest {
        FetchRequest {
            task_id: "t".to_string(),
            project: "p".to_string(),
            url,
            method: "GET".to_string(),
            fetch_params: FetchParams::default(),
            priority: 0,
        }
    }

    #[test]
    fn test_build_http_client() {
        let client = build_http_client(&create_test_user_agent(), &FetcherConfig::default());
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_success_sends_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .and(header(
                "user-agent",
                "TestCrawler/1.0 (+https://example.com/about; admin@example.com)",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"))
            .mount(&server)
            .await;

        let response = create_test_fetcher()
            .fetch(&request(format!("{}/page", server.uri())))
            .await;

        assert!(response.is_ok());
        assert_eq!(response.status_code, Some(200));
        assert_eq!(response.content_type(), Some("text/html"));
        assert_eq!(response.body, b"<html></html>");
    }

    #[tokio::test]
    async fn test_fetch_http_error_is_carried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let response = create_test_fetcher()
            .fetch(&request(format!("{}/down", server.uri())))
            .await;

        assert_eq!(response.status_code, Some(503));
        assert!(response.error.is_none());
        assert!(!response.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_applies_params() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .and(header("x-token", "abc"))
            .and(body_string("payload"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let mut req = request(format!("{}/submit", server.uri()));
        req.method = "POST".to_string();
        req.fetch_params = FetchParams::default()
            .with_header("X-Token", "abc")
            .with_body("payload")
            .with_timeout_secs(5);

        let response = create_test_fetcher().fetch(&req).await;
        assert_eq!(response.status_code, Some(201));
    }

    #[tokio::test]
    async fn test_fetch_timeout_is_carried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let mut req = request(format!("{}/slow", server.uri()));
        req.fetch_params = FetchParams::default().with_timeout_secs(1);

        let response = create_test_fetcher().fetch(&req).await;
        assert_eq!(response.error.as_deref(), Some("Request timeout"));
        assert!(response.status_code.is_none());
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        // Nothing listens on port 9 of localhost
        let response = create_test_fetcher()
            .fetch(&request("http://127.0.0.1:9/".to_string()))
            .await;
        assert!(response.error.is_some());
        assert!(!response.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_worker_moves_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let input = Arc::new(Queue::new("fetch", 10));
        let output = Arc::new(Queue::new("process", 10));
        let (shutdown_tx, _) = broadcast::channel(1);
        let worker = FetchWorker::new(
            0,
            Arc::new(create_test_fetcher()),
            input.clone(),
            output.clone(),
            shutdown_tx.subscribe(),
        );
        let handle = tokio::spawn(worker.run());

        input
            .try_put(request(format!("{}/a", server.uri())), 0)
            .unwrap();
        let outcome = output.get(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(outcome.task.task_id, "t");
        assert_eq!(outcome.fetch_result.body, b"ok");

        shutdown_tx.send(()).unwrap();
        assert_eq!(handle.await.unwrap(), 1);
    }
}
