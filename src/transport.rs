//! # Transport Abstraction Layer
//!
//! Trait and implementations for issuing one HTTP request attempt.
//!
//! - [`Transport`] - core trait the workers execute actions against
//! - [`HttpTransport`] - production transport over a shared `reqwest::Client`
//! - [`MockTransport`] - test transport with scripted replies, no network
//!
//! The transport is shared read-mostly across all workers; `reqwest`
//! multiplexes concurrent requests over its internal connection pool, so
//! one client serves the whole batch.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::QueueError;

/// Default total timeout for one request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One fully-resolved request attempt, ready for the wire.
///
/// Built by the action from its resolved URL and request options, and
/// passed through to the transport verbatim.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    /// Uppercase HTTP method (validated at action construction)
    pub method: String,
    /// Fully resolved URL (no remaining placeholders)
    pub url: String,
    /// Query parameters appended to the URL
    pub query: Vec<(String, String)>,
    /// Request headers
    pub headers: BTreeMap<String, String>,
    /// Optional JSON body
    pub json_body: Option<Value>,
    /// Optional per-request timeout override
    pub timeout: Option<Duration>,
}

/// A completed response, detached from the client that produced it.
///
/// The body is fully read before the response is handed back, so the
/// action owns everything it needs for callbacks and retries.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    /// Header names lowercased for case-insensitive lookup
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, headers: BTreeMap<String, String>, body: Vec<u8>) -> Self {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self {
            status,
            headers,
            body,
        }
    }

    /// Look up a header by name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|v| v.as_str())
    }

    /// Body as (lossy) UTF-8 text
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body decoded as JSON
    pub fn json(&self) -> Result<Value, QueueError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

// ============================================================================
// TRANSPORT TRAIT
// ============================================================================

/// Core trait for executing one request attempt.
///
/// Implementations must be safe to share across worker tasks: `send` is
/// called concurrently from every worker against the same instance.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logs (e.g. "http", "mock")
    fn name(&self) -> &str;

    /// Issue one request. A returned error is a transport-level failure
    /// (connect error, timeout); HTTP error statuses come back as a
    /// normal [`TransportResponse`].
    async fn send(&self, request: &ActionRequest) -> Result<TransportResponse, QueueError>;
}

// ============================================================================
// HTTP TRANSPORT
// ============================================================================

/// Configuration for the production HTTP transport
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
    pub redirect_limit: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: REQUEST_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
            user_agent: format!("requeue/{}", env!("CARGO_PKG_VERSION")),
            redirect_limit: 5,
        }
    }
}

/// Production transport over a shared `reqwest::Client` (connection pooling)
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport with the given configuration.
    ///
    /// A failure here is a session setup failure and propagates to the
    /// caller rather than being swallowed per-action.
    pub fn new(config: HttpConfig) -> Result<Self, QueueError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.redirect_limit))
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| QueueError::Session(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, request: &ActionRequest) -> Result<TransportResponse, QueueError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| QueueError::InvalidMethod(request.method.clone()))?;

        let mut builder = self.client.request(method, &request.url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.json_body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(TransportResponse::new(status, headers, body))
    }
}

// ============================================================================
// MOCK TRANSPORT
// ============================================================================

/// One scripted reply for the mock transport
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Respond with a status, headers and body
    Respond(TransportResponse),
    /// Fail below the HTTP layer (connection reset, timeout)
    Error(String),
}

impl MockReply {
    /// Bare status with an empty body
    pub fn status(status: u16) -> Self {
        MockReply::Respond(TransportResponse::new(status, BTreeMap::new(), Vec::new()))
    }

    /// 200 with a JSON body
    pub fn ok_json(body: &Value) -> Self {
        MockReply::Respond(TransportResponse::new(
            200,
            BTreeMap::new(),
            serde_json::to_vec(body).expect("serializable test body"),
        ))
    }

    /// 200 with a text body
    pub fn ok_text(body: &str) -> Self {
        MockReply::Respond(TransportResponse::new(
            200,
            BTreeMap::new(),
            body.as_bytes().to_vec(),
        ))
    }

    /// Attach a header to a `Respond` reply
    pub fn with_header(self, name: &str, value: &str) -> Self {
        match self {
            MockReply::Respond(resp) => {
                let mut headers: BTreeMap<String, String> = resp
                    .headers
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                headers.insert(name.to_string(), value.to_string());
                MockReply::Respond(TransportResponse::new(resp.status, headers, resp.body))
            }
            other => other,
        }
    }

    /// A transport-level failure
    pub fn error(message: impl Into<String>) -> Self {
        MockReply::Error(message.into())
    }
}

/// Mock transport that returns scripted replies without any network.
///
/// Replies are consumed FIFO; when the queue is empty the default reply
/// is repeated. Every request is recorded for assertions.
pub struct MockTransport {
    /// Queue of replies to return (FIFO)
    replies: Mutex<Vec<MockReply>>,
    /// Reply repeated once the queue is empty
    default_reply: MockReply,
    /// Artificial per-request latency, to make concurrency observable
    latency: Option<Duration>,
    /// Track all requests made (for assertions)
    requests: Mutex<Vec<ActionRequest>>,
}

impl MockTransport {
    /// Mock that answers 200 with an empty body forever
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(Vec::new()),
            default_reply: MockReply::status(200),
            latency: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Mock with a queue of scripted replies
    pub fn with_replies(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies),
            ..Self::new()
        }
    }

    /// Set the reply used once the queue is empty
    pub fn with_default(mut self, reply: MockReply) -> Self {
        self.default_reply = reply;
        self
    }

    /// Add artificial latency to every request
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// All requests made against this transport
    pub fn requests(&self) -> Vec<ActionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests made
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, request: &ActionRequest) -> Result<TransportResponse, QueueError> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let reply = {
            let mut queue = self.replies.lock().unwrap();
            if queue.is_empty() {
                self.default_reply.clone()
            } else {
                queue.remove(0)
            }
        };

        match reply {
            MockReply::Respond(response) => Ok(response),
            MockReply::Error(message) => Err(QueueError::Transport(message)),
        }
    }
}
