//! # Actions
//!
//! An [`Action`] is one unit of HTTP work: a resolved URL, request
//! options, a retry policy and a set of outcome callbacks. Actions are
//! built up front with [`ActionBuilder`], pushed into the queue, and
//! owned by exactly one worker at a time while executing.
//!
//! The URL template is resolved once at construction; a retried action
//! re-sends the identical request.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::callback::{ActionCallback, CallbackSet, Outcome};
use crate::error::QueueError;
use crate::queue::ActionQueue;
use crate::retry::RetryPolicy;
use crate::template;
use crate::transport::{ActionRequest, Transport, TransportResponse};

/// Methods an action may carry
const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"];

static NEXT_ACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique, monotonically increasing action identifier.
///
/// Ids are process-global so page siblings and their parents can be
/// linked without holding references across worker tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(u64);

impl ActionId {
    fn next() -> Self {
        ActionId(NEXT_ACTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One unit of queued HTTP work
pub struct Action {
    id: ActionId,
    /// Human-readable name, used in logs and result file names
    pub name: String,
    pub method: String,
    /// Fully resolved URL
    pub url: String,
    /// Template parameters the URL was resolved from (copied into siblings)
    pub params: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub json_body: Option<Value>,
    pub timeout: Option<Duration>,
    pub policy: RetryPolicy,
    /// Retries consumed so far (attempts = retry_count + 1 when terminal)
    pub retry_count: u32,
    /// Total send attempts made
    pub attempts: u32,
    /// Last response received, if any attempt reached the server
    pub response: Option<TransportResponse>,
    /// Transport-level failure message, when no response was received
    pub transport_error: Option<String>,
    /// Response body captured as JSON by [`crate::callback::ResponseToJson`]
    pub data: Option<Value>,
    /// Response body captured as text by [`crate::callback::ResponseToText`]
    pub text: Option<String>,
    /// Free-form side channel for callbacks. Page siblings start empty.
    pub context: BTreeMap<String, Value>,
    pub callbacks: CallbackSet,
    /// Set on page siblings: the action whose response announced the pages
    pub parent: Option<ActionId>,
    /// Ids of page siblings this action fanned out
    pub children: Vec<ActionId>,
    /// 1-based page number (1 for ordinary actions)
    pub page: u32,
    /// Total pages, once known
    pub page_count: Option<u32>,
}

impl Action {
    pub fn builder(name: impl Into<String>, method: impl Into<String>, url_template: impl Into<String>) -> ActionBuilder {
        ActionBuilder::new(name, method, url_template)
    }

    pub fn id(&self) -> ActionId {
        self.id
    }

    /// Terminal outcome classification for reporting.
    ///
    /// Success is status 200 exactly; other 2xx statuses route to the
    /// fail outcome so handlers only ever process a full response body.
    pub fn succeeded(&self) -> bool {
        matches!(&self.response, Some(r) if r.status == 200)
    }

    fn build_request(&self) -> ActionRequest {
        ActionRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            query: self.query.clone(),
            headers: self.headers.clone(),
            json_body: self.json_body.clone(),
            timeout: self.timeout,
        }
    }

    /// Build the sibling action for one extra page of a paginated response.
    ///
    /// The sibling repeats the request with its `page` parameter replaced,
    /// carries the same callbacks and policy, starts with a fresh retry
    /// budget and an empty context, and points back at this action.
    pub fn make_page_sibling(&mut self, page: u32, page_count: u32) -> Action {
        let mut params = self.params.clone();
        params.insert("page".to_string(), page.to_string());

        let mut query = self.query.clone();
        match query.iter_mut().find(|(name, _)| name == "page") {
            Some(entry) => entry.1 = page.to_string(),
            None => query.push(("page".to_string(), page.to_string())),
        }

        let sibling = Action {
            id: ActionId::next(),
            name: format!("{}_page_{}_of_{}", self.name, page, page_count),
            method: self.method.clone(),
            url: self.url.clone(),
            params,
            query,
            headers: self.headers.clone(),
            json_body: self.json_body.clone(),
            timeout: self.timeout,
            policy: self.policy.clone(),
            retry_count: 0,
            attempts: 0,
            response: None,
            transport_error: None,
            data: None,
            text: None,
            context: BTreeMap::new(),
            callbacks: self.callbacks.clone(),
            parent: Some(self.id),
            children: Vec::new(),
            page,
            page_count: Some(page_count),
        };
        self.children.push(sibling.id);
        self.page_count = Some(page_count);
        sibling
    }

    /// Execute one attempt against the transport and classify the outcome.
    ///
    /// Returns `Some(self)` when the action reached a terminal outcome
    /// (success or fail), or `None` when it re-enqueued itself for a
    /// retry. The caller still owes the queue a `task_done` either way.
    pub async fn execute(mut self, queue: &ActionQueue, transport: &dyn Transport) -> Option<Action> {
        self.attempts += 1;
        let request = self.build_request();

        debug!(
            action = %self.id,
            name = %self.name,
            attempt = self.attempts,
            "{} {}", self.method, self.url
        );

        let outcome = match transport.send(&request).await {
            Ok(response) => {
                let status = response.status;
                self.response = Some(response);
                if status == 200 {
                    Outcome::Success
                } else if self.policy.is_retryable_status(status)
                    && self.policy.allows(self.retry_count)
                {
                    Outcome::Retry
                } else {
                    Outcome::Fail
                }
            }
            Err(error) => {
                // No response reached us; transport failures are terminal
                self.transport_error = Some(error.to_string());
                Outcome::Fail
            }
        };

        match outcome {
            Outcome::Retry => {
                self.retry_count += 1;
                self.dispatch(Outcome::Retry, queue).await;
                let delay = self.policy.backoff_delay(self.retry_count);
                debug!(action = %self.id, retry = self.retry_count, ?delay, "backing off");
                tokio::time::sleep(delay).await;
                queue.push(self);
                None
            }
            outcome => {
                self.dispatch(outcome, queue).await;
                Some(self)
            }
        }
    }

    /// Run every callback registered for the outcome, in registration order.
    ///
    /// A callback error is logged and recorded but does not stop the
    /// remaining callbacks or change the action's outcome.
    async fn dispatch(&mut self, outcome: Outcome, queue: &ActionQueue) {
        let callbacks: Vec<std::sync::Arc<dyn ActionCallback>> =
            self.callbacks.for_outcome(outcome).to_vec();
        for callback in callbacks {
            if let Err(error) = callback.call(self, queue, outcome).await {
                warn!(
                    action = %self.id,
                    name = %self.name,
                    callback = callback.name(),
                    "callback failed: {error:#}"
                );
                self.context.insert(
                    format!("callback_error:{}", callback.name()),
                    Value::String(format!("{error:#}")),
                );
            }
        }
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("retry_count", &self.retry_count)
            .field("attempts", &self.attempts)
            .field("page", &self.page)
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Builder for [`Action`]. Validates the method and resolves the URL
/// template at `build` time, so a malformed action never enters the queue.
pub struct ActionBuilder {
    name: String,
    method: String,
    url_template: String,
    params: BTreeMap<String, String>,
    query: Vec<(String, String)>,
    headers: BTreeMap<String, String>,
    json_body: Option<Value>,
    timeout: Option<Duration>,
    policy: RetryPolicy,
    callbacks: CallbackSet,
    context: BTreeMap<String, Value>,
}

impl ActionBuilder {
    pub fn new(name: impl Into<String>, method: impl Into<String>, url_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: method.into().to_ascii_uppercase(),
            url_template: url_template.into(),
            params: BTreeMap::new(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            json_body: None,
            timeout: None,
            policy: RetryPolicy::default(),
            callbacks: CallbackSet::new(),
            context: BTreeMap::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn json_body(mut self, body: Value) -> Self {
        self.json_body = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn on(mut self, outcome: Outcome, callback: std::sync::Arc<dyn ActionCallback>) -> Self {
        self.callbacks.add(outcome, callback);
        self
    }

    pub fn on_success(self, callback: std::sync::Arc<dyn ActionCallback>) -> Self {
        self.on(Outcome::Success, callback)
    }

    pub fn on_fail(self, callback: std::sync::Arc<dyn ActionCallback>) -> Self {
        self.on(Outcome::Fail, callback)
    }

    pub fn on_retry(self, callback: std::sync::Arc<dyn ActionCallback>) -> Self {
        self.on(Outcome::Retry, callback)
    }

    pub fn context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn build(self) -> Result<Action, QueueError> {
        if !ALLOWED_METHODS.contains(&self.method.as_str()) {
            return Err(QueueError::InvalidMethod(self.method));
        }

        let url = template::resolve(&self.url_template, &self.params)?;
        url::Url::parse(&url).map_err(|e| QueueError::InvalidUrl {
            url: url.clone(),
            details: e.to_string(),
        })?;

        let page = self
            .params
            .get("page")
            .and_then(|p| p.parse().ok())
            .unwrap_or(1);

        Ok(Action {
            id: ActionId::next(),
            name: self.name,
            method: self.method,
            url,
            params: self.params,
            query: self.query,
            headers: self.headers,
            json_body: self.json_body,
            timeout: self.timeout,
            policy: self.policy,
            retry_count: 0,
            attempts: 0,
            response: None,
            transport_error: None,
            data: None,
            text: None,
            context: self.context,
            callbacks: self.callbacks,
            parent: None,
            children: Vec::new(),
            page,
            page_count: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_resolves_url_at_construction() {
        let action = Action::builder("fetch", "get", "https://api.test/v1/${region}/items")
            .param("region", "eu")
            .build()
            .unwrap();

        assert_eq!(action.method, "GET");
        assert_eq!(action.url, "https://api.test/v1/eu/items");
        assert_eq!(action.attempts, 0);
        assert_eq!(action.page, 1);
    }

    #[test]
    fn builder_rejects_unknown_method() {
        let err = Action::builder("bad", "FETCH", "https://api.test/")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("FETCH"));
    }

    #[test]
    fn builder_rejects_unresolved_placeholder() {
        let result = Action::builder("bad", "GET", "https://api.test/${missing}/items").build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_rejects_unparseable_url() {
        let result = Action::builder("bad", "GET", "not a url at all").build();
        assert!(result.is_err());
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = Action::builder("a", "GET", "https://api.test/").build().unwrap();
        let b = Action::builder("b", "GET", "https://api.test/").build().unwrap();
        assert!(b.id() > a.id());
    }

    #[test]
    fn page_sibling_shares_request_but_not_state() {
        let mut parent = Action::builder("fetch", "GET", "https://api.test/items")
            .param("page", "1")
            .query("page", "1")
            .build()
            .unwrap();
        parent.context.insert("note".to_string(), Value::from("parent only"));

        let sibling = parent.make_page_sibling(3, 5);

        assert_eq!(sibling.name, "fetch_page_3_of_5");
        assert_eq!(sibling.url, parent.url);
        assert_eq!(sibling.params.get("page").map(String::as_str), Some("3"));
        assert!(sibling.query.contains(&("page".to_string(), "3".to_string())));
        assert_eq!(sibling.parent, Some(parent.id()));
        assert_eq!(sibling.page, 3);
        assert!(sibling.context.is_empty());
        assert_eq!(sibling.retry_count, 0);
        assert!(parent.children.contains(&sibling.id()));
        assert_eq!(parent.page_count, Some(5));
    }
}
