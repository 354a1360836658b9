//! # Outcome Callbacks
//!
//! Callbacks run inside the worker that owns the action, after the
//! outcome of an attempt is classified. Retry callbacks run before the
//! action is handed back to the queue, so they see the action's state
//! at the moment of the retry decision.
//!
//! Built-ins cover the common cases (capture the body, log, persist,
//! fan out pagination); anything else implements [`ActionCallback`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::action::Action;
use crate::error::QueueError;
use crate::queue::ActionQueue;
use crate::store;

/// Header a paginated endpoint uses to announce its page count
pub const PAGES_HEADER: &str = "x-pages";

/// Terminal-or-retry classification of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// 2xx response
    Success,
    /// Non-retryable status, exhausted retry budget, or transport failure
    Fail,
    /// Retryable status with budget remaining; the action goes back in
    Retry,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Fail => write!(f, "fail"),
            Outcome::Retry => write!(f, "retry"),
        }
    }
}

/// A hook invoked when an action reaches an outcome.
///
/// Callbacks may mutate the action and push new actions into the queue.
/// Errors are reported and recorded on the action but never change the
/// outcome or stop later callbacks.
#[async_trait]
pub trait ActionCallback: Send + Sync + std::fmt::Debug {
    /// Short name for logs and error records
    fn name(&self) -> &str;

    async fn call(
        &self,
        action: &mut Action,
        queue: &ActionQueue,
        outcome: Outcome,
    ) -> anyhow::Result<()>;
}

/// Callbacks registered per outcome, invoked in registration order
#[derive(Clone, Default)]
pub struct CallbackSet {
    success: Vec<Arc<dyn ActionCallback>>,
    fail: Vec<Arc<dyn ActionCallback>>,
    retry: Vec<Arc<dyn ActionCallback>>,
}

impl CallbackSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, outcome: Outcome, callback: Arc<dyn ActionCallback>) {
        match outcome {
            Outcome::Success => self.success.push(callback),
            Outcome::Fail => self.fail.push(callback),
            Outcome::Retry => self.retry.push(callback),
        }
    }

    pub fn for_outcome(&self, outcome: Outcome) -> &[Arc<dyn ActionCallback>] {
        match outcome {
            Outcome::Success => &self.success,
            Outcome::Fail => &self.fail,
            Outcome::Retry => &self.retry,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.success.is_empty() && self.fail.is_empty() && self.retry.is_empty()
    }
}

impl std::fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSet")
            .field("success", &self.success.len())
            .field("fail", &self.fail.len())
            .field("retry", &self.retry.len())
            .finish()
    }
}

// ============================================================================
// BUILT-IN CALLBACKS
// ============================================================================

/// Capture the response body as JSON into `action.data`
#[derive(Debug)]
pub struct ResponseToJson;

#[async_trait]
impl ActionCallback for ResponseToJson {
    fn name(&self) -> &str {
        "response_to_json"
    }

    async fn call(
        &self,
        action: &mut Action,
        _queue: &ActionQueue,
        _outcome: Outcome,
    ) -> anyhow::Result<()> {
        let response = action
            .response
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no response to decode"))?;
        action.data = Some(response.json()?);
        Ok(())
    }
}

/// Capture the response body as text into `action.text`
#[derive(Debug)]
pub struct ResponseToText;

#[async_trait]
impl ActionCallback for ResponseToText {
    fn name(&self) -> &str {
        "response_to_text"
    }

    async fn call(
        &self,
        action: &mut Action,
        _queue: &ActionQueue,
        _outcome: Outcome,
    ) -> anyhow::Result<()> {
        let response = action
            .response
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no response to decode"))?;
        action.text = Some(response.text());
        Ok(())
    }
}

/// Log the outcome of every attempt at an appropriate level
#[derive(Debug)]
pub struct LogOutcome;

#[async_trait]
impl ActionCallback for LogOutcome {
    fn name(&self) -> &str {
        "log_outcome"
    }

    async fn call(
        &self,
        action: &mut Action,
        _queue: &ActionQueue,
        outcome: Outcome,
    ) -> anyhow::Result<()> {
        let status = action.response.as_ref().map(|r| r.status);
        match outcome {
            Outcome::Success => {
                info!(action = %action.id(), name = %action.name, ?status, "success");
            }
            Outcome::Retry => {
                let budget = action.policy.limit.remaining(action.retry_count);
                warn!(
                    action = %action.id(),
                    name = %action.name,
                    ?status,
                    retry = action.retry_count,
                    remaining = %budget,
                    "retrying"
                );
            }
            Outcome::Fail => {
                warn!(
                    action = %action.id(),
                    name = %action.name,
                    ?status,
                    transport_error = action.transport_error.as_deref(),
                    attempts = action.attempts,
                    "failed"
                );
            }
        }
        Ok(())
    }
}

/// Fan out extra page requests announced by a paginated first response.
///
/// Fires only on the first page of an action with no parent, so sibling
/// responses (which repeat the header) never fan out again. Each sibling
/// repeats the request with its page parameter replaced and carries the
/// same callbacks, so page results flow through the same pipeline.
#[derive(Debug)]
pub struct CheckForPages;

#[async_trait]
impl ActionCallback for CheckForPages {
    fn name(&self) -> &str {
        "check_for_pages"
    }

    async fn call(
        &self,
        action: &mut Action,
        queue: &ActionQueue,
        _outcome: Outcome,
    ) -> anyhow::Result<()> {
        if action.page != 1 || action.parent.is_some() {
            return Ok(());
        }
        let Some(response) = action.response.as_ref() else {
            return Ok(());
        };
        let Some(raw) = response.header(PAGES_HEADER) else {
            return Ok(());
        };
        let page_count: u32 = raw
            .parse()
            .map_err(|_| anyhow::anyhow!("unparseable {PAGES_HEADER} header: {raw:?}"))?;
        if page_count <= 1 {
            return Ok(());
        }

        info!(
            action = %action.id(),
            name = %action.name,
            pages = page_count,
            "fanning out {} page siblings", page_count - 1
        );
        for page in 2..=page_count {
            let sibling = action.make_page_sibling(page, page_count);
            queue.push(sibling);
        }
        Ok(())
    }
}

/// Persist the captured JSON body to `<dir>/<action name>.json`
#[derive(Debug)]
pub struct SaveResultJson {
    dir: PathBuf,
}

impl SaveResultJson {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ActionCallback for SaveResultJson {
    fn name(&self) -> &str {
        "save_result_json"
    }

    async fn call(
        &self,
        action: &mut Action,
        _queue: &ActionQueue,
        _outcome: Outcome,
    ) -> anyhow::Result<()> {
        let data = match (&action.data, &action.response) {
            (Some(data), _) => data.clone(),
            (None, Some(response)) => response.json()?,
            (None, None) => anyhow::bail!("no response body to save"),
        };
        let path = self.dir.join(format!("{}.json", action.name));
        store::save_json(&data, &path)?;
        action.context.insert(
            "saved_to".to_string(),
            Value::String(path.display().to_string()),
        );
        Ok(())
    }
}

/// Persist the response body as text to `<dir>/<action name>.txt`
#[derive(Debug)]
pub struct SaveResultText {
    dir: PathBuf,
}

impl SaveResultText {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ActionCallback for SaveResultText {
    fn name(&self) -> &str {
        "save_result_text"
    }

    async fn call(
        &self,
        action: &mut Action,
        _queue: &ActionQueue,
        _outcome: Outcome,
    ) -> anyhow::Result<()> {
        let text = match (&action.text, &action.response) {
            (Some(text), _) => text.clone(),
            (None, Some(response)) => response.text(),
            (None, None) => anyhow::bail!("no response body to save"),
        };
        let path = self.dir.join(format!("{}.txt", action.name));
        store::save_text(&text, &path)?;
        action.context.insert(
            "saved_to".to_string(),
            Value::String(path.display().to_string()),
        );
        Ok(())
    }
}

/// Persist the captured JSON rows as CSV to `<dir>/<action name>.csv`.
///
/// The body must be a JSON array of uniform rows (arrays of scalars, or
/// objects whose first row's keys become the header).
#[derive(Debug)]
pub struct SaveResultCsv {
    dir: PathBuf,
}

impl SaveResultCsv {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ActionCallback for SaveResultCsv {
    fn name(&self) -> &str {
        "save_result_csv"
    }

    async fn call(
        &self,
        action: &mut Action,
        _queue: &ActionQueue,
        _outcome: Outcome,
    ) -> anyhow::Result<()> {
        let data = match (&action.data, &action.response) {
            (Some(data), _) => data.clone(),
            (None, Some(response)) => response.json()?,
            (None, None) => anyhow::bail!("no response body to save"),
        };
        let path = self.dir.join(format!("{}.csv", action.name));
        store::save_csv(&data, &path)?;
        action.context.insert(
            "saved_to".to_string(),
            Value::String(path.display().to_string()),
        );
        Ok(())
    }
}

/// Build a built-in callback from its configuration name.
///
/// Used by the batch loader; library users construct callbacks directly.
pub fn create_callback(name: &str, out_dir: &Path) -> Result<Arc<dyn ActionCallback>, QueueError> {
    match name {
        "to_json" => Ok(Arc::new(ResponseToJson)),
        "to_text" => Ok(Arc::new(ResponseToText)),
        "log" => Ok(Arc::new(LogOutcome)),
        "pages" => Ok(Arc::new(CheckForPages)),
        "save_json" => Ok(Arc::new(SaveResultJson::new(out_dir))),
        "save_text" => Ok(Arc::new(SaveResultText::new(out_dir))),
        "save_csv" => Ok(Arc::new(SaveResultCsv::new(out_dir))),
        other => Err(QueueError::Callback(format!(
            "unknown callback '{other}' (expected one of: to_json, to_text, log, pages, save_json, save_text, save_csv)"
        ))),
    }
}
