//! # Queue Runner
//!
//! Owns one run: seed the queue, spawn the workers against a shared
//! transport, wait for the drain, and collect every terminal action
//! into a [`RunReport`].
//!
//! Workers are aborted after the drain; they hold no state of their
//! own, so cancellation at the `pop` await point is clean.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::action::{Action, ActionId};
use crate::error::QueueError;
use crate::queue::ActionQueue;
use crate::transport::{HttpConfig, HttpTransport, Transport};
use crate::worker::run_worker;

/// Workers spawned when the caller does not say otherwise
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Configures and drives one batch of actions to completion.
pub struct QueueRunner {
    worker_count: usize,
    transport: Option<Arc<dyn Transport>>,
    http_config: HttpConfig,
}

impl QueueRunner {
    pub fn new() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            transport: None,
            http_config: HttpConfig::default(),
        }
    }

    /// Set the number of concurrent workers (at least one)
    pub fn with_workers(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    /// Substitute the transport (tests use a mock here)
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Configure the HTTP transport built when none is substituted
    pub fn with_http_config(mut self, config: HttpConfig) -> Self {
        self.http_config = config;
        self
    }

    /// Run the actions to completion and return every terminal action.
    ///
    /// Resolves once the queue has fully drained, including every retry
    /// and page sibling fanned out along the way.
    pub async fn run(&self, actions: Vec<Action>) -> Result<RunReport, QueueError> {
        let seeded = actions.len();
        if seeded == 0 {
            return Ok(RunReport {
                actions: Vec::new(),
                seeded: 0,
                elapsed: Duration::ZERO,
            });
        }

        let transport: Arc<dyn Transport> = match &self.transport {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(HttpTransport::new(self.http_config.clone())?),
        };

        let queue = Arc::new(ActionQueue::new());
        for action in actions {
            queue.push(action);
        }

        info!(
            seeded,
            workers = self.worker_count,
            transport = transport.name(),
            "starting run"
        );
        let started = Instant::now();

        let (completed_tx, mut completed_rx) = mpsc::unbounded_channel();
        let workers: Vec<_> = (0..self.worker_count)
            .map(|index| {
                tokio::spawn(run_worker(
                    index,
                    Arc::clone(&queue),
                    Arc::clone(&transport),
                    completed_tx.clone(),
                ))
            })
            .collect();
        drop(completed_tx);

        queue.join().await;

        for handle in &workers {
            handle.abort();
        }
        // Cancellation is the expected way down
        let _ = futures::future::join_all(workers).await;

        let mut finished = Vec::new();
        while let Ok(action) = completed_rx.try_recv() {
            finished.push(action);
        }

        let elapsed = started.elapsed();
        let succeeded = finished.iter().filter(|a| a.succeeded()).count();
        info!(
            seeded,
            completed = finished.len(),
            succeeded,
            failed = finished.len() - succeeded,
            elapsed_ms = elapsed.as_millis() as u64,
            "run drained"
        );
        debug!(unfinished = queue.unfinished(), queued = queue.len(), "queue state after drain");

        Ok(RunReport {
            actions: finished,
            seeded,
            elapsed,
        })
    }
}

impl Default for QueueRunner {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// RUN REPORT
// ============================================================================

/// Every terminal action from one run, plus timing.
///
/// Contains more actions than were seeded when pagination fanned out
/// siblings during the run.
pub struct RunReport {
    pub actions: Vec<Action>,
    /// Actions pushed before the workers started
    pub seeded: usize,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(|a| a.succeeded())
    }

    pub fn failed(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(|a| !a.succeeded())
    }

    pub fn find(&self, id: ActionId) -> Option<&Action> {
        self.actions.iter().find(|a| a.id() == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Page siblings fanned out by `parent`, ordered by page number
    pub fn children_of(&self, parent: ActionId) -> Vec<&Action> {
        let mut children: Vec<&Action> = self
            .actions
            .iter()
            .filter(|a| a.parent == Some(parent))
            .collect();
        children.sort_by_key(|a| a.page);
        children
    }

    /// Merge the captured JSON of a paginated action and its siblings
    /// into one value, in page order. Array bodies are concatenated;
    /// anything else is collected into an array per page.
    pub fn consolidated_data(&self, parent: ActionId) -> Option<serde_json::Value> {
        let parent_action = self.find(parent)?;
        let mut pages: Vec<&Action> = vec![parent_action];
        pages.extend(self.children_of(parent));
        pages.sort_by_key(|a| a.page);

        let mut merged = Vec::new();
        for page in pages {
            match &page.data {
                Some(serde_json::Value::Array(items)) => merged.extend(items.iter().cloned()),
                Some(other) => merged.push(other.clone()),
                None => {}
            }
        }
        Some(serde_json::Value::Array(merged))
    }

    pub fn actions_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.actions.len() as f64 / secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_run_resolves_immediately() {
        let report = QueueRunner::new().run(Vec::new()).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(report.seeded, 0);
    }

    #[test]
    fn worker_count_is_clamped_to_one() {
        let runner = QueueRunner::new().with_workers(0);
        assert_eq!(runner.worker_count, 1);
    }

    #[test]
    fn consolidated_data_merges_in_page_order() {
        let mut parent = Action::builder("fetch", "GET", "https://api.test/items")
            .build()
            .unwrap();
        let mut page3 = parent.make_page_sibling(3, 3);
        let mut page2 = parent.make_page_sibling(2, 3);
        parent.data = Some(serde_json::json!([1, 2]));
        page2.data = Some(serde_json::json!([3]));
        page3.data = Some(serde_json::json!([4, 5]));
        let parent_id = parent.id();

        // Completion order scrambled on purpose
        let report = RunReport {
            actions: vec![page3, parent, page2],
            seeded: 1,
            elapsed: Duration::from_millis(5),
        };

        assert_eq!(
            report.consolidated_data(parent_id),
            Some(serde_json::json!([1, 2, 3, 4, 5]))
        );
    }
}
