//! Worker task: pop, execute, account, repeat.
//!
//! Workers never exit on their own; the runner aborts them after
//! `join` resolves. An action that re-enqueues itself for a retry has
//! already bumped the unfinished count, so `task_done` here is always
//! for the action just popped.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::action::Action;
use crate::queue::ActionQueue;
use crate::transport::Transport;

/// Run one worker against the shared queue and transport.
///
/// Terminal actions are handed to `completed`; retries go back through
/// the queue without touching the channel. Every popped action is
/// accounted for with `task_done`, including when a user callback
/// panics: the panic is caught and logged, the action counts as a
/// terminal failure, and drain detection keeps working.
pub async fn run_worker(
    index: usize,
    queue: Arc<ActionQueue>,
    transport: Arc<dyn Transport>,
    completed: mpsc::UnboundedSender<Action>,
) {
    debug!(worker = index, "worker started");
    loop {
        let action = queue.pop().await;
        let id = action.id();
        let name = action.name.clone();
        let executed = AssertUnwindSafe(action.execute(queue.as_ref(), transport.as_ref()))
            .catch_unwind()
            .await;
        match executed {
            Ok(Some(finished)) => {
                if completed.send(finished).is_err() {
                    // Runner dropped the receiver; nothing left to report to.
                    error!(worker = index, action = %id, "completed-action channel closed");
                }
            }
            Ok(None) => {} // re-enqueued for retry
            Err(panic) => {
                error!(
                    worker = index,
                    action = %id,
                    name = %name,
                    "callback panicked: {}",
                    panic_message(&panic)
                );
            }
        }
        queue.task_done();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
