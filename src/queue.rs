//! # Action Queue
//!
//! FIFO queue that owns actions while they wait. Workers take an action
//! out, run it, and must account for it with [`ActionQueue::task_done`]
//! whether it finished or re-enqueued itself.
//!
//! Completion is tracked separately from queue length: `unfinished`
//! counts every pushed action that has not yet been `task_done`'d, so
//! [`ActionQueue::join`] keeps waiting while callbacks are still fanning
//! out new work (retries, page siblings) even at moments when the queue
//! itself is momentarily empty.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::action::Action;

/// Unbounded FIFO with push/pop/task_done completion accounting.
///
/// The queue is unbounded on purpose: a bounded push could deadlock a
/// worker re-enqueueing its own retry while every slot is taken.
pub struct ActionQueue {
    items: Mutex<VecDeque<Action>>,
    /// Signals waiters in `pop` that an item may be available
    available: Notify,
    /// Pushed actions not yet accounted for by `task_done`
    unfinished: AtomicUsize,
    /// Signals waiters in `join` that the count may have reached zero
    drained: Notify,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            unfinished: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    /// Move an action into the queue and bump the unfinished count.
    ///
    /// Never blocks, so it is safe to call from inside a worker that is
    /// mid-way through processing another action.
    pub fn push(&self, action: Action) {
        self.unfinished.fetch_add(1, Ordering::AcqRel);
        self.items
            .lock()
            .expect("queue mutex poisoned")
            .push_back(action);
        self.available.notify_one();
    }

    /// Take ownership of the next action, waiting until one arrives.
    pub async fn pop(&self) -> Action {
        loop {
            // Register interest before checking, so a push between the
            // check and the await cannot be missed.
            let notified = self.available.notified();
            {
                let mut items = self.items.lock().expect("queue mutex poisoned");
                if let Some(action) = items.pop_front() {
                    // A stored permit covers one waiter; cascade the
                    // wakeup while items remain for the others.
                    if !items.is_empty() {
                        self.available.notify_one();
                    }
                    return action;
                }
            }
            notified.await;
        }
    }

    /// Account for one previously popped action.
    pub fn task_done(&self) {
        let previous = self.unfinished.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "task_done without matching push");
        if previous == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Wait until every pushed action has been accounted for.
    pub async fn join(&self) {
        loop {
            let notified = self.drained.notified();
            if self.unfinished.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Actions currently waiting in the queue (not ones being executed)
    pub fn len(&self) -> usize {
        self.items.lock().expect("queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushed actions not yet `task_done`'d (waiting or executing)
    pub fn unfinished(&self) -> usize {
        self.unfinished.load(Ordering::Acquire)
    }
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn action(name: &str) -> Action {
        Action::builder(name, "GET", "https://api.test/items")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn pop_is_fifo() {
        let queue = ActionQueue::new();
        queue.push(action("a"));
        queue.push(action("b"));
        queue.push(action("c"));

        assert_eq!(queue.pop().await.name, "a");
        assert_eq!(queue.pop().await.name, "b");
        assert_eq!(queue.pop().await.name, "c");
    }

    #[tokio::test]
    async fn join_returns_immediately_when_nothing_pushed() {
        let queue = ActionQueue::new();
        queue.join().await;
    }

    #[tokio::test]
    async fn join_waits_for_task_done() {
        let queue = Arc::new(ActionQueue::new());
        queue.push(action("a"));

        let joiner = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.join().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!joiner.is_finished(), "join resolved before task_done");

        let _ = queue.pop().await;
        queue.task_done();
        tokio::time::timeout(Duration::from_secs(1), joiner)
            .await
            .expect("join did not resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn join_tracks_mid_flight_reenqueue() {
        let queue = Arc::new(ActionQueue::new());
        queue.push(action("first"));

        let first = queue.pop().await;
        // Re-enqueue before accounting for the popped one; the queue
        // must not look drained at any point.
        queue.push(first);
        queue.task_done();
        assert_eq!(queue.unfinished(), 1);

        let _ = queue.pop().await;
        queue.task_done();
        tokio::time::timeout(Duration::from_secs(1), queue.join())
            .await
            .expect("join did not resolve");
    }

    #[tokio::test]
    async fn pop_wakes_on_late_push() {
        let queue = Arc::new(ActionQueue::new());

        let popper = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await.name })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(action("late"));

        let name = tokio::time::timeout(Duration::from_secs(1), popper)
            .await
            .expect("pop did not wake")
            .unwrap();
        assert_eq!(name, "late");
    }

    #[tokio::test]
    async fn concurrent_poppers_each_get_one() {
        let queue = Arc::new(ActionQueue::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move { queue.pop().await.name }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        for i in 0..4 {
            queue.push(action(&format!("a{i}")));
        }

        let mut names = Vec::new();
        for handle in handles {
            let name = tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("popper starved")
                .unwrap();
            names.push(name);
        }
        names.sort();
        assert_eq!(names, ["a0", "a1", "a2", "a3"]);
    }
}
