//! # requeue
//!
//! Concurrent HTTP action queue: build actions with templated URLs and
//! retry policies, push them through a pool of workers sharing one
//! client, and react to outcomes with callbacks that can fan out more
//! work (retries, pagination) into the same queue.
//!
//! ```no_run
//! use std::sync::Arc;
//! use requeue::{Action, CheckForPages, QueueRunner, ResponseToJson, RetryPolicy};
//!
//! # async fn demo() -> Result<(), requeue::QueueError> {
//! let action = Action::builder("items", "GET", "https://api.test/v1/${region}/items")
//!     .param("region", "eu")
//!     .policy(RetryPolicy::limited(3))
//!     .on_success(Arc::new(ResponseToJson))
//!     .on_success(Arc::new(CheckForPages))
//!     .build()?;
//!
//! let report = QueueRunner::new().with_workers(5).run(vec![action]).await?;
//! println!("{} actions in {:?}", report.len(), report.elapsed);
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod batch;
pub mod callback;
pub mod error;
pub mod queue;
pub mod retry;
pub mod runner;
pub mod store;
pub mod template;
pub mod transport;
pub mod worker;

pub use action::{Action, ActionBuilder, ActionId};
pub use batch::{ActionSpec, BatchSpec};
pub use callback::{
    ActionCallback, CallbackSet, CheckForPages, LogOutcome, Outcome, ResponseToJson,
    ResponseToText, SaveResultCsv, SaveResultJson, SaveResultText,
};
pub use error::{FixSuggestion, QueueError};
pub use queue::ActionQueue;
pub use retry::{RetryLimit, RetryPolicy};
pub use runner::{QueueRunner, RunReport};
pub use transport::{
    ActionRequest, HttpConfig, HttpTransport, MockReply, MockTransport, Transport,
    TransportResponse,
};
