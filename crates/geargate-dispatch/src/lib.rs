//! geargate-dispatch — the dispatcher side of job submission.
//!
//! The gateway relies on one operation, [`Dispatcher::dispatch`], which
//! either accepts a job and returns a [`Completion`] to wait on, or reports
//! an immediate outcome ([`DispatchError`]).
//!
//! [`QueueDispatcher`] is an in-process implementation:
//!
//! ```text
//! QueueDispatcher
//!   ├── DedupTable (request id → running completion | completed)
//!   ├── bounded mpsc queue
//!   └── N workers ── JobExecutor::execute(job)
//! ```

pub mod completion;
pub mod dispatcher;
pub mod error;
pub mod executor;

pub use completion::{Completion, CompletionHandle, Outcome, completion};
pub use dispatcher::{Dispatcher, QueueDispatcher};
pub use error::{DispatchError, DispatchResult};
pub use executor::{AcknowledgeExecutor, JobExecutor};
