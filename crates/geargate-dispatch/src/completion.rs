//! One-shot completion signals.
//!
//! The producer side ([`CompletionHandle`]) fires once when a job has
//! finished, carrying an [`Outcome`]. Any number of [`Completion`] clones
//! may wait on it, which lets a duplicate submission join an in-flight job.

use tokio::sync::watch;

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The executor returned normally.
    Succeeded,
    /// The executor panicked, or the handle was dropped without firing.
    Failed,
}

/// Producer half. Firing consumes it; dropping it releases waiters with
/// [`Outcome::Failed`].
#[derive(Debug)]
pub struct CompletionHandle {
    tx: watch::Sender<Option<Outcome>>,
}

/// Waiter half.
#[derive(Debug, Clone)]
pub struct Completion {
    rx: watch::Receiver<Option<Outcome>>,
}

/// Create a linked handle and completion.
pub fn completion() -> (CompletionHandle, Completion) {
    let (tx, rx) = watch::channel(None);
    (CompletionHandle { tx }, Completion { rx })
}

impl CompletionHandle {
    /// Signal that the job is done.
    pub fn complete(self) {
        self.finish(Outcome::Succeeded);
    }

    /// Signal that the job ended without finishing its work.
    pub fn fail(self) {
        self.finish(Outcome::Failed);
    }

    pub fn finish(self, outcome: Outcome) {
        self.tx.send_replace(Some(outcome));
    }
}

impl Completion {
    /// A completion that has already succeeded.
    pub fn ready() -> Self {
        let (handle, completion) = completion();
        handle.complete();
        completion
    }

    pub fn is_complete(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// The outcome, if the job has finished.
    pub fn outcome(&self) -> Option<Outcome> {
        *self.rx.borrow()
    }

    /// Wait until the job finishes or its producer goes away.
    pub async fn wait(mut self) -> Outcome {
        match self.rx.wait_for(Option::is_some).await {
            Ok(state) => (*state).unwrap_or(Outcome::Failed),
            Err(_) => Outcome::Failed,
        }
    }
}
