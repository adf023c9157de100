//! Dispatcher contract and the in-process queue dispatcher.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use geargate_core::config::DispatcherConfig;
use geargate_core::job::Job;
use geargate_core::request_id::RequestId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::completion::{Completion, CompletionHandle, Outcome, completion};
use crate::error::{DispatchError, DispatchResult};
use crate::executor::JobExecutor;

/// Accepts jobs on behalf of the gateway.
///
/// Implementations must be safe to call from many request tasks at once
/// and must deduplicate by [`Job::request_id`]. On success the job and its
/// response sink belong to the dispatcher.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, job: Job) -> DispatchResult<Completion>;
}

/// A job waiting for a worker.
struct Queued {
    job: Job,
    done: CompletionHandle,
}

/// Request ids that are running or recently completed.
struct DedupTable {
    running: HashMap<RequestId, Completion>,
    completed: HashSet<RequestId>,
    completed_order: VecDeque<RequestId>,
    completed_capacity: usize,
}

enum Seen {
    Running(Completion),
    Completed,
    New,
}

impl DedupTable {
    fn new(completed_capacity: usize) -> Self {
        Self {
            running: HashMap::new(),
            completed: HashSet::new(),
            completed_order: VecDeque::new(),
            completed_capacity,
        }
    }

    fn lookup(&self, id: &RequestId) -> Seen {
        if let Some(completion) = self.running.get(id) {
            return Seen::Running(completion.clone());
        }
        if self.completed.contains(id) {
            return Seen::Completed;
        }
        Seen::New
    }

    fn start(&mut self, id: RequestId, completion: Completion) {
        self.running.insert(id, completion);
    }

    /// Move `id` out of running. Succeeded ids are remembered as completed,
    /// evicting the oldest beyond capacity; failed ids may be retried.
    fn finish(&mut self, id: &RequestId, outcome: Outcome) {
        self.running.remove(id);
        if outcome == Outcome::Failed || self.completed_capacity == 0 {
            return;
        }
        if self.completed.insert(id.clone()) {
            self.completed_order.push_back(id.clone());
        }
        while self.completed_order.len() > self.completed_capacity {
            if let Some(oldest) = self.completed_order.pop_front() {
                self.completed.remove(&oldest);
            }
        }
    }
}

struct Inner {
    tx: Option<mpsc::Sender<Queued>>,
    table: DedupTable,
}

/// Bounded in-process dispatcher backed by a worker pool.
///
/// Submissions never wait: a full queue is reported as
/// [`DispatchError::QueueFull`].
pub struct QueueDispatcher {
    inner: Arc<Mutex<Inner>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl QueueDispatcher {
    /// Start the worker pool. Must be called inside a tokio runtime.
    pub fn start<E: JobExecutor>(executor: Arc<E>, config: &DispatcherConfig) -> Self {
        let (tx, rx) = mpsc::channel::<Queued>(config.queue_depth.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let inner = Arc::new(Mutex::new(Inner {
            tx: Some(tx),
            table: DedupTable::new(config.completed_capacity),
        }));

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let inner = Arc::clone(&inner);
                let executor = Arc::clone(&executor);
                tokio::spawn(async move {
                    loop {
                        // Hold the receiver lock only while dequeuing.
                        let next = rx.lock().await.recv().await;
                        let Some(Queued { job, done }) = next else {
                            break;
                        };
                        let id = job.request_id().clone();
                        let kind = job.kind();
                        debug!(worker, %kind, request_id = %id, "job started");
                        // A panicking executor takes down only its own task.
                        let runner = Arc::clone(&executor);
                        let run = tokio::spawn(async move { runner.execute(job).await });
                        let outcome = match run.await {
                            Ok(()) => Outcome::Succeeded,
                            Err(e) => {
                                error!(worker, %kind, request_id = %id, error = %e, "job execution failed");
                                Outcome::Failed
                            }
                        };
                        match inner.lock() {
                            Ok(mut inner) => inner.table.finish(&id, outcome),
                            Err(e) => warn!(error = %e, "dedup table poisoned"),
                        }
                        done.finish(outcome);
                        debug!(worker, %kind, request_id = %id, ?outcome, "job finished");
                    }
                    debug!(worker, "dispatcher worker stopped");
                })
            })
            .collect();

        info!(
            workers = config.workers.max(1),
            queue_depth = config.queue_depth.max(1),
            "dispatcher started"
        );

        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Stop accepting jobs, let queued jobs drain, and wait for the workers.
    pub async fn shutdown(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.tx = None;
        }
        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => Vec::new(),
        };
        for worker in workers {
            let _ = worker.await;
        }
        info!("dispatcher stopped");
    }

    /// Number of jobs currently running or queued.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().map(|i| i.table.running.len()).unwrap_or(0)
    }
}

impl Dispatcher for QueueDispatcher {
    fn dispatch(&self, job: Job) -> DispatchResult<Completion> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|e| DispatchError::Internal(e.to_string()))?;
        let Some(tx) = inner.tx.clone() else {
            return Err(DispatchError::ShuttingDown);
        };

        let id = job.request_id().clone();
        match inner.table.lookup(&id) {
            Seen::Running(completion) => {
                debug!(request_id = %id, "joining in-flight job");
                return Ok(completion);
            }
            Seen::Completed => return Err(DispatchError::RanToCompletion),
            Seen::New => {}
        }

        let (done, completion) = completion();
        match tx.try_send(Queued { job, done }) {
            Ok(()) => {
                inner.table.start(id, completion.clone());
                Ok(completion)
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(DispatchError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::ShuttingDown),
        }
    }
}
