//! Bounded background work pool.
//!
//! Jobs are routed to one of `workers` queues by a key (the unit id), so jobs for the
//! same unit run in submission order. Each queue is bounded; `submit` waits for space
//! instead of growing memory. Jobs run detached from the submitting request.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

enum Message {
    Run(Job),
    Flush(oneshot::Sender<()>),
}

pub struct TaskQueue {
    name: &'static str,
    senders: Vec<mpsc::Sender<Message>>,
    cancel: CancellationToken,
}

impl TaskQueue {
    /// Spawns the workers; must be called inside a tokio runtime.
    pub fn new(name: &'static str, workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let capacity = capacity.max(1);
        let mut senders = Vec::with_capacity(workers);
        for worker in 0..workers {
            let (tx, rx) = mpsc::channel(capacity);
            tokio::spawn(run_worker(name, worker, rx));
            senders.push(tx);
        }
        debug!(target: "statesman::tasks", queue = name, workers, capacity, "task queue started");
        Self { name, senders, cancel: CancellationToken::new() }
    }

    /// Token handed to jobs so retries stop waiting on shutdown.
    pub fn cancellation_token(&self) -> CancellationToken { self.cancel.clone() }

    fn shard(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Queues `job` behind earlier jobs with the same key. Returns `false` when the
    /// queue has shut down and the job was dropped.
    pub async fn submit<F>(&self, key: &str, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = &self.senders[self.shard(key)];
        if sender.send(Message::Run(Box::pin(job))).await.is_err() {
            warn!(target: "statesman::tasks", queue = self.name, key, "task queue closed, job dropped");
            return false;
        }
        true
    }

    /// Resolves once every job queued before the call has finished.
    pub async fn flush(&self) {
        let mut waiters = Vec::with_capacity(self.senders.len());
        for sender in &self.senders {
            let (tx, rx) = oneshot::channel();
            if sender.send(Message::Flush(tx)).await.is_ok() {
                waiters.push(rx);
            }
        }
        let _ = futures_util::future::join_all(waiters).await;
    }

    /// Signals in-flight jobs to stop retrying. Queued jobs still run.
    pub fn shutdown(&self) { self.cancel.cancel(); }
}

async fn run_worker(name: &'static str, worker: usize, mut rx: mpsc::Receiver<Message>) {
    while let Some(message) = rx.recv().await {
        match message {
            Message::Run(job) => {
                // own task so a panicking job doesn't take the worker down
                if let Err(e) = tokio::spawn(job).await {
                    error!(target: "statesman::tasks", queue = name, worker, error = %e, "background job panicked");
                }
            }
            Message::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!(target: "statesman::tasks", queue = name, worker, "worker stopped");
}
