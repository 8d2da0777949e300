//! Sharded worker pool.
//!
//! Events are routed to one of N bounded queues by a hash of the author's
//! [`UserKey`]. Each queue is drained by a single task, so two events from the
//! same user are always handled in arrival order while different users run
//! concurrently.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use skylark_types::event::StreamEvent;
use skylark_types::user::UserKey;

/// Consumes decoded events. Implemented by the response pipeline.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, event: StreamEvent) -> impl Future<Output = ()> + Send;
}

pub struct WorkerPool {
    senders: Vec<mpsc::Sender<StreamEvent>>,
    handles: Vec<JoinHandle<()>>,
    enqueue_timeout: Duration,
}

impl WorkerPool {
    pub fn spawn<H: EventHandler>(
        handler: Arc<H>,
        workers: usize,
        queue_capacity: usize,
        enqueue_timeout: Duration,
    ) -> Self {
        let workers = workers.max(1);
        let per_queue = (queue_capacity / workers).max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for shard in 0..workers {
            let (tx, mut rx) = mpsc::channel::<StreamEvent>(per_queue);
            let handler = handler.clone();
            handles.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    handler.handle(event).await;
                }
                debug!(shard, "stream worker stopped");
            }));
            senders.push(tx);
        }

        Self {
            senders,
            handles,
            enqueue_timeout,
        }
    }

    pub fn shard_for(&self, key: Option<&UserKey>) -> usize {
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % self.senders.len() as u64) as usize
            }
            None => 0,
        }
    }

    /// Queue an event on its author's shard. Waits at most the enqueue
    /// timeout; a congested queue drops the event and returns `false`.
    pub async fn dispatch(&self, event: StreamEvent) -> bool {
        let key = event.author().map(|u| u.key());
        let shard = self.shard_for(key.as_ref());
        let kind = event.kind().to_string();
        match self.senders[shard]
            .send_timeout(event, self.enqueue_timeout)
            .await
        {
            Ok(()) => true,
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                warn!(shard, kind = %kind, "event queue congested, dropping event");
                false
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                warn!(shard, kind = %kind, "event queue closed, dropping event");
                false
            }
        }
    }

    pub fn workers(&self) -> usize {
        self.senders.len()
    }

    /// Events waiting across all queues.
    pub fn queued(&self) -> usize {
        self.senders
            .iter()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .sum()
    }

    /// Stop accepting events and let queued work finish within `grace`;
    /// whatever is still running afterwards is aborted.
    pub async fn shutdown(self, grace: Duration) {
        drop(self.senders);
        let mut handles = self.handles;
        let drained = tokio::time::timeout(grace, async {
            for handle in handles.iter_mut() {
                let _ = handle.await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(grace_secs = grace.as_secs(), "stream workers did not drain in time, aborting");
            for handle in &handles {
                handle.abort();
            }
        }
    }
}
