//! Offline queue for operations issued while connectivity is down.
//!
//! Connectivity changes arrive on a `watch` channel. While offline, calls to
//! [`OfflineQueue::execute`] are parked as deferred continuations; when the
//! channel reports `Online` they are replayed one by one, oldest first,
//! through the [`RetryExecutor`].

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use futures::StreamExt;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;

use super::error::{QueryError, ResilienceError};
use super::retry::RetryExecutor;
use crate::metrics::ResilienceMetrics;

/// Connectivity as reported by a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

type Deferred = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

pub struct OfflineQueue {
    executor: Arc<RetryExecutor>,
    pending: Mutex<VecDeque<Deferred>>,
    online: AtomicBool,
    /// Serializes drains so replay order stays FIFO
    draining: tokio::sync::Mutex<()>,
}

impl OfflineQueue {
    pub fn new(executor: Arc<RetryExecutor>, initial: Connectivity) -> Self {
        Self {
            executor,
            pending: Mutex::new(VecDeque::new()),
            online: AtomicBool::new(initial == Connectivity::Online),
            draining: tokio::sync::Mutex::new(()),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Number of operations waiting for connectivity
    pub fn queue_depth(&self) -> usize {
        self.pending().len()
    }

    /// Run `operation` now if online, otherwise once connectivity returns.
    ///
    /// The returned future resolves with the operation's eventual result.
    /// Dropping it before replay removes the operation from the replay.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, ResilienceError>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        if self.is_online() {
            return self.executor.query_with_retry(operation).await;
        }

        let (tx, rx) = oneshot::channel();
        let executor = Arc::clone(&self.executor);
        let deferred: Deferred = Box::new(move || -> BoxFuture<'static, ()> {
            Box::pin(async move {
                if tx.is_closed() {
                    tracing::debug!("Caller stopped waiting, skipping deferred operation");
                    return;
                }
                let result = executor.query_with_retry(operation).await;
                if let Err(err) = &result {
                    tracing::warn!(error = %err, "Deferred operation failed during replay");
                }
                let _ = tx.send(result);
            })
        });

        let depth = {
            let mut pending = self.pending();
            pending.push_back(deferred);
            pending.len()
        };
        ResilienceMetrics::set_offline_queue_depth(depth);
        tracing::debug!(queue_depth = depth, "Offline, operation deferred");

        // Connectivity may have returned while we were enqueueing
        if self.is_online() {
            self.drain().await;
        }

        rx.await.unwrap_or(Err(ResilienceError::Cancelled))
    }

    /// Apply a connectivity change, replaying the backlog when it is restored
    pub async fn set_connectivity(&self, connectivity: Connectivity) {
        if self.apply_connectivity(connectivity) {
            self.drain().await;
        }
    }

    /// Flip the online flag. Returns true when connectivity was just restored.
    fn apply_connectivity(&self, connectivity: Connectivity) -> bool {
        let online = connectivity == Connectivity::Online;
        let was_online = self.online.swap(online, Ordering::AcqRel);

        match (was_online, online) {
            (false, true) => {
                tracing::info!(
                    queue_depth = self.queue_depth(),
                    "Connectivity restored, replaying deferred operations"
                );
                true
            }
            (true, false) => {
                tracing::warn!("Connectivity lost, deferring new operations");
                false
            }
            _ => false,
        }
    }

    /// Replay deferred operations in FIFO order, one at a time.
    ///
    /// Stops early if connectivity is lost mid-drain. Returns the number of
    /// operations replayed.
    pub async fn drain(&self) -> usize {
        let _guard = self.draining.lock().await;
        let mut replayed = 0;

        while self.is_online() {
            let next = self.pending().pop_front();
            let Some(operation) = next else {
                break;
            };
            ResilienceMetrics::set_offline_queue_depth(self.queue_depth());

            operation().await;
            replayed += 1;
        }

        if replayed > 0 {
            tracing::info!(
                replayed,
                remaining = self.queue_depth(),
                "Offline queue drained"
            );
        }
        replayed
    }

    /// Consume connectivity changes until the sender is dropped.
    ///
    /// Replays run on their own task so a loss of connectivity is observed
    /// while a replay is still in flight.
    pub fn spawn_listener(self: &Arc<Self>, connectivity: watch::Receiver<Connectivity>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut changes = WatchStream::new(connectivity);
            let mut replay: Option<JoinHandle<usize>> = None;

            while let Some(state) = changes.next().await {
                if queue.apply_connectivity(state) {
                    let draining = Arc::clone(&queue);
                    replay = Some(tokio::spawn(async move { draining.drain().await }));
                }
            }

            if let Some(handle) = replay {
                let _ = handle.await;
            }
            tracing::debug!("Connectivity channel closed, offline queue listener stopped");
        })
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<Deferred>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
