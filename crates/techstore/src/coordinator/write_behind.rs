//! Deferred backing-store writes.
//!
//! Writes are queued on a bounded channel and persisted by a single worker
//! task once their delay has elapsed. Every write has the same delay, so the
//! queue is ordered by due time. Failures are logged, published on a
//! broadcast channel and dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use techstore_core::storage::{BackingStore, StoreError};

/// Capacity of the flush-failure broadcast channel.
const FAILURE_CHANNEL_CAPACITY: usize = 256;

/// A deferred write that could not be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushFailure {
    pub key: String,
    pub error: StoreError,
}

#[derive(Debug)]
struct PendingWrite {
    key: String,
    value: Vec<u8>,
    due: Instant,
}

/// Handle to the write-behind worker.
pub(crate) struct WriteBehindQueue {
    sender: Mutex<Option<mpsc::Sender<PendingWrite>>>,
    drain: watch::Sender<bool>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
    failures: broadcast::Sender<FlushFailure>,
    delay: Duration,
}

impl WriteBehindQueue {
    /// Spawns the worker. Must be called from within a tokio runtime.
    pub(crate) fn spawn(store: Arc<dyn BackingStore>, delay: Duration, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (drain, drain_rx) = watch::channel(false);
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = tokio::spawn(run_worker(
            store,
            receiver,
            drain_rx,
            Arc::clone(&pending),
            failures.clone(),
        ));

        Self {
            sender: Mutex::new(Some(sender)),
            drain,
            worker: tokio::sync::Mutex::new(Some(worker)),
            pending,
            failures,
            delay,
        }
    }

    /// Queues `value` for `key`, waiting for room if the queue is full.
    ///
    /// Returns false once the queue has been closed.
    pub(crate) async fn enqueue(&self, key: &str, value: Vec<u8>) -> bool {
        let sender = match self.sender.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let Some(sender) = sender else {
            return false;
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        let write = PendingWrite {
            key: key.to_string(),
            value,
            due: Instant::now() + self.delay,
        };

        if sender.send(write).await.is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub(crate) fn subscribe_failures(&self) -> broadcast::Receiver<FlushFailure> {
        self.failures.subscribe()
    }

    /// Stops accepting writes, flushes everything queued without waiting for
    /// its delay and waits for the worker to finish.
    pub(crate) async fn shutdown(&self) {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);
        self.drain.send_replace(true);

        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };
        if let Err(err) = worker.await {
            tracing::error!(error = %err, "Write-behind worker panicked");
        }
    }
}

async fn run_worker(
    store: Arc<dyn BackingStore>,
    mut receiver: mpsc::Receiver<PendingWrite>,
    mut drain: watch::Receiver<bool>,
    pending: Arc<AtomicUsize>,
    failures: broadcast::Sender<FlushFailure>,
) {
    while let Some(write) = receiver.recv().await {
        if !*drain.borrow() {
            tokio::select! {
                _ = tokio::time::sleep_until(write.due) => {}
                _ = drain.changed() => {}
            }
        }

        match store.write(&write.key, &write.value).await {
            Ok(()) => tracing::trace!(key = %write.key, "Write-behind flushed"),
            Err(error) => {
                tracing::error!(key = %write.key, error = %error, "Write-behind flush failed, dropping write");
                // No receivers is fine
                let _ = failures.send(FlushFailure {
                    key: write.key,
                    error,
                });
            }
        }
        pending.fetch_sub(1, Ordering::SeqCst);
    }

    tracing::debug!("Write-behind worker stopped");
}
