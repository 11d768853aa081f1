//! Bounded, non-blocking hand-off from the request path to telemetry sinks.
//!
//! # Responsibilities
//! - Accept items from request handlers without blocking or failing them
//! - Batch items and publish them to a sink from a background worker
//! - Contain sink failures (errors and panics) inside the worker
//!
//! # Overflow policy
//! Drop-newest: when the queue is full the item being dispatched is discarded and
//! counted. Nothing already queued is evicted, and the caller never waits for space.
//! The first drop and every `DROP_WARN_EVERY`th drop after it are reported on the
//! diagnostic target.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::QueueConfig;
use crate::observability::{TransportError, DIAGNOSTIC_TARGET};

const DROP_WARN_EVERY: u64 = 1000;

/// A destination for batches of telemetry items.
///
/// Implementations are shared across all requests and must be internally
/// synchronized.
#[async_trait]
pub trait Sink<T: Send + 'static>: Send + Sync + 'static {
    /// Deliver one batch. An error discards the batch; it is never retried.
    async fn publish(&self, batch: Vec<T>) -> Result<(), TransportError>;
}

/// Counters describing what happened to dispatched items.
#[derive(Debug, Default)]
struct DispatchStats {
    accepted: AtomicU64,
    dropped: AtomicU64,
    published: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of a dispatcher's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    /// Items accepted into the queue.
    pub accepted: u64,
    /// Items discarded because the queue was full or closed.
    pub dropped: u64,
    /// Items the sink acknowledged.
    pub published: u64,
    /// Items lost to sink failures.
    pub failed: u64,
}

/// Sending half of a telemetry queue. Cheap to clone; one per shared client.
pub struct Dispatcher<T> {
    name: &'static str,
    tx: mpsc::Sender<T>,
    stats: Arc<DispatchStats>,
}

impl<T> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<T: Send + 'static> Dispatcher<T> {
    /// Create the queue and spawn its worker.
    ///
    /// The worker exits once every `Dispatcher` clone is dropped, or once `close`
    /// fires, after flushing whatever is already queued. Dropping the sender behind
    /// `close` without sending is not a close signal.
    pub fn spawn(
        name: &'static str,
        sink: Arc<dyn Sink<T>>,
        queue: QueueConfig,
        close: broadcast::Receiver<()>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue.capacity.max(1));
        let stats = Arc::new(DispatchStats::default());

        let worker = Worker {
            name,
            sink,
            rx,
            batch_size: queue.batch_size.max(1),
            stats: stats.clone(),
        };
        let handle = tokio::spawn(worker.run(close));

        (Self { name, tx, stats }, handle)
    }

    /// Queue an item without waiting. Returns `false` if it was dropped.
    pub fn dispatch(&self, item: T) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::counter!("telemetry_queue_dropped_total", "queue" => self.name)
                    .increment(1);
                if dropped == 1 || dropped % DROP_WARN_EVERY == 0 {
                    tracing::warn!(
                        target: DIAGNOSTIC_TARGET,
                        queue = self.name,
                        dropped,
                        "Telemetry queue full; dropping newest items"
                    );
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    target: DIAGNOSTIC_TARGET,
                    queue = self.name,
                    "Telemetry queue closed; item discarded"
                );
                false
            }
        }
    }

    /// Current counters.
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            accepted: self.stats.accepted.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            published: self.stats.published.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }
}

struct Worker<T> {
    name: &'static str,
    sink: Arc<dyn Sink<T>>,
    rx: mpsc::Receiver<T>,
    batch_size: usize,
    stats: Arc<DispatchStats>,
}

impl<T: Send + 'static> Worker<T> {
    async fn run(mut self, mut close: broadcast::Receiver<()>) {
        let mut buffer = Vec::with_capacity(self.batch_size);
        let mut listening = true;

        loop {
            tokio::select! {
                received = self.rx.recv_many(&mut buffer, self.batch_size) => {
                    if received == 0 {
                        break;
                    }
                    let batch = std::mem::replace(&mut buffer, Vec::with_capacity(self.batch_size));
                    self.publish(batch).await;
                }
                signal = close.recv(), if listening => {
                    listening = false;
                    match signal {
                        Err(broadcast::error::RecvError::Closed) => {
                            // Coordinator gone without a signal: keep serving until the
                            // last Dispatcher is dropped.
                            tracing::debug!(queue = self.name, "Close coordinator dropped");
                        }
                        _ => {
                            // Refuse new items; recv_many drains the backlog then returns 0.
                            self.rx.close();
                        }
                    }
                }
            }
        }

        tracing::debug!(queue = self.name, "Telemetry worker stopped");
    }

    async fn publish(&self, batch: Vec<T>) {
        let len = batch.len() as u64;
        let result = AssertUnwindSafe(self.sink.publish(batch)).catch_unwind().await;

        let error = match result {
            Ok(Ok(())) => {
                self.stats.published.fetch_add(len, Ordering::Relaxed);
                return;
            }
            Ok(Err(e)) => e,
            Err(_) => TransportError::SinkPanicked,
        };

        self.stats.failed.fetch_add(len, Ordering::Relaxed);
        tracing::warn!(
            target: DIAGNOSTIC_TARGET,
            queue = self.name,
            batch = len,
            error = %error,
            "Telemetry transport failed; batch discarded"
        );
    }
}
