//! Dispatch queue: bounded worker pool for native work items
//!
//! Work items run on the blocking pool of a dedicated tokio runtime, capped at
//! `worker_threads`. Items start in FIFO order. A panicking item is caught on
//! the worker and turned into an error for its completion; the pool keeps
//! running. Items can be cancelled until a worker picks them up.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::oneshot;

use crate::error::BridgeError;

/// Default worker thread name
pub const DEFAULT_THREAD_NAME: &str = "crypto-bridge-worker";

/// Upper bound applied to the default pool size
pub const MAX_DEFAULT_WORKERS: usize = 4;

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum number of worker threads executing items concurrently
    pub worker_threads: usize,

    /// Name given to worker threads
    pub thread_name: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

/// Available parallelism, capped at [`MAX_DEFAULT_WORKERS`]
pub fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, MAX_DEFAULT_WORKERS)
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    pending: AtomicU64,
    running: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicU64,
    panicked: AtomicU64,
}

/// Snapshot of queue activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Items ever submitted
    pub submitted: u64,

    /// Items waiting for a worker
    pub pending: u64,

    /// Items currently executing
    pub running: u64,

    /// Items that ran to completion (successfully or not)
    pub completed: u64,

    /// Items dropped before execution
    pub cancelled: u64,

    /// Items whose closure panicked
    pub panicked: u64,
}

const QUEUED: u8 = 0;
const STARTED: u8 = 1;
const CANCELLED: u8 = 2;

/// Cancels a work item that has not started yet
#[derive(Debug, Clone)]
pub struct CancelToken {
    state: Arc<AtomicU8>,
}

impl CancelToken {
    fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(QUEUED)),
        }
    }

    /// Request cancellation. Returns `false` when the item already started;
    /// running native work is never interrupted.
    pub fn cancel(&self) -> bool {
        match self
            .state
            .compare_exchange(QUEUED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current == CANCELLED,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    fn try_start(&self) -> bool {
        self.state
            .compare_exchange(QUEUED, STARTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Future for the result of a submitted item
#[derive(Debug)]
pub struct WorkHandle<T> {
    operation: String,
    rx: oneshot::Receiver<Result<T, BridgeError>>,
    cancel: CancelToken,
}

impl<T> WorkHandle<T> {
    /// Cancel the item if it has not started
    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

impl<T> Future for WorkHandle<T> {
    type Output = Result<T, BridgeError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let polled = Pin::new(&mut self.rx).poll(cx);
        match polled {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Sender dropped without a result: the item never ran.
            Poll::Ready(Err(_)) => Poll::Ready(Err(BridgeError::cancelled(self.operation.clone()))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Bounded pool executing work items off the runtime thread
pub struct DispatchQueue {
    runtime: Option<Runtime>,
    handle: Handle,
    counters: Arc<Counters>,
    config: DispatchConfig,
}

impl DispatchQueue {
    /// Start the worker pool
    pub fn new(config: DispatchConfig) -> Result<Self> {
        let workers = config.worker_threads.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(workers)
            .thread_name(config.thread_name.clone())
            .build()
            .context("Failed to start dispatch worker pool")?;
        let handle = runtime.handle().clone();

        tracing::debug!(
            workers,
            thread_name = %config.thread_name,
            "Dispatch queue started"
        );

        Ok(Self {
            runtime: Some(runtime),
            handle,
            counters: Arc::new(Counters::default()),
            config: DispatchConfig {
                worker_threads: workers,
                ..config
            },
        })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Queue `job` and call `on_complete` with its outcome on the worker thread.
    ///
    /// Never blocks the caller. `on_complete` runs exactly once: with the job's
    /// result, with a panic turned into an error, or with `Cancelled` when the
    /// token fired before a worker picked the item up.
    pub fn execute<T, F, C>(&self, operation: impl Into<String>, job: F, on_complete: C) -> CancelToken
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, BridgeError> + Send + 'static,
        C: FnOnce(Result<T, BridgeError>) + Send + 'static,
    {
        let operation = operation.into();
        let token = CancelToken::new();
        let worker_token = token.clone();
        let counters = Arc::clone(&self.counters);

        counters.submitted.fetch_add(1, Ordering::Relaxed);
        counters.pending.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(operation = %operation, "Work item queued");

        // The join handle is not needed: completion flows through `on_complete`.
        drop(self.handle.spawn_blocking(move || {
            counters.pending.fetch_sub(1, Ordering::Relaxed);

            if !worker_token.try_start() {
                counters.cancelled.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(operation = %operation, "Work item cancelled before execution");
                on_complete(Err(BridgeError::cancelled(operation)));
                return;
            }

            counters.running.fetch_add(1, Ordering::Relaxed);
            let result = match panic::catch_unwind(AssertUnwindSafe(job)) {
                Ok(result) => result,
                Err(payload) => {
                    counters.panicked.fetch_add(1, Ordering::Relaxed);
                    let message = panic_message(payload.as_ref());
                    tracing::error!(operation = %operation, panic = %message, "Work item panicked");
                    Err(BridgeError::native_op(
                        operation.as_str(),
                        format!("worker panicked: {message}"),
                    ))
                }
            };
            counters.running.fetch_sub(1, Ordering::Relaxed);
            counters.completed.fetch_add(1, Ordering::Relaxed);

            if let Err(err) = &result {
                tracing::debug!(operation = %operation, error = %err, "Work item failed");
            }
            on_complete(result);
        }));

        token
    }

    /// Queue `job` and get a future for its result
    pub fn submit<T, F>(&self, operation: impl Into<String>, job: F) -> WorkHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, BridgeError> + Send + 'static,
    {
        let operation = operation.into();
        let (tx, rx) = oneshot::channel();
        let cancel = self.execute(operation.clone(), job, move |result| {
            // Receiver gone means nobody awaits the result any more.
            let _ = tx.send(result);
        });
        WorkHandle {
            operation,
            rx,
            cancel,
        }
    }

    /// Snapshot of the queue counters
    pub fn stats(&self) -> QueueStats {
        let c = &self.counters;
        QueueStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            pending: c.pending.load(Ordering::Relaxed),
            running: c.running.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            panicked: c.panicked.load(Ordering::Relaxed),
        }
    }

    /// Stop the pool, waiting up to `timeout` for running items.
    ///
    /// Must not be called from inside an async context.
    pub fn shutdown(mut self, timeout: Duration) {
        if let Some(runtime) = self.runtime.take() {
            tracing::debug!(timeout_ms = timeout.as_millis() as u64, "Dispatch queue shutting down");
            runtime.shutdown_timeout(timeout);
        }
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
