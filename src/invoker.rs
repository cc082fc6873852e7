//! Call invoker: the only path from worker threads back into the runtime
//!
//! Workers never see runtime state. They hold a [`CallInvoker`] (or a
//! [`Completion`] wrapping one) and post closures onto a single FIFO channel.
//! The runtime thread drains that channel and runs each closure with a
//! [`RuntimeScope`], which only exists on the runtime thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use crate::error::BridgeError;
use crate::runtime::RuntimeScope;
use crate::value::{NativeValue, PromiseId, Value};

/// Closure executed on the runtime thread
pub type Delivery = Box<dyn FnOnce(&mut RuntimeScope<'_>) + Send>;

/// Runs on the runtime thread just before a completion settles its promise.
/// The flag is `true` when the work item succeeded.
pub type DeliveryHook = Box<dyn FnOnce(bool) + Send>;

/// Thread-safe handle for scheduling work onto the runtime thread
#[derive(Clone)]
pub struct CallInvoker {
    tx: mpsc::Sender<Delivery>,
    scheduled: Arc<AtomicU64>,
}

impl std::fmt::Debug for CallInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallInvoker")
            .field("scheduled", &self.scheduled.load(Ordering::Relaxed))
            .finish()
    }
}

impl CallInvoker {
    /// Post `delivery` to the runtime thread.
    ///
    /// Deliveries run in the order they were scheduled. Returns `false` when
    /// the runtime is gone and the closure was dropped.
    pub fn schedule<F>(&self, delivery: F) -> bool
    where
        F: FnOnce(&mut RuntimeScope<'_>) + Send + 'static,
    {
        match self.tx.send(Box::new(delivery)) {
            Ok(()) => {
                self.scheduled.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                tracing::warn!("Runtime thread is gone; delivery dropped");
                false
            }
        }
    }

    /// Total deliveries accepted so far
    pub fn scheduled(&self) -> u64 {
        self.scheduled.load(Ordering::Relaxed)
    }
}

/// Runtime-thread end of the invoker channel
pub struct DeliveryQueue {
    rx: mpsc::Receiver<Delivery>,
}

/// Why waiting for a delivery returned nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    Timeout,
    Disconnected,
}

impl DeliveryQueue {
    /// Next delivery if one is ready
    pub fn try_next(&self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }

    /// Block the runtime thread until a delivery arrives or `timeout` passes
    pub fn next_timeout(&self, timeout: Duration) -> Result<Delivery, WaitError> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            mpsc::RecvTimeoutError::Timeout => WaitError::Timeout,
            mpsc::RecvTimeoutError::Disconnected => WaitError::Disconnected,
        })
    }
}

/// Create a connected invoker / delivery queue pair
pub fn channel() -> (CallInvoker, DeliveryQueue) {
    let (tx, rx) = mpsc::channel();
    (
        CallInvoker {
            tx,
            scheduled: Arc::new(AtomicU64::new(0)),
        },
        DeliveryQueue { rx },
    )
}

/// Completion token for one work item.
///
/// Settles exactly one promise exactly once. Consuming methods make a second
/// delivery impossible; dropping an unsettled token delivers `Cancelled`, so
/// a work item lost anywhere on the way still produces a terminal result.
///
/// Hooks registered with [`Completion::on_delivery`] travel with the result
/// and run inside the delivery closure, so whatever they publish becomes
/// visible together with the settlement and never earlier.
pub struct Completion {
    operation: String,
    promise: PromiseId,
    invoker: Option<CallInvoker>,
    hooks: Vec<DeliveryHook>,
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("operation", &self.operation)
            .field("promise", &self.promise)
            .field("delivered", &self.invoker.is_none())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl Completion {
    pub(crate) fn new(operation: impl Into<String>, promise: PromiseId, invoker: CallInvoker) -> Self {
        Self {
            operation: operation.into(),
            promise,
            invoker: Some(invoker),
            hooks: Vec::new(),
        }
    }

    /// Run `hook` on the runtime thread before the promise settles.
    ///
    /// Hooks run in registration order, for cancellations too.
    pub(crate) fn on_delivery<F>(&mut self, hook: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.hooks.push(Box::new(hook));
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn promise(&self) -> PromiseId {
        self.promise
    }

    /// Deliver the work item's outcome
    pub fn complete(mut self, result: Result<NativeValue, BridgeError>) {
        self.deliver(result);
    }

    /// Deliver `Cancelled`
    pub fn cancel(self) {
        let err = BridgeError::cancelled(self.operation.clone());
        self.complete(Err(err));
    }

    fn deliver(&mut self, result: Result<NativeValue, BridgeError>) {
        if let Some(invoker) = self.invoker.take() {
            let promise = self.promise;
            let hooks = std::mem::take(&mut self.hooks);
            invoker.schedule(move |scope| {
                let fulfilled = result.is_ok();
                for hook in hooks {
                    hook(fulfilled);
                }
                scope.settle(promise, result.map(Value::from));
            });
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.invoker.is_some() {
            tracing::debug!(
                operation = %self.operation,
                promise = %self.promise,
                "Completion dropped unsettled; delivering cancellation"
            );
            let err = BridgeError::cancelled(self.operation.clone());
            self.deliver(Err(err));
        }
    }
}
