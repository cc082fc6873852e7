//! Single-threaded script runtime host
//!
//! Stands in for the scripting engine the bridge is installed into. It owns
//! everything that must stay on one thread: the promise table, host object
//! references and the receiving end of the call invoker. Work items never see
//! any of it; they reach the runtime only through delivery closures drained by
//! [`ScriptRuntime::run_pending`] or the blocking await helpers.
//!
//! Features:
//! - Name-keyed module calls and host object method calls
//! - Promise table settled exclusively through deliveries
//! - Blocking await with a deadline
//! - Host object liveness tracking for reclamation checks

use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::Settings;
use crate::dispatch::{DispatchQueue, QueueStats};
use crate::error::{BridgeError, Result};
use crate::host::HostObject;
use crate::invoker::{self, CallInvoker, Completion, DeliveryQueue, WaitError};
use crate::module::CryptoModule;
use crate::value::{HostRef, PromiseId, Value};

/// Lifecycle of one promise
#[derive(Debug, Clone, PartialEq)]
pub enum PromiseState {
    Pending,
    Fulfilled(Value),
    Rejected(BridgeError),
}

/// Promises created by bridge calls, keyed by id.
///
/// An entry lives until its result is taken (awaiting hands it out) or it is
/// released, so settled buffers are not kept for the life of the runtime.
#[derive(Debug, Default)]
pub struct PromiseTable {
    next_id: u64,
    settled: u64,
    states: HashMap<PromiseId, PromiseState>,
    /// Released while still pending; their deliveries are dropped quietly
    released: HashSet<PromiseId>,
    #[cfg(test)]
    order: Vec<PromiseId>,
}

impl PromiseTable {
    /// Allocate a pending promise
    pub fn create(&mut self) -> PromiseId {
        self.next_id += 1;
        let id = PromiseId(self.next_id);
        self.states.insert(id, PromiseState::Pending);
        id
    }

    /// Settle a pending promise. Unknown or already settled ids are ignored.
    pub fn settle(&mut self, id: PromiseId, result: Result<Value>) {
        match self.states.get_mut(&id) {
            Some(state @ PromiseState::Pending) => {
                *state = match result {
                    Ok(value) => PromiseState::Fulfilled(value),
                    Err(err) => PromiseState::Rejected(err),
                };
                self.settled += 1;
                #[cfg(test)]
                self.order.push(id);
            }
            Some(_) => tracing::warn!(promise = %id, "Promise already settled; delivery ignored"),
            None if self.released.remove(&id) => {
                self.settled += 1;
                tracing::trace!(promise = %id, "Promise was released; result discarded");
            }
            None => tracing::warn!(promise = %id, "Unknown promise; delivery ignored"),
        }
    }

    pub fn state(&self, id: PromiseId) -> Option<&PromiseState> {
        self.states.get(&id)
    }

    /// Settled outcome, or `None` while pending or unknown
    pub fn result(&self, id: PromiseId) -> Option<Result<Value>> {
        match self.states.get(&id)? {
            PromiseState::Pending => None,
            PromiseState::Fulfilled(v) => Some(Ok(v.clone())),
            PromiseState::Rejected(e) => Some(Err(e.clone())),
        }
    }

    /// Remove a settled promise and hand out its outcome.
    ///
    /// Pending and unknown ids return `None` and are left alone.
    pub fn take(&mut self, id: PromiseId) -> Option<Result<Value>> {
        if matches!(self.states.get(&id)?, PromiseState::Pending) {
            return None;
        }
        match self.states.remove(&id)? {
            PromiseState::Pending => None,
            PromiseState::Fulfilled(v) => Some(Ok(v)),
            PromiseState::Rejected(e) => Some(Err(e)),
        }
    }

    /// Forget a promise whether or not it has settled. Returns `false` for
    /// unknown ids.
    pub fn release(&mut self, id: PromiseId) -> bool {
        match self.states.remove(&id) {
            Some(PromiseState::Pending) => {
                self.released.insert(id);
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Ids in the order they were settled
    #[cfg(test)]
    pub fn settlement_order(&self) -> &[PromiseId] {
        &self.order
    }

    pub fn pending_count(&self) -> usize {
        self.states
            .values()
            .filter(|s| matches!(s, PromiseState::Pending))
            .count()
    }

    /// Entries still held, pending or settled
    pub fn retained(&self) -> usize {
        self.states.len()
    }

    pub fn created(&self) -> u64 {
        self.next_id
    }

    pub fn settled(&self) -> u64 {
        self.settled
    }
}

/// Runtime state reachable from a delivery closure
pub struct RuntimeScope<'a> {
    promises: &'a mut PromiseTable,
}

impl<'a> RuntimeScope<'a> {
    pub(crate) fn new(promises: &'a mut PromiseTable) -> Self {
        Self { promises }
    }

    pub fn settle(&mut self, id: PromiseId, result: Result<Value>) {
        self.promises.settle(id, result);
    }
}

#[derive(Default)]
struct HostRegistry {
    created: u64,
    live: Vec<Weak<dyn HostObject>>,
}

impl HostRegistry {
    fn register(&mut self, host: &HostRef) {
        self.created += 1;
        self.live.retain(|w| w.strong_count() > 0);
        self.live.push(Rc::downgrade(host));
    }

    fn live_count(&self) -> u64 {
        self.live.iter().filter(|w| w.strong_count() > 0).count() as u64
    }
}

/// Everything a bridge call may touch while running on the runtime thread
pub struct CallContext<'a> {
    queue: &'a Arc<DispatchQueue>,
    invoker: &'a CallInvoker,
    promises: &'a mut PromiseTable,
    hosts: &'a mut HostRegistry,
    settings: &'a Settings,
}

impl CallContext<'_> {
    /// Allocate a promise and the completion that will settle it
    pub fn promise(&mut self, operation: &str) -> (Value, Completion) {
        let id = self.promises.create();
        let completion = Completion::new(operation, id, self.invoker.clone());
        (Value::Promise(id), completion)
    }

    /// Hand a freshly constructed host object to the runtime
    pub fn register_host(&mut self, host: HostRef) -> Value {
        self.hosts.register(&host);
        tracing::debug!(
            class = host.class_name(),
            instance = %host.instance_id(),
            "Host object created"
        );
        Value::Host(host)
    }

    pub fn queue(&self) -> &Arc<DispatchQueue> {
        self.queue
    }

    pub fn invoker(&self) -> &CallInvoker {
        self.invoker
    }

    pub fn settings(&self) -> &Settings {
        self.settings
    }
}

/// Counters describing runtime activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeStats {
    pub host_objects_created: u64,
    pub host_objects_live: u64,
    pub promises_created: u64,
    pub promises_settled: u64,
    /// Promises whose entry is still held (pending, or settled and not taken)
    pub promises_retained: u64,
    pub deliveries_run: u64,
}

/// Single-threaded runtime with the crypto module installed
pub struct ScriptRuntime {
    settings: Settings,
    queue: Arc<DispatchQueue>,
    invoker: CallInvoker,
    deliveries: DeliveryQueue,
    promises: PromiseTable,
    hosts: HostRegistry,
    module: CryptoModule,
    deliveries_run: u64,
}

impl ScriptRuntime {
    /// Start the worker pool and install the module
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let queue = Arc::new(DispatchQueue::new(settings.dispatch_config())?);
        let (invoker, deliveries) = invoker::channel();
        let module = CryptoModule::new();

        tracing::info!(
            workers = queue.config().worker_threads,
            functions = module.names().len(),
            "Script runtime started"
        );

        Ok(Self {
            settings: settings.clone(),
            queue,
            invoker,
            deliveries,
            promises: PromiseTable::default(),
            hosts: HostRegistry::default(),
            module,
            deliveries_run: 0,
        })
    }

    fn context(&mut self) -> CallContext<'_> {
        CallContext {
            queue: &self.queue,
            invoker: &self.invoker,
            promises: &mut self.promises,
            hosts: &mut self.hosts,
            settings: &self.settings,
        }
    }

    /// Call a module function by name
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Value> {
        let module = &self.module;
        let mut ctx = CallContext {
            queue: &self.queue,
            invoker: &self.invoker,
            promises: &mut self.promises,
            hosts: &mut self.hosts,
            settings: &self.settings,
        };
        module.call(name, &mut ctx, args)
    }

    /// Call a method on a host object value
    pub fn call_method(&mut self, target: &Value, method: &str, args: &[Value]) -> Result<Value> {
        let host = expect_host(target, method)?;
        let mut ctx = self.context();
        host.call(method, &mut ctx, args)
    }

    /// Read a property of a host object value
    pub fn get_property(&self, target: &Value, property: &str) -> Result<Value> {
        let host = expect_host(target, property)?;
        Ok(host.get(property))
    }

    /// Run every delivery that is ready without blocking
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Some(delivery) = self.deliveries.try_next() {
            let mut scope = RuntimeScope::new(&mut self.promises);
            delivery(&mut scope);
            ran += 1;
        }
        self.deliveries_run += ran as u64;
        ran
    }

    /// Block until the promise settles, up to the configured delivery timeout.
    ///
    /// The settled outcome is handed out once and the promise is dropped from
    /// the table; awaiting it again is an error. Non-promise values resolve to
    /// themselves.
    pub fn await_promise(&mut self, value: &Value) -> Result<Value> {
        let timeout = self.settings.delivery_timeout();
        self.await_promise_timeout(value, timeout)
    }

    pub fn await_promise_timeout(&mut self, value: &Value, timeout: Duration) -> Result<Value> {
        let Some(id) = value.as_promise() else {
            return Ok(value.clone());
        };
        let started = Instant::now();

        loop {
            self.run_pending();
            match self.promises.take(id) {
                Some(result) => return result,
                None if self.promises.state(id).is_none() => {
                    return Err(BridgeError::invalid_argument(
                        "await",
                        format!("{id} is not held by this runtime (unknown or already awaited)"),
                    ));
                }
                None => {}
            }

            let remaining = timeout.saturating_sub(started.elapsed());
            match self.deliveries.next_timeout(remaining) {
                Ok(delivery) => {
                    let mut scope = RuntimeScope::new(&mut self.promises);
                    delivery(&mut scope);
                    self.deliveries_run += 1;
                }
                Err(WaitError::Timeout) => {
                    tracing::warn!(promise = %id, timeout_ms = timeout.as_millis() as u64, "Promise did not settle in time");
                    return Err(BridgeError::Timeout {
                        operation: "await".to_string(),
                        waited_ms: started.elapsed().as_millis() as u64,
                    });
                }
                // The runtime holds an invoker itself, so this only happens mid-teardown.
                Err(WaitError::Disconnected) => return Err(BridgeError::cancelled("await")),
            }
        }
    }

    pub fn promise_state(&self, value: &Value) -> Option<&PromiseState> {
        value.as_promise().and_then(|id| self.promises.state(id))
    }

    /// Drop interest in a promise without awaiting it. A later settlement is
    /// discarded. Returns `false` if the value is not a promise held here.
    pub fn release_promise(&mut self, value: &Value) -> bool {
        value
            .as_promise()
            .is_some_and(|id| self.promises.release(id))
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            host_objects_created: self.hosts.created,
            host_objects_live: self.hosts.live_count(),
            promises_created: self.promises.created(),
            promises_settled: self.promises.settled(),
            promises_retained: self.promises.retained() as u64,
            deliveries_run: self.deliveries_run,
        }
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn invoker(&self) -> &CallInvoker {
        &self.invoker
    }

    /// Stop the worker pool, waiting for running items up to the shutdown timeout.
    ///
    /// Must not be called from inside an async context.
    pub fn shutdown(mut self) {
        self.run_pending();
        let timeout = self.settings.shutdown_timeout();
        let stats = self.stats();
        let ScriptRuntime {
            queue,
            promises,
            deliveries,
            ..
        } = self;
        drop(promises);
        drop(deliveries);

        match Arc::try_unwrap(queue) {
            Ok(queue) => queue.shutdown(timeout),
            Err(_) => tracing::warn!(
                live_host_objects = stats.host_objects_live,
                "Worker pool still referenced; stopping in background"
            ),
        }
        tracing::info!(
            promises_settled = stats.promises_settled,
            deliveries_run = stats.deliveries_run,
            "Script runtime stopped"
        );
    }
}

fn expect_host<'v>(target: &'v Value, member: &str) -> Result<&'v HostRef> {
    target.as_host().ok_or_else(|| {
        BridgeError::type_mismatch(member, "this", "a host object", target.type_name())
    })
}
