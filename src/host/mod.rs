//! Host objects: runtime-visible handles around native capabilities
//!
//! Features:
//! - One implementor per primitive family (ECDH, cipher)
//! - Lifecycle state changed only on the runtime thread (directly or from
//!   delivery hooks)
//! - Synchronous calls refused while asynchronous work is outstanding, so a
//!   runtime-thread call never waits on a worker
//! - Reclamation on last reference drop; no explicit dispose call

mod cipher;
mod ecdh;

pub use cipher::CipherHostObject;
pub use ecdh::EcdhHostObject;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{BridgeError, Result};
use crate::runtime::CallContext;
use crate::serial::SerialLane;
use crate::value::Value;

/// Host object lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Constructed,
    KeysPending,
    Ready,
    Disposed,
}

impl HostState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostState::Constructed => "constructed",
            HostState::KeysPending => "keys-pending",
            HostState::Ready => "ready",
            HostState::Disposed => "disposed",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => HostState::Constructed,
            1 => HostState::KeysPending,
            2 => HostState::Ready,
            _ => HostState::Disposed,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            HostState::Constructed => 0,
            HostState::KeysPending => 1,
            HostState::Ready => 2,
            HostState::Disposed => 3,
        }
    }
}

/// Lifecycle state of a host object.
///
/// Cloned into delivery hooks, which run on the runtime thread.
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub(crate) fn new(state: HostState) -> Self {
        Self(Arc::new(AtomicU8::new(state.to_u8())))
    }

    pub(crate) fn get(&self) -> HostState {
        HostState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: HostState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }

    /// Move to `Ready` unless the owner was already disposed
    pub(crate) fn mark_ready(&self) {
        let _ = self.0.fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
            (HostState::from_u8(raw) != HostState::Disposed).then_some(HostState::Ready.to_u8())
        });
    }
}

/// Runtime-visible wrapper around one native capability
pub trait HostObject {
    /// Class name shown to the runtime
    fn class_name(&self) -> &'static str;

    fn instance_id(&self) -> Uuid;

    fn state(&self) -> HostState;

    /// Work items submitted for this object whose results have not been
    /// delivered yet
    fn pending_work(&self) -> usize;

    /// Callable method names
    fn methods(&self) -> &'static [&'static str];

    /// Property lookup; unknown names read as `undefined`
    fn get(&self, property: &str) -> Value {
        common_property(self, property)
    }

    /// Invoke `method` on the runtime thread
    fn call(&self, method: &str, ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value>;
}

/// Properties every host object exposes
pub(crate) fn common_property<H: HostObject + ?Sized>(host: &H, property: &str) -> Value {
    match property {
        "state" => Value::from(host.state().as_str()),
        "pendingOperations" => Value::Number(host.pending_work() as f64),
        "instanceId" => Value::from(host.instance_id().to_string()),
        _ => Value::Undefined,
    }
}

/// Reject a synchronous call while asynchronous work is outstanding.
///
/// Once this passes no work item holds the object's native engine, so the
/// caller can lock it without waiting.
pub(crate) fn ensure_idle(operation: &str, lane: &SerialLane) -> Result<()> {
    let pending = lane.outstanding();
    if pending > 0 {
        return Err(BridgeError::native_op(
            operation,
            format!("{pending} asynchronous operation(s) still pending on this object"),
        ));
    }
    Ok(())
}

pub(crate) fn unknown_method(class: &str, method: &str) -> BridgeError {
    BridgeError::invalid_argument(format!("{class}.{method}"), "no such method")
}
