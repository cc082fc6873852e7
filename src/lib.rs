//! Cross-context dispatch bridge for native crypto primitives
//!
//! Exposes ECDH key agreement, AES-CTR ciphers and PBKDF2 to a
//! single-threaded scripting runtime through host objects. Calls are validated
//! on the runtime thread, expensive work runs on a bounded worker pool, and
//! results come back only through the call invoker.
//!
//! Features:
//! - Total argument validation before any native state is touched
//! - Promise-returning async variants backed by the dispatch queue
//! - Per-object serial lanes keeping async results in submission order
//! - Cancellation of queued work; panics turned into rejections
//! - Runtime-visible effects of async work published only on delivery

pub mod config;
pub mod dispatch;
pub mod encoding;
pub mod error;
pub mod host;
pub mod invoker;
pub mod keys;
pub mod module;
pub mod native;
pub mod password;
pub mod runtime;
pub mod serial;
pub mod validate;
pub mod value;

pub use config::Settings;
pub use dispatch::{DispatchConfig, DispatchQueue, QueueStats};
pub use error::{BridgeError, ErrorKind, Result};
pub use host::{HostObject, HostState};
pub use runtime::{PromiseState, RuntimeStats, ScriptRuntime};
pub use value::{NativeValue, PromiseId, Value};
