//! Cipher and decipher host objects

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use super::{common_property, ensure_idle, unknown_method, HostObject, HostState, StateCell};
use crate::dispatch::DispatchQueue;
use crate::encoding::{encode_output, Encoding};
use crate::error::Result;
use crate::native::{CipherAlgorithm, CipherEngine, Direction};
use crate::runtime::CallContext;
use crate::serial::{lock_unpoisoned, SerialLane};
use crate::validate::Arguments;
use crate::value::Value;

const METHODS: &[&str] = &[
    "update",
    "updateAsync",
    "final",
    "finalAsync",
    "setAutoPadding",
    "cancelPending",
];

/// Progress as the runtime sees it. Updated by synchronous calls and by
/// delivery hooks, never by a worker.
#[derive(Debug, Default)]
struct Progress {
    finalized: AtomicBool,
    bytes_processed: AtomicU64,
}

impl Progress {
    fn record_update(&self, len: u64) {
        self.bytes_processed.fetch_add(len, Ordering::AcqRel);
    }

    fn record_final(&self) {
        self.finalized.store(true, Ordering::Release);
    }
}

/// Streaming cipher handle. Key and iv are bound at construction, so the
/// object is usable immediately.
pub struct CipherHostObject {
    id: Uuid,
    algorithm: CipherAlgorithm,
    direction: Direction,
    engine: Arc<Mutex<CipherEngine>>,
    progress: Arc<Progress>,
    state: StateCell,
    lane: SerialLane,
}

impl CipherHostObject {
    pub fn new(engine: CipherEngine, queue: Arc<DispatchQueue>) -> Self {
        let id = Uuid::new_v4();
        let algorithm = engine.algorithm();
        let direction = engine.direction();
        let state = StateCell::new(HostState::Constructed);
        state.set(HostState::Ready);

        Self {
            id,
            algorithm,
            direction,
            engine: Arc::new(Mutex::new(engine)),
            progress: Arc::new(Progress::default()),
            state,
            lane: SerialLane::new(format!("{}:{id}", class_of(direction)), queue),
        }
    }

    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    fn op(&self, method: &str) -> String {
        format!("{}.{method}", self.direction.label())
    }

    fn update(&self, args: &[Value]) -> Result<Value> {
        let op = self.op("update");
        let (data, encoding) = update_args(&op, args)?;
        ensure_idle(&op, &self.lane)?;

        let out = lock_unpoisoned(&self.engine).update(&data)?;
        self.progress.record_update(data.len() as u64);
        Ok(encode_output(out, encoding).into())
    }

    fn update_async(&self, ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value> {
        let op = self.op("updateAsync");
        let (data, encoding) = update_args(&op, args)?;

        let (promise, mut completion) = ctx.promise(&op);
        let len = data.len() as u64;
        let progress = Arc::clone(&self.progress);
        completion.on_delivery(move |fulfilled| {
            if fulfilled {
                progress.record_update(len);
            }
        });

        let engine = Arc::clone(&self.engine);
        self.lane.submit(completion, move || {
            let out = lock_unpoisoned(&engine).update(&data)?;
            Ok(encode_output(out, encoding))
        });
        Ok(promise)
    }

    fn finalize(&self, args: &[Value]) -> Result<Value> {
        let op = self.op("final");
        let encoding = final_args(&op, args)?;
        ensure_idle(&op, &self.lane)?;

        let out = lock_unpoisoned(&self.engine).finalize()?;
        self.progress.record_final();
        Ok(encode_output(out, encoding).into())
    }

    fn finalize_async(&self, ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value> {
        let op = self.op("finalAsync");
        let encoding = final_args(&op, args)?;

        let (promise, mut completion) = ctx.promise(&op);
        let progress = Arc::clone(&self.progress);
        completion.on_delivery(move |fulfilled| {
            if fulfilled {
                progress.record_final();
            }
        });

        let engine = Arc::clone(&self.engine);
        self.lane.submit(completion, move || {
            let out = lock_unpoisoned(&engine).finalize()?;
            Ok(encode_output(out, encoding))
        });
        Ok(promise)
    }

    fn set_auto_padding(&self, args: &[Value]) -> Result<Value> {
        let op = self.op("setAutoPadding");
        let reader = Arguments::new(&op, args);
        reader.at_most(1)?;
        let enabled = reader.optional_bool(0, "autoPadding")?.unwrap_or(true);
        ensure_idle(&op, &self.lane)?;

        lock_unpoisoned(&self.engine).set_auto_padding(enabled);
        Ok(Value::Undefined)
    }

    fn cancel_pending(&self, args: &[Value]) -> Result<Value> {
        Arguments::new(&self.op("cancelPending"), args).at_most(0)?;
        Ok(Value::Number(self.lane.cancel_pending() as f64))
    }
}

fn class_of(direction: Direction) -> &'static str {
    match direction {
        Direction::Encrypt => "Cipheriv",
        Direction::Decrypt => "Decipheriv",
    }
}

/// `(data[, inputEncoding[, outputEncoding]])`
fn update_args(op: &str, args: &[Value]) -> Result<(Vec<u8>, Option<Encoding>)> {
    let reader = Arguments::new(op, args);
    reader.at_most(3)?;
    let input = reader.optional_encoding(1, "inputEncoding")?;
    let output = reader.optional_encoding(2, "outputEncoding")?;
    let data = reader.bytes(0, "data", input)?;
    Ok((data, output))
}

/// `([outputEncoding])`
fn final_args(op: &str, args: &[Value]) -> Result<Option<Encoding>> {
    let reader = Arguments::new(op, args);
    reader.at_most(1)?;
    reader.optional_encoding(0, "outputEncoding")
}

impl HostObject for CipherHostObject {
    fn class_name(&self) -> &'static str {
        class_of(self.direction)
    }

    fn instance_id(&self) -> Uuid {
        self.id
    }

    fn state(&self) -> HostState {
        self.state.get()
    }

    fn pending_work(&self) -> usize {
        self.lane.outstanding()
    }

    fn methods(&self) -> &'static [&'static str] {
        METHODS
    }

    fn get(&self, property: &str) -> Value {
        match property {
            "algorithm" => Value::from(self.algorithm.name()),
            "finalized" => Value::Bool(self.progress.finalized.load(Ordering::Acquire)),
            "bytesProcessed" => {
                Value::Number(self.progress.bytes_processed.load(Ordering::Acquire) as f64)
            }
            _ => common_property(self, property),
        }
    }

    fn call(&self, method: &str, ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value> {
        match method {
            "update" => self.update(args),
            "updateAsync" => self.update_async(ctx, args),
            "final" => self.finalize(args),
            "finalAsync" => self.finalize_async(ctx, args),
            "setAutoPadding" => self.set_auto_padding(args),
            "cancelPending" => self.cancel_pending(args),
            other => Err(unknown_method(class_of(self.direction), other)),
        }
    }
}

impl Drop for CipherHostObject {
    fn drop(&mut self) {
        self.state.set(HostState::Disposed);
        let cancelled = self.lane.close();
        tracing::debug!(
            class = class_of(self.direction),
            instance = %self.id,
            algorithm = self.algorithm.name(),
            cancelled,
            "Host object reclaimed"
        );
    }
}
