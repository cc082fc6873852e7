//! ECDH host object

use std::sync::{Arc, Mutex};

use uuid::Uuid;

use super::{common_property, ensure_idle, unknown_method, HostObject, HostState, StateCell};
use crate::dispatch::DispatchQueue;
use crate::encoding::{encode_output, Encoding};
use crate::error::Result;
use crate::native::{Curve, EcdhEngine, KeyFormat, PointFormat};
use crate::runtime::CallContext;
use crate::serial::{lock_unpoisoned, SerialLane};
use crate::validate::Arguments;
use crate::value::Value;

const CLASS: &str = "ECDH";

const METHODS: &[&str] = &[
    "generateKeys",
    "generateKeysAsync",
    "computeSecret",
    "computeSecretAsync",
    "getPublicKey",
    "getPrivateKey",
    "setPrivateKey",
    "setPublicKey",
    "exportPrivateKey",
    "exportPublicKey",
    "importPrivateKey",
    "importPublicKey",
    "cancelPending",
];

/// Key agreement handle bound to one curve.
///
/// Key generation may run on a worker, but the move to `Ready` is published
/// by the delivery hook, together with the settled promise.
pub struct EcdhHostObject {
    id: Uuid,
    curve: Curve,
    engine: Arc<Mutex<EcdhEngine>>,
    state: StateCell,
    lane: SerialLane,
}

impl EcdhHostObject {
    /// Wrap a freshly built engine. The object starts waiting for keys.
    pub fn new(engine: EcdhEngine, queue: Arc<DispatchQueue>) -> Self {
        let id = Uuid::new_v4();
        let curve = engine.curve();
        let state = StateCell::new(HostState::Constructed);
        state.set(HostState::KeysPending);

        Self {
            id,
            curve,
            engine: Arc::new(Mutex::new(engine)),
            state,
            lane: SerialLane::new(format!("{CLASS}:{id}"), queue),
        }
    }

    pub fn curve(&self) -> Curve {
        self.curve
    }

    fn generate_keys(&self, args: &[Value]) -> Result<Value> {
        let op = "ecdh.generateKeys";
        let (encoding, format) = key_output_args(op, args)?;
        ensure_idle(op, &self.lane)?;

        let mut engine = lock_unpoisoned(&self.engine);
        engine.generate_keys_default()?;
        self.state.mark_ready();
        Ok(encode_output(engine.public_key(format)?, encoding).into())
    }

    fn generate_keys_async(&self, ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value> {
        let op = "ecdh.generateKeysAsync";
        let (encoding, format) = key_output_args(op, args)?;

        let (promise, mut completion) = ctx.promise(op);
        let state = self.state.clone();
        completion.on_delivery(move |fulfilled| {
            if fulfilled {
                state.mark_ready();
            }
        });

        let engine = Arc::clone(&self.engine);
        self.lane.submit(completion, move || {
            let mut engine = lock_unpoisoned(&engine);
            engine.generate_keys_default()?;
            Ok(encode_output(engine.public_key(format)?, encoding))
        });
        Ok(promise)
    }

    fn compute_secret(&self, args: &[Value]) -> Result<Value> {
        let op = "ecdh.computeSecret";
        let (peer, encoding) = secret_args(op, args)?;
        ensure_idle(op, &self.lane)?;

        let secret = lock_unpoisoned(&self.engine).compute_secret(&peer)?;
        Ok(encode_output(secret, encoding).into())
    }

    fn compute_secret_async(&self, ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value> {
        let op = "ecdh.computeSecretAsync";
        let (peer, encoding) = secret_args(op, args)?;

        let (promise, completion) = ctx.promise(op);
        let engine = Arc::clone(&self.engine);
        self.lane.submit(completion, move || {
            let secret = lock_unpoisoned(&engine).compute_secret(&peer)?;
            Ok(encode_output(secret, encoding))
        });
        Ok(promise)
    }

    fn get_public_key(&self, args: &[Value]) -> Result<Value> {
        let op = "ecdh.getPublicKey";
        let (encoding, format) = key_output_args(op, args)?;
        ensure_idle(op, &self.lane)?;

        let public = lock_unpoisoned(&self.engine).public_key(format)?;
        Ok(encode_output(public, encoding).into())
    }

    fn get_private_key(&self, args: &[Value]) -> Result<Value> {
        let op = "ecdh.getPrivateKey";
        let reader = Arguments::new(op, args);
        reader.at_most(1)?;
        let encoding = reader.optional_encoding(0, "encoding")?;
        ensure_idle(op, &self.lane)?;

        let private = lock_unpoisoned(&self.engine).private_key()?;
        Ok(encode_output(private, encoding).into())
    }

    fn set_private_key(&self, args: &[Value]) -> Result<Value> {
        let op = "ecdh.setPrivateKey";
        let key = key_input_args(op, "privateKey", args)?;
        ensure_idle(op, &self.lane)?;

        lock_unpoisoned(&self.engine).set_private_key(&key)?;
        self.state.mark_ready();
        Ok(Value::Undefined)
    }

    fn set_public_key(&self, args: &[Value]) -> Result<Value> {
        let op = "ecdh.setPublicKey";
        let key = key_input_args(op, "publicKey", args)?;
        ensure_idle(op, &self.lane)?;

        lock_unpoisoned(&self.engine).set_public_key(&key)?;
        Ok(Value::Undefined)
    }

    fn export_private_key(&self, args: &[Value]) -> Result<Value> {
        let op = "ecdh.exportPrivateKey";
        let (format, encoding) = document_output_args(op, args)?;
        ensure_idle(op, &self.lane)?;

        let document = lock_unpoisoned(&self.engine).export_private_key(format)?;
        Ok(encode_output(document.to_vec(), encoding).into())
    }

    fn export_public_key(&self, args: &[Value]) -> Result<Value> {
        let op = "ecdh.exportPublicKey";
        let (format, encoding) = document_output_args(op, args)?;
        ensure_idle(op, &self.lane)?;

        let document = lock_unpoisoned(&self.engine).export_public_key(format)?;
        Ok(encode_output(document, encoding).into())
    }

    fn import_private_key(&self, args: &[Value]) -> Result<Value> {
        let op = "ecdh.importPrivateKey";
        let (document, format) = document_input_args(op, "privateKey", args)?;
        ensure_idle(op, &self.lane)?;

        lock_unpoisoned(&self.engine).import_private_key(&document, format)?;
        self.state.mark_ready();
        Ok(Value::Undefined)
    }

    fn import_public_key(&self, args: &[Value]) -> Result<Value> {
        let op = "ecdh.importPublicKey";
        let (document, format) = document_input_args(op, "publicKey", args)?;
        ensure_idle(op, &self.lane)?;

        lock_unpoisoned(&self.engine).import_public_key(&document, format)?;
        Ok(Value::Undefined)
    }

    fn cancel_pending(&self, args: &[Value]) -> Result<Value> {
        Arguments::new("ecdh.cancelPending", args).at_most(0)?;
        Ok(Value::Number(self.lane.cancel_pending() as f64))
    }
}

/// `([encoding[, format]])`
fn key_output_args(op: &str, args: &[Value]) -> Result<(Option<Encoding>, PointFormat)> {
    let reader = Arguments::new(op, args);
    reader.at_most(2)?;
    let encoding = reader.optional_encoding(0, "encoding")?;
    let format = reader.optional_format(1, "format")?.unwrap_or_default();
    Ok((encoding, format))
}

/// `(otherPublicKey[, inputEncoding[, outputEncoding]])`
fn secret_args(op: &str, args: &[Value]) -> Result<(Vec<u8>, Option<Encoding>)> {
    let reader = Arguments::new(op, args);
    reader.at_most(3)?;
    let input = reader.optional_encoding(1, "inputEncoding")?;
    let output = reader.optional_encoding(2, "outputEncoding")?;
    let peer = reader.bytes(0, "otherPublicKey", input)?;
    Ok((peer, output))
}

/// `(key[, encoding])`
fn key_input_args(op: &str, name: &str, args: &[Value]) -> Result<Vec<u8>> {
    let reader = Arguments::new(op, args);
    reader.at_most(2)?;
    let encoding = reader.optional_encoding(1, "encoding")?;
    reader.bytes(0, name, encoding)
}

/// `([keyFormat[, encoding]])`
fn document_output_args(op: &str, args: &[Value]) -> Result<(KeyFormat, Option<Encoding>)> {
    let reader = Arguments::new(op, args);
    reader.at_most(2)?;
    let format = reader.optional_key_format(0, "keyFormat")?.unwrap_or_default();
    let encoding = reader.optional_encoding(1, "encoding")?;
    Ok((format, encoding))
}

/// `(key[, keyFormat[, encoding]])`
fn document_input_args(op: &str, name: &str, args: &[Value]) -> Result<(Vec<u8>, KeyFormat)> {
    let reader = Arguments::new(op, args);
    reader.at_most(3)?;
    let format = reader.optional_key_format(1, "keyFormat")?.unwrap_or_default();
    let encoding = reader.optional_encoding(2, "encoding")?;
    let document = reader.bytes(0, name, encoding)?;
    Ok((document, format))
}

impl HostObject for EcdhHostObject {
    fn class_name(&self) -> &'static str {
        CLASS
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
            "curve" => Value::from(self.curve.name()),
            _ => common_property(self, property),
        }
    }

    fn call(&self, method: &str, ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value> {
        match method {
            "generateKeys" => self.generate_keys(args),
            "generateKeysAsync" => self.generate_keys_async(ctx, args),
            "computeSecret" => self.compute_secret(args),
            "computeSecretAsync" => self.compute_secret_async(ctx, args),
            "getPublicKey" => self.get_public_key(args),
            "getPrivateKey" => self.get_private_key(args),
            "setPrivateKey" => self.set_private_key(args),
            "setPublicKey" => self.set_public_key(args),
            "exportPrivateKey" => self.export_private_key(args),
            "exportPublicKey" => self.export_public_key(args),
            "importPrivateKey" => self.import_private_key(args),
            "importPublicKey" => self.import_public_key(args),
            "cancelPending" => self.cancel_pending(args),
            other => Err(unknown_method(CLASS, other)),
        }
    }
}

impl Drop for EcdhHostObject {
    fn drop(&mut self) {
        self.state.set(HostState::Disposed);
        let cancelled = self.lane.close();
        tracing::debug!(
            class = CLASS,
            instance = %self.id,
            curve = self.curve.name(),
            cancelled,
            "Host object reclaimed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchConfig;
    use crate::error::ErrorKind;
    use crate::invoker::{self, Completion, DeliveryQueue};
    use crate::runtime::{PromiseTable, RuntimeScope};
    use crate::value::NativeValue;
    use std::sync::mpsc;
    use std::time::Duration;

    fn drain(deliveries: &DeliveryQueue, table: &mut PromiseTable, count: usize) {
        for _ in 0..count {
            let delivery = deliveries.next_timeout(Duration::from_secs(10)).unwrap();
            delivery(&mut RuntimeScope::new(table));
        }
    }

    fn host(curve: Curve) -> EcdhHostObject {
        let queue = Arc::new(
            DispatchQueue::new(DispatchConfig {
                worker_threads: 1,
                thread_name: "ecdh-test".to_string(),
            })
            .unwrap(),
        );
        EcdhHostObject::new(EcdhEngine::new(curve), queue)
    }

    #[test]
    fn test_set_private_key_makes_ready() {
        let host = host(Curve::Secp256k1);
        assert_eq!(host.state(), HostState::KeysPending);

        let key = "01".repeat(32);
        host.set_private_key(&[Value::from(key.as_str()), Value::from("hex")])
            .unwrap();
        assert_eq!(host.state(), HostState::Ready);

        let exported = host.get_private_key(&[Value::from("hex")]).unwrap();
        assert_eq!(exported, Value::from(key));
    }

    #[test]
    fn test_invalid_private_key_keeps_state() {
        let host = host(Curve::Prime256v1);
        let err = host
            .set_private_key(&[Value::Bytes(vec![0u8; 32])])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NativeOperationError);
        assert_eq!(host.state(), HostState::KeysPending);
    }

    #[test]
    fn test_argument_errors() {
        let host = host(Curve::Secp224r1);
        let err = host
            .get_public_key(&[Value::from("hex"), Value::from("hybrid")])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = host.compute_secret(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = host.compute_secret(&[Value::from(12u32)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);

        assert_eq!(host.get("curve"), Value::from("secp224r1"));
        assert!(host.methods().contains(&"generateKeysAsync"));
    }

    #[test]
    fn test_sync_calls_refused_while_async_work_outstanding() {
        let host = host(Curve::Secp256k1);
        host.set_private_key(&[Value::from("02".repeat(32).as_str()), Value::from("hex")])
            .unwrap();
        let public = host.get_public_key(&[]).unwrap();

        let (invoker, deliveries) = invoker::channel();
        let mut table = PromiseTable::default();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        host.lane
            .submit(Completion::new("block", table.create(), invoker), move || {
                release_rx.recv().ok();
                Ok(NativeValue::Undefined)
            });

        let refused: Vec<(&str, Result<Value>)> = vec![
            ("ecdh.generateKeys", host.generate_keys(&[])),
            ("ecdh.setPrivateKey", host.set_private_key(&[Value::Bytes(vec![3; 32])])),
            ("ecdh.setPublicKey", host.set_public_key(&[public.clone()])),
            ("ecdh.getPublicKey", host.get_public_key(&[])),
            ("ecdh.getPrivateKey", host.get_private_key(&[])),
            ("ecdh.computeSecret", host.compute_secret(&[public.clone()])),
            ("ecdh.exportPrivateKey", host.export_private_key(&[])),
        ];
        for (op, result) in refused {
            let err = result.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NativeOperationError, "{op}");
            assert_eq!(err.operation(), op);
        }
        assert_eq!(host.get("pendingOperations"), Value::Number(1.0));

        release_tx.send(()).unwrap();
        drain(&deliveries, &mut table, 1);
        assert_eq!(host.pending_work(), 0);
        assert_eq!(host.get_public_key(&[]).unwrap(), public);
    }

    #[test]
    fn test_async_keys_published_on_delivery() {
        let host = host(Curve::Prime256v1);
        let (invoker, deliveries) = invoker::channel();
        let mut table = PromiseTable::default();
        let id = table.create();

        let mut completion = Completion::new("ecdh.generateKeysAsync", id, invoker.clone());
        let state = host.state.clone();
        completion.on_delivery(move |fulfilled| {
            if fulfilled {
                state.mark_ready();
            }
        });
        let engine = Arc::clone(&host.engine);
        host.lane.submit(completion, move || {
            let mut engine = lock_unpoisoned(&engine);
            engine.generate_keys_default()?;
            Ok(encode_output(engine.public_key(PointFormat::Uncompressed)?, None))
        });

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while invoker.scheduled() == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(invoker.scheduled(), 1);
        assert_eq!(host.state(), HostState::KeysPending);
        assert!(host.get_public_key(&[]).is_err());

        drain(&deliveries, &mut table, 1);
        assert_eq!(host.state(), HostState::Ready);
        let public = host.get_public_key(&[]).unwrap();
        assert_eq!(table.result(id), Some(Ok(public)));
    }

    #[test]
    fn test_pem_export_and_import() {
        let source = host(Curve::Secp256k1);
        source.generate_keys(&[]).unwrap();
        let private = source
            .export_private_key(&[Value::from("pem"), Value::from("base64")])
            .unwrap();
        let public = source.export_public_key(&[Value::from("der")]).unwrap();

        let restored = host(Curve::Secp256k1);
        restored
            .import_private_key(&[private.clone(), Value::from("pem"), Value::from("base64")])
            .unwrap();
        assert_eq!(restored.state(), HostState::Ready);
        assert_eq!(restored.export_public_key(&[Value::from("der")]).unwrap(), public);

        let wrong_curve = host(Curve::Secp224r1);
        let err = wrong_curve
            .import_private_key(&[private, Value::from("pem"), Value::from("base64")])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NativeOperationError);
        assert_eq!(wrong_curve.state(), HostState::KeysPending);

        let err = restored
            .export_public_key(&[Value::from("jwk")])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
