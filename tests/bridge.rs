//! End-to-end tests driving the bridge through the script runtime

use std::time::{Duration, Instant};

use crypto_bridge::native::{CipherAlgorithm, CipherEngine, Direction};
use crypto_bridge::{ErrorKind, HostState, PromiseState, ScriptRuntime, Settings, Value};

fn runtime(workers: usize) -> ScriptRuntime {
    ScriptRuntime::new(&Settings {
        worker_threads: workers,
        ..Settings::default()
    })
    .unwrap()
}

fn ecdh_params(curve: &str) -> Value {
    Value::object([("curve_name", Value::from(curve))])
}

/// Wait until `count` deliveries sit in the runtime's queue without running them
fn wait_scheduled(rt: &ScriptRuntime, count: u64) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while rt.invoker().scheduled() < count && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(rt.invoker().scheduled() >= count, "deliveries were not scheduled in time");
}

fn state_of(rt: &ScriptRuntime, host: &Value) -> String {
    rt.get_property(host, "state")
        .unwrap()
        .as_str()
        .unwrap()
        .to_string()
}

#[test]
fn test_create_ecdh_without_params_allocates_nothing() {
    let mut rt = runtime(1);
    let err = rt.call("createECDH", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = rt.call("createECDH", &[Value::from("secp256k1")]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);

    let err = rt
        .call("createECDH", &[Value::object::<&str, _>([])])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingRequiredField);
    assert!(err.to_string().contains("curve_name is required"));

    let err = rt.call("createECDH", &[ecdh_params("sect571k1")]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedAlgorithm);

    assert_eq!(rt.stats().host_objects_created, 0);
    assert_eq!(rt.queue_stats().submitted, 0);
}

#[test]
fn test_secp256k1_lifecycle() {
    let mut rt = runtime(2);
    let ecdh = rt.call("createECDH", &[ecdh_params("secp256k1")]).unwrap();

    assert_eq!(state_of(&rt, &ecdh), HostState::KeysPending.as_str());
    assert_eq!(
        rt.get_property(&ecdh, "pendingOperations").unwrap(),
        Value::Number(0.0)
    );
    assert_eq!(rt.queue_stats().submitted, 0);

    let public = rt.call_method(&ecdh, "generateKeys", &[]).unwrap();
    assert_eq!(state_of(&rt, &ecdh), HostState::Ready.as_str());
    assert_eq!(public.as_bytes().unwrap().len(), 65);

    let again = rt.call_method(&ecdh, "getPublicKey", &[]).unwrap();
    assert_eq!(again, public);

    let compressed = rt
        .call_method(&ecdh, "getPublicKey", &[Value::Null, Value::from("compressed")])
        .unwrap();
    assert_eq!(compressed.as_bytes().unwrap().len(), 33);
}

#[test]
fn test_async_key_agreement() {
    let mut rt = runtime(4);
    let alice = rt.call("createECDH", &[ecdh_params("prime256v1")]).unwrap();
    let bob = rt.call("createECDH", &[ecdh_params("P-256")]).unwrap();

    let a = rt.call_method(&alice, "generateKeysAsync", &[]).unwrap();
    let b = rt.call_method(&bob, "generateKeysAsync", &[]).unwrap();
    assert!(matches!(rt.promise_state(&a), Some(PromiseState::Pending) | Some(PromiseState::Fulfilled(_))));

    let alice_pub = rt.await_promise(&a).unwrap();
    let bob_pub = rt.await_promise(&b).unwrap();
    assert_eq!(state_of(&rt, &alice), "ready");

    let s1 = rt
        .call_method(&alice, "computeSecretAsync", &[bob_pub])
        .unwrap();
    let s2 = rt
        .call_method(&bob, "computeSecretAsync", &[alice_pub])
        .unwrap();
    let s1 = rt.await_promise(&s1).unwrap();
    let s2 = rt.await_promise(&s2).unwrap();
    assert_eq!(s1, s2);
    assert_eq!(s1.as_bytes().unwrap().len(), 32);
}

#[test]
fn test_compute_secret_before_keys_rejects() {
    let mut rt = runtime(1);
    let ecdh = rt.call("createECDH", &[ecdh_params("secp224r1")]).unwrap();
    let pending = rt
        .call_method(&ecdh, "computeSecretAsync", &[Value::Bytes(vec![4; 57])])
        .unwrap();
    let err = rt.await_promise(&pending).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NativeOperationError);
    assert_eq!(state_of(&rt, &ecdh), "keys-pending");
}

#[test]
fn test_cipher_updates_resolve_in_submission_order() {
    let mut rt = runtime(4);
    let key = vec![0x42u8; 32];
    let iv = vec![0x07u8; 16];
    let cipher = rt
        .call(
            "createCipheriv",
            &[Value::object([
                ("cipher_type", Value::from("aes-256-ctr")),
                ("cipher_key", Value::Bytes(key.clone())),
                ("iv", Value::Bytes(iv.clone())),
            ])],
        )
        .unwrap();
    assert_eq!(state_of(&rt, &cipher), "ready");

    let chunks: Vec<Vec<u8>> = (0..24u8).map(|i| vec![i; 7 + i as usize]).collect();
    let promises: Vec<Value> = chunks
        .iter()
        .map(|c| {
            rt.call_method(&cipher, "updateAsync", &[Value::Bytes(c.clone())])
                .unwrap()
        })
        .collect();

    let mut streamed = Vec::new();
    for p in &promises {
        streamed.extend(rt.await_promise(p).unwrap().as_bytes().unwrap().to_vec());
    }

    let mut reference =
        CipherEngine::new("t", CipherAlgorithm::Aes256Ctr, Direction::Encrypt, &key, &iv).unwrap();
    let expected = reference.update(&chunks.concat()).unwrap();
    assert_eq!(streamed, expected);

    let tail = rt.call_method(&cipher, "final", &[]).unwrap();
    assert_eq!(tail, Value::Bytes(Vec::new()));
    let err = rt
        .call_method(&cipher, "update", &[Value::Bytes(vec![1])])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NativeOperationError);
    assert_eq!(rt.get_property(&cipher, "finalized").unwrap(), Value::Bool(true));
}

#[test]
fn test_cancel_pending_rejects_queued_items() {
    let mut rt = runtime(1);
    let cipher = rt
        .call(
            "createDecipheriv",
            &[Value::object([
                ("cipher_type", Value::from("aes-128-ctr")),
                ("cipher_key", Value::from("0123456789abcdef")),
                ("iv", Value::Bytes(vec![0; 16])),
            ])],
        )
        .unwrap();

    let promises: Vec<Value> = (0..50)
        .map(|_| {
            rt.call_method(&cipher, "updateAsync", &[Value::Bytes(vec![0u8; 4096])])
                .unwrap()
        })
        .collect();
    let cancelled = rt.call_method(&cipher, "cancelPending", &[]).unwrap();
    let cancelled = cancelled.as_number().unwrap() as usize;
    assert!(cancelled <= 49);

    let mut rejected = 0;
    for p in &promises {
        match rt.await_promise(p) {
            Ok(_) => {}
            Err(e) => {
                assert_eq!(e.kind(), ErrorKind::Cancelled);
                rejected += 1;
            }
        }
    }
    assert_eq!(rejected, cancelled);
    assert_eq!(rt.get_property(&cipher, "pendingOperations").unwrap(), Value::Number(0.0));
}

#[test]
fn test_cipher_roundtrip_with_encodings() {
    let mut rt = runtime(2);
    let params = Value::object([
        ("cipher_type", Value::from("aes-192-ctr")),
        ("cipher_key", Value::Bytes(vec![9; 24])),
        ("iv", Value::Bytes(vec![3; 16])),
    ]);
    let enc = rt.call("createCipheriv", std::slice::from_ref(&params)).unwrap();
    let dec = rt.call("createDecipheriv", &[params]).unwrap();

    let ct = rt
        .call_method(
            &enc,
            "update",
            &[Value::from("attack at dawn"), Value::from("utf8"), Value::from("hex")],
        )
        .unwrap();
    let pt = rt
        .call_method(
            &dec,
            "updateAsync",
            &[ct, Value::from("hex"), Value::from("utf8")],
        )
        .unwrap();
    assert_eq!(rt.await_promise(&pt).unwrap(), Value::from("attack at dawn"));
}

#[test]
fn test_pbkdf2_async_matches_sync() {
    let mut rt = runtime(2);
    let args = [
        Value::from("password"),
        Value::from("salt"),
        Value::from(2u32),
        Value::from(20u32),
        Value::from("sha1"),
    ];
    let pending = rt.call("pbkdf2", &args).unwrap();
    let derived = rt.await_promise(&pending).unwrap();
    assert_eq!(
        hex::encode(derived.as_bytes().unwrap()),
        "ea6c014dc72d6f8ccd1ed92ace1d41f0d8de8957"
    );
    assert_eq!(rt.call("pbkdf2Sync", &args).unwrap(), derived);

    let mut bad = args.clone();
    bad[4] = Value::from("md5");
    let err = rt.call("pbkdf2", &bad).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedAlgorithm);
    assert_eq!(rt.queue_stats().submitted, 1);
}

#[test]
fn test_dropping_host_cancels_queued_work() {
    let mut rt = runtime(1);
    let ecdh = rt.call("createECDH", &[ecdh_params("secp256k1")]).unwrap();
    let promises: Vec<Value> = (0..20)
        .map(|_| rt.call_method(&ecdh, "generateKeysAsync", &[]).unwrap())
        .collect();
    assert_eq!(rt.stats().host_objects_live, 1);

    drop(ecdh);
    assert_eq!(rt.stats().host_objects_live, 0);

    let mut outcomes = (0, 0);
    for p in &promises {
        match rt.await_promise_timeout(p, Duration::from_secs(10)) {
            Ok(v) => {
                assert_eq!(v.as_bytes().unwrap().len(), 65);
                outcomes.0 += 1;
            }
            Err(e) => {
                assert_eq!(e.kind(), ErrorKind::Cancelled);
                outcomes.1 += 1;
            }
        }
    }
    assert_eq!(outcomes.0 + outcomes.1, 20);
}

#[test]
fn test_module_listing_functions() {
    let mut rt = runtime(1);
    let curves = rt.call("getCurves", &[]).unwrap();
    assert_eq!(
        curves,
        Value::Array(vec![
            Value::from("prime256v1"),
            Value::from("secp224r1"),
            Value::from("secp256k1"),
        ])
    );
    assert!(rt.call("getHashes", &[Value::Null]).is_err());
    assert_eq!(
        rt.call("createHash", &[]).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    rt.shutdown();
}

#[test]
fn test_async_key_generation_visible_only_after_delivery() {
    let mut rt = runtime(2);
    let ecdh = rt.call("createECDH", &[ecdh_params("secp256k1")]).unwrap();
    let pending = rt.call_method(&ecdh, "generateKeysAsync", &[]).unwrap();

    wait_scheduled(&rt, 1);
    assert_eq!(rt.stats().deliveries_run, 0);
    assert_eq!(state_of(&rt, &ecdh), "keys-pending");
    assert_eq!(rt.promise_state(&pending), Some(&PromiseState::Pending));
    assert_eq!(
        rt.get_property(&ecdh, "pendingOperations").unwrap(),
        Value::Number(1.0)
    );
    let err = rt.call_method(&ecdh, "getPublicKey", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NativeOperationError);

    assert_eq!(rt.run_pending(), 1);
    assert_eq!(state_of(&rt, &ecdh), "ready");
    let public = rt.await_promise(&pending).unwrap();
    assert_eq!(rt.call_method(&ecdh, "getPublicKey", &[]).unwrap(), public);
}

#[test]
fn test_cipher_progress_visible_only_after_delivery() {
    let mut rt = runtime(2);
    let cipher = rt
        .call(
            "createCipheriv",
            &[Value::object([
                ("cipher_type", Value::from("aes-128-ctr")),
                ("cipher_key", Value::Bytes(vec![1; 16])),
                ("iv", Value::Bytes(vec![2; 16])),
            ])],
        )
        .unwrap();
    let update = rt
        .call_method(&cipher, "updateAsync", &[Value::Bytes(vec![0; 4096])])
        .unwrap();
    let last = rt.call_method(&cipher, "finalAsync", &[]).unwrap();

    wait_scheduled(&rt, 2);
    assert_eq!(rt.get_property(&cipher, "bytesProcessed").unwrap(), Value::Number(0.0));
    assert_eq!(rt.get_property(&cipher, "finalized").unwrap(), Value::Bool(false));

    rt.await_promise(&update).unwrap();
    rt.await_promise(&last).unwrap();
    assert_eq!(rt.get_property(&cipher, "bytesProcessed").unwrap(), Value::Number(4096.0));
    assert_eq!(rt.get_property(&cipher, "finalized").unwrap(), Value::Bool(true));
}

#[test]
fn test_compute_secret_queued_behind_key_generation() {
    let mut rt = runtime(4);
    let peer = rt.call("createECDH", &[ecdh_params("secp256k1")]).unwrap();
    let peer_public = rt.call_method(&peer, "generateKeys", &[]).unwrap();

    let ecdh = rt.call("createECDH", &[ecdh_params("secp256k1")]).unwrap();
    let keys = rt.call_method(&ecdh, "generateKeysAsync", &[]).unwrap();
    let secret = rt
        .call_method(&ecdh, "computeSecretAsync", &[peer_public])
        .unwrap();
    assert_eq!(
        rt.get_property(&ecdh, "pendingOperations").unwrap(),
        Value::Number(2.0)
    );

    let own_public = rt.await_promise(&keys).unwrap();
    let secret = rt.await_promise(&secret).unwrap();
    let expected = rt
        .call_method(&peer, "computeSecret", &[own_public])
        .unwrap();
    assert_eq!(secret, expected);
}

#[test]
fn test_ecdh_sync_mutators_refused_while_async_queued() {
    let mut rt = runtime(1);
    let ecdh = rt.call("createECDH", &[ecdh_params("prime256v1")]).unwrap();
    let public = rt.call_method(&ecdh, "generateKeys", &[]).unwrap();
    let pending = rt.call_method(&ecdh, "generateKeysAsync", &[]).unwrap();

    let calls = [
        ("generateKeys", vec![]),
        ("setPrivateKey", vec![Value::Bytes(vec![5; 32])]),
        ("setPublicKey", vec![public]),
    ];
    for (method, args) in &calls {
        let err = rt.call_method(&ecdh, method, args).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NativeOperationError, "{method}");
        assert_eq!(err.operation(), format!("ecdh.{method}"));
    }

    rt.await_promise(&pending).unwrap();
    rt.call_method(&ecdh, "setPrivateKey", &[Value::Bytes(vec![5; 32])])
        .unwrap();
}

#[test]
fn test_awaited_results_are_released() {
    let mut rt = runtime(2);
    let cipher = rt
        .call(
            "createCipheriv",
            &[Value::object([
                ("cipher_type", Value::from("aes-256-ctr")),
                ("cipher_key", Value::Bytes(vec![3; 32])),
                ("iv", Value::Bytes(vec![4; 16])),
            ])],
        )
        .unwrap();
    for _ in 0..8 {
        let p = rt
            .call_method(&cipher, "updateAsync", &[Value::Bytes(vec![0; 1 << 16])])
            .unwrap();
        rt.await_promise(&p).unwrap();
    }
    let stats = rt.stats();
    assert_eq!(stats.promises_created, 8);
    assert_eq!(stats.promises_settled, 8);
    assert_eq!(stats.promises_retained, 0);
}

#[test]
fn test_pem_key_round_trip_through_runtime() {
    let mut rt = runtime(2);
    for curve in ["secp256k1", "secp224r1"] {
        let source = rt.call("createECDH", &[ecdh_params(curve)]).unwrap();
        let keys = rt.call_method(&source, "generateKeysAsync", &[]).unwrap();
        rt.await_promise(&keys).unwrap();

        let pem_args = [Value::from("pem"), Value::from("utf8")];
        let private = rt.call_method(&source, "exportPrivateKey", &pem_args).unwrap();
        let public = rt.call_method(&source, "exportPublicKey", &pem_args).unwrap();
        assert!(private.as_str().unwrap().contains("BEGIN EC PRIVATE KEY"));

        let restored = rt.call("createECDH", &[ecdh_params(curve)]).unwrap();
        rt.call_method(&restored, "importPrivateKey", &[private, Value::from("pem")])
            .unwrap();
        assert_eq!(state_of(&rt, &restored), "ready");
        assert_eq!(
            rt.call_method(&restored, "exportPublicKey", &pem_args).unwrap(),
            public
        );
    }
}
