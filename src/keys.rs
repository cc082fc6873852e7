//! Key pairs as base64-wrapped PEM documents
//!
//! A key holder carries the private key as a SEC1 `EC PRIVATE KEY` PEM and the
//! public key as an SPKI `PUBLIC KEY` PEM, each base64 encoded so it fits in a
//! single line. Generation and import both go through ECDH host objects.

use serde::Serialize;

use crate::encoding::Encoding;
use crate::error::{BridgeError, Result};
use crate::native::{Curve, KeyFormat};
use crate::runtime::ScriptRuntime;
use crate::value::Value;

/// Private and public key documents for one curve
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    pub curve: String,
    pub private_key_pem_base64: String,
    pub public_key_pem_base64: String,
}

/// Generate a fresh key pair on `curve`
pub fn generate_key_pair(rt: &mut ScriptRuntime, curve: &str) -> Result<KeyPair> {
    let ecdh = rt.call(
        "createECDH",
        &[Value::object([("curve_name", Value::from(curve))])],
    )?;
    let pending = rt.call_method(&ecdh, "generateKeysAsync", &[])?;
    rt.await_promise(&pending)?;
    export_pair(rt, &ecdh)
}

/// Rebuild a key pair from its base64 private key PEM, deriving the public key
pub fn import_private_key(rt: &mut ScriptRuntime, private_key_pem_base64: &str) -> Result<KeyPair> {
    let op = "keys.importPrivateKey";
    let document = Encoding::Base64.decode(op, private_key_pem_base64.trim())?;
    let curve = Curve::of_private_key(&document, KeyFormat::Pem).ok_or_else(|| {
        BridgeError::invalid_argument(op, "not a PEM private key on a supported curve")
    })?;

    let ecdh = rt.call(
        "createECDH",
        &[Value::object([("curve_name", Value::from(curve.name()))])],
    )?;
    rt.call_method(
        &ecdh,
        "importPrivateKey",
        &[Value::Bytes(document), Value::from(KeyFormat::Pem.name())],
    )?;
    export_pair(rt, &ecdh)
}

fn export_pair(rt: &mut ScriptRuntime, ecdh: &Value) -> Result<KeyPair> {
    let args = [Value::from(KeyFormat::Pem.name()), Value::from("base64")];
    let private_key_pem_base64 = take_string(rt.call_method(ecdh, "exportPrivateKey", &args)?)?;
    let public_key_pem_base64 = take_string(rt.call_method(ecdh, "exportPublicKey", &args)?)?;
    let curve = rt
        .get_property(ecdh, "curve")?
        .as_str()
        .unwrap_or_default()
        .to_string();

    Ok(KeyPair {
        curve,
        private_key_pem_base64,
        public_key_pem_base64,
    })
}

fn take_string(value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(BridgeError::native_op(
            "keys.export",
            format!("expected a string, got {}", other.type_name()),
        )),
    }
}
