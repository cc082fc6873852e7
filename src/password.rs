//! Password-sealed messages over the bridge
//!
//! PBKDF2-HMAC-SHA1 stretches the password to 44 bytes: a 32-byte AES-256 key
//! and a 12-byte iv prefix. The counter block is the prefix followed by
//! `00 00 00 02`, the layout GCM uses for its first data block, so the
//! ciphertext matches GCM output without the tag. Sealed text is base64.
//!
//! Both directions run through the runtime: key derivation is the async
//! `pbkdf2` call and the keystream comes from a cipher host object.

use crate::encoding::Encoding;
use crate::error::{BridgeError, Result};
use crate::runtime::ScriptRuntime;
use crate::value::Value;

const KEY_LEN: usize = 32;
const IV_PREFIX_LEN: usize = 12;
const COUNTER_SUFFIX: [u8; 4] = [0, 0, 0, 2];
const DIGEST: &str = "sha1";

/// Default salt when none is configured
pub const DEFAULT_SALT: &[u8] = b"crypto-bridge";

/// Default PBKDF2 iteration count
pub const DEFAULT_ITERATIONS: u32 = 2000;

/// Key stretching parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfParams {
    pub salt: Vec<u8>,
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            salt: DEFAULT_SALT.to_vec(),
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

/// Encrypt `plaintext` under `password`, returning base64
pub fn seal(
    rt: &mut ScriptRuntime,
    password: &str,
    plaintext: &str,
    params: &KdfParams,
) -> Result<String> {
    let cipher = keyed_cipher(rt, "createCipheriv", password, params)?;
    let body = run_cipher(rt, &cipher, plaintext.as_bytes().to_vec())?;
    Ok(Encoding::Base64.encode(&body))
}

/// Decrypt a sealed message. Trailing zero bytes are stripped before the
/// plaintext is checked for UTF-8.
pub fn open(rt: &mut ScriptRuntime, password: &str, sealed: &str, params: &KdfParams) -> Result<String> {
    let data = Encoding::Base64.decode("password.open", sealed.trim())?;
    let cipher = keyed_cipher(rt, "createDecipheriv", password, params)?;
    let mut plain = run_cipher(rt, &cipher, data)?;

    let end = plain.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    plain.truncate(end);

    String::from_utf8(plain)
        .map_err(|_| BridgeError::native_op("password.open", "decrypted data is not valid UTF-8"))
}

fn keyed_cipher(
    rt: &mut ScriptRuntime,
    constructor: &str,
    password: &str,
    params: &KdfParams,
) -> Result<Value> {
    let pending = rt.call(
        "pbkdf2",
        &[
            Value::from(password),
            Value::Bytes(params.salt.clone()),
            Value::from(params.iterations),
            Value::from((KEY_LEN + IV_PREFIX_LEN) as u32),
            Value::from(DIGEST),
        ],
    )?;
    let stretched = rt.await_promise(&pending)?;
    let stretched = stretched.as_bytes().ok_or_else(|| {
        BridgeError::native_op("pbkdf2", "derived key was not delivered as bytes")
    })?;
    if stretched.len() != KEY_LEN + IV_PREFIX_LEN {
        return Err(BridgeError::native_op(
            "pbkdf2",
            format!("derived {} bytes, expected {}", stretched.len(), KEY_LEN + IV_PREFIX_LEN),
        ));
    }

    let (key, prefix) = stretched.split_at(KEY_LEN);
    let mut iv = prefix.to_vec();
    iv.extend_from_slice(&COUNTER_SUFFIX);

    rt.call(
        constructor,
        &[Value::object([
            ("cipher_type", Value::from("aes-256-ctr")),
            ("cipher_key", Value::from(key)),
            ("iv", Value::Bytes(iv)),
        ])],
    )
}

fn run_cipher(rt: &mut ScriptRuntime, cipher: &Value, data: Vec<u8>) -> Result<Vec<u8>> {
    rt.call_method(cipher, "setAutoPadding", &[Value::Bool(false)])?;
    let pending = rt.call_method(cipher, "updateAsync", &[Value::Bytes(data)])?;
    let pending_final = rt.call_method(cipher, "finalAsync", &[])?;

    let mut out = take_bytes(rt.await_promise(&pending)?, "update")?;
    out.extend(take_bytes(rt.await_promise(&pending_final)?, "final")?);
    Ok(out)
}

fn take_bytes(value: Value, step: &str) -> Result<Vec<u8>> {
    match value {
        Value::Bytes(b) => Ok(b),
        other => Err(BridgeError::native_op(
            format!("cipher.{step}"),
            format!("expected a buffer, got {}", other.type_name()),
        )),
    }
}
