//! Argument validation at the binding boundary
//!
//! Every bridge entry point funnels its raw [`Value`] arguments through an
//! [`Arguments`] reader and produces a typed parameter set before any native
//! state is touched. A failed read returns immediately; there is no partially
//! validated request.

use std::collections::BTreeMap;

use zeroize::Zeroizing;

use crate::encoding::Encoding;
use crate::error::{BridgeError, Result};
use crate::native::{KeyFormat, PointFormat};
use crate::value::Value;

/// Largest derived key length accepted from the runtime
pub const MAX_KEYLEN: u32 = i32::MAX as u32;

/// Positional argument reader for one call
#[derive(Debug, Clone, Copy)]
pub struct Arguments<'a> {
    operation: &'a str,
    args: &'a [Value],
}

impl<'a> Arguments<'a> {
    pub fn new(operation: &'a str, args: &'a [Value]) -> Self {
        Self { operation, args }
    }

    pub fn operation(&self) -> &'a str {
        self.operation
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Reject calls carrying more than `max` arguments
    pub fn at_most(&self, max: usize) -> Result<()> {
        if self.args.len() > max {
            return Err(BridgeError::invalid_argument(
                self.operation,
                format!(
                    "expected at most {max} argument{}, got {}",
                    if max == 1 { "" } else { "s" },
                    self.args.len()
                ),
            ));
        }
        Ok(())
    }

    /// Argument at `index`, or `None` when absent, `undefined` or `null`
    pub fn optional(&self, index: usize) -> Option<&'a Value> {
        self.args.get(index).filter(|v| !v.is_nullish())
    }

    /// Argument at `index`; absent or `undefined` is an invalid call
    pub fn required(&self, index: usize, name: &str) -> Result<&'a Value> {
        match self.args.get(index) {
            Some(v) if !v.is_undefined() => Ok(v),
            _ => Err(BridgeError::invalid_argument(
                self.operation,
                format!("{name} is required"),
            )),
        }
    }

    pub fn object(&self, index: usize, name: &str) -> Result<ObjectArg<'a>> {
        let value = self.required(index, name)?;
        ObjectArg::from_value(self.operation, name, value)
    }

    pub fn string(&self, index: usize, name: &str) -> Result<&'a str> {
        let value = self.required(index, name)?;
        value.as_str().ok_or_else(|| {
            BridgeError::type_mismatch(self.operation, name, "a string", value.type_name())
        })
    }

    pub fn optional_string(&self, index: usize, name: &str) -> Result<Option<&'a str>> {
        match self.optional(index) {
            None => Ok(None),
            Some(value) => value.as_str().map(Some).ok_or_else(|| {
                BridgeError::type_mismatch(self.operation, name, "a string", value.type_name())
            }),
        }
    }

    pub fn optional_bool(&self, index: usize, name: &str) -> Result<Option<bool>> {
        match self.optional(index) {
            None => Ok(None),
            Some(value) => value.as_bool().map(Some).ok_or_else(|| {
                BridgeError::type_mismatch(self.operation, name, "a boolean", value.type_name())
            }),
        }
    }

    /// Non-negative integer that fits in `u32`
    pub fn u32(&self, index: usize, name: &str) -> Result<u32> {
        let value = self.required(index, name)?;
        let n = value.as_number().ok_or_else(|| {
            BridgeError::type_mismatch(self.operation, name, "a number", value.type_name())
        })?;
        if !n.is_finite() || n.fract() != 0.0 || n < 0.0 || n > f64::from(u32::MAX) {
            return Err(BridgeError::invalid_argument(
                self.operation,
                format!("{name} must be a non-negative integer, got {n}"),
            ));
        }
        Ok(n as u32)
    }

    /// Binary argument: a buffer, or a string decoded with `encoding` (utf8 by default)
    pub fn bytes(&self, index: usize, name: &str, encoding: Option<Encoding>) -> Result<Vec<u8>> {
        let value = self.required(index, name)?;
        value_to_bytes(self.operation, name, value, encoding)
    }

    pub fn optional_encoding(&self, index: usize, name: &str) -> Result<Option<Encoding>> {
        self.optional_string(index, name)?
            .map(|s| Encoding::parse(self.operation, s))
            .transpose()
    }

    /// EC point format name; `None` means the default (uncompressed)
    pub fn optional_format(&self, index: usize, name: &str) -> Result<Option<PointFormat>> {
        match self.optional_string(index, name)? {
            None => Ok(None),
            Some(s) => PointFormat::from_name(s).map(Some).ok_or_else(|| {
                BridgeError::invalid_argument(self.operation, format!("unknown point format {s}"))
            }),
        }
    }

    /// Key document format name (`pem` or `der`); `None` means pem
    pub fn optional_key_format(&self, index: usize, name: &str) -> Result<Option<KeyFormat>> {
        match self.optional_string(index, name)? {
            None => Ok(None),
            Some(s) => KeyFormat::from_name(s).map(Some).ok_or_else(|| {
                BridgeError::invalid_argument(self.operation, format!("unknown key format {s}"))
            }),
        }
    }
}

/// Object argument with named-field accessors
#[derive(Debug, Clone, Copy)]
pub struct ObjectArg<'a> {
    operation: &'a str,
    fields: &'a BTreeMap<String, Value>,
}

impl<'a> ObjectArg<'a> {
    fn from_value(operation: &'a str, name: &str, value: &'a Value) -> Result<Self> {
        match value.as_object() {
            Some(fields) => Ok(Self { operation, fields }),
            None => Err(BridgeError::type_mismatch(
                operation,
                name,
                "an object",
                value.type_name(),
            )),
        }
    }

    pub fn has(&self, field: &str) -> bool {
        self.fields.get(field).is_some_and(|v| !v.is_undefined())
    }

    pub fn required(&self, field: &str) -> Result<&'a Value> {
        match self.fields.get(field) {
            Some(v) if !v.is_undefined() => Ok(v),
            _ => Err(BridgeError::missing_field(self.operation, field)),
        }
    }

    pub fn required_string(&self, field: &str) -> Result<&'a str> {
        let value = self.required(field)?;
        value.as_str().ok_or_else(|| {
            BridgeError::type_mismatch(self.operation, field, "a string", value.type_name())
        })
    }

    pub fn required_bytes(&self, field: &str) -> Result<Vec<u8>> {
        let value = self.required(field)?;
        value_to_bytes(self.operation, field, value, None)
    }
}

fn value_to_bytes(
    operation: &str,
    name: &str,
    value: &Value,
    encoding: Option<Encoding>,
) -> Result<Vec<u8>> {
    match value {
        Value::Bytes(b) => Ok(b.clone()),
        Value::String(s) => encoding.unwrap_or(Encoding::Utf8).decode(operation, s),
        other => Err(BridgeError::type_mismatch(
            operation,
            name,
            "a buffer or string",
            other.type_name(),
        )),
    }
}

/// Validated `createECDH` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateEcdhParams {
    pub curve_name: String,
}

/// `createECDH(params: { curve_name: string })`
pub fn parse_create_ecdh(operation: &str, args: &[Value]) -> Result<CreateEcdhParams> {
    let args = Arguments::new(operation, args);
    if args.is_empty() {
        return Err(BridgeError::invalid_argument(
            operation,
            "params object is required",
        ));
    }
    args.at_most(1)?;

    let params = args.object(0, "params")?;
    let curve_name = params.required_string("curve_name")?;

    Ok(CreateEcdhParams {
        curve_name: curve_name.to_string(),
    })
}

/// Validated `createCipheriv` / `createDecipheriv` request
#[derive(Debug, Clone)]
pub struct CreateCipherParams {
    pub cipher_type: String,
    pub cipher_key: Zeroizing<Vec<u8>>,
    pub iv: Vec<u8>,
}

/// `createCipheriv(params: { cipher_type, cipher_key, iv })`
pub fn parse_create_cipher(operation: &str, args: &[Value]) -> Result<CreateCipherParams> {
    let args = Arguments::new(operation, args);
    if args.is_empty() {
        return Err(BridgeError::invalid_argument(
            operation,
            "params object is required",
        ));
    }
    args.at_most(1)?;

    let params = args.object(0, "params")?;
    let cipher_type = params.required_string("cipher_type")?;
    let cipher_key = Zeroizing::new(params.required_bytes("cipher_key")?);
    let iv = params.required_bytes("iv")?;

    Ok(CreateCipherParams {
        cipher_type: cipher_type.to_ascii_lowercase(),
        cipher_key,
        iv,
    })
}

/// Validated `pbkdf2` request
#[derive(Debug, Clone)]
pub struct Pbkdf2Params {
    pub password: Zeroizing<Vec<u8>>,
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub keylen: usize,
    pub digest: String,
}

/// `pbkdf2(password, salt, iterations, keylen, digest)`
pub fn parse_pbkdf2(operation: &str, args: &[Value]) -> Result<Pbkdf2Params> {
    let args = Arguments::new(operation, args);
    args.at_most(5)?;

    let password = Zeroizing::new(args.bytes(0, "password", None)?);
    let salt = args.bytes(1, "salt", None)?;
    let iterations = args.u32(2, "iterations")?;
    if iterations == 0 {
        return Err(BridgeError::invalid_argument(
            operation,
            "iterations must be at least 1",
        ));
    }
    let keylen = args.u32(3, "keylen")?;
    if keylen > MAX_KEYLEN {
        return Err(BridgeError::invalid_argument(
            operation,
            format!("keylen must not exceed {MAX_KEYLEN}"),
        ));
    }
    let digest = args.string(4, "digest")?;

    Ok(Pbkdf2Params {
        password,
        salt,
        iterations,
        keylen: keylen as usize,
        digest: digest.to_ascii_lowercase(),
    })
}
