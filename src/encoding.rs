//! String encodings accepted for binary inputs and outputs

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;

use crate::error::{BridgeError, Result};
use crate::value::NativeValue;

/// Binary-to-text encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Hex,
    Base64,
    Latin1,
}

impl Encoding {
    /// Parse an encoding name as accepted by the runtime
    pub fn parse(operation: &str, name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "hex" => Ok(Encoding::Hex),
            "base64" => Ok(Encoding::Base64),
            "latin1" | "binary" => Ok(Encoding::Latin1),
            other => Err(BridgeError::invalid_argument(
                operation,
                format!("unknown encoding {other}"),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf8",
            Encoding::Hex => "hex",
            Encoding::Base64 => "base64",
            Encoding::Latin1 => "latin1",
        }
    }

    /// Decode a string argument into bytes
    pub fn decode(&self, operation: &str, input: &str) -> Result<Vec<u8>> {
        match self {
            Encoding::Utf8 => Ok(input.as_bytes().to_vec()),
            Encoding::Hex => hex::decode(input).map_err(|e| {
                BridgeError::invalid_argument(operation, format!("invalid hex input: {e}"))
            }),
            Encoding::Base64 => BASE64_STANDARD.decode(input).map_err(|e| {
                BridgeError::invalid_argument(operation, format!("invalid base64 input: {e}"))
            }),
            Encoding::Latin1 => input
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).map_err(|_| {
                        BridgeError::invalid_argument(
                            operation,
                            format!("character {c:?} is outside latin1"),
                        )
                    })
                })
                .collect(),
        }
    }

    /// Encode bytes into a string result
    pub fn encode(&self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Hex => hex::encode(bytes),
            Encoding::Base64 => BASE64_STANDARD.encode(bytes),
            Encoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        }
    }
}

/// Wrap output bytes: raw buffer when no encoding was requested
pub fn encode_output(bytes: Vec<u8>, encoding: Option<Encoding>) -> NativeValue {
    match encoding {
        Some(enc) => NativeValue::String(enc.encode(&bytes)),
        None => NativeValue::Bytes(bytes),
    }
}
