//! Native capability factory
//!
//! Turns validated parameters into engines bound to one cryptographic
//! configuration. Construction is synchronous and never generates key material.
//!
//! Features:
//! - ECDH over secp256k1, secp224r1 and prime256v1 (with aliases)
//! - AES-128/192/256 in CTR mode
//! - PBKDF2 with SHA-1 and SHA-2 digests

pub mod cipher;
pub mod ecdh;
pub mod kdf;

pub use cipher::{CipherAlgorithm, CipherEngine, Direction, SUPPORTED_CIPHERS};
pub use ecdh::{Curve, EcdhEngine, KeyFormat, PointFormat, SUPPORTED_CURVES};
pub use kdf::{digest_by_name, pbkdf2_derive, SUPPORTED_HASHES};

use crate::error::{BridgeError, Result};
use crate::validate::{CreateCipherParams, CreateEcdhParams};

/// Build an ECDH engine for the requested curve
pub fn create_ecdh(operation: &str, params: &CreateEcdhParams) -> Result<EcdhEngine> {
    let curve = Curve::from_name(&params.curve_name)
        .ok_or_else(|| BridgeError::unsupported(operation, "curve", &params.curve_name))?;
    Ok(EcdhEngine::new(curve))
}

/// Build a cipher engine keyed with the supplied key and iv
pub fn create_cipher(
    operation: &str,
    params: &CreateCipherParams,
    direction: Direction,
) -> Result<CipherEngine> {
    let algorithm = CipherAlgorithm::from_name(&params.cipher_type)
        .ok_or_else(|| BridgeError::unsupported(operation, "cipher", &params.cipher_type))?;
    CipherEngine::new(operation, algorithm, direction, &params.cipher_key, &params.iv)
}
