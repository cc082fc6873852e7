//! PBKDF2 key derivation backed by ring

use std::num::NonZeroU32;

use ring::pbkdf2;

use crate::error::{BridgeError, Result};

/// Digest names reported by `getHashes`
pub const SUPPORTED_HASHES: &[&str] = &["sha1", "sha256", "sha384", "sha512"];

/// Resolve a PBKDF2 digest by name
pub fn digest_by_name(operation: &str, name: &str) -> Result<pbkdf2::Algorithm> {
    match name {
        "sha1" => Ok(pbkdf2::PBKDF2_HMAC_SHA1),
        "sha256" => Ok(pbkdf2::PBKDF2_HMAC_SHA256),
        "sha384" => Ok(pbkdf2::PBKDF2_HMAC_SHA384),
        "sha512" => Ok(pbkdf2::PBKDF2_HMAC_SHA512),
        other => Err(BridgeError::unsupported(operation, "digest", other)),
    }
}

/// Derive `keylen` bytes from `password` and `salt`
pub fn pbkdf2_derive(
    operation: &str,
    digest: pbkdf2::Algorithm,
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    keylen: usize,
) -> Result<Vec<u8>> {
    let iterations = NonZeroU32::new(iterations)
        .ok_or_else(|| BridgeError::invalid_argument(operation, "iterations must be at least 1"))?;
    let mut out = vec![0u8; keylen];
    if keylen > 0 {
        pbkdf2::derive(digest, iterations, salt, password, &mut out);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc6070_sha1_vector() {
        // RFC 6070: P = "password", S = "salt", c = 2, dkLen = 20
        let digest = digest_by_name("pbkdf2", "sha1").unwrap();
        let out = pbkdf2_derive("pbkdf2", digest, b"password", b"salt", 2, 20).unwrap();
        assert_eq!(hex::encode(out), "ea6c014dc72d6f8ccd1ed92ace1d41f0d8de8957");
    }

    #[test]
    fn test_unknown_digest() {
        let err = digest_by_name("pbkdf2", "md5").err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnsupportedAlgorithm);
        assert_eq!(err.to_string(), "pbkdf2: digest md5 not supported");
    }

    #[test]
    fn test_zero_length_output() {
        let digest = digest_by_name("pbkdf2", "sha256").unwrap();
        let out = pbkdf2_derive("pbkdf2", digest, b"pw", b"salt", 1, 0).unwrap();
        assert!(out.is_empty());
    }
}
