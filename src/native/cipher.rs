//! AES stream cipher engine (CTR mode, 128-bit big-endian counter)

use ctr::cipher::{KeyIvInit, StreamCipher};

use crate::error::{BridgeError, Result};

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type Aes192Ctr = ctr::Ctr128BE<aes::Aes192>;
type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// Cipher names reported by `getCiphers`
pub const SUPPORTED_CIPHERS: &[&str] = &["aes-128-ctr", "aes-192-ctr", "aes-256-ctr"];

/// Supported cipher algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherAlgorithm {
    Aes128Ctr,
    Aes192Ctr,
    Aes256Ctr,
}

impl CipherAlgorithm {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "aes-128-ctr" => Some(CipherAlgorithm::Aes128Ctr),
            "aes-192-ctr" => Some(CipherAlgorithm::Aes192Ctr),
            "aes-256-ctr" => Some(CipherAlgorithm::Aes256Ctr),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CipherAlgorithm::Aes128Ctr => "aes-128-ctr",
            CipherAlgorithm::Aes192Ctr => "aes-192-ctr",
            CipherAlgorithm::Aes256Ctr => "aes-256-ctr",
        }
    }

    pub fn key_len(&self) -> usize {
        match self {
            CipherAlgorithm::Aes128Ctr => 16,
            CipherAlgorithm::Aes192Ctr => 24,
            CipherAlgorithm::Aes256Ctr => 32,
        }
    }

    pub fn iv_len(&self) -> usize {
        16
    }
}

/// Whether the engine encrypts or decrypts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

impl Direction {
    pub fn label(&self) -> &'static str {
        match self {
            Direction::Encrypt => "cipher",
            Direction::Decrypt => "decipher",
        }
    }
}

enum Keystream {
    Aes128(Aes128Ctr),
    Aes192(Aes192Ctr),
    Aes256(Aes256Ctr),
}

impl Keystream {
    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Keystream::Aes128(c) => c.apply_keystream(buf),
            Keystream::Aes192(c) => c.apply_keystream(buf),
            Keystream::Aes256(c) => c.apply_keystream(buf),
        }
    }
}

/// Native cipher capability with sequential state
pub struct CipherEngine {
    algorithm: CipherAlgorithm,
    direction: Direction,
    keystream: Keystream,
    auto_padding: bool,
    finalized: bool,
    bytes_processed: u64,
}

impl std::fmt::Debug for CipherEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherEngine")
            .field("algorithm", &self.algorithm)
            .field("direction", &self.direction)
            .field("finalized", &self.finalized)
            .field("bytes_processed", &self.bytes_processed)
            .finish()
    }
}

impl CipherEngine {
    /// Initialize the keystream. Fails when key or iv length is wrong.
    pub fn new(
        operation: &str,
        algorithm: CipherAlgorithm,
        direction: Direction,
        key: &[u8],
        iv: &[u8],
    ) -> Result<Self> {
        if key.len() != algorithm.key_len() {
            return Err(BridgeError::native_init(
                operation,
                format!(
                    "invalid key length {} for {} (expected {})",
                    key.len(),
                    algorithm.name(),
                    algorithm.key_len()
                ),
            ));
        }
        if iv.len() != algorithm.iv_len() {
            return Err(BridgeError::native_init(
                operation,
                format!(
                    "invalid iv length {} for {} (expected {})",
                    iv.len(),
                    algorithm.name(),
                    algorithm.iv_len()
                ),
            ));
        }

        let init_err = |e: ctr::cipher::InvalidLength| BridgeError::native_init(operation, e);
        let keystream = match algorithm {
            CipherAlgorithm::Aes128Ctr => {
                Keystream::Aes128(Aes128Ctr::new_from_slices(key, iv).map_err(init_err)?)
            }
            CipherAlgorithm::Aes192Ctr => {
                Keystream::Aes192(Aes192Ctr::new_from_slices(key, iv).map_err(init_err)?)
            }
            CipherAlgorithm::Aes256Ctr => {
                Keystream::Aes256(Aes256Ctr::new_from_slices(key, iv).map_err(init_err)?)
            }
        };

        Ok(Self {
            algorithm,
            direction,
            keystream,
            auto_padding: true,
            finalized: false,
            bytes_processed: 0,
        })
    }

    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    /// Padding flag. Stream modes never pad, so this is recorded only.
    pub fn set_auto_padding(&mut self, enabled: bool) {
        self.auto_padding = enabled;
    }

    pub fn auto_padding(&self) -> bool {
        self.auto_padding
    }

    /// Process the next chunk
    pub fn update(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if self.finalized {
            return Err(BridgeError::native_op(
                format!("{}.update", self.direction.label()),
                "cipher already finalized",
            ));
        }
        let mut out = data.to_vec();
        self.keystream.apply(&mut out);
        self.bytes_processed += data.len() as u64;
        Ok(out)
    }

    /// Finish the stream. CTR has no trailing block, so the output is empty.
    pub fn finalize(&mut self) -> Result<Vec<u8>> {
        if self.finalized {
            return Err(BridgeError::native_op(
                format!("{}.final", self.direction.label()),
                "cipher already finalized",
            ));
        }
        self.finalized = true;
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // NIST SP 800-38A F.5.5 (CTR-AES256.Encrypt), first block
    const NIST_KEY: &str = "603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4";
    const NIST_IV: &str = "f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff";
    const NIST_PT: &str = "6bc1bee22e409f96e93d7e117393172a";
    const NIST_CT: &str = "601ec313775789a5b7a7f504bbf3d228";

    #[test]
    fn test_aes256_ctr_known_answer() {
        let key = hex::decode(NIST_KEY).unwrap();
        let iv = hex::decode(NIST_IV).unwrap();
        let mut engine = CipherEngine::new(
            "createCipheriv",
            CipherAlgorithm::Aes256Ctr,
            Direction::Encrypt,
            &key,
            &iv,
        )
        .unwrap();
        let ct = engine.update(&hex::decode(NIST_PT).unwrap()).unwrap();
        assert_eq!(hex::encode(ct), NIST_CT);
    }

    #[test]
    fn test_chunked_update_matches_single_update() {
        let key = [9u8; 16];
        let iv = [3u8; 16];
        let data: Vec<u8> = (0..100u8).collect();

        let mut whole =
            CipherEngine::new("op", CipherAlgorithm::Aes128Ctr, Direction::Encrypt, &key, &iv).unwrap();
        let expected = whole.update(&data).unwrap();

        let mut chunked =
            CipherEngine::new("op", CipherAlgorithm::Aes128Ctr, Direction::Encrypt, &key, &iv).unwrap();
        let mut out = chunked.update(&data[..7]).unwrap();
        out.extend(chunked.update(&data[7..50]).unwrap());
        out.extend(chunked.update(&data[50..]).unwrap());
        assert_eq!(out, expected);
        assert_eq!(chunked.bytes_processed(), 100);
    }

    #[test]
    fn test_invalid_key_length() {
        let err = CipherEngine::new(
            "createCipheriv",
            CipherAlgorithm::Aes192Ctr,
            Direction::Encrypt,
            &[0u8; 16],
            &[0u8; 16],
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NativeInitializationError);
    }

    #[test]
    fn test_update_after_final_fails() {
        let mut engine =
            CipherEngine::new("op", CipherAlgorithm::Aes256Ctr, Direction::Decrypt, &[1u8; 32], &[0u8; 16])
                .unwrap();
        assert!(engine.finalize().unwrap().is_empty());
        let err = engine.update(b"more").unwrap_err();
        assert_eq!(err.to_string(), "decipher.update: cipher already finalized");
        assert!(engine.finalize().is_err());
    }
}
