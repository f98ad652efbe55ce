//! Key material: the process master key, per-object file keys and stream IVs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Size of an AES-256 file key in bytes
pub const FILE_KEY_SIZE: usize = 32;
/// Size of the per-stream IV; the remaining 32 bits of the counter block are the block index
pub const STREAM_IV_SIZE: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("master key is empty")]
    EmptyMasterKey,
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("invalid key size, expected {expected}, got {actual}")]
    Size { expected: usize, actual: usize },
}

/// Process-wide secret every envelope is wrapped and MACed with.
///
/// Configured out of band as arbitrary bytes and stretched to 256 bits with
/// SHA-256. Immutable once loaded.
#[derive(Clone, PartialEq, Eq)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    pub fn derive(configured: &[u8]) -> Self {
        Self(Sha256::digest(configured).into())
    }

    /// Parse the hex contents of a `master.key` file.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim())?;
        if bytes.is_empty() {
            return Err(KeyError::EmptyMasterKey);
        }
        Ok(Self::derive(&bytes))
    }

    /// Fresh random configured value, hex encoded, for `init`.
    pub fn generate_hex() -> String {
        let mut buff = [0u8; 32];
        getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
        hex::encode(buff)
    }

    pub fn bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

/// 256-bit per-object content key. Never persisted in the clear.
#[derive(Clone, PartialEq, Eq)]
pub struct FileKey([u8; FILE_KEY_SIZE]);

impl FileKey {
    pub fn generate() -> Self {
        let mut buff = [0; FILE_KEY_SIZE];
        getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
        Self(buff)
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; FILE_KEY_SIZE] = data.try_into().map_err(|_| KeyError::Size {
            expected: FILE_KEY_SIZE,
            actual: data.len(),
        })?;
        Ok(Self(bytes))
    }

    pub fn bytes(&self) -> &[u8; FILE_KEY_SIZE] {
        &self.0
    }
}

impl From<[u8; FILE_KEY_SIZE]> for FileKey {
    fn from(bytes: [u8; FILE_KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FileKey(<redacted>)")
    }
}

/// 96-bit IV of one encrypted stream, fresh for every create/update.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamIv([u8; STREAM_IV_SIZE]);

impl StreamIv {
    pub fn generate() -> Self {
        let mut buff = [0; STREAM_IV_SIZE];
        getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
        Self(buff)
    }

    pub fn bytes(&self) -> &[u8; STREAM_IV_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; STREAM_IV_SIZE]> for StreamIv {
    fn from(bytes: [u8; STREAM_IV_SIZE]) -> Self {
        Self(bytes)
    }
}

impl FromStr for StreamIv {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let bytes: [u8; STREAM_IV_SIZE] =
            bytes.as_slice().try_into().map_err(|_| KeyError::Size {
                expected: STREAM_IV_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for StreamIv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamIv({})", self.to_hex())
    }
}

impl Serialize for StreamIv {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for StreamIv {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
