use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Size of a file id in bytes (128 bits)
pub const FILE_ID_SIZE: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum FileIdError {
    #[error("invalid file id hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("invalid file id length, expected {FILE_ID_SIZE} bytes, got {0}")]
    Length(usize),
}

/// Opaque random identifier of one ciphertext.
///
/// Primary key into the ciphertext cache and the permanent store.
/// Rendered as lower-case hex in cache file names and store keys.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId([u8; FILE_ID_SIZE]);

impl FileId {
    pub fn generate() -> Self {
        let mut buff = [0; FILE_ID_SIZE];
        getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
        Self(buff)
    }

    pub fn as_bytes(&self) -> &[u8; FILE_ID_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; FILE_ID_SIZE]> for FileId {
    fn from(bytes: [u8; FILE_ID_SIZE]) -> Self {
        Self(bytes)
    }
}

impl FromStr for FileId {
    type Err = FileIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let bytes: [u8; FILE_ID_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| FileIdError::Length(bytes.len()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.to_hex())
    }
}

impl Serialize for FileId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for FileId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let id = FileId::generate();
        let parsed: FileId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(id.to_string().len(), 32);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!("abc".parse::<FileId>(), Err(FileIdError::Hex(_))));
        assert!(matches!("abcd".parse::<FileId>(), Err(FileIdError::Length(2))));
    }

    #[test]
    fn test_serde_as_string() {
        let id: FileId = "000102030405060708090a0b0c0d0e0f".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"000102030405060708090a0b0c0d0e0f\"");
        let back: FileId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
