//! Per-grantee key envelopes.
//!
//! A permission row never stores the file key. It stores the key XORed with
//! an AES-256-CTR keystream (key = master key, nonce = a fresh per-row IV)
//! plus an HMAC-SHA256 over `grantee ∥ capabilities ∥ object id ∥ wrapped key`.
//! The MAC binds the row to its grantee and capability set; a row whose MAC
//! fails is treated as if it did not exist.

use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use super::keys::{FileKey, MasterKey, FILE_KEY_SIZE};
use super::CryptoError;
use crate::model::Capabilities;

type HmacSha256 = Hmac<Sha256>;
type WrapCipher = ctr::Ctr128BE<aes::Aes256>;

pub const PERMISSION_IV_SIZE: usize = 16;
pub const MAC_SIZE: usize = 32;

#[derive(Clone, PartialEq, Eq, Default)]
pub struct KeyEnvelope {
    pub iv: [u8; PERMISSION_IV_SIZE],
    pub wrapped_key: [u8; FILE_KEY_SIZE],
    pub mac: [u8; MAC_SIZE],
}

impl std::fmt::Debug for KeyEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyEnvelope")
            .field("iv", &hex::encode(self.iv))
            .field("mac", &hex::encode(self.mac))
            .finish_non_exhaustive()
    }
}

fn apply_passphrase(
    master: &MasterKey,
    iv: &[u8; PERMISSION_IV_SIZE],
    key: &[u8; FILE_KEY_SIZE],
) -> [u8; FILE_KEY_SIZE] {
    let mut out = *key;
    let mut cipher = WrapCipher::new(master.bytes().into(), iv.into());
    cipher.apply_keystream(&mut out);
    out
}

fn mac_for(
    master: &MasterKey,
    grantee: &str,
    capabilities: Capabilities,
    object_id: Uuid,
    wrapped_key: &[u8],
) -> HmacSha256 {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(master.bytes()).expect("hmac accepts any key length");
    mac.update(grantee.as_bytes());
    mac.update(&[capabilities.bits()]);
    mac.update(object_id.as_bytes());
    mac.update(wrapped_key);
    mac
}

impl KeyEnvelope {
    /// Wrap `file_key` under a fresh IV and MAC it for this grantee.
    pub fn seal(
        master: &MasterKey,
        grantee: &str,
        capabilities: Capabilities,
        object_id: Uuid,
        file_key: &FileKey,
    ) -> Self {
        let mut iv = [0u8; PERMISSION_IV_SIZE];
        getrandom::getrandom(&mut iv).expect("failed to generate random bytes");
        let wrapped_key = apply_passphrase(master, &iv, file_key.bytes());
        let mac = mac_for(master, grantee, capabilities, object_id, &wrapped_key)
            .finalize()
            .into_bytes()
            .into();
        Self {
            iv,
            wrapped_key,
            mac,
        }
    }

    /// Rebuild from stored columns.
    pub fn from_parts(iv: &[u8], wrapped_key: &[u8], mac: &[u8]) -> Result<Self, CryptoError> {
        let size_err = |expected: usize, actual: usize| super::KeyError::Size { expected, actual };
        Ok(Self {
            iv: iv
                .try_into()
                .map_err(|_| size_err(PERMISSION_IV_SIZE, iv.len()))?,
            wrapped_key: wrapped_key
                .try_into()
                .map_err(|_| size_err(FILE_KEY_SIZE, wrapped_key.len()))?,
            mac: mac.try_into().map_err(|_| size_err(MAC_SIZE, mac.len()))?,
        })
    }

    pub fn verify(
        &self,
        master: &MasterKey,
        grantee: &str,
        capabilities: Capabilities,
        object_id: Uuid,
    ) -> bool {
        mac_for(master, grantee, capabilities, object_id, &self.wrapped_key)
            .verify_slice(&self.mac)
            .is_ok()
    }

    /// Verify the MAC, then unwrap the file key.
    pub fn open(
        &self,
        master: &MasterKey,
        grantee: &str,
        capabilities: Capabilities,
        object_id: Uuid,
    ) -> Result<FileKey, CryptoError> {
        if !self.verify(master, grantee, capabilities, object_id) {
            return Err(CryptoError::MacMismatch);
        }
        Ok(apply_passphrase(master, &self.iv, &self.wrapped_key).into())
    }
}
