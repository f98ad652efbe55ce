mod envelope;
mod keys;
mod stream;

pub use envelope::{KeyEnvelope, MAC_SIZE, PERMISSION_IV_SIZE};
pub use keys::{FileKey, KeyError, MasterKey, StreamIv, FILE_KEY_SIZE, STREAM_IV_SIZE};
pub use stream::{
    align_down, align_up, decrypt_range, encrypt, EncryptSummary, BLOCK_SIZE,
};

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("permission mac does not verify")]
    MacMismatch,
    #[error("invalid key material: {0}")]
    Key(#[from] KeyError),
    #[error("invalid range [{start}, {stop})")]
    InvalidRange { start: u64, stop: u64 },
    #[error("stream offset {0} is past the counter range")]
    TooLarge(u64),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
