//! AES-256-CTR streaming with random access.
//!
//! The counter block is `iv (96 bits) ∥ block index (32 bits, big endian)`,
//! so any 16-byte aligned offset can be decrypted without touching the
//! bytes before it.

use ctr::cipher::{KeyIvInit, StreamCipher};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::keys::{FileKey, StreamIv};
use super::CryptoError;

type ContentCipher = ctr::Ctr32BE<aes::Aes256>;

/// AES block size in bytes
pub const BLOCK_SIZE: u64 = 16;
const BUFFER_SIZE: usize = 64 * 1024;

pub const fn align_down(offset: u64) -> u64 {
    offset - offset % BLOCK_SIZE
}

pub const fn align_up(offset: u64) -> u64 {
    match offset % BLOCK_SIZE {
        0 => offset,
        rem => offset + (BLOCK_SIZE - rem),
    }
}

/// Streams must stay below this many bytes; the 32-bit block counter
/// cannot address further.
pub const MAX_STREAM_LEN: u64 = (u32::MAX as u64 + 1) * BLOCK_SIZE;

fn cipher_at(
    key: &FileKey,
    iv: &StreamIv,
    aligned_offset: u64,
) -> Result<ContentCipher, CryptoError> {
    let block = u32::try_from(aligned_offset / BLOCK_SIZE)
        .map_err(|_| CryptoError::TooLarge(aligned_offset))?;
    let mut nonce = [0u8; 16];
    nonce[..12].copy_from_slice(iv.bytes());
    nonce[12..].copy_from_slice(&block.to_be_bytes());
    Ok(ContentCipher::new(key.bytes().into(), (&nonce).into()))
}

fn ensure_addressable(end: u64) -> Result<(), CryptoError> {
    if end >= MAX_STREAM_LEN {
        return Err(CryptoError::TooLarge(end));
    }
    Ok(())
}

/// What `encrypt` saw going through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptSummary {
    pub length: u64,
    /// Hex SHA-256 of the plaintext.
    pub sha256: String,
}

/// Encrypt everything readable from `reader` into `writer`.
pub async fn encrypt<R, W>(
    reader: &mut R,
    writer: &mut W,
    key: &FileKey,
    iv: &StreamIv,
) -> Result<EncryptSummary, CryptoError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut cipher = cipher_at(key, iv, 0)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut length = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        length += n as u64;
        ensure_addressable(length)?;
        hasher.update(&buf[..n]);
        cipher
            .try_apply_keystream(&mut buf[..n])
            .map_err(|_| CryptoError::TooLarge(length))?;
        writer.write_all(&buf[..n]).await?;
    }
    writer.flush().await?;

    Ok(EncryptSummary {
        length,
        sha256: hex::encode(hasher.finalize()),
    })
}

/// Decrypt plaintext bytes `[start, stop)` to `writer`.
///
/// `reader` must yield ciphertext beginning at `align_down(start)`. Reading
/// stops at `align_up(stop)` or end of input, whichever comes first; bytes
/// before `start` and after `stop` are discarded. Returns bytes emitted.
pub async fn decrypt_range<R, W>(
    reader: &mut R,
    writer: &mut W,
    key: &FileKey,
    iv: &StreamIv,
    start: u64,
    stop: u64,
) -> Result<u64, CryptoError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    if stop < start {
        return Err(CryptoError::InvalidRange { start, stop });
    }
    let aligned_start = align_down(start);
    let aligned_stop = align_up(stop);
    let mut cipher = cipher_at(key, iv, aligned_start)?;

    let mut skip = start - aligned_start;
    let mut to_read = aligned_stop - aligned_start;
    let mut to_emit = stop - start;
    let mut emitted = 0u64;
    let mut buf = vec![0u8; BUFFER_SIZE];

    while to_read > 0 && to_emit > 0 {
        let want = (buf.len() as u64).min(to_read) as usize;
        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            break;
        }
        to_read -= n as u64;
        cipher
            .try_apply_keystream(&mut buf[..n])
            .map_err(|_| CryptoError::TooLarge(aligned_stop - to_read))?;

        let mut chunk = &buf[..n];
        if skip > 0 {
            let dropped = (skip as usize).min(chunk.len());
            chunk = &chunk[dropped..];
            skip -= dropped as u64;
        }
        let take = (chunk.len() as u64).min(to_emit) as usize;
        if take > 0 {
            writer.write_all(&chunk[..take]).await?;
            to_emit -= take as u64;
            emitted += take as u64;
        }
    }
    writer.flush().await?;

    Ok(emitted)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ1234567890!@";

    async fn encrypted(plain: &[u8], key: &FileKey, iv: &StreamIv) -> Vec<u8> {
        let mut out = Vec::new();
        let mut reader = plain;
        encrypt(&mut reader, &mut out, key, iv).await.unwrap();
        out
    }

    async fn range(cipher: &[u8], key: &FileKey, iv: &StreamIv, start: u64, stop: u64) -> Vec<u8> {
        let mut reader = &cipher[align_down(start) as usize..];
        let mut out = Vec::new();
        let n = decrypt_range(&mut reader, &mut out, key, iv, start, stop)
            .await
            .unwrap();
        assert_eq!(n as usize, out.len());
        out
    }

    #[test]
    fn test_alignment() {
        assert_eq!(align_down(0), 0);
        assert_eq!(align_down(17), 16);
        assert_eq!(align_up(16), 16);
        assert_eq!(align_up(17), 32);
    }

    #[tokio::test]
    async fn test_encrypt_summary() {
        let key = FileKey::generate();
        let iv = StreamIv::generate();
        let mut out = Vec::new();
        let mut reader: &[u8] = b"hello";
        let summary = encrypt(&mut reader, &mut out, &key, &iv).await.unwrap();
        assert_eq!(summary.length, 5);
        assert_eq!(
            summary.sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(out.len(), 5);
        assert_ne!(out, b"hello");
    }

    #[tokio::test]
    async fn test_range_inside_file() {
        let key = FileKey::generate();
        let iv = StreamIv::generate();
        let cipher = encrypted(SAMPLE, &key, &iv).await;

        // Range: bytes=5-34 is [5, 35)
        let out = range(&cipher, &key, &iv, 5, 35).await;
        assert_eq!(out, b"fghijklmnopqrstuvwxyzABCDEFGHI");
    }

    #[tokio::test]
    async fn test_every_range_matches_plaintext() {
        let key = FileKey::generate();
        let iv = StreamIv::generate();
        let plain: Vec<u8> = (0..200u32).map(|i| (i * 7 % 251) as u8).collect();
        let cipher = encrypted(&plain, &key, &iv).await;

        for (start, stop) in [(0, 200), (1, 2), (15, 17), (16, 32), (33, 199), (190, 250)] {
            let out = range(&cipher, &key, &iv, start, stop).await;
            let end = (stop as usize).min(plain.len());
            assert_eq!(out, &plain[start as usize..end], "range {start}..{stop}");
        }
    }

    #[tokio::test]
    async fn test_encrypt_is_involution() {
        let key = FileKey::generate();
        let iv = StreamIv::generate();
        let cipher = encrypted(SAMPLE, &key, &iv).await;
        let again = encrypted(&cipher, &key, &iv).await;
        assert_eq!(again, SAMPLE);
    }

    #[tokio::test]
    async fn test_inverted_range() {
        let key = FileKey::generate();
        let iv = StreamIv::generate();
        let mut reader: &[u8] = &[];
        let mut out = Vec::new();
        let err = decrypt_range(&mut reader, &mut out, &key, &iv, 9, 3).await;
        assert!(matches!(err, Err(CryptoError::InvalidRange { .. })));
    }

    #[tokio::test]
    async fn test_offsets_past_counter_range() {
        let key = FileKey::generate();
        let iv = StreamIv::generate();
        assert!(cipher_at(&key, &iv, MAX_STREAM_LEN - BLOCK_SIZE).is_ok());
        assert!(matches!(
            cipher_at(&key, &iv, MAX_STREAM_LEN),
            Err(CryptoError::TooLarge(MAX_STREAM_LEN))
        ));

        let mut reader: &[u8] = &[0u8; 32];
        let mut out = Vec::new();
        let start = MAX_STREAM_LEN + 3;
        let err = decrypt_range(&mut reader, &mut out, &key, &iv, start, start + 6).await;
        assert!(matches!(err, Err(CryptoError::TooLarge(_))));
        assert!(out.is_empty());
    }

    #[test]
    fn test_stream_length_limit() {
        assert_eq!(MAX_STREAM_LEN, 64 << 30);
        assert!(ensure_addressable(MAX_STREAM_LEN - 1).is_ok());
        assert!(matches!(
            ensure_addressable(MAX_STREAM_LEN),
            Err(CryptoError::TooLarge(_))
        ));
    }
}
