// HLS Decryption Service: Applies the segment's key (if any) to downloaded bytes.
//
// Key-as-IV: the streams this engine targets declare no IV, and are encrypted
// with the 16 key bytes doubling as the CBC IV. This is NOT the general HLS
// rule, where a missing IV means the media sequence number as a big-endian
// 128-bit value. Keep it that way for compatibility with those streams only.

use crate::DownloadError;
use crate::hls::playlist::{EncryptionKey, EncryptionMethod};
use aes::Aes128;
use bytes::Bytes;
use cipher::{BlockDecryptMut, KeyIvInit, block_padding::NoPadding};
use tracing::warn;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

const BLOCK_SIZE: usize = 16;

pub struct Decryptor {
    /// Offload CPU-bound decryption to the blocking thread pool
    offload: bool,
}

impl Decryptor {
    pub fn new(offload: bool) -> Self {
        Self { offload }
    }

    /// Decrypt `data` with `key`, or return it untouched when there is no key.
    pub async fn decrypt(
        &self,
        data: Bytes,
        key: Option<&EncryptionKey>,
    ) -> Result<Bytes, DownloadError> {
        let Some(key) = key else {
            return Ok(data);
        };
        if key.method == EncryptionMethod::None {
            return Ok(data);
        }

        if self.offload {
            let key = key.clone();
            tokio::task::spawn_blocking(move || Self::decrypt_sync(data, &key))
                .await
                .map_err(|e| DownloadError::Decryption {
                    reason: format!("decryption task failed: {e}"),
                })?
        } else {
            Self::decrypt_sync(data, key)
        }
    }

    /// AES-128-CBC with the key as IV and no unpadding.
    ///
    /// A trailing partial block cannot be decrypted and is passed through as-is.
    pub fn decrypt_sync(data: Bytes, key: &EncryptionKey) -> Result<Bytes, DownloadError> {
        match key.method {
            EncryptionMethod::None => Ok(data),
            EncryptionMethod::Aes128 => {
                let mut buffer = data.to_vec();
                let aligned = buffer.len() - buffer.len() % BLOCK_SIZE;
                if aligned != buffer.len() {
                    warn!(
                        len = buffer.len(),
                        trailing = buffer.len() - aligned,
                        "Ciphertext is not block aligned"
                    );
                }

                let cipher = Aes128CbcDec::new_from_slices(&key.key, &key.key).map_err(|e| {
                    DownloadError::Decryption {
                        reason: format!("failed to initialize AES decryptor: {e}"),
                    }
                })?;
                cipher
                    .decrypt_padded_mut::<NoPadding>(&mut buffer[..aligned])
                    .map_err(|e| DownloadError::Decryption {
                        reason: format!("decryption failed: {e}"),
                    })?;

                Ok(Bytes::from(buffer))
            }
        }
    }
}
