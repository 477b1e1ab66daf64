//! AES/CBC cipher for short secrets
//!
//! A [`SecretCipher`] expands its key once at construction and keeps the key schedule for
//! the lifetime of the value. Callers share one instance (typically behind an `Arc`) instead
//! of building a cipher per call.
//!
//! # Concurrency
//!
//! Every encrypt and decrypt call runs inside one critical section shared by both
//! directions. Concurrent callers block on each other; they never receive independent
//! cipher state.
//!
//! # Known weakness
//!
//! The current format uses a fixed, all-zero initialisation vector for every message.
//! Identical plaintexts under the same key always produce identical ciphertexts. The
//! behaviour is kept because previously stored secrets must remain decryptable; moving to
//! per-message IVs requires a new [`CipherFormat`] variant and an explicit migration.

use crate::{CipherError, CipherResult};
use aes::{Aes128, Aes192, Aes256};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{
    block_padding::Pkcs7, generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut,
    InnerIvInit, KeyInit,
};
use parking_lot::Mutex;

/// Secret lengths in bytes accepted by [`SecretCipher::new`].
pub const SUPPORTED_KEY_LENGTHS: [usize; 3] = [16, 24, 32];

const BLOCK_SIZE: usize = 16;

/// On-disk ciphertext format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherFormat {
    /// AES/CBC/PKCS#7 with an all-zero IV, Base64 encoded. The only format in use.
    ZeroIvV1,
}

impl CipherFormat {
    fn iv(&self) -> [u8; BLOCK_SIZE] {
        match self {
            CipherFormat::ZeroIvV1 => [0u8; BLOCK_SIZE],
        }
    }
}

/// Expanded AES key, sized by the supplied secret.
enum KeySchedule {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl KeySchedule {
    fn new(secret: &[u8]) -> CipherResult<Self> {
        let invalid = |_| CipherError::InvalidKeyLength(secret.len());
        match secret.len() {
            16 => Ok(Self::Aes128(Aes128::new_from_slice(secret).map_err(invalid)?)),
            24 => Ok(Self::Aes192(Aes192::new_from_slice(secret).map_err(invalid)?)),
            32 => Ok(Self::Aes256(Aes256::new_from_slice(secret).map_err(invalid)?)),
            other => Err(CipherError::InvalidKeyLength(other)),
        }
    }

    fn bits(&self) -> usize {
        match self {
            KeySchedule::Aes128(_) => 128,
            KeySchedule::Aes192(_) => 192,
            KeySchedule::Aes256(_) => 256,
        }
    }

    fn encrypt(&self, iv: &[u8; BLOCK_SIZE], plaintext: &[u8]) -> Vec<u8> {
        let iv = GenericArray::from_slice(iv);
        match self {
            KeySchedule::Aes128(key) => cbc::Encryptor::<Aes128>::inner_iv_init(key.clone(), iv)
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            KeySchedule::Aes192(key) => cbc::Encryptor::<Aes192>::inner_iv_init(key.clone(), iv)
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            KeySchedule::Aes256(key) => cbc::Encryptor::<Aes256>::inner_iv_init(key.clone(), iv)
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        }
    }

    fn decrypt(&self, iv: &[u8; BLOCK_SIZE], ciphertext: &[u8]) -> CipherResult<Vec<u8>> {
        let iv = GenericArray::from_slice(iv);
        let result = match self {
            KeySchedule::Aes128(key) => cbc::Decryptor::<Aes128>::inner_iv_init(key.clone(), iv)
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            KeySchedule::Aes192(key) => cbc::Decryptor::<Aes192>::inner_iv_init(key.clone(), iv)
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            KeySchedule::Aes256(key) => cbc::Decryptor::<Aes256>::inner_iv_init(key.clone(), iv)
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        };
        result.map_err(|_| CipherError::Padding)
    }
}

/// Direction of a single cryptographic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CryptOperation {
    Encrypt,
    Decrypt,
}

/// Process-wide cipher for secrets that cross the metadata persistence boundary.
pub struct SecretCipher {
    format: CipherFormat,
    state: Mutex<KeySchedule>,
}

impl SecretCipher {
    /// Creates a cipher keyed by `secret` using [`CipherFormat::ZeroIvV1`].
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidKeyLength`] unless `secret` is 16, 24 or 32 bytes.
    pub fn new(secret: &[u8]) -> CipherResult<Self> {
        Self::with_format(secret, CipherFormat::ZeroIvV1)
    }

    pub fn with_format(secret: &[u8], format: CipherFormat) -> CipherResult<Self> {
        let schedule = KeySchedule::new(secret)?;
        tracing::debug!(
            "Initialised {}-bit secret cipher ({:?})",
            schedule.bits(),
            format
        );
        Ok(Self {
            format,
            state: Mutex::new(schedule),
        })
    }

    pub fn format(&self) -> CipherFormat {
        self.format
    }

    /// Encrypts `plaintext` and returns the Base64 ciphertext.
    ///
    /// `None` is passed through unchanged.
    pub fn encrypt(&self, plaintext: Option<&str>) -> Option<String> {
        let Some(plaintext) = plaintext else {
            tracing::warn!("Input data is missing, skipping encryption");
            return None;
        };

        let ciphertext = self.with_state(CryptOperation::Encrypt, |schedule, iv| {
            schedule.encrypt(iv, plaintext.as_bytes())
        });
        Some(STANDARD.encode(ciphertext))
    }

    /// Decrypts a Base64 ciphertext produced by [`SecretCipher::encrypt`].
    ///
    /// `None` is passed through unchanged.
    ///
    /// # Errors
    ///
    /// Returns `CipherError` if the input is not Base64, the padding does not verify, or the
    /// plaintext is not UTF-8.
    pub fn decrypt(&self, ciphertext: Option<&str>) -> CipherResult<Option<String>> {
        let Some(ciphertext) = ciphertext else {
            tracing::warn!("Input data is missing, skipping decryption");
            return Ok(None);
        };

        let raw = STANDARD.decode(ciphertext.trim())?;
        let plaintext = self.with_state(CryptOperation::Decrypt, |schedule, iv| {
            schedule.decrypt(iv, &raw)
        })?;
        Ok(Some(String::from_utf8(plaintext)?))
    }

    fn with_state<T>(
        &self,
        operation: CryptOperation,
        f: impl FnOnce(&KeySchedule, &[u8; BLOCK_SIZE]) -> T,
    ) -> T {
        let iv = self.format.iv();
        let schedule = self.state.lock();
        tracing::trace!("Performing {:?} operation", operation);
        f(&schedule, &iv)
    }
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher")
            .field("format", &self.format)
            .field("key_bits", &self.state.lock().bits())
            .finish()
    }
}
