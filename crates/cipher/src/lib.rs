//! Staging secret protection
//!
//! Short secrets (access tokens, transfer keys) are stored in repository metadata in an
//! encrypted form. This crate provides the symmetric cipher used for that purpose together
//! with a small digest helper used to derive stable file names from object identifiers.
//!
//! ## Format
//!
//! Ciphertext is the Base64 text of the raw AES/CBC/PKCS#7 output. There is no envelope,
//! no embedded IV and no authentication tag. See [`CipherFormat`] for the IV policy.
//!
//! ## Example Usage
//!
//! ```no_run
//! use staging_cipher::SecretCipher;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cipher = SecretCipher::new(b"0123456789abcdef")?;
//! let stored = cipher.encrypt(Some("token")).expect("input was present");
//! let token = cipher.decrypt(Some(&stored))?;
//! assert_eq!(token.as_deref(), Some("token"));
//! # Ok(())
//! # }
//! ```

mod cipher;
mod digest;

pub use cipher::{CipherFormat, SecretCipher, SUPPORTED_KEY_LENGTHS};
pub use digest::string_to_sha1;

/// Errors raised while constructing or using a [`SecretCipher`]
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    /// The secret is not 128, 192 or 256 bits long
    #[error("unsupported secret length of {0} bytes (expected 16, 24 or 32)")]
    InvalidKeyLength(usize),

    /// The stored value is not valid Base64
    #[error("ciphertext is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The decrypted block padding is malformed (wrong key or corrupted input)
    #[error("ciphertext padding is invalid")]
    Padding,

    /// The decrypted bytes are not valid UTF-8
    #[error("decrypted value is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub type CipherResult<T> = std::result::Result<T, CipherError>;
