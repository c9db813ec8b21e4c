//! # Symmetric Encryption
//!
//! AES-256-GCM with random 96-bit nonces. Used for the envelope body and
//! for each recipient's wrapped copy of the content key.
//!
//! | Property | Guarantee |
//! |----------|-----------|
//! | Confidentiality | Only holders of the key can read the data |
//! | Integrity | Any modification is detected |
//! | Binding | AAD ties the ciphertext to its envelope header |

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce as AesNonce,
};
use rand::RngCore;
use zeroize::ZeroizeOnDrop;

use crate::error::{CryptoError, CryptoResult};

/// Size of the AES-GCM nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// A nonce (number used once) for AES-GCM encryption
///
/// **NEVER reuse a nonce with the same key!** Random nonces are safe for up
/// to 2^32 messages per key; a content key never outlives one envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce(pub [u8; NONCE_SIZE]);

impl Nonce {
    /// Generate a cryptographically random nonce
    pub fn random() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// An AES-256-GCM encryption key
///
/// Zeroized when dropped.
#[derive(ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, failing unless it is exactly 32 bytes
    pub fn from_slice(slice: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; KEY_SIZE] = slice.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!("Content key must be {} bytes", KEY_SIZE))
        })?;
        Ok(Self(bytes))
    }

    /// Generate a random single-use key
    pub fn random() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Borrow the raw key bytes
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Encrypt `plaintext` under `key`, authenticating `aad`
///
/// Returns the fresh nonce and the ciphertext with its 16-byte tag.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8], aad: &[u8]) -> CryptoResult<(Nonce, Vec<u8>)> {
    let nonce = Nonce::random();
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| CryptoError::Encryption(format!("Invalid key: {}", e)))?;

    let ciphertext = cipher
        .encrypt(AesNonce::from_slice(&nonce.0), Payload { msg: plaintext, aad })
        .map_err(|e| CryptoError::Encryption(format!("Encryption failed: {}", e)))?;

    Ok((nonce, ciphertext))
}

/// Decrypt AES-256-GCM ciphertext
///
/// Fails with [`CryptoError::Decryption`] if the ciphertext was tampered
/// with, or the key, nonce or AAD differ from encryption time.
pub fn decrypt(key: &EncryptionKey, nonce: &Nonce, ciphertext: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| CryptoError::Decryption(format!("Invalid key: {}", e)))?;

    cipher
        .decrypt(AesNonce::from_slice(&nonce.0), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::Decryption("authentication tag mismatch".into()))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_basic() {
        let key = EncryptionKey::from_bytes([42u8; 32]);
        let (nonce, ciphertext) = encrypt(&key, b"Hello, World!", b"context").unwrap();
        let decrypted = decrypt(&key, &nonce, &ciphertext, b"context").unwrap();

        assert_eq!(decrypted, b"Hello, World!");
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = EncryptionKey::random();
        let (nonce, mut ciphertext) = encrypt(&key, b"Hello, World!", b"context").unwrap();
        ciphertext[0] ^= 0xFF;

        assert!(matches!(
            decrypt(&key, &nonce, &ciphertext, b"context"),
            Err(CryptoError::Decryption(_))
        ));
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = EncryptionKey::random();
        let (nonce, ciphertext) = encrypt(&key, b"Hello, World!", b"context").unwrap();

        assert!(decrypt(&key, &nonce, &ciphertext, b"wrong context").is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let (nonce, ciphertext) = encrypt(&EncryptionKey::random(), b"data", b"").unwrap();
        assert!(decrypt(&EncryptionKey::random(), &nonce, &ciphertext, b"").is_err());
    }

    #[test]
    fn test_key_from_slice_length() {
        assert!(EncryptionKey::from_slice(&[1u8; 32]).is_ok());
        assert!(EncryptionKey::from_slice(&[1u8; 31]).is_err());
    }
}
