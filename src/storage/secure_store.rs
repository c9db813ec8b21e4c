//! # Secure Key Storage
//!
//! Slot-addressed storage for private key material.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      KEY STORAGE CAPABILITY                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  KeyStorage (trait)     store / load / delete / exists                 │
//! │     │                                                                   │
//! │     ├── SecureStore     in-process map, optional AES-256-GCM at rest   │
//! │     └── (embedder)      keychain, keystore, HSM ...                    │
//! │                                                                         │
//! │  Encrypted slot value = nonce (12) ‖ AES-GCM(value, aad = slot name)  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Platform keystores plug in by implementing [`KeyStorage`]; nothing above
//! this layer knows which backend holds the key.

use parking_lot::RwLock;
use std::collections::HashMap;
use zeroize::Zeroizing;

use crate::crypto::{decrypt, encrypt, EncryptionKey, Nonce, NONCE_SIZE};
use crate::error::{Error, Result};

/// Storage capability for private key material
pub trait KeyStorage: Send + Sync {
    /// Write `value` into `slot`, replacing any previous value
    fn store(&self, slot: &str, value: &[u8]) -> Result<()>;

    /// Read the value of `slot`
    fn load(&self, slot: &str) -> Result<Option<Zeroizing<Vec<u8>>>>;

    /// Remove `slot`, reporting whether it existed
    fn delete(&self, slot: &str) -> Result<bool>;

    /// Whether `slot` holds a value
    fn exists(&self, slot: &str) -> Result<bool>;
}

/// In-memory key storage with optional encryption at rest
pub struct SecureStore {
    memory: RwLock<HashMap<String, Zeroizing<Vec<u8>>>>,

    /// Optional encryption key for additional protection
    encryption_key: Option<EncryptionKey>,
}

impl SecureStore {
    /// Create a new secure store
    pub fn new() -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            encryption_key: None,
        }
    }

    /// Create a secure store with an encryption key
    ///
    /// All values are encrypted before they reach the map.
    pub fn with_encryption(key: [u8; 32]) -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            encryption_key: Some(EncryptionKey::from_bytes(key)),
        }
    }
}

impl Default for SecureStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStorage for SecureStore {
    fn store(&self, slot: &str, value: &[u8]) -> Result<()> {
        let data = if let Some(ref enc_key) = self.encryption_key {
            let (nonce, ciphertext) = encrypt(enc_key, value, slot.as_bytes())
                .map_err(|e| Error::StorageWriteError(format!("Failed to seal slot {}: {}", slot, e)))?;
            let mut sealed = nonce.as_bytes().to_vec();
            sealed.extend_from_slice(&ciphertext);
            sealed
        } else {
            value.to_vec()
        };

        self.memory.write().insert(slot.to_string(), Zeroizing::new(data));
        Ok(())
    }

    fn load(&self, slot: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let data = match self.memory.read().get(slot) {
            Some(d) => d.clone(),
            None => return Ok(None),
        };

        let Some(ref enc_key) = self.encryption_key else {
            return Ok(Some(data));
        };

        if data.len() < NONCE_SIZE {
            return Err(Error::StorageReadError("Stored data too short".into()));
        }
        let nonce_bytes: [u8; NONCE_SIZE] = data[..NONCE_SIZE]
            .try_into()
            .map_err(|_| Error::StorageReadError("Invalid nonce".into()))?;

        let plaintext = decrypt(enc_key, &Nonce(nonce_bytes), &data[NONCE_SIZE..], slot.as_bytes())
            .map_err(|e| Error::StorageCorrupted(format!("Failed to open slot {}: {}", slot, e)))?;
        Ok(Some(Zeroizing::new(plaintext)))
    }

    fn delete(&self, slot: &str) -> Result<bool> {
        Ok(self.memory.write().remove(slot).is_some())
    }

    fn exists(&self, slot: &str) -> Result<bool> {
        Ok(self.memory.read().contains_key(slot))
    }
}

// ============================================================================
// TESTS
// ============================================================================
