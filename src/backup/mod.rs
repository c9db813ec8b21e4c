//! # Key Backup Boundary
//!
//! Remote key-value store that holds password-protected copies of a
//! private key, plus the password derivation used to open them.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        BACKUP BOUNDARY                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  password ──► PasswordKeyDeriver ──► derived KeyPair                   │
//! │                                          │                              │
//! │  private key ──auth_encrypt(to derived)──┘──► BackupEntry.ciphertext   │
//! │                                                                         │
//! │  BackupTransport (identity, key_name) ──► BackupEntry                  │
//! │    push     fails if the entry exists                                  │
//! │    pull     entry or None                                              │
//! │    replace  compare-and-swap on the previous ciphertext hash           │
//! │    delete / delete_all                                                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod brain_key;

pub use brain_key::{derive_passwords, Argon2KeyDeriver, DerivedPasswords, PasswordKeyDeriver};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Error;

/// Failures reported by a backup transport
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// An entry is already stored under this identity and name
    #[error("Backup entry already exists")]
    EntryAlreadyExists,

    /// No entry is stored under this identity and name
    #[error("Backup entry not found")]
    EntryNotFound,

    /// The entry changed since it was read
    #[error("Backup entry was modified concurrently")]
    HashMismatch,

    /// The store could not be reached
    #[error("Backup store unavailable: {0}")]
    Unavailable(String),
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::EntryAlreadyExists => Error::BackupAlreadyExists,
            other => Error::BackupTransport(other.to_string()),
        }
    }
}

/// One stored backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    /// Owning identity
    pub identity: String,
    /// Entry name within the identity
    pub key_name: String,
    /// Encrypted private key
    pub ciphertext: Vec<u8>,
    /// Free-form metadata
    pub meta: HashMap<String, String>,
    /// Hex SHA-256 of `ciphertext`
    pub hash: String,
    /// Unix timestamp of the first push
    pub created_at: i64,
    /// Unix timestamp of the last write
    pub updated_at: i64,
}

impl BackupEntry {
    /// New entry stamped with the current time
    pub fn new(identity: impl Into<String>, key_name: impl Into<String>, ciphertext: Vec<u8>) -> Self {
        let now = crate::time::now_timestamp();
        let hash = Self::hash_of(&ciphertext);
        Self {
            identity: identity.into(),
            key_name: key_name.into(),
            ciphertext,
            meta: HashMap::new(),
            hash,
            created_at: now,
            updated_at: now,
        }
    }

    /// Same entry with a new ciphertext
    pub fn with_ciphertext(&self, ciphertext: Vec<u8>) -> Self {
        Self {
            hash: Self::hash_of(&ciphertext),
            ciphertext,
            updated_at: crate::time::now_timestamp(),
            ..self.clone()
        }
    }

    /// Hex SHA-256 of a ciphertext
    pub fn hash_of(ciphertext: &[u8]) -> String {
        hex::encode(Sha256::digest(ciphertext))
    }
}

/// Remote backup store
#[async_trait]
pub trait BackupTransport: Send + Sync {
    /// Store a new entry
    async fn push(&self, entry: BackupEntry) -> Result<(), TransportError>;

    /// Fetch an entry
    async fn pull(&self, identity: &str, key_name: &str) -> Result<Option<BackupEntry>, TransportError>;

    /// Overwrite an entry if its hash is still `previous_hash`
    async fn replace(&self, entry: BackupEntry, previous_hash: &str) -> Result<(), TransportError>;

    /// Remove one entry, reporting whether it existed
    async fn delete(&self, identity: &str, key_name: &str) -> Result<bool, TransportError>;

    /// Remove every entry of `identity`, returning how many were removed
    async fn delete_all(&self, identity: &str) -> Result<usize, TransportError>;
}

type EntryKey = (String, String);

/// In-process backup store
#[derive(Default)]
pub struct MemoryBackupTransport {
    entries: RwLock<HashMap<EntryKey, BackupEntry>>,
    unavailable: AtomicBool,
}

impl MemoryBackupTransport {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn ensure_available(&self) -> Result<(), TransportError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("simulated outage".into()));
        }
        Ok(())
    }

    fn key(identity: &str, key_name: &str) -> EntryKey {
        (identity.to_string(), key_name.to_string())
    }
}

#[async_trait]
impl BackupTransport for MemoryBackupTransport {
    async fn push(&self, entry: BackupEntry) -> Result<(), TransportError> {
        self.ensure_available()?;
        let mut entries = self.entries.write();
        let key = Self::key(&entry.identity, &entry.key_name);
        if entries.contains_key(&key) {
            return Err(TransportError::EntryAlreadyExists);
        }
        entries.insert(key, entry);
        Ok(())
    }

    async fn pull(&self, identity: &str, key_name: &str) -> Result<Option<BackupEntry>, TransportError> {
        self.ensure_available()?;
        Ok(self.entries.read().get(&Self::key(identity, key_name)).cloned())
    }

    async fn replace(&self, entry: BackupEntry, previous_hash: &str) -> Result<(), TransportError> {
        self.ensure_available()?;
        let mut entries = self.entries.write();
        let key = Self::key(&entry.identity, &entry.key_name);
        let current = entries.get(&key).ok_or(TransportError::EntryNotFound)?;
        if current.hash != previous_hash {
            return Err(TransportError::HashMismatch);
        }
        entries.insert(key, entry);
        Ok(())
    }

    async fn delete(&self, identity: &str, key_name: &str) -> Result<bool, TransportError> {
        self.ensure_available()?;
        Ok(self.entries.write().remove(&Self::key(identity, key_name)).is_some())
    }

    async fn delete_all(&self, identity: &str) -> Result<usize, TransportError> {
        self.ensure_available()?;
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(owner, _), _| owner != identity);
        Ok(before - entries.len())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_pull() {
        let transport = MemoryBackupTransport::new();
        let entry = BackupEntry::new("alice", "alice", vec![1, 2, 3]);
        transport.push(entry.clone()).await.unwrap();

        assert_eq!(transport.pull("alice", "alice").await.unwrap(), Some(entry.clone()));
        assert!(transport.pull("alice", "other").await.unwrap().is_none());
        assert_eq!(
            transport.push(entry).await,
            Err(TransportError::EntryAlreadyExists)
        );
    }

    #[tokio::test]
    async fn test_replace_is_compare_and_swap() {
        let transport = MemoryBackupTransport::new();
        let entry = BackupEntry::new("alice", "alice", vec![1]);
        transport.push(entry.clone()).await.unwrap();

        let updated = entry.with_ciphertext(vec![2]);
        transport.replace(updated.clone(), &entry.hash).await.unwrap();

        let stale = entry.with_ciphertext(vec![3]);
        assert_eq!(
            transport.replace(stale, &entry.hash).await,
            Err(TransportError::HashMismatch)
        );
        assert_eq!(transport.pull("alice", "alice").await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn test_delete_all_scoped_to_identity() {
        let transport = MemoryBackupTransport::new();
        transport.push(BackupEntry::new("alice", "a", vec![1])).await.unwrap();
        transport.push(BackupEntry::new("alice", "b", vec![2])).await.unwrap();
        transport.push(BackupEntry::new("bob", "a", vec![3])).await.unwrap();

        assert_eq!(transport.delete_all("alice").await.unwrap(), 2);
        assert_eq!(transport.len(), 1);
        assert!(!transport.delete("alice", "a").await.unwrap());
    }

    #[test]
    fn test_transport_error_mapping() {
        assert!(matches!(
            Error::from(TransportError::EntryAlreadyExists),
            Error::BackupAlreadyExists
        ));
        assert!(matches!(
            Error::from(TransportError::HashMismatch),
            Error::BackupTransport(_)
        ));
    }

    #[test]
    fn test_entry_hash_tracks_ciphertext() {
        let entry = BackupEntry::new("alice", "alice", b"abc".to_vec());
        assert_eq!(
            entry.hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(entry.with_ciphertext(b"abd".to_vec()).hash, entry.hash);
    }
}
