//! Local private key slot of one identity.

use std::sync::Arc;

use crate::crypto::{CryptoPrimitives, KeyPair};
use crate::error::{Error, Result};
use crate::storage::KeyStorage;

/// The device's private key for one identity
///
/// Each identity gets its own slot name, so two instances for different
/// identities never share key material even over one [`KeyStorage`].
#[derive(Clone)]
pub struct LocalKeyStorage {
    storage: Arc<dyn KeyStorage>,
    crypto: Arc<dyn CryptoPrimitives>,
    identity: String,
}

impl LocalKeyStorage {
    /// Bind a key storage backend to `identity`
    pub fn new(storage: Arc<dyn KeyStorage>, crypto: Arc<dyn CryptoPrimitives>, identity: impl Into<String>) -> Self {
        Self {
            storage,
            crypto,
            identity: identity.into(),
        }
    }

    /// Identity this slot belongs to
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Slot name used in the backend
    pub fn slot(&self) -> String {
        format!("ethree.{}.private_key", self.identity)
    }

    /// Whether a private key is stored
    pub fn exists(&self) -> Result<bool> {
        self.storage.exists(&self.slot())
    }

    /// Store `keypair`; fails if a key is already present
    pub fn store(&self, keypair: &KeyPair) -> Result<()> {
        if self.exists()? {
            return Err(Error::PrivateKeyExists);
        }
        let exported = self.crypto.export_private_key(keypair);
        self.storage.store(&self.slot(), &exported)
    }

    /// Load the stored keypair
    pub fn retrieve_keypair(&self) -> Result<KeyPair> {
        let bytes = self.storage.load(&self.slot())?.ok_or(Error::MissingPrivateKey)?;
        self.crypto
            .import_private_key(&bytes)
            .map_err(|e| Error::StorageCorrupted(format!("Stored private key is unreadable: {}", e)))
    }

    /// Remove the stored key, reporting whether one existed
    pub fn delete(&self) -> Result<bool> {
        self.storage.delete(&self.slot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::DefaultCrypto;
    use crate::storage::SecureStore;

    fn local(store: &Arc<SecureStore>, identity: &str) -> LocalKeyStorage {
        LocalKeyStorage::new(store.clone(), Arc::new(DefaultCrypto), identity)
    }

    #[test]
    fn test_store_retrieve_delete() {
        let store = Arc::new(SecureStore::new());
        let keys = local(&store, "alice");
        let kp = KeyPair::generate();

        assert!(!keys.exists().unwrap());
        keys.store(&kp).unwrap();
        assert!(keys.exists().unwrap());
        assert_eq!(keys.retrieve_keypair().unwrap().public_keys(), kp.public_keys());

        assert!(keys.delete().unwrap());
        assert!(matches!(keys.retrieve_keypair(), Err(Error::MissingPrivateKey)));
    }

    #[test]
    fn test_store_refuses_overwrite() {
        let store = Arc::new(SecureStore::new());
        let keys = local(&store, "alice");
        keys.store(&KeyPair::generate()).unwrap();

        assert!(matches!(
            keys.store(&KeyPair::generate()),
            Err(Error::PrivateKeyExists)
        ));
    }

    #[test]
    fn test_identities_use_distinct_slots() {
        let store = Arc::new(SecureStore::new());
        let alice = local(&store, "alice");
        let bob = local(&store, "bob");

        alice.store(&KeyPair::generate()).unwrap();
        assert!(!bob.exists().unwrap());
        assert_ne!(alice.slot(), bob.slot());
    }

    #[test]
    fn test_corrupted_slot() {
        let store = Arc::new(SecureStore::new());
        let keys = local(&store, "alice");
        store.store(&keys.slot(), b"short").unwrap();

        assert!(matches!(keys.retrieve_keypair(), Err(Error::StorageCorrupted(_))));
    }
}
