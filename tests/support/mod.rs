//! Shared fixtures for facade integration tests.
//!
//! A `World` is one directory and one backup store shared by every user
//! created from it, the way a real deployment shares its services.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ethree_core::cards::MemoryCardPersistence;
use ethree_core::storage::SecureStore;
use ethree_core::{
    Backends, DuplicateCardPolicy, EThree, EThreeParams, KdfParams, MemoryBackupTransport, MemoryDirectory,
};

/// Cheap Argon2 parameters so tests stay fast
pub fn fast_kdf() -> KdfParams {
    KdfParams {
        memory_kib: 256,
        iterations: 1,
        parallelism: 1,
    }
}

/// Test parameters: no cooldown, cheap derivation
pub fn params(identity: &str) -> EThreeParams {
    EThreeParams::new(identity)
        .with_throttle_cooldown(Duration::ZERO)
        .with_kdf(fast_kdf())
}

/// Identity unique to one test run
pub fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

/// Shared remote services
pub struct World {
    pub directory: Arc<MemoryDirectory>,
    pub backups: Arc<MemoryBackupTransport>,
}

impl World {
    pub fn new() -> Self {
        Self {
            directory: Arc::new(MemoryDirectory::new()),
            backups: Arc::new(MemoryBackupTransport::new()),
        }
    }

    /// Backends for one device
    pub fn backends(&self, key_storage: Arc<SecureStore>) -> Backends {
        Backends::new(key_storage, self.directory.clone(), self.backups.clone())
            .with_card_persistence(Arc::new(MemoryCardPersistence::new()))
    }

    /// A fresh device for `identity`, not yet registered
    pub async fn device(&self, identity: &str) -> EThree {
        self.device_with(params(identity)).await
    }

    /// A fresh device built from explicit parameters
    pub async fn device_with(&self, params: EThreeParams) -> EThree {
        EThree::new(params, self.backends(Arc::new(SecureStore::new())))
            .await
            .unwrap()
    }

    /// A registered user
    pub async fn user(&self, identity: &str) -> EThree {
        let ethree = self.device(identity).await;
        ethree.register().await.unwrap();
        ethree
    }

    /// A device whose cache applies `policy` to duplicate cards
    pub async fn device_with_policy(&self, identity: &str, policy: DuplicateCardPolicy) -> EThree {
        self.device_with(params(identity).with_duplicate_card_policy(policy)).await
    }
}

/// Owned identity list for lookup calls
pub fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}
