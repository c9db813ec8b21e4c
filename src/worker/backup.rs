//! # Private Key Backup
//!
//! Password-protected copy of the local private key in a remote store.
//!
//! ## States
//!
//! ```text
//!                 register / rotate                backup(pw)
//!   NoLocalKey ──────────────────► LocalKeyOnly ──────────────► LocalAndBackedUp
//!       ▲                                                              │
//!       │                        restore(pw)                           │
//!       └──────────────────────────────────────────────────────────────┘
//!                          (target state of restore)
//! ```
//!
//! ## Entry format
//!
//! ```text
//! derived = PasswordKeyDeriver(identity, password)
//! entry.ciphertext = auth_encrypt(private key, signer = derived, to = [derived])
//! ```
//!
//! Because the entry is signed and encrypted by the derived key alone, the
//! password can be changed without touching the local key at all.

use std::sync::Arc;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::backup::{BackupEntry, BackupTransport, PasswordKeyDeriver};
use crate::crypto::{CryptoPrimitives, KeyPair};
use crate::error::{Error, Result};
use crate::storage::LocalKeyStorage;

use super::ensure_text;

/// Entry format tag stored in the entry metadata
const ENTRY_FORMAT: &str = "ethree-backup-v1";

/// Backup state of the local identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackupState {
    /// No private key on this device
    NoLocalKey,
    /// Private key on this device, no backup entry
    LocalKeyOnly,
    /// Private key on this device and a backup entry
    LocalAndBackedUp,
}

/// Backup, restore and password change of the private key
#[derive(Clone)]
pub struct KeyBackupWorkflow {
    key_storage: LocalKeyStorage,
    crypto: Arc<dyn CryptoPrimitives>,
    transport: Arc<dyn BackupTransport>,
    deriver: Arc<dyn PasswordKeyDeriver>,
    key_name: String,
    cooldown: Duration,
}

impl KeyBackupWorkflow {
    /// Create a workflow for the identity of `key_storage`
    ///
    /// `cooldown` is waited out between a password derivation and the
    /// backup store call that follows it.
    pub fn new(
        key_storage: LocalKeyStorage,
        crypto: Arc<dyn CryptoPrimitives>,
        transport: Arc<dyn BackupTransport>,
        deriver: Arc<dyn PasswordKeyDeriver>,
        key_name: impl Into<String>,
        cooldown: Duration,
    ) -> Self {
        Self {
            key_storage,
            crypto,
            transport,
            deriver,
            key_name: key_name.into(),
            cooldown,
        }
    }

    /// Default entry name
    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    /// Current state for the default entry
    pub async fn state(&self) -> Result<BackupState> {
        if !self.key_storage.exists()? {
            return Ok(BackupState::NoLocalKey);
        }
        let entry = self.transport.pull(self.identity(), &self.key_name).await?;
        Ok(match entry {
            Some(_) => BackupState::LocalAndBackedUp,
            None => BackupState::LocalKeyOnly,
        })
    }

    // ========================================================================
    // BACKUP / RESTORE
    // ========================================================================

    /// Back up the local key under the default entry name
    pub async fn backup(&self, password: &str) -> Result<()> {
        self.backup_named(password, &self.key_name).await
    }

    /// Back up the local key under `key_name`
    pub async fn backup_named(&self, password: &str, key_name: &str) -> Result<()> {
        ensure_text(password, "password")?;
        ensure_text(key_name, "key_name")?;

        let keypair = self.key_storage.retrieve_keypair()?;
        let private_key = self.crypto.export_private_key(&keypair);
        let derived = self.derive(password).await?;

        let ciphertext = self
            .crypto
            .auth_encrypt(&private_key, &derived, &[derived.public_keys()])?;

        let mut entry = BackupEntry::new(self.identity(), key_name, ciphertext);
        entry.meta.insert("format".into(), ENTRY_FORMAT.into());
        self.transport.push(entry).await?;

        tracing::info!("Private key of {} backed up as {}", self.identity(), key_name);
        Ok(())
    }

    /// Restore the default entry into local storage
    pub async fn restore(&self, password: &str) -> Result<KeyPair> {
        self.restore_named(password, &self.key_name).await
    }

    /// Restore the entry `key_name` into local storage
    ///
    /// Refuses to run while a local key exists.
    pub async fn restore_named(&self, password: &str, key_name: &str) -> Result<KeyPair> {
        ensure_text(password, "password")?;
        ensure_text(key_name, "key_name")?;
        if self.key_storage.exists()? {
            return Err(Error::PrivateKeyExists);
        }

        let derived = self.derive(password).await?;
        self.cool_down().await;

        let entry = self.pull(key_name).await?;
        let private_key = self.open(&entry, &derived)?;
        let keypair = self.crypto.import_private_key(&private_key)?;
        self.key_storage.store(&keypair)?;

        tracing::info!("Private key of {} restored from {}", self.identity(), key_name);
        Ok(keypair)
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Re-encrypt the default entry from `old_password` to `new_password`
    ///
    /// Works on the entry alone; the local key is neither needed nor read.
    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<()> {
        ensure_text(old_password, "old_password")?;
        ensure_text(new_password, "new_password")?;
        if old_password == new_password {
            return Err(Error::SamePassword);
        }

        let old_derived = self.derive(old_password).await?;
        self.cool_down().await;

        let entry = self.pull(&self.key_name).await?;
        let private_key = self.open(&entry, &old_derived)?;

        let new_derived = self.derive(new_password).await?;
        let ciphertext = self
            .crypto
            .auth_encrypt(&private_key, &new_derived, &[new_derived.public_keys()])?;

        self.cool_down().await;
        self.transport
            .replace(entry.with_ciphertext(ciphertext), &entry.hash)
            .await?;

        tracing::info!("Backup password of {} changed", self.identity());
        Ok(())
    }

    /// Delete backups
    ///
    /// With a password only the default entry is removed, and only if the
    /// password opens it. Without one every entry of the identity goes.
    pub async fn reset_backup(&self, password: Option<&str>) -> Result<()> {
        match password {
            Some(password) => {
                ensure_text(password, "password")?;
                let derived = self.derive(password).await?;
                self.cool_down().await;

                let entry = self.pull(&self.key_name).await?;
                self.open(&entry, &derived)?;
                self.transport.delete(self.identity(), &self.key_name).await?;
                tracing::info!("Backup {} of {} deleted", self.key_name, self.identity());
            }
            None => {
                let removed = self.transport.delete_all(self.identity()).await?;
                tracing::info!("Deleted {} backups of {}", removed, self.identity());
            }
        }
        Ok(())
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn identity(&self) -> &str {
        self.key_storage.identity()
    }

    async fn derive(&self, password: &str) -> Result<KeyPair> {
        self.deriver.derive_keypair(self.identity(), password).await
    }

    async fn cool_down(&self) {
        if !self.cooldown.is_zero() {
            tokio::time::sleep(self.cooldown).await;
        }
    }

    async fn pull(&self, key_name: &str) -> Result<BackupEntry> {
        self.transport
            .pull(self.identity(), key_name)
            .await?
            .ok_or(Error::NoBackupFound)
    }

    /// Any failure to open an entry means the password does not match
    fn open(&self, entry: &BackupEntry, derived: &KeyPair) -> Result<Zeroizing<Vec<u8>>> {
        self.crypto
            .auth_decrypt(&entry.ciphertext, derived, &derived.public_keys())
            .map(Zeroizing::new)
            .map_err(|e| {
                tracing::debug!("Backup entry did not open: {}", e);
                Error::WrongPassword
            })
    }
}

// ============================================================================
// TESTS
// ============================================================================
