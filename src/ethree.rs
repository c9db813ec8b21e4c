//! # EThree Facade
//!
//! One instance per local identity. Composes the workers over injected
//! collaborators and serializes operations that change local key state.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              EThree                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   write lock:  register  rotate  unregister  cleanup                   │
//! │                backup  restore  change_password  reset_backup          │
//! │   read lock:   encrypt  decrypt  find_users  lookup  backup_state      │
//! │                                                                         │
//! │   ┌──────────────┐ ┌──────────────┐ ┌────────────┐ ┌────────────────┐  │
//! │   │ AuthEncrypt  │ │ LegacyPeer   │ │ Lookup     │ │ KeyBackup      │  │
//! │   └──────┬───────┘ └──────┬───────┘ └─────┬──────┘ └──────┬─────────┘  │
//! │          └────────┬───────┘               │               │            │
//! │            LocalKeyStorage          CardStorage      BackupTransport   │
//! │                                     CardDirectory    PasswordDeriver   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Encryption runs on the blocking pool. Dropping a returned future stops
//! the wait, not work that was already handed to a collaborator.

use std::io::{Read, Write};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::backup::{
    self, Argon2KeyDeriver, BackupTransport, DerivedPasswords, MemoryBackupTransport, PasswordKeyDeriver,
};
use crate::cards::{Card, CardPersistence, CardStorage, MemoryCardPersistence, RawCard};
use crate::config::EThreeParams;
use crate::crypto::{CryptoPrimitives, DefaultCrypto, KeyPair, PublicKey};
use crate::directory::{CardDirectory, MemoryDirectory};
use crate::error::{Error, Result};
use crate::storage::{Database, KeyStorage, LocalKeyStorage, SecureStore};
use crate::worker::{
    select_current, AuthEncryptWorker, BackupState, FindUsersResult, KeyBackupWorkflow, LegacyPeerWorker,
    LookupResult, LookupWorker,
};

/// Callback invoked with the identity whose key changed
pub type KeyChangedCallback = Arc<dyn Fn(&str) + Send + Sync>;

// ============================================================================
// BACKENDS
// ============================================================================

/// Collaborators an [`EThree`] instance is built over
#[derive(Clone)]
pub struct Backends {
    /// Crypto primitives
    pub crypto: Arc<dyn CryptoPrimitives>,
    /// Private key storage
    pub key_storage: Arc<dyn KeyStorage>,
    /// Card directory
    pub directory: Arc<dyn CardDirectory>,
    /// Backup store
    pub backup_transport: Arc<dyn BackupTransport>,
    /// Card cache rows; `None` opens a SQLite cache at the configured path
    pub card_persistence: Option<Arc<dyn CardPersistence>>,
    /// Password deriver; `None` uses Argon2id with the configured parameters
    pub key_deriver: Option<Arc<dyn PasswordKeyDeriver>>,
}

impl Backends {
    /// Backends over the given remote boundaries with default crypto
    pub fn new(
        key_storage: Arc<dyn KeyStorage>,
        directory: Arc<dyn CardDirectory>,
        backup_transport: Arc<dyn BackupTransport>,
    ) -> Self {
        Self {
            crypto: Arc::new(DefaultCrypto),
            key_storage,
            directory,
            backup_transport,
            card_persistence: None,
            key_deriver: None,
        }
    }

    /// Fully in-process backends
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(SecureStore::new()),
            Arc::new(MemoryDirectory::new()),
            Arc::new(MemoryBackupTransport::new()),
        )
        .with_card_persistence(Arc::new(MemoryCardPersistence::new()))
    }

    /// Replace the crypto primitives
    pub fn with_crypto(mut self, crypto: Arc<dyn CryptoPrimitives>) -> Self {
        self.crypto = crypto;
        self
    }

    /// Use `persistence` for the card cache
    pub fn with_card_persistence(mut self, persistence: Arc<dyn CardPersistence>) -> Self {
        self.card_persistence = Some(persistence);
        self
    }

    /// Use `deriver` for backup passwords
    pub fn with_key_deriver(mut self, deriver: Arc<dyn PasswordKeyDeriver>) -> Self {
        self.key_deriver = Some(deriver);
        self
    }
}

// ============================================================================
// FACADE
// ============================================================================

/// End-to-end encryption for one local identity
pub struct EThree {
    params: EThreeParams,
    crypto: Arc<dyn CryptoPrimitives>,
    key_storage: LocalKeyStorage,
    card_storage: Arc<CardStorage>,
    directory: Arc<dyn CardDirectory>,
    auth: AuthEncryptWorker,
    legacy: LegacyPeerWorker,
    lookup: LookupWorker,
    backup: KeyBackupWorkflow,
    on_key_changed: Option<KeyChangedCallback>,
    state_lock: RwLock<()>,
}

impl EThree {
    /// Build an instance for `params.identity`
    pub async fn new(params: EThreeParams, backends: Backends) -> Result<Self> {
        params.validate()?;

        let Backends {
            crypto,
            key_storage,
            directory,
            backup_transport,
            card_persistence,
            key_deriver,
        } = backends;

        let persistence: Arc<dyn CardPersistence> = match card_persistence {
            Some(persistence) => persistence,
            None => Arc::new(Database::open(params.card_cache_path.as_deref()).await?),
        };
        let deriver: Arc<dyn PasswordKeyDeriver> = match key_deriver {
            Some(deriver) => deriver,
            None => Arc::new(Argon2KeyDeriver::new(crypto.clone(), params.kdf)),
        };

        let key_storage = LocalKeyStorage::new(key_storage, crypto.clone(), params.identity.clone());
        let card_storage = Arc::new(CardStorage::new(
            persistence,
            crypto.clone(),
            params.duplicate_card_policy,
        ));

        let auth = AuthEncryptWorker::new(key_storage.clone(), crypto.clone());
        let legacy = LegacyPeerWorker::new(key_storage.clone(), crypto.clone());
        let lookup = LookupWorker::new(card_storage.clone(), directory.clone());
        let backup = KeyBackupWorkflow::new(
            key_storage.clone(),
            crypto.clone(),
            backup_transport,
            deriver,
            params.backup_key_name(),
            params.throttle_cooldown(),
        );

        tracing::info!("EThree initialized for {}", params.identity);

        Ok(Self {
            params,
            crypto,
            key_storage,
            card_storage,
            directory,
            auth,
            legacy,
            lookup,
            backup,
            on_key_changed: None,
            state_lock: RwLock::new(()),
        })
    }

    /// Call `callback` for every identity whose key changes during
    /// [`update_cached_users`](Self::update_cached_users)
    pub fn with_key_changed_callback(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_key_changed = Some(Arc::new(callback));
        self
    }

    /// Local identity
    pub fn identity(&self) -> &str {
        &self.params.identity
    }

    /// Configuration this instance was built with
    pub fn params(&self) -> &EThreeParams {
        &self.params
    }

    /// Split a user password into login and backup passwords
    pub fn derive_passwords(password: &str) -> Result<DerivedPasswords> {
        backup::derive_passwords(password)
    }

    // ========================================================================
    // KEY LIFECYCLE
    // ========================================================================

    /// Whether a private key is stored for this identity
    pub async fn has_local_private_key(&self) -> Result<bool> {
        let _guard = self.state_lock.read().await;
        self.key_storage.exists()
    }

    /// Generate a keypair, publish its card and store the key locally
    pub async fn register(&self) -> Result<Card> {
        let keypair = self.crypto.generate_keypair();
        self.register_with_keypair(&keypair).await
    }

    /// Publish a card for `keypair` and store it locally
    pub async fn register_with_keypair(&self, keypair: &KeyPair) -> Result<Card> {
        let _guard = self.state_lock.write().await;

        if self.key_storage.exists()? {
            return Err(Error::PrivateKeyExists);
        }
        if !self.directory.search(self.identity()).await?.is_empty() {
            return Err(Error::UserAlreadyRegistered(self.identity().to_string()));
        }

        let card = self.publish(keypair, None).await?;
        tracing::info!("Registered {} with card {}", self.identity(), card.identifier);
        Ok(card)
    }

    /// Replace a lost private key with a new one
    ///
    /// Must run without a local key: after a key loss, call
    /// [`cleanup`](Self::cleanup) first if needed.
    pub async fn rotate_private_key(&self) -> Result<Card> {
        let _guard = self.state_lock.write().await;

        if self.key_storage.exists()? {
            return Err(Error::PrivateKeyExists);
        }
        let cards = self.directory.search(self.identity()).await?;
        if cards.is_empty() {
            return Err(Error::UserNotRegistered(self.identity().to_string()));
        }
        let current = select_current(self.identity(), cards, self.params.duplicate_card_policy)?;

        let keypair = self.crypto.generate_keypair();
        let card = self.publish(&keypair, Some(current)).await?;
        tracing::info!("Rotated key of {} to card {}", self.identity(), card.identifier);
        Ok(card)
    }

    /// Revoke every current card, delete the local key and the card cache
    pub async fn unregister(&self) -> Result<()> {
        let _guard = self.state_lock.write().await;

        let cards = self.directory.search(self.identity()).await?;
        if cards.is_empty() {
            return Err(Error::UserNotRegistered(self.identity().to_string()));
        }
        for card in &cards {
            self.directory.revoke(&card.identifier).await?;
        }

        self.key_storage.delete()?;
        self.reset_card_cache().await?;
        tracing::info!("Unregistered {}", self.identity());
        Ok(())
    }

    /// Delete the local key and the card cache
    pub async fn cleanup(&self) -> Result<()> {
        let _guard = self.state_lock.write().await;

        if !self.key_storage.delete()? {
            return Err(Error::MissingPrivateKey);
        }
        self.reset_card_cache().await?;
        tracing::info!("Local state of {} cleaned up", self.identity());
        Ok(())
    }

    // ========================================================================
    // ENCRYPTION
    // ========================================================================

    /// Encrypt for the local identity and every user in `users`
    pub async fn encrypt(&self, data: &[u8], users: Option<&FindUsersResult>) -> Result<Vec<u8>> {
        let _guard = self.state_lock.read().await;
        let worker = self.auth.clone();
        let data = data.to_vec();
        let keys = users.map(public_keys);
        blocking(move || worker.encrypt(&data, keys.as_deref())).await
    }

    /// Encrypt for the local identity and one other user
    pub async fn encrypt_for(&self, data: &[u8], user: &Card) -> Result<Vec<u8>> {
        let users = FindUsersResult::from([(user.identity.clone(), user.clone())]);
        self.encrypt(data, Some(&users)).await
    }

    /// [`encrypt`](Self::encrypt) for text, returning base64
    pub async fn encrypt_text(&self, text: &str, users: Option<&FindUsersResult>) -> Result<String> {
        let _guard = self.state_lock.read().await;
        let worker = self.auth.clone();
        let text = text.to_string();
        let keys = users.map(public_keys);
        blocking(move || worker.encrypt_text(&text, keys.as_deref())).await
    }

    /// Decrypt, verifying against `sender` or the local identity
    pub async fn decrypt(&self, data: &[u8], sender: Option<&Card>) -> Result<Vec<u8>> {
        let _guard = self.state_lock.read().await;
        let worker = self.auth.clone();
        let data = data.to_vec();
        let sender = sender.cloned();
        blocking(move || worker.decrypt(&data, sender.as_ref())).await
    }

    /// Decrypt data the sender produced at `as_of`
    ///
    /// Verification uses the sender's card that was current at that time,
    /// so messages written before a rotation stay readable.
    pub async fn decrypt_at(&self, data: &[u8], sender: &Card, as_of: DateTime<Utc>) -> Result<Vec<u8>> {
        let _guard = self.state_lock.read().await;
        let worker = self.auth.clone();
        let data = data.to_vec();
        let sender = sender.clone();
        blocking(move || worker.decrypt_at(&data, &sender, as_of.timestamp())).await
    }

    /// [`decrypt`](Self::decrypt) for base64 text
    pub async fn decrypt_text(&self, text: &str, sender: Option<&Card>) -> Result<String> {
        let _guard = self.state_lock.read().await;
        let worker = self.auth.clone();
        let text = text.to_string();
        let sender = sender.cloned();
        blocking(move || worker.decrypt_text(&text, sender.as_ref())).await
    }

    /// [`decrypt_at`](Self::decrypt_at) for base64 text
    pub async fn decrypt_text_at(&self, text: &str, sender: &Card, as_of: DateTime<Utc>) -> Result<String> {
        let _guard = self.state_lock.read().await;
        let worker = self.auth.clone();
        let text = text.to_string();
        let sender = sender.clone();
        blocking(move || worker.decrypt_text_at(&text, &sender, as_of.timestamp())).await
    }

    // ========================================================================
    // LEGACY ENCRYPTION
    // ========================================================================

    /// Sign-then-encrypt for the local identity and `users`
    #[deprecated(note = "use `encrypt`")]
    pub async fn legacy_encrypt(&self, data: &[u8], users: Option<&FindUsersResult>) -> Result<Vec<u8>> {
        let _guard = self.state_lock.read().await;
        let worker = self.legacy.clone();
        let data = data.to_vec();
        let keys = users.map(public_keys);
        blocking(move || worker.encrypt(&data, keys.as_deref())).await
    }

    /// Sign-then-encrypt text, returning base64
    #[deprecated(note = "use `encrypt_text`")]
    pub async fn legacy_encrypt_text(&self, text: &str, users: Option<&FindUsersResult>) -> Result<String> {
        let _guard = self.state_lock.read().await;
        let worker = self.legacy.clone();
        let text = text.to_string();
        let keys = users.map(public_keys);
        blocking(move || worker.encrypt_text(&text, keys.as_deref())).await
    }

    /// Decrypt a sign-then-encrypt message
    #[deprecated(note = "use `decrypt`")]
    pub async fn legacy_decrypt(&self, data: &[u8], sender: Option<&Card>) -> Result<Vec<u8>> {
        let _guard = self.state_lock.read().await;
        let worker = self.legacy.clone();
        let data = data.to_vec();
        let sender = sender.cloned();
        blocking(move || worker.decrypt(&data, sender.as_ref())).await
    }

    /// Decrypt a sign-then-encrypt message produced at `as_of`
    #[deprecated(note = "use `decrypt_at`")]
    pub async fn legacy_decrypt_at(&self, data: &[u8], sender: &Card, as_of: DateTime<Utc>) -> Result<Vec<u8>> {
        let _guard = self.state_lock.read().await;
        let worker = self.legacy.clone();
        let data = data.to_vec();
        let sender = sender.clone();
        blocking(move || worker.decrypt_at(&data, &sender, as_of.timestamp())).await
    }

    /// Decrypt a sign-then-encrypt text message
    #[deprecated(note = "use `decrypt_text`")]
    pub async fn legacy_decrypt_text(&self, text: &str, sender: Option<&Card>) -> Result<String> {
        let _guard = self.state_lock.read().await;
        let worker = self.legacy.clone();
        let text = text.to_string();
        let sender = sender.cloned();
        blocking(move || worker.decrypt_text(&text, sender.as_ref())).await
    }

    /// Decrypt a sign-then-encrypt message against a lookup result
    #[deprecated(note = "use `decrypt`")]
    pub async fn legacy_decrypt_with_keys(&self, data: &[u8], keys: &LookupResult) -> Result<Vec<u8>> {
        let _guard = self.state_lock.read().await;
        let worker = self.legacy.clone();
        let data = data.to_vec();
        let keys: Vec<PublicKey> = keys.values().copied().collect();
        blocking(move || worker.decrypt_with_keys(&data, &keys)).await
    }

    /// Encrypt everything `input` yields for the local identity and `users`
    ///
    /// The stream is chunked and unsigned. It runs on the blocking pool and
    /// hands `output` back once everything is written.
    #[deprecated(note = "streams are unsigned; use `encrypt`")]
    pub async fn legacy_encrypt_stream<R, W>(&self, input: R, output: W, users: Option<&FindUsersResult>) -> Result<W>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let _guard = self.state_lock.read().await;
        let worker = self.legacy.clone();
        let keys = users.map(public_keys);
        blocking(move || {
            let (mut input, mut output) = (input, output);
            worker.encrypt_stream(&mut input, &mut output, keys.as_deref())?;
            Ok(output)
        })
        .await
    }

    /// Decrypt a stream from [`legacy_encrypt_stream`](Self::legacy_encrypt_stream)
    #[deprecated(note = "streams are unsigned; use `decrypt`")]
    pub async fn legacy_decrypt_stream<R, W>(&self, input: R, output: W) -> Result<W>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let _guard = self.state_lock.read().await;
        let worker = self.legacy.clone();
        blocking(move || {
            let (mut input, mut output) = (input, output);
            worker.decrypt_stream(&mut input, &mut output)?;
            Ok(output)
        })
        .await
    }

    // ========================================================================
    // LOOKUP
    // ========================================================================

    /// Current cards of `identities`, cache first
    pub async fn find_users(&self, identities: &[String], force_reload: bool) -> Result<FindUsersResult> {
        let _guard = self.state_lock.read().await;
        self.lookup.find_users(identities, force_reload).await
    }

    /// Current card of `identity`, cache first
    pub async fn find_user(&self, identity: &str, force_reload: bool) -> Result<Card> {
        let _guard = self.state_lock.read().await;
        self.lookup.find_user(identity, force_reload).await
    }

    /// Cached cards of `identities`
    pub async fn find_cached_users(&self, identities: &[String]) -> Result<FindUsersResult> {
        let _guard = self.state_lock.read().await;
        self.lookup.find_cached_users(identities).await
    }

    /// Cached card of `identity`
    pub async fn find_cached_user(&self, identity: &str) -> Result<Option<Card>> {
        let _guard = self.state_lock.read().await;
        self.lookup.find_cached_user(identity).await
    }

    /// Current public keys of `identities`
    pub async fn lookup_public_keys(&self, identities: &[String]) -> Result<LookupResult> {
        let _guard = self.state_lock.read().await;
        self.lookup.lookup_public_keys(identities).await
    }

    /// Cached current cards of `identities`
    pub async fn search_cached_cards(&self, identities: &[String]) -> Result<Vec<Card>> {
        let _guard = self.state_lock.read().await;
        self.lookup.search_cached_cards(identities).await
    }

    /// Re-fetch every cached user whose card was rotated or revoked
    pub async fn update_cached_users(&self) -> Result<Vec<String>> {
        let _guard = self.state_lock.read().await;
        let callback = self.on_key_changed.as_deref();
        self.lookup.update_cached_users(callback).await
    }

    // ========================================================================
    // BACKUP
    // ========================================================================

    /// Backup state of the default entry
    pub async fn backup_state(&self) -> Result<BackupState> {
        let _guard = self.state_lock.read().await;
        self.backup.state().await
    }

    /// Back up the local key under the default entry
    pub async fn backup_private_key(&self, password: &str) -> Result<()> {
        let _guard = self.state_lock.write().await;
        self.backup.backup(password).await
    }

    /// Back up the local key under `key_name`
    pub async fn backup_private_key_named(&self, password: &str, key_name: &str) -> Result<()> {
        let _guard = self.state_lock.write().await;
        self.backup.backup_named(password, key_name).await
    }

    /// Restore the default entry to this device
    pub async fn restore_private_key(&self, password: &str) -> Result<()> {
        let _guard = self.state_lock.write().await;
        self.backup.restore(password).await.map(|_| ())
    }

    /// Restore the entry `key_name` to this device
    pub async fn restore_private_key_named(&self, password: &str, key_name: &str) -> Result<()> {
        let _guard = self.state_lock.write().await;
        self.backup.restore_named(password, key_name).await.map(|_| ())
    }

    /// Change the password protecting the default entry
    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<()> {
        let _guard = self.state_lock.write().await;
        self.backup.change_password(old_password, new_password).await
    }

    /// Delete the default entry (with a password) or every entry (without)
    pub async fn reset_private_key_backup(&self, password: Option<&str>) -> Result<()> {
        let _guard = self.state_lock.write().await;
        self.backup.reset_backup(password).await
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    /// Publish a card for `keypair`, then store the key and cache the chain
    async fn publish(&self, keypair: &KeyPair, previous: Option<Card>) -> Result<Card> {
        let created_at = card_timestamp(
            crate::time::now_timestamp(),
            previous.as_ref().map(|card| card.created_at),
        );

        let raw = RawCard::generate(
            self.crypto.as_ref(),
            keypair,
            self.identity(),
            previous.as_ref().map(|card| card.identifier.clone()),
            created_at,
        )?;
        let mut card = self.directory.publish(raw).await?;
        self.key_storage.store(keypair)?;

        if let Some(mut prev) = previous {
            prev.is_outdated = true;
            card.previous_card = Some(Arc::new(prev));
        }

        let storage = self.card_storage.clone();
        let cached = card.clone();
        blocking(move || storage.store_chain(&cached)).await?;
        Ok(card)
    }

    async fn reset_card_cache(&self) -> Result<()> {
        let storage = self.card_storage.clone();
        blocking(move || storage.reset()).await
    }
}

/// Creation time of a new card: strictly newer than its predecessor even
/// within one second. A predecessor at `i64::MAX` saturates, and the
/// directory then rejects the card as not newer.
fn card_timestamp(now: i64, previous: Option<i64>) -> i64 {
    match previous {
        Some(prev) => now.max(prev.saturating_add(1)),
        None => now,
    }
}

fn public_keys(users: &FindUsersResult) -> Vec<PublicKey> {
    users.values().map(|card| card.public_key).collect()
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

// ============================================================================
// TESTS
// ============================================================================
