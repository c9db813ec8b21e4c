//! Password-derived keypairs.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha512};

use crate::config::KdfParams;
use crate::crypto::{backup_salt, derive_seed_from_password, CryptoPrimitives, KeyPair};
use crate::error::{Error, Result};

/// Derives a deterministic keypair from an identity's password
#[async_trait]
pub trait PasswordKeyDeriver: Send + Sync {
    /// Same identity and password always yield the same keypair
    async fn derive_keypair(&self, identity: &str, password: &str) -> Result<KeyPair>;
}

/// Local Argon2id deriver
pub struct Argon2KeyDeriver {
    crypto: Arc<dyn CryptoPrimitives>,
    params: KdfParams,
}

impl Argon2KeyDeriver {
    /// Create a deriver with the given cost parameters
    pub fn new(crypto: Arc<dyn CryptoPrimitives>, params: KdfParams) -> Self {
        Self { crypto, params }
    }
}

#[async_trait]
impl PasswordKeyDeriver for Argon2KeyDeriver {
    async fn derive_keypair(&self, identity: &str, password: &str) -> Result<KeyPair> {
        let crypto = self.crypto.clone();
        let params = self.params;
        let salt = backup_salt(identity);
        let password = zeroize::Zeroizing::new(password.to_string());

        tokio::task::spawn_blocking(move || {
            let seed = derive_seed_from_password(&password, &salt, &params)
                .map_err(|e| Error::KeyDerivationFailed(e.to_string()))?;
            crypto
                .keypair_from_seed(&seed)
                .map_err(|e| Error::KeyDerivationFailed(e.to_string()))
        })
        .await?
    }
}

/// Two independent passwords split from one user password
#[derive(Clone, PartialEq, Eq)]
pub struct DerivedPasswords {
    /// For authenticating against the application's own backend
    pub login_password: String,
    /// For the private key backup
    pub backup_password: String,
}

impl std::fmt::Debug for DerivedPasswords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedPasswords").finish_non_exhaustive()
    }
}

/// Split `password` into a login password and a backup password
///
/// The SHA-512 digest is cut in half and each half is base64 encoded, so
/// neither result reveals the other.
pub fn derive_passwords(password: &str) -> Result<DerivedPasswords> {
    if password.trim().is_empty() {
        return Err(Error::EmptyArgument("password".into()));
    }

    let digest = Sha512::digest(password.as_bytes());
    let (login, backup) = digest.split_at(32);

    Ok(DerivedPasswords {
        login_password: BASE64.encode(login),
        backup_password: BASE64.encode(backup),
    })
}
