//! # Key Derivation
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         KEY DERIVATION                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Seed (32 bytes)                                                       │
//! │    ├──► HKDF-SHA256(info = signing domain)    → Ed25519 secret         │
//! │    └──► HKDF-SHA256(info = encryption domain) → X25519 secret          │
//! │                                                                         │
//! │  X25519(ephemeral, recipient)                                          │
//! │    └──► HKDF-SHA256(salt = eph_pub ‖ key_id,                           │
//! │                     info = recipient wrap domain) → wrap key           │
//! │                                                                         │
//! │  Password                                                              │
//! │    └──► Argon2id(salt = SHA-256(backup salt domain ‖ identity))       │
//! │           → Seed (32 bytes) → KeyPair::from_seed                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::config::KdfParams;
use crate::crypto::encryption::EncryptionKey;
use crate::crypto::keys::KeyId;
use crate::error::{CryptoError, CryptoResult};

/// Domain separation strings
///
/// These ensure that keys derived for different purposes are cryptographically
/// independent, even when derived from the same input material.
pub mod domain {
    /// Domain for signing key derivation
    pub const SIGNING_KEY: &[u8] = b"ethree-signing-key-v1";

    /// Domain for encryption key derivation
    pub const ENCRYPTION_KEY: &[u8] = b"ethree-encryption-key-v1";

    /// Domain for per-recipient content key wrapping
    pub const RECIPIENT_WRAP: &[u8] = b"ethree-recipient-wrap-v1";

    /// Prefix of the password derivation salt
    pub const BACKUP_SALT: &[u8] = b"ethree-backup-salt";
}

/// Keys derived from a seed
#[derive(ZeroizeOnDrop)]
pub struct DerivedKeys {
    /// Ed25519 signing key (32 bytes)
    pub signing_key: [u8; 32],

    /// X25519 encryption key (32 bytes)
    pub encryption_key: [u8; 32],
}

/// Derive signing and encryption keys from a seed
pub fn derive_keys_from_seed(seed: &[u8; 32]) -> CryptoResult<DerivedKeys> {
    let hkdf = Hkdf::<Sha256>::new(None, seed);

    let mut signing_key = [0u8; 32];
    hkdf.expand(domain::SIGNING_KEY, &mut signing_key)
        .map_err(|_| CryptoError::KeyDerivation("Failed to derive signing key".into()))?;

    let mut encryption_key = [0u8; 32];
    hkdf.expand(domain::ENCRYPTION_KEY, &mut encryption_key)
        .map_err(|_| CryptoError::KeyDerivation("Failed to derive encryption key".into()))?;

    Ok(DerivedKeys {
        signing_key,
        encryption_key,
    })
}

/// Derive the key that wraps one recipient's copy of the content key
///
/// Binding the ephemeral public key and the recipient's key id into the
/// salt makes every wrap key unique to one envelope and one recipient.
pub fn derive_wrap_key(
    dh_output: &[u8; 32],
    ephemeral_public: &[u8; 32],
    recipient_id: &KeyId,
) -> CryptoResult<EncryptionKey> {
    let mut salt = Vec::with_capacity(ephemeral_public.len() + recipient_id.len());
    salt.extend_from_slice(ephemeral_public);
    salt.extend_from_slice(recipient_id);

    let hkdf = Hkdf::<Sha256>::new(Some(&salt), dh_output);
    let mut key = Zeroizing::new([0u8; 32]);
    hkdf.expand(domain::RECIPIENT_WRAP, &mut key[..])
        .map_err(|_| CryptoError::KeyDerivation("Failed to derive wrap key".into()))?;

    Ok(EncryptionKey::from_bytes(*key))
}

/// Salt for the password derivation of `identity`
pub fn backup_salt(identity: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain::BACKUP_SALT);
    hasher.update(identity.as_bytes());
    hasher.finalize().into()
}

/// Stretch a password into a 32-byte seed with Argon2id
///
/// This is deliberately slow; call it off the async executor.
pub fn derive_seed_from_password(
    password: &str,
    salt: &[u8],
    params: &KdfParams,
) -> CryptoResult<Zeroizing<[u8; 32]>> {
    let argon_params = Params::new(params.memory_kib, params.iterations, params.parallelism, Some(32))
        .map_err(|e| CryptoError::KeyDerivation(format!("Invalid Argon2 parameters: {}", e)))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut seed = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut seed[..])
        .map_err(|e| CryptoError::KeyDerivation(format!("Argon2 failed: {}", e)))?;

    Ok(seed)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> KdfParams {
        KdfParams {
            memory_kib: 256,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_derive_keys_deterministic() {
        let seed = [42u8; 32];

        let keys1 = derive_keys_from_seed(&seed).unwrap();
        let keys2 = derive_keys_from_seed(&seed).unwrap();

        assert_eq!(keys1.signing_key, keys2.signing_key);
        assert_eq!(keys1.encryption_key, keys2.encryption_key);
        assert_ne!(keys1.signing_key, keys1.encryption_key);
    }

    #[test]
    fn test_wrap_key_depends_on_recipient() {
        let dh = [7u8; 32];
        let eph = [9u8; 32];

        let k1 = derive_wrap_key(&dh, &eph, &[1u8; 8]).unwrap();
        let k2 = derive_wrap_key(&dh, &eph, &[2u8; 8]).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_backup_salt_per_identity() {
        assert_eq!(backup_salt("alice"), backup_salt("alice"));
        assert_ne!(backup_salt("alice"), backup_salt("bob"));
    }

    #[test]
    fn test_password_seed_deterministic() {
        let salt = backup_salt("alice");
        let a = derive_seed_from_password("hunter2", &salt, &fast_params()).unwrap();
        let b = derive_seed_from_password("hunter2", &salt, &fast_params()).unwrap();
        let c = derive_seed_from_password("hunter3", &salt, &fast_params()).unwrap();

        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
    }

    #[test]
    fn test_invalid_argon_params() {
        let params = KdfParams {
            memory_kib: 1,
            iterations: 1,
            parallelism: 1,
        };
        let err = derive_seed_from_password("pw", &backup_salt("a"), &params).unwrap_err();
        assert!(matches!(err, CryptoError::KeyDerivation(_)));
    }
}
