//! # Key Management
//!
//! This module handles cryptographic key generation and management.
//!
//! ## Key Types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          KEY TYPES                                      │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  KeyPair                                                               │
//! │  ├── SigningKeyPair (Ed25519)                                          │
//! │  │     Card self-signatures, message authentication                    │
//! │  └── EncryptionKeyPair (X25519)                                        │
//! │        Unwrapping the per-message content key                          │
//! │                                                                         │
//! │  PublicKey = (signing public, encryption public), 64 bytes             │
//! │  KeyId     = SHA-512(PublicKey)[..8], addresses envelope recipients    │
//! │                                                                         │
//! │  Exported private key = signing secret ‖ encryption secret (64 bytes) │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::error::{CryptoError, CryptoResult};

/// Short identifier of a public key, used to address envelope recipients
pub type KeyId = [u8; KEY_ID_SIZE];

/// Size of a [`KeyId`] in bytes
pub const KEY_ID_SIZE: usize = 8;

/// Size of an exported private key in bytes
pub const PRIVATE_KEY_EXPORT_SIZE: usize = 64;

/// Combined keypair containing both signing and encryption keys
///
/// ## Security
///
/// - Private keys are zeroized when this struct is dropped
/// - `Debug` only prints the key id
#[derive(ZeroizeOnDrop)]
pub struct KeyPair {
    /// Ed25519 keypair for signing
    pub signing: SigningKeyPair,
    /// X25519 keypair for encryption
    pub encryption: EncryptionKeyPair,
}

impl KeyPair {
    /// Generate a new random keypair
    ///
    /// Uses the operating system's secure random number generator.
    pub fn generate() -> Self {
        Self {
            signing: SigningKeyPair::generate(),
            encryption: EncryptionKeyPair::generate(),
        }
    }

    /// Create a keypair from a 32-byte seed
    ///
    /// This is deterministic: the same seed always produces the same keys.
    ///
    /// ```text
    /// Seed (32 bytes)
    ///       │
    ///       ├──► HKDF(seed, "ethree-signing-key-v1")    → Signing Key
    ///       │
    ///       └──► HKDF(seed, "ethree-encryption-key-v1") → Encryption Key
    /// ```
    pub fn from_seed(seed: &[u8; 32]) -> CryptoResult<Self> {
        use crate::crypto::kdf::derive_keys_from_seed;

        let derived = derive_keys_from_seed(seed)?;

        Ok(Self {
            signing: SigningKeyPair::from_bytes(&derived.signing_key),
            encryption: EncryptionKeyPair::from_bytes(&derived.encryption_key),
        })
    }

    /// Get the public keys for sharing with others
    pub fn public_keys(&self) -> PublicKey {
        PublicKey {
            signing: self.signing.public_bytes(),
            encryption: self.encryption.public_bytes(),
        }
    }

    /// Key id of the public half
    pub fn key_id(&self) -> KeyId {
        self.public_keys().key_id()
    }

    /// Export both secrets as `signing ‖ encryption`
    ///
    /// Only use this for secure storage or backup. Never log these bytes.
    pub fn to_private_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut bytes = Zeroizing::new(Vec::with_capacity(PRIVATE_KEY_EXPORT_SIZE));
        bytes.extend_from_slice(&*Zeroizing::new(self.signing.secret_bytes()));
        bytes.extend_from_slice(&*Zeroizing::new(self.encryption.secret_bytes()));
        bytes
    }

    /// Rebuild a keypair from [`to_private_bytes`](Self::to_private_bytes) output
    pub fn from_private_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != PRIVATE_KEY_EXPORT_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "Private key must be {} bytes, got {}",
                PRIVATE_KEY_EXPORT_SIZE,
                bytes.len()
            )));
        }

        let mut signing = Zeroizing::new([0u8; 32]);
        signing.copy_from_slice(&bytes[..32]);
        let mut encryption = Zeroizing::new([0u8; 32]);
        encryption.copy_from_slice(&bytes[32..]);

        Ok(Self {
            signing: SigningKeyPair::from_bytes(&signing),
            encryption: EncryptionKeyPair::from_bytes(&encryption),
        })
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("key_id", &hex::encode(self.key_id()))
            .finish_non_exhaustive()
    }
}

/// Ed25519 signing keypair
#[derive(ZeroizeOnDrop)]
pub struct SigningKeyPair {
    #[zeroize(skip)] // ed25519_dalek::SigningKey handles its own zeroization
    secret: SigningKey,
}

impl SigningKeyPair {
    /// Generate a new random signing keypair
    pub fn generate() -> Self {
        Self {
            secret: SigningKey::generate(&mut OsRng),
        }
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            secret: SigningKey::from_bytes(bytes),
        }
    }

    /// Get the secret key bytes
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Get the public key bytes
    pub fn public_bytes(&self) -> [u8; 32] {
        self.secret.verifying_key().to_bytes()
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.secret
    }
}

/// X25519 encryption keypair for key exchange
#[derive(ZeroizeOnDrop)]
pub struct EncryptionKeyPair {
    #[zeroize(skip)] // x25519_dalek handles its own zeroization
    secret: StaticSecret,
    #[zeroize(skip)]
    public: X25519PublicKey,
}

impl EncryptionKeyPair {
    /// Generate a new random encryption keypair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        let secret = StaticSecret::from(*bytes);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Get the secret key bytes
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Get the public key bytes
    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Perform Diffie-Hellman key exchange
    pub fn diffie_hellman(&self, their_public: &[u8; 32]) -> Zeroizing<[u8; 32]> {
        let their_public = X25519PublicKey::from(*their_public);
        Zeroizing::new(self.secret.diffie_hellman(&their_public).to_bytes())
    }
}

/// Public keys that can be safely shared with others
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PublicKey {
    /// Ed25519 public key for signature verification (32 bytes)
    #[serde(with = "hex_bytes")]
    pub signing: [u8; 32],

    /// X25519 public key for encryption (32 bytes)
    #[serde(with = "hex_bytes")]
    pub encryption: [u8; 32],
}

impl PublicKey {
    /// Create a PublicKey from raw bytes
    pub fn from_bytes(signing: [u8; 32], encryption: [u8; 32]) -> Self {
        Self { signing, encryption }
    }

    /// Concatenated `signing ‖ encryption` bytes
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.signing);
        bytes[32..].copy_from_slice(&self.encryption);
        bytes
    }

    /// Short identifier used to address this key inside ciphertexts
    pub fn key_id(&self) -> KeyId {
        let digest = Sha512::digest(self.to_bytes());
        let mut id = [0u8; KEY_ID_SIZE];
        id.copy_from_slice(&digest[..KEY_ID_SIZE]);
        id
    }

    /// Get the verifying key for signature verification
    pub fn verifying_key(&self) -> CryptoResult<VerifyingKey> {
        VerifyingKey::from_bytes(&self.signing)
            .map_err(|e| CryptoError::InvalidKey(format!("Invalid signing public key: {}", e)))
    }

    /// Encode as hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Decode from hex string
    pub fn from_hex(hex_str: &str) -> CryptoResult<Self> {
        if hex_str.len() != 128 {
            return Err(CryptoError::InvalidKey(
                "Public key hex must be 128 characters".into(),
            ));
        }

        let bytes = hex::decode(hex_str)
            .map_err(|e| CryptoError::InvalidKey(format!("Invalid hex: {}", e)))?;

        let signing: [u8; 32] = bytes[0..32]
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("Invalid signing key length".into()))?;

        let encryption: [u8; 32] = bytes[32..64]
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("Invalid encryption key length".into()))?;

        Ok(Self { signing, encryption })
    }
}

/// Serde helper for serializing byte arrays as hex
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes.try_into().map_err(|_| serde::de::Error::custom("Invalid length"))
    }
}

// ============================================================================
// TESTS
// ============================================================================
