//! # Cryptography Module
//!
//! Primitives and the injectable [`CryptoPrimitives`] capability used by
//! every other component.
//!
//! ## Security Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CRYPTOGRAPHIC ARCHITECTURE                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  KeyPair = Ed25519 (signing) + X25519 (encryption)                     │
//! │                                                                         │
//! │  Card self-signature                                                   │
//! │    Ed25519(signing key, content snapshot)                              │
//! │                                                                         │
//! │  Message encryption (one envelope, N recipients)                       │
//! │    1. Random 256-bit content key                                       │
//! │    2. Per recipient: X25519(ephemeral, recipient) → HKDF → wrap key    │
//! │       AES-256-GCM(wrap key, content key)                               │
//! │    3. Body: AES-256-GCM(content key, body, aad = header)              │
//! │                                                                         │
//! │  Authentication                                                        │
//! │    Authenticated: Ed25519 over SHA-512(header ‖ data), inside body    │
//! │    Legacy:        Ed25519 over data, in the cleartext header           │
//! │                                                                         │
//! │  Backup keys                                                           │
//! │    Argon2id(password, identity salt) → seed → KeyPair                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Algorithm Choices
//!
//! | Algorithm | Purpose |
//! |-----------|---------|
//! | Ed25519 | Card and message signatures |
//! | X25519 | Per-recipient key wrapping |
//! | AES-256-GCM | Body and wrapped-key encryption |
//! | HKDF-SHA256 | Seed expansion, wrap keys |
//! | SHA-512 | Card identifiers, key ids |
//! | Argon2id | Password-derived backup keys |
//!
//! ## Security Considerations
//!
//! 1. **Key Zeroization**: All secret keys are zeroized when dropped
//! 2. **Constant-Time Operations**: Using dalek for constant-time crypto
//! 3. **Secure Random**: Using `rand::rngs::OsRng` for cryptographic randomness
//! 4. **No Key Reuse**: Fresh content key and ephemeral key per envelope

mod encryption;
mod envelope;
mod kdf;
mod keys;
mod provider;
mod signing;
mod stream;

pub use encryption::{decrypt, encrypt, EncryptionKey, Nonce, KEY_SIZE, NONCE_SIZE};
pub use envelope::{Envelope, EnvelopeHeader, EnvelopeMode, RecipientSlot, ENVELOPE_VERSION};
pub use kdf::{backup_salt, derive_keys_from_seed, derive_seed_from_password, DerivedKeys};
pub use keys::{
    EncryptionKeyPair, KeyId, KeyPair, PublicKey, SigningKeyPair, KEY_ID_SIZE,
    PRIVATE_KEY_EXPORT_SIZE,
};
pub use provider::{CryptoPrimitives, DefaultCrypto};
pub use signing::{sign, verify, Signature, SIGNATURE_SIZE};
pub use stream::{decrypt_stream, encrypt_stream, STREAM_CHUNK_SIZE};
