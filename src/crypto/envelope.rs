//! # Multi-Recipient Envelope
//!
//! Binary container produced by both encryption modes.
//!
//! ## Wire Format
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         ENVELOPE (bincode)                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  header                                                                │
//! │  ├── version            u8                                             │
//! │  ├── mode               Authenticated | SignThenEncrypt | Stream       │
//! │  ├── ephemeral_public   X25519, 32 bytes                               │
//! │  ├── recipients[]       { key_id, nonce, wrapped content key }         │
//! │  ├── signer_id          legacy only                                    │
//! │  └── signature          legacy only, over the plaintext                │
//! │                                                                         │
//! │  nonce                  12 bytes                                       │
//! │  ciphertext             AES-256-GCM(content key, body, aad = header)  │
//! │                                                                         │
//! │  Authenticated body = { data, signature over SHA-512(header ‖ data) } │
//! │  Legacy body        = data                                             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! In authenticated mode the signature is hidden inside the ciphertext and
//! bound to the exact recipient list. The legacy mode signs first and
//! encrypts afterwards, carrying the signature in the clear.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::crypto::encryption::{self, EncryptionKey, Nonce, NONCE_SIZE};
use crate::crypto::keys::{EncryptionKeyPair, KeyId, KeyPair, PublicKey};
use crate::crypto::kdf::derive_wrap_key;
use crate::crypto::signing::{self, Signature};
use crate::error::{CryptoError, CryptoResult};

/// Current envelope format version
pub const ENVELOPE_VERSION: u8 = 1;

/// How the envelope authenticates its sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeMode {
    /// Signature over header and data, encrypted with the data
    Authenticated,
    /// Signature over the data, carried in the cleartext header
    SignThenEncrypt,
    /// Unsigned chunked body, see [`encrypt_stream`](super::encrypt_stream)
    Stream,
}

/// One recipient's wrapped copy of the content key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientSlot {
    /// Key id of the recipient's public key
    pub key_id: KeyId,
    /// Nonce of the wrap encryption
    pub nonce: [u8; NONCE_SIZE],
    /// Content key encrypted under the recipient's wrap key
    pub wrapped_key: Vec<u8>,
}

/// Cleartext part of the envelope, authenticated as AAD
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    /// Format version
    pub version: u8,
    /// Authentication mode
    pub mode: EnvelopeMode,
    /// Ephemeral X25519 public key used for every recipient slot
    pub ephemeral_public: [u8; 32],
    /// Recipient slots, one per distinct key
    pub recipients: Vec<RecipientSlot>,
    /// Key id of the signer (legacy mode)
    pub signer_id: Option<KeyId>,
    /// Signature over the plaintext (legacy mode)
    pub signature: Option<Signature>,
}

impl EnvelopeHeader {
    /// Key ids this envelope was encrypted to
    pub fn recipient_ids(&self) -> Vec<KeyId> {
        self.recipients.iter().map(|slot| slot.key_id).collect()
    }
}

/// Complete envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Cleartext header
    pub header: EnvelopeHeader,
    /// Body nonce
    pub nonce: [u8; NONCE_SIZE],
    /// Encrypted body
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Decode an envelope from bytes
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let envelope: Envelope = bincode::deserialize(bytes)
            .map_err(|e| CryptoError::InvalidFormat(format!("Malformed envelope: {}", e)))?;
        if envelope.header.version != ENVELOPE_VERSION {
            return Err(CryptoError::InvalidFormat(format!(
                "Unsupported envelope version {}",
                envelope.header.version
            )));
        }
        Ok(envelope)
    }

    /// Encode the envelope
    pub fn to_bytes(&self) -> CryptoResult<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| CryptoError::InvalidFormat(format!("Failed to encode envelope: {}", e)))
    }
}

/// Authenticated body: data plus the signature that binds it to the header
#[derive(Serialize, Deserialize)]
struct AuthenticatedBody {
    data: Vec<u8>,
    signature: Signature,
}

pub(crate) fn header_aad(header: &EnvelopeHeader) -> CryptoResult<Vec<u8>> {
    bincode::serialize(header)
        .map_err(|e| CryptoError::InvalidFormat(format!("Failed to encode header: {}", e)))
}

fn authenticated_digest(aad: &[u8], data: &[u8]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(aad);
    hasher.update(data);
    hasher.finalize().into()
}

/// Distinct recipient keys, first occurrence wins
fn dedupe_recipients(recipients: &[PublicKey]) -> Vec<(KeyId, &PublicKey)> {
    let mut seen = Vec::with_capacity(recipients.len());
    for key in recipients {
        let id = key.key_id();
        if !seen.iter().any(|(existing, _)| *existing == id) {
            seen.push((id, key));
        }
    }
    seen
}

pub(crate) fn wrap_for_recipients(
    content_key: &EncryptionKey,
    ephemeral: &EncryptionKeyPair,
    recipients: &[PublicKey],
) -> CryptoResult<Vec<RecipientSlot>> {
    let ephemeral_public = ephemeral.public_bytes();

    dedupe_recipients(recipients)
        .into_iter()
        .map(|(key_id, key)| {
            let shared = ephemeral.diffie_hellman(&key.encryption);
            let wrap_key = derive_wrap_key(&shared, &ephemeral_public, &key_id)?;
            let (nonce, wrapped_key) = encryption::encrypt(&wrap_key, content_key.as_bytes(), &key_id)?;
            Ok(RecipientSlot {
                key_id,
                nonce: nonce.0,
                wrapped_key,
            })
        })
        .collect()
}

pub(crate) fn unwrap_content_key(header: &EnvelopeHeader, recipient: &KeyPair) -> CryptoResult<EncryptionKey> {
    let key_id = recipient.key_id();
    let slot = header
        .recipients
        .iter()
        .find(|slot| slot.key_id == key_id)
        .ok_or(CryptoError::RecipientNotFound)?;

    let shared = recipient.encryption.diffie_hellman(&header.ephemeral_public);
    let wrap_key = derive_wrap_key(&shared, &header.ephemeral_public, &key_id)?;
    let raw = zeroize::Zeroizing::new(encryption::decrypt(
        &wrap_key,
        &Nonce(slot.nonce),
        &slot.wrapped_key,
        &key_id,
    )?);

    EncryptionKey::from_slice(&raw)
}

fn seal(header_template: EnvelopeHeader, content_key: &EncryptionKey, body: &[u8]) -> CryptoResult<Vec<u8>> {
    let aad = header_aad(&header_template)?;
    let (nonce, ciphertext) = encryption::encrypt(content_key, body, &aad)?;

    Envelope {
        header: header_template,
        nonce: nonce.0,
        ciphertext,
    }
    .to_bytes()
}

fn open(envelope: &Envelope, expected: EnvelopeMode, recipient: &KeyPair) -> CryptoResult<Vec<u8>> {
    if envelope.header.mode != expected {
        return Err(CryptoError::InvalidFormat(format!(
            "Expected {:?} envelope, found {:?}",
            expected, envelope.header.mode
        )));
    }

    let content_key = unwrap_content_key(&envelope.header, recipient)?;
    let aad = header_aad(&envelope.header)?;
    encryption::decrypt(&content_key, &Nonce(envelope.nonce), &envelope.ciphertext, &aad)
}

pub(crate) fn new_header(mode: EnvelopeMode, ephemeral: &EncryptionKeyPair, recipients: Vec<RecipientSlot>) -> EnvelopeHeader {
    EnvelopeHeader {
        version: ENVELOPE_VERSION,
        mode,
        ephemeral_public: ephemeral.public_bytes(),
        recipients,
        signer_id: None,
        signature: None,
    }
}

/// Encrypt `data` to `recipients`, authenticated by `signer`
pub fn auth_encrypt(data: &[u8], signer: &KeyPair, recipients: &[PublicKey]) -> CryptoResult<Vec<u8>> {
    if recipients.is_empty() {
        return Err(CryptoError::Encryption("No recipients".into()));
    }

    let content_key = EncryptionKey::random();
    let ephemeral = EncryptionKeyPair::generate();
    let slots = wrap_for_recipients(&content_key, &ephemeral, recipients)?;
    let header = new_header(EnvelopeMode::Authenticated, &ephemeral, slots);

    let aad = header_aad(&header)?;
    let signature = signing::sign(&signer.signing, &authenticated_digest(&aad, data));
    let body = zeroize::Zeroizing::new(
        bincode::serialize(&AuthenticatedBody {
            data: data.to_vec(),
            signature,
        })
        .map_err(|e| CryptoError::Encryption(format!("Failed to encode body: {}", e)))?,
    );

    seal(header, &content_key, &body)
}

/// Decrypt an authenticated envelope and verify it against `signer`
pub fn auth_decrypt(data: &[u8], recipient: &KeyPair, signer: &PublicKey) -> CryptoResult<Vec<u8>> {
    let envelope = Envelope::from_bytes(data)?;
    let plaintext = zeroize::Zeroizing::new(open(&envelope, EnvelopeMode::Authenticated, recipient)?);

    let body: AuthenticatedBody = bincode::deserialize(&plaintext)
        .map_err(|e| CryptoError::InvalidFormat(format!("Malformed body: {}", e)))?;

    let aad = header_aad(&envelope.header)?;
    signing::verify(signer, &authenticated_digest(&aad, &body.data), &body.signature)?;

    Ok(body.data)
}

/// Legacy mode: sign `data`, then encrypt it to `recipients`
pub fn sign_then_encrypt(data: &[u8], signer: &KeyPair, recipients: &[PublicKey]) -> CryptoResult<Vec<u8>> {
    if recipients.is_empty() {
        return Err(CryptoError::Encryption("No recipients".into()));
    }

    let signature = signing::sign(&signer.signing, data);
    let content_key = EncryptionKey::random();
    let ephemeral = EncryptionKeyPair::generate();
    let slots = wrap_for_recipients(&content_key, &ephemeral, recipients)?;

    let mut header = new_header(EnvelopeMode::SignThenEncrypt, &ephemeral, slots);
    header.signer_id = Some(signer.key_id());
    header.signature = Some(signature);

    seal(header, &content_key, data)
}

/// Legacy mode: decrypt, then verify against whichever of `verifiers`
/// matches the signer's key id
pub fn decrypt_then_verify(data: &[u8], recipient: &KeyPair, verifiers: &[PublicKey]) -> CryptoResult<Vec<u8>> {
    let envelope = Envelope::from_bytes(data)?;
    let plaintext = open(&envelope, EnvelopeMode::SignThenEncrypt, recipient)?;

    let (signer_id, signature) = match (&envelope.header.signer_id, &envelope.header.signature) {
        (Some(id), Some(sig)) => (id, sig),
        _ => return Err(CryptoError::SignatureNotValid),
    };

    let verifier = verifiers
        .iter()
        .find(|key| key.key_id() == *signer_id)
        .ok_or(CryptoError::SignatureNotValid)?;
    signing::verify(verifier, &plaintext, signature)?;

    Ok(plaintext)
}

// ============================================================================
// TESTS
// ============================================================================
