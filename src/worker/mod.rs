//! # Workers
//!
//! Components the facade is assembled from. Each worker owns one concern
//! and receives its collaborators at construction.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                             WORKERS                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  AuthEncryptWorker   auth-encrypt to many recipients, date-aware       │
//! │                      decrypt walking the sender's card chain           │
//! │                                                                         │
//! │  LegacyPeerWorker    sign-then-encrypt path kept for old ciphertexts   │
//! │                                                                         │
//! │  LookupWorker        cache-first card lookup, key change detection     │
//! │                                                                         │
//! │  KeyBackupWorkflow   password-protected private key backup             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The encryption workers are synchronous; the facade runs them on the
//! blocking pool. Lookup and backup talk to remote boundaries and are async.

mod auth_encrypt;
mod backup;
mod legacy;
mod lookup;

pub use auth_encrypt::AuthEncryptWorker;
pub use backup::{BackupState, KeyBackupWorkflow};
pub use legacy::LegacyPeerWorker;
pub use lookup::{select_current, FindUsersResult, LookupResult, LookupWorker};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::crypto::PublicKey;
use crate::error::{CryptoError, Error, Result};

pub(crate) fn ensure_data(data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Err(Error::EmptyArgument("data".into()));
    }
    Ok(())
}

pub(crate) fn ensure_text(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::EmptyArgument(name.into()));
    }
    Ok(())
}

pub(crate) fn decode_text(text: &str) -> Result<Vec<u8>> {
    ensure_text(text, "text")?;
    BASE64
        .decode(text.trim())
        .map_err(|e| Error::Conversion(format!("Text is not valid base64: {}", e)))
}

pub(crate) fn encode_text(data: &[u8]) -> String {
    BASE64.encode(data)
}

pub(crate) fn into_utf8(data: Vec<u8>) -> Result<String> {
    String::from_utf8(data).map_err(|e| Error::Conversion(format!("Plaintext is not UTF-8: {}", e)))
}

/// Own key followed by the caller's recipients
///
/// `Some(&[])` is rejected so an empty lookup result never silently turns
/// into a message only the sender can read.
pub(crate) fn recipient_set(own: PublicKey, recipients: Option<&[PublicKey]>) -> Result<Vec<PublicKey>> {
    let mut keys = vec![own];
    if let Some(recipients) = recipients {
        if recipients.is_empty() {
            return Err(Error::EmptyRecipients);
        }
        keys.extend_from_slice(recipients);
    }
    Ok(keys)
}

pub(crate) fn map_decrypt_error(err: CryptoError) -> Error {
    match err {
        CryptoError::SignatureNotValid => Error::SignatureVerification,
        other => Error::Crypto(other),
    }
}
