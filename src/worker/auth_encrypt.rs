//! # Authenticated Encryption
//!
//! ```text
//! encrypt(data, recipients?)
//!   keys = { own } ∪ recipients            sender can read its own messages
//!   auth_encrypt(data, own private key, keys)
//!
//! decrypt_at(data, sender card C₃, as_of)
//!   C₃ ──previous──► C₂ ──previous──► C₁
//!   walk while created_at > as_of, verify with the card reached
//! ```

use std::sync::Arc;

use crate::cards::Card;
use crate::crypto::{CryptoPrimitives, PublicKey};
use crate::error::{Error, Result};
use crate::storage::LocalKeyStorage;

use super::{decode_text, encode_text, ensure_data, ensure_text, into_utf8, map_decrypt_error, recipient_set};

/// Authenticated multi-recipient encrypt and decrypt
#[derive(Clone)]
pub struct AuthEncryptWorker {
    key_storage: LocalKeyStorage,
    crypto: Arc<dyn CryptoPrimitives>,
}

impl AuthEncryptWorker {
    /// Create a worker over the local key of one identity
    pub fn new(key_storage: LocalKeyStorage, crypto: Arc<dyn CryptoPrimitives>) -> Self {
        Self { key_storage, crypto }
    }

    /// Encrypt `data` for the caller and every key in `recipients`
    ///
    /// With `None` the ciphertext is readable by the caller only.
    pub fn encrypt(&self, data: &[u8], recipients: Option<&[PublicKey]>) -> Result<Vec<u8>> {
        ensure_data(data)?;
        let keypair = self.key_storage.retrieve_keypair()?;
        let keys = recipient_set(keypair.public_keys(), recipients)?;

        self.crypto
            .auth_encrypt(data, &keypair, &keys)
            .map_err(Error::Crypto)
    }

    /// [`encrypt`](Self::encrypt) for UTF-8 text, returning base64
    pub fn encrypt_text(&self, text: &str, recipients: Option<&[PublicKey]>) -> Result<String> {
        ensure_text(text, "text")?;
        Ok(encode_text(&self.encrypt(text.as_bytes(), recipients)?))
    }

    /// Decrypt `data`, verifying against `sender`'s key or the caller's own
    pub fn decrypt(&self, data: &[u8], sender: Option<&Card>) -> Result<Vec<u8>> {
        self.decrypt_with(data, sender.map(|card| &card.public_key))
    }

    /// Decrypt data produced at `as_of`, verifying with the sender key of
    /// that time
    pub fn decrypt_at(&self, data: &[u8], sender: &Card, as_of: i64) -> Result<Vec<u8>> {
        let card = sender.card_at(as_of);
        if card.identifier != sender.identifier {
            tracing::debug!(
                "Verifying {} with historical card {} as of {}",
                sender.identity,
                card.identifier,
                as_of
            );
        }
        self.decrypt_with(data, Some(&card.public_key))
    }

    /// [`decrypt`](Self::decrypt) for base64 text
    pub fn decrypt_text(&self, text: &str, sender: Option<&Card>) -> Result<String> {
        let data = decode_text(text)?;
        into_utf8(self.decrypt(&data, sender)?)
    }

    /// [`decrypt_at`](Self::decrypt_at) for base64 text
    pub fn decrypt_text_at(&self, text: &str, sender: &Card, as_of: i64) -> Result<String> {
        let data = decode_text(text)?;
        into_utf8(self.decrypt_at(&data, sender, as_of)?)
    }

    fn decrypt_with(&self, data: &[u8], verifier: Option<&PublicKey>) -> Result<Vec<u8>> {
        ensure_data(data)?;
        let keypair = self.key_storage.retrieve_keypair()?;
        let verifier = verifier.copied().unwrap_or_else(|| keypair.public_keys());

        self.crypto
            .auth_decrypt(data, &keypair, &verifier)
            .map_err(map_decrypt_error)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{DefaultCrypto, KeyPair};
    use crate::worker::test_support::{chain, key_storage_with};

    fn worker(identity: &str, keypair: &KeyPair) -> AuthEncryptWorker {
        AuthEncryptWorker::new(key_storage_with(identity, keypair), Arc::new(DefaultCrypto))
    }

    #[test]
    fn test_round_trip_between_peers() {
        let alice_kp = KeyPair::generate();
        let bob_kp = KeyPair::generate();
        let alice = worker("alice", &alice_kp);
        let bob = worker("bob", &bob_kp);
        let alice_card = chain("alice", &[&alice_kp], &[100]);

        let ct = alice.encrypt(b"hello bob", Some(&[bob_kp.public_keys()])).unwrap();
        assert_eq!(bob.decrypt(&ct, Some(&alice_card)).unwrap(), b"hello bob");

        // Sender is always a recipient
        assert_eq!(alice.decrypt(&ct, None).unwrap(), b"hello bob");
    }

    #[test]
    fn test_empty_inputs() {
        let kp = KeyPair::generate();
        let w = worker("alice", &kp);

        assert!(matches!(w.encrypt(b"", None), Err(Error::EmptyArgument(_))));
        assert!(matches!(w.encrypt(b"x", Some(&[])), Err(Error::EmptyRecipients)));
        assert!(matches!(w.decrypt(b"", None), Err(Error::EmptyArgument(_))));
        assert!(matches!(w.encrypt_text("", None), Err(Error::EmptyArgument(_))));
    }

    #[test]
    fn test_wrong_sender_is_signature_error() {
        let alice_kp = KeyPair::generate();
        let bob_kp = KeyPair::generate();
        let alice = worker("alice", &alice_kp);
        let bob = worker("bob", &bob_kp);
        let impostor = chain("alice", &[&KeyPair::generate()], &[100]);

        let ct = alice.encrypt(b"msg", Some(&[bob_kp.public_keys()])).unwrap();
        assert!(matches!(
            bob.decrypt(&ct, Some(&impostor)),
            Err(Error::SignatureVerification)
        ));
    }

    #[test]
    fn test_historical_key_fallback() {
        let k1 = KeyPair::generate();
        let k2 = KeyPair::generate();
        let k3 = KeyPair::generate();
        let bob_kp = KeyPair::generate();
        let bob = worker("bob", &bob_kp);

        // Written while card 2 was current
        let sender_then = worker("alice", &k2);
        let ct = sender_then.encrypt(b"before rotation", Some(&[bob_kp.public_keys()])).unwrap();

        let card3 = chain("alice", &[&k1, &k2, &k3], &[100, 200, 300]);

        assert_eq!(bob.decrypt_at(&ct, &card3, 250).unwrap(), b"before rotation");
        assert_eq!(bob.decrypt_at(&ct, &card3, 200).unwrap(), b"before rotation");
        assert!(matches!(
            bob.decrypt_at(&ct, &card3, 300),
            Err(Error::SignatureVerification)
        ));
        assert!(matches!(
            bob.decrypt(&ct, Some(&card3)),
            Err(Error::SignatureVerification)
        ));
    }

    #[test]
    fn test_as_of_before_chain_uses_oldest_card() {
        let k1 = KeyPair::generate();
        let k2 = KeyPair::generate();
        let bob_kp = KeyPair::generate();
        let bob = worker("bob", &bob_kp);

        let ct = worker("alice", &k1)
            .encrypt(b"ancient", Some(&[bob_kp.public_keys()]))
            .unwrap();
        let card2 = chain("alice", &[&k1, &k2], &[100, 200]);

        assert_eq!(bob.decrypt_at(&ct, &card2, 5).unwrap(), b"ancient");
    }

    #[test]
    fn test_text_round_trip() {
        let alice_kp = KeyPair::generate();
        let bob_kp = KeyPair::generate();
        let alice = worker("alice", &alice_kp);
        let bob = worker("bob", &bob_kp);
        let alice_card = chain("alice", &[&alice_kp], &[100]);

        let ct = alice.encrypt_text("héllo", Some(&[bob_kp.public_keys()])).unwrap();
        assert_eq!(bob.decrypt_text(&ct, Some(&alice_card)).unwrap(), "héllo");
        assert_eq!(bob.decrypt_text_at(&ct, &alice_card, 150).unwrap(), "héllo");
        assert!(matches!(bob.decrypt_text("%%%", None), Err(Error::Conversion(_))));
    }

    #[test]
    fn test_missing_local_key() {
        let kp = KeyPair::generate();
        let storage = key_storage_with("alice", &kp);
        storage.delete().unwrap();
        let w = AuthEncryptWorker::new(storage, Arc::new(DefaultCrypto));

        assert!(matches!(w.encrypt(b"x", None), Err(Error::MissingPrivateKey)));
    }
}
