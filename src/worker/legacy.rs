//! Deprecated sign-then-encrypt path.
//!
//! Kept so messages written by older clients stay readable. New messages
//! go through [`AuthEncryptWorker`](super::AuthEncryptWorker).

use std::io::{Read, Write};
use std::sync::Arc;

use crate::cards::Card;
use crate::crypto::{CryptoPrimitives, PublicKey};
use crate::error::{Error, Result};
use crate::storage::LocalKeyStorage;

use super::{decode_text, encode_text, ensure_data, ensure_text, into_utf8, map_decrypt_error, recipient_set};

/// Sign-then-encrypt / decrypt-then-verify worker
#[derive(Clone)]
pub struct LegacyPeerWorker {
    key_storage: LocalKeyStorage,
    crypto: Arc<dyn CryptoPrimitives>,
}

impl LegacyPeerWorker {
    /// Create a worker over the local key of one identity
    pub fn new(key_storage: LocalKeyStorage, crypto: Arc<dyn CryptoPrimitives>) -> Self {
        Self { key_storage, crypto }
    }

    /// Sign with the local key, then encrypt to the caller and `recipients`
    pub fn encrypt(&self, data: &[u8], recipients: Option<&[PublicKey]>) -> Result<Vec<u8>> {
        ensure_data(data)?;
        let keypair = self.key_storage.retrieve_keypair()?;
        let keys = recipient_set(keypair.public_keys(), recipients)?;

        self.crypto
            .sign_then_encrypt(data, &keypair, &keys)
            .map_err(Error::Crypto)
    }

    /// [`encrypt`](Self::encrypt) for UTF-8 text, returning base64
    pub fn encrypt_text(&self, text: &str, recipients: Option<&[PublicKey]>) -> Result<String> {
        ensure_text(text, "text")?;
        Ok(encode_text(&self.encrypt(text.as_bytes(), recipients)?))
    }

    /// Decrypt and verify against `sender`, or against the caller's own key
    /// when no sender is given
    pub fn decrypt(&self, data: &[u8], sender: Option<&Card>) -> Result<Vec<u8>> {
        match sender {
            Some(card) => self.decrypt_verified(data, Some(std::slice::from_ref(&card.public_key))),
            None => self.decrypt_verified(data, None),
        }
    }

    /// Decrypt data produced at `as_of` with the sender key of that time
    pub fn decrypt_at(&self, data: &[u8], sender: &Card, as_of: i64) -> Result<Vec<u8>> {
        let card = sender.card_at(as_of);
        self.decrypt_verified(data, Some(std::slice::from_ref(&card.public_key)))
    }

    /// Decrypt against an explicit verifier list
    ///
    /// The caller's own key is not added; include it to accept self-sent
    /// messages.
    pub fn decrypt_with_keys(&self, data: &[u8], verifier_keys: &[PublicKey]) -> Result<Vec<u8>> {
        if verifier_keys.is_empty() {
            return Err(Error::EmptyArgument("verifier_keys".into()));
        }
        self.decrypt_verified(data, Some(verifier_keys))
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

    /// Encrypt everything `input` yields to the caller and `recipients`
    ///
    /// Streams are chunked and carry no signature. Returns the number of
    /// plaintext bytes read.
    pub fn encrypt_stream<R: Read, W: Write>(
        &self,
        input: &mut R,
        output: &mut W,
        recipients: Option<&[PublicKey]>,
    ) -> Result<u64> {
        let keypair = self.key_storage.retrieve_keypair()?;
        let keys = recipient_set(keypair.public_keys(), recipients)?;

        let read = self
            .crypto
            .encrypt_stream(input, output, &keys)
            .map_err(Error::Crypto)?;
        if read == 0 {
            return Err(Error::EmptyArgument("input".into()));
        }
        tracing::debug!("Encrypted a {} byte stream for {} keys", read, keys.len());
        Ok(read)
    }

    /// Decrypt a stream from [`encrypt_stream`](Self::encrypt_stream) with the local key
    pub fn decrypt_stream<R: Read, W: Write>(&self, input: &mut R, output: &mut W) -> Result<u64> {
        let keypair = self.key_storage.retrieve_keypair()?;
        let written = self
            .crypto
            .decrypt_stream(input, output, &keypair)
            .map_err(map_decrypt_error)?;
        if written == 0 {
            return Err(Error::EmptyArgument("input".into()));
        }
        Ok(written)
    }

    fn decrypt_verified(&self, data: &[u8], verifiers: Option<&[PublicKey]>) -> Result<Vec<u8>> {
        ensure_data(data)?;
        let keypair = self.key_storage.retrieve_keypair()?;
        let own = [keypair.public_keys()];
        let verifiers = verifiers.unwrap_or(&own);

        self.crypto
            .decrypt_then_verify(data, &keypair, verifiers)
            .map_err(map_decrypt_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{DefaultCrypto, KeyPair};
    use crate::error::CryptoError;
    use crate::worker::test_support::{chain, key_storage_with};
    use crate::worker::AuthEncryptWorker;

    fn worker(identity: &str, keypair: &KeyPair) -> LegacyPeerWorker {
        LegacyPeerWorker::new(key_storage_with(identity, keypair), Arc::new(DefaultCrypto))
    }

    #[test]
    fn test_legacy_round_trip() {
        let alice_kp = KeyPair::generate();
        let bob_kp = KeyPair::generate();
        let alice = worker("alice", &alice_kp);
        let bob = worker("bob", &bob_kp);
        let alice_card = chain("alice", &[&alice_kp], &[100]);

        let ct = alice.encrypt(b"old style", Some(&[bob_kp.public_keys()])).unwrap();
        assert_eq!(bob.decrypt(&ct, Some(&alice_card)).unwrap(), b"old style");
        assert_eq!(alice.decrypt(&ct, None).unwrap(), b"old style");
    }

    #[test]
    fn test_without_sender_only_own_key_verifies() {
        let alice_kp = KeyPair::generate();
        let bob_kp = KeyPair::generate();
        let alice = worker("alice", &alice_kp);
        let bob = worker("bob", &bob_kp);

        let ct = alice.encrypt(b"msg", Some(&[bob_kp.public_keys()])).unwrap();
        assert!(matches!(bob.decrypt(&ct, None), Err(Error::SignatureVerification)));
    }

    #[test]
    fn test_decrypt_with_keys() {
        let alice_kp = KeyPair::generate();
        let bob_kp = KeyPair::generate();
        let carol_kp = KeyPair::generate();
        let alice = worker("alice", &alice_kp);
        let bob = worker("bob", &bob_kp);

        let ct = alice.encrypt(b"msg", Some(&[bob_kp.public_keys()])).unwrap();
        let keys = [carol_kp.public_keys(), alice_kp.public_keys()];
        assert_eq!(bob.decrypt_with_keys(&ct, &keys).unwrap(), b"msg");

        assert!(matches!(
            bob.decrypt_with_keys(&ct, &[carol_kp.public_keys()]),
            Err(Error::SignatureVerification)
        ));
        assert!(matches!(bob.decrypt_with_keys(&ct, &[]), Err(Error::EmptyArgument(_))));
    }

    #[test]
    fn test_historical_fallback() {
        let k1 = KeyPair::generate();
        let k2 = KeyPair::generate();
        let bob_kp = KeyPair::generate();
        let bob = worker("bob", &bob_kp);

        let ct = worker("alice", &k1)
            .encrypt_text("from the past", Some(&[bob_kp.public_keys()]))
            .unwrap();
        let card2 = chain("alice", &[&k1, &k2], &[100, 200]);

        assert_eq!(bob.decrypt_text_at(&ct, &card2, 150).unwrap(), "from the past");
        assert!(matches!(
            bob.decrypt_text(&ct, Some(&card2)),
            Err(Error::SignatureVerification)
        ));
    }

    #[test]
    fn test_modes_do_not_mix() {
        let alice_kp = KeyPair::generate();
        let auth = AuthEncryptWorker::new(key_storage_with("alice", &alice_kp), Arc::new(DefaultCrypto));
        let legacy = worker("alice", &alice_kp);

        let ct = auth.encrypt(b"msg", None).unwrap();
        assert!(matches!(legacy.decrypt(&ct, None), Err(Error::Crypto(_))));
    }

    #[test]
    fn test_stream_round_trip() {
        let alice_kp = KeyPair::generate();
        let bob_kp = KeyPair::generate();
        let alice = worker("alice", &alice_kp);
        let bob = worker("bob", &bob_kp);
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 256) as u8).collect();

        let mut sealed = Vec::new();
        let read = alice
            .encrypt_stream(&mut data.as_slice(), &mut sealed, Some(&[bob_kp.public_keys()]))
            .unwrap();
        assert_eq!(read, data.len() as u64);

        let mut opened = Vec::new();
        bob.decrypt_stream(&mut sealed.as_slice(), &mut opened).unwrap();
        assert_eq!(opened, data);

        // The sender is always a recipient
        let mut own = Vec::new();
        alice.decrypt_stream(&mut sealed.as_slice(), &mut own).unwrap();
        assert_eq!(own, data);

        let carol = worker("carol", &KeyPair::generate());
        assert!(matches!(
            carol.decrypt_stream(&mut sealed.as_slice(), &mut Vec::new()),
            Err(Error::Crypto(CryptoError::RecipientNotFound))
        ));
    }

    #[test]
    fn test_stream_argument_errors() {
        let kp = KeyPair::generate();
        let alice = worker("alice", &kp);

        assert!(matches!(
            alice.encrypt_stream(&mut &b""[..], &mut Vec::new(), None),
            Err(Error::EmptyArgument(_))
        ));
        assert!(matches!(
            alice.encrypt_stream(&mut &b"data"[..], &mut Vec::new(), Some(&[])),
            Err(Error::EmptyRecipients)
        ));
        assert!(matches!(
            alice.decrypt_stream(&mut &b""[..], &mut Vec::new()),
            Err(Error::EmptyArgument(_))
        ));
    }
}
