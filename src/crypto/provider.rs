//! Injectable crypto capability.
//!
//! Every component receives an `Arc<dyn CryptoPrimitives>` at construction
//! instead of reaching for a process-wide instance, so tests and embedders
//! can substitute their own primitives.

use std::io::{Read, Write};

use sha2::{Digest, Sha512};
use zeroize::Zeroizing;

use crate::crypto::{envelope, stream};
use crate::crypto::keys::{KeyPair, PublicKey};
use crate::crypto::signing::{self, Signature};
use crate::error::CryptoResult;

/// Primitive operations the orchestration layer is built on
pub trait CryptoPrimitives: Send + Sync {
    /// Generate a fresh random keypair
    fn generate_keypair(&self) -> KeyPair;

    /// Deterministically build a keypair from a 32-byte seed
    fn keypair_from_seed(&self, seed: &[u8; 32]) -> CryptoResult<KeyPair>;

    /// Serialize the private half of a keypair
    fn export_private_key(&self, keypair: &KeyPair) -> Zeroizing<Vec<u8>>;

    /// Rebuild a keypair from [`export_private_key`](Self::export_private_key) output
    fn import_private_key(&self, bytes: &[u8]) -> CryptoResult<KeyPair>;

    /// Sign `data` with the keypair's signing key
    fn sign(&self, keypair: &KeyPair, data: &[u8]) -> Signature;

    /// Verify `signature` over `data`
    fn verify(&self, public_key: &PublicKey, data: &[u8], signature: &Signature) -> CryptoResult<()>;

    /// SHA-512 digest
    fn hash(&self, data: &[u8]) -> [u8; 64];

    /// Authenticated multi-recipient encryption
    fn auth_encrypt(&self, data: &[u8], signer: &KeyPair, recipients: &[PublicKey]) -> CryptoResult<Vec<u8>>;

    /// Reverse of [`auth_encrypt`](Self::auth_encrypt), verifying against `signer`
    fn auth_decrypt(&self, data: &[u8], recipient: &KeyPair, signer: &PublicKey) -> CryptoResult<Vec<u8>>;

    /// Legacy sign-then-encrypt
    fn sign_then_encrypt(&self, data: &[u8], signer: &KeyPair, recipients: &[PublicKey]) -> CryptoResult<Vec<u8>>;

    /// Legacy decrypt-then-verify against any of `verifiers`
    fn decrypt_then_verify(&self, data: &[u8], recipient: &KeyPair, verifiers: &[PublicKey]) -> CryptoResult<Vec<u8>>;

    /// Unsigned chunked encryption of a stream, returning the plaintext length
    fn encrypt_stream(&self, input: &mut dyn Read, output: &mut dyn Write, recipients: &[PublicKey]) -> CryptoResult<u64>;

    /// Reverse of [`encrypt_stream`](Self::encrypt_stream)
    fn decrypt_stream(&self, input: &mut dyn Read, output: &mut dyn Write, recipient: &KeyPair) -> CryptoResult<u64>;
}

/// Ed25519 / X25519 / AES-256-GCM implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCrypto;

impl CryptoPrimitives for DefaultCrypto {
    fn generate_keypair(&self) -> KeyPair {
        KeyPair::generate()
    }

    fn keypair_from_seed(&self, seed: &[u8; 32]) -> CryptoResult<KeyPair> {
        KeyPair::from_seed(seed)
    }

    fn export_private_key(&self, keypair: &KeyPair) -> Zeroizing<Vec<u8>> {
        keypair.to_private_bytes()
    }

    fn import_private_key(&self, bytes: &[u8]) -> CryptoResult<KeyPair> {
        KeyPair::from_private_bytes(bytes)
    }

    fn sign(&self, keypair: &KeyPair, data: &[u8]) -> Signature {
        signing::sign(&keypair.signing, data)
    }

    fn verify(&self, public_key: &PublicKey, data: &[u8], signature: &Signature) -> CryptoResult<()> {
        signing::verify(public_key, data, signature)
    }

    fn hash(&self, data: &[u8]) -> [u8; 64] {
        Sha512::digest(data).into()
    }

    fn auth_encrypt(&self, data: &[u8], signer: &KeyPair, recipients: &[PublicKey]) -> CryptoResult<Vec<u8>> {
        envelope::auth_encrypt(data, signer, recipients)
    }

    fn auth_decrypt(&self, data: &[u8], recipient: &KeyPair, signer: &PublicKey) -> CryptoResult<Vec<u8>> {
        envelope::auth_decrypt(data, recipient, signer)
    }

    fn sign_then_encrypt(&self, data: &[u8], signer: &KeyPair, recipients: &[PublicKey]) -> CryptoResult<Vec<u8>> {
        envelope::sign_then_encrypt(data, signer, recipients)
    }

    fn decrypt_then_verify(&self, data: &[u8], recipient: &KeyPair, verifiers: &[PublicKey]) -> CryptoResult<Vec<u8>> {
        envelope::decrypt_then_verify(data, recipient, verifiers)
    }

    fn encrypt_stream(&self, input: &mut dyn Read, output: &mut dyn Write, recipients: &[PublicKey]) -> CryptoResult<u64> {
        stream::encrypt_stream(input, output, recipients)
    }

    fn decrypt_stream(&self, input: &mut dyn Read, output: &mut dyn Write, recipient: &KeyPair) -> CryptoResult<u64> {
        stream::decrypt_stream(input, output, recipient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_usable_as_trait_object() {
        let crypto: Arc<dyn CryptoPrimitives> = Arc::new(DefaultCrypto);
        let kp = crypto.generate_keypair();

        let sig = crypto.sign(&kp, b"data");
        assert!(crypto.verify(&kp.public_keys(), b"data", &sig).is_ok());

        let exported = crypto.export_private_key(&kp);
        let imported = crypto.import_private_key(&exported).unwrap();
        assert_eq!(imported.public_keys(), kp.public_keys());
    }

    #[test]
    fn test_hash_is_sha512() {
        let digest = DefaultCrypto.hash(b"abc");
        assert_eq!(
            hex::encode(&digest[..8]),
            "ddaf35a193617aba"
        );
    }
}
