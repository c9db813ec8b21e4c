//! # Digital Signatures
//!
//! Ed25519 signatures for card self-signatures and message authentication.
//!
//! Verification failures are always reported as
//! [`CryptoError::SignatureNotValid`], whatever the underlying cause, so the
//! worker layer can translate them into a single domain error.

use ed25519_dalek::{Signature as Ed25519Signature, Signer, Verifier};
use serde::{Deserialize, Serialize};

use crate::crypto::{PublicKey, SigningKeyPair};
use crate::error::{CryptoError, CryptoResult};

/// Size of an Ed25519 signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// An Ed25519 digital signature
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "signature_bytes")] pub [u8; SIGNATURE_SIZE]);

impl Signature {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice (must be exactly 64 bytes)
    pub fn from_slice(slice: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; SIGNATURE_SIZE] = slice.try_into().map_err(|_| {
            CryptoError::InvalidFormat(format!(
                "Signature must be {} bytes, got {}",
                SIGNATURE_SIZE,
                slice.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    /// Encode as hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Sign a message using Ed25519
///
/// Ed25519 signatures are deterministic: signing the same message
/// with the same key always produces the same signature.
pub fn sign(keypair: &SigningKeyPair, message: &[u8]) -> Signature {
    Signature(keypair.signing_key().sign(message).to_bytes())
}

/// Verify an Ed25519 signature against the signing half of `public_key`
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> CryptoResult<()> {
    let verifying_key = public_key.verifying_key()?;
    let sig = Ed25519Signature::from_bytes(&signature.0);

    verifying_key
        .verify(message, &sig)
        .map_err(|_| CryptoError::SignatureNotValid)
}

/// Serde helper for signature bytes
mod signature_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 64], serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<[u8; 64], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("Invalid signature length"))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    #[test]
    fn test_sign_verify() {
        let kp = KeyPair::generate();
        let message = b"card snapshot";

        let signature = sign(&kp.signing, message);
        assert!(verify(&kp.public_keys(), message, &signature).is_ok());
    }

    #[test]
    fn test_wrong_message_fails() {
        let kp = KeyPair::generate();
        let signature = sign(&kp.signing, b"original");

        let err = verify(&kp.public_keys(), b"tampered", &signature).unwrap_err();
        assert_eq!(err, CryptoError::SignatureNotValid);
    }

    #[test]
    fn test_wrong_key_fails() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::generate();
        let signature = sign(&kp1.signing, b"message");

        assert_eq!(
            verify(&kp2.public_keys(), b"message", &signature),
            Err(CryptoError::SignatureNotValid)
        );
    }

    #[test]
    fn test_signature_from_slice() {
        let kp = KeyPair::generate();
        let signature = sign(&kp.signing, b"message");

        assert_eq!(Signature::from_slice(signature.as_bytes()).unwrap(), signature);
        assert!(Signature::from_slice(&[0u8; 10]).is_err());
    }
}
