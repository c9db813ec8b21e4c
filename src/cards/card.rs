//! # Cards
//!
//! A card binds an identity to a public key at a point in time, optionally
//! pointing back at the card it rotated from.
//!
//! ## Structure
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              CARD                                       │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  RawCard (what the directory stores)                                   │
//! │  ├── content_snapshot   JSON of CardContent                            │
//! │  └── signature          Ed25519 self-signature over the snapshot       │
//! │                                                                         │
//! │  Card (parsed, verified)                                               │
//! │  ├── identifier         hex(SHA-512(snapshot)[..32])                   │
//! │  ├── identity, public_key, created_at, previous_card_id               │
//! │  ├── is_outdated        set by the cache / directory                   │
//! │  └── previous_card      resolved chain, newest → oldest                │
//! │                                                                         │
//! │  Card₃ ──previous──► Card₂ ──previous──► Card₁ ──► None               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{CryptoPrimitives, KeyPair, PublicKey, Signature};
use crate::error::{Error, Result};

/// Version tag written into every card snapshot
pub const CARD_VERSION: &str = "5.0";

/// Number of digest bytes that form the card identifier
const IDENTIFIER_BYTES: usize = 32;

/// Signed content of a card
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardContent {
    /// Snapshot format version
    pub version: String,
    /// Owning identity
    pub identity: String,
    /// Public key bound to the identity
    pub public_key: PublicKey,
    /// Unix timestamp (seconds)
    pub created_at: i64,
    /// Identifier of the card this one replaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_card_id: Option<String>,
}

/// Card as published to and fetched from the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCard {
    /// Exact bytes that were signed
    #[serde(with = "base64_bytes")]
    pub content_snapshot: Vec<u8>,
    /// Owner's self-signature over `content_snapshot`
    pub signature: Signature,
}

impl RawCard {
    /// Build and self-sign a new card for `keypair`
    ///
    /// Passing the current card's identifier as `previous_card_id` produces
    /// a rotated card.
    pub fn generate(
        crypto: &dyn CryptoPrimitives,
        keypair: &KeyPair,
        identity: &str,
        previous_card_id: Option<String>,
        created_at: i64,
    ) -> Result<Self> {
        if identity.trim().is_empty() {
            return Err(Error::EmptyArgument("identity".into()));
        }

        let content = CardContent {
            version: CARD_VERSION.to_string(),
            identity: identity.to_string(),
            public_key: keypair.public_keys(),
            created_at,
            previous_card_id,
        };
        let content_snapshot = serde_json::to_vec(&content)?;
        let signature = crypto.sign(keypair, &content_snapshot);

        Ok(Self {
            content_snapshot,
            signature,
        })
    }

    /// Serialize for storage
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from storage
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::DeserializationError(format!("Invalid raw card: {}", e)))
    }
}

/// A verified card, optionally carrying its resolved predecessor chain
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    /// Content-derived unique identifier
    pub identifier: String,
    /// Owning identity (shared by every card in the chain)
    pub identity: String,
    /// Public key of this card
    pub public_key: PublicKey,
    /// Unix timestamp (seconds)
    pub created_at: i64,
    /// Whether a newer card for the identity has superseded this one
    pub is_outdated: bool,
    /// Identifier of the card this one rotated from
    pub previous_card_id: Option<String>,
    /// Resolved predecessor; rebuilt on read, never persisted
    pub previous_card: Option<Arc<Card>>,
    /// Signed form this card was parsed from
    pub raw: RawCard,
}

impl Card {
    /// Parse and verify a raw card
    ///
    /// The identifier is recomputed from the snapshot and the self-signature
    /// is checked against the embedded public key.
    pub fn parse(raw: RawCard, crypto: &dyn CryptoPrimitives) -> Result<Self> {
        let content: CardContent = serde_json::from_slice(&raw.content_snapshot)
            .map_err(|e| Error::CardVerification(format!("Malformed card content: {}", e)))?;

        crypto
            .verify(&content.public_key, &raw.content_snapshot, &raw.signature)
            .map_err(|_| {
                Error::CardVerification(format!("Bad self-signature on card for {}", content.identity))
            })?;

        let digest = crypto.hash(&raw.content_snapshot);
        let identifier = hex::encode(&digest[..IDENTIFIER_BYTES]);

        Ok(Self {
            identifier,
            identity: content.identity,
            public_key: content.public_key,
            created_at: content.created_at,
            is_outdated: false,
            previous_card_id: content.previous_card_id,
            previous_card: None,
            raw,
        })
    }

    /// Creation time as a date, if representable
    pub fn created_at_datetime(&self) -> Option<DateTime<Utc>> {
        crate::time::to_datetime(self.created_at)
    }

    /// This card followed by its resolved predecessors, newest first
    pub fn chain(&self) -> CardChain<'_> {
        CardChain { next: Some(self) }
    }

    /// Card whose key was current at `as_of`
    ///
    /// Walks back while the card is newer than `as_of`, stopping at the
    /// first card created at or before it, or at the end of the resolved
    /// chain.
    pub fn card_at(&self, as_of: i64) -> &Card {
        let mut card = self;
        while let Some(previous) = card.previous_card.as_deref() {
            if card.created_at <= as_of {
                break;
            }
            card = previous;
        }
        card
    }

    /// Drop the resolved chain, keeping only the link id
    pub fn detached(&self) -> Card {
        Card {
            previous_card: None,
            ..self.clone()
        }
    }
}

/// Iterator over a card chain, newest first
pub struct CardChain<'a> {
    next: Option<&'a Card>,
}

impl<'a> Iterator for CardChain<'a> {
    type Item = &'a Card;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.previous_card.as_deref();
        Some(current)
    }
}

/// Serde helper for byte vectors as standard base64
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::DefaultCrypto;

    fn card(keypair: &KeyPair, identity: &str, prev: Option<&Card>, created_at: i64) -> Card {
        let raw = RawCard::generate(
            &DefaultCrypto,
            keypair,
            identity,
            prev.map(|c| c.identifier.clone()),
            created_at,
        )
        .unwrap();
        let mut card = Card::parse(raw, &DefaultCrypto).unwrap();
        card.previous_card = prev.map(|c| Arc::new(c.clone()));
        card
    }

    #[test]
    fn test_generate_and_parse() {
        let kp = KeyPair::generate();
        let card = card(&kp, "alice", None, 1_700_000_000);

        assert_eq!(card.identity, "alice");
        assert_eq!(card.public_key, kp.public_keys());
        assert_eq!(card.identifier.len(), 64);
        assert!(!card.is_outdated);
        assert!(card.previous_card_id.is_none());
    }

    #[test]
    fn test_identifier_is_content_derived() {
        let kp = KeyPair::generate();
        let a = card(&kp, "alice", None, 100);
        let b = card(&kp, "alice", None, 100);
        let c = card(&kp, "alice", None, 101);

        assert_eq!(a.identifier, b.identifier);
        assert_ne!(a.identifier, c.identifier);
    }

    #[test]
    fn test_tampered_snapshot_rejected() {
        let kp = KeyPair::generate();
        let mut raw = RawCard::generate(&DefaultCrypto, &kp, "alice", None, 100).unwrap();
        let forged = serde_json::to_vec(&CardContent {
            version: CARD_VERSION.into(),
            identity: "mallory".into(),
            public_key: kp.public_keys(),
            created_at: 100,
            previous_card_id: None,
        })
        .unwrap();
        raw.content_snapshot = forged;

        assert!(matches!(
            Card::parse(raw, &DefaultCrypto),
            Err(Error::CardVerification(_))
        ));
    }

    #[test]
    fn test_raw_card_json_round_trip() {
        let kp = KeyPair::generate();
        let raw = RawCard::generate(&DefaultCrypto, &kp, "alice", None, 100).unwrap();
        assert_eq!(RawCard::from_json(&raw.to_json().unwrap()).unwrap(), raw);
    }

    #[test]
    fn test_chain_and_card_at() {
        let card1 = card(&KeyPair::generate(), "bob", None, 100);
        let card2 = card(&KeyPair::generate(), "bob", Some(&card1), 200);
        let card3 = card(&KeyPair::generate(), "bob", Some(&card2), 300);

        let ids: Vec<_> = card3.chain().map(|c| c.created_at).collect();
        assert_eq!(ids, vec![300, 200, 100]);

        assert_eq!(card3.card_at(350).created_at, 300);
        assert_eq!(card3.card_at(300).created_at, 300);
        assert_eq!(card3.card_at(250).created_at, 200);
        assert_eq!(card3.card_at(150).created_at, 100);
        // Older than the whole chain: the oldest card is used
        assert_eq!(card3.card_at(50).created_at, 100);
    }

    #[test]
    fn test_blank_identity_rejected() {
        let kp = KeyPair::generate();
        assert!(matches!(
            RawCard::generate(&DefaultCrypto, &kp, " ", None, 1),
            Err(Error::EmptyArgument(_))
        ));
    }
}
