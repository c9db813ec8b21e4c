//! # Card Cache
//!
//! Local cache of cards that owns every rotation-chain rule. The backing
//! store only has to implement the small [`CardPersistence`] trait.
//!
//! ## Rotation
//!
//! ```text
//! store_card(Card₂ { previous_card_id: Card₁ })
//!
//!   1. Card₁ cached and current?  ──► flip Card₁.is_outdated = true
//!   2. Some cached card names Card₂ as predecessor? ──► store Card₂ outdated
//!   3. insert_or_replace(Card₂)
//! ```
//!
//! The predecessor is flipped before the successor lands, so a concurrent
//! reader never sees two current cards for one identity.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cards::card::{Card, RawCard};
use crate::config::DuplicateCardPolicy;
use crate::crypto::CryptoPrimitives;
use crate::error::{Error, Result};

/// Row shape handed to the persistence layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardRecord {
    /// Card identifier (primary key)
    pub identifier: String,
    /// Owning identity
    pub identity: String,
    /// Superseded flag
    pub is_outdated: bool,
    /// Predecessor link, duplicated from the snapshot for chain checks
    pub previous_card_id: Option<String>,
    /// Creation time, duplicated from the snapshot for chain checks
    pub created_at: i64,
    /// Serialized [`RawCard`]
    pub raw_json: String,
}

impl CardRecord {
    /// Record for `card`, keeping its current outdated flag
    pub fn from_card(card: &Card) -> Result<Self> {
        Ok(Self {
            identifier: card.identifier.clone(),
            identity: card.identity.clone(),
            is_outdated: card.is_outdated,
            previous_card_id: card.previous_card_id.clone(),
            created_at: card.created_at,
            raw_json: card.raw.to_json()?,
        })
    }
}

/// Storage primitives the cache is expressed in
///
/// Implementations only store and fetch rows; they hold no chain logic.
pub trait CardPersistence: Send + Sync {
    /// Insert a record, replacing any record with the same identifier
    fn insert_or_replace(&self, record: &CardRecord) -> Result<()>;

    /// Record with the given identifier
    fn query_by_identifier(&self, identifier: &str) -> Result<Option<CardRecord>>;

    /// Every record of an identity, current and outdated
    fn query_by_identity(&self, identity: &str) -> Result<Vec<CardRecord>>;

    /// Identifiers of all records not marked outdated
    fn query_newest(&self) -> Result<Vec<String>>;

    /// Remove every record
    fn delete_all(&self) -> Result<()>;
}

/// Card cache with rotation-chain invariants
pub struct CardStorage {
    persistence: Arc<dyn CardPersistence>,
    crypto: Arc<dyn CryptoPrimitives>,
    policy: DuplicateCardPolicy,
    /// Serializes read-modify-write sequences of `store_card`
    write_lock: Mutex<()>,
}

impl CardStorage {
    /// Create a cache over `persistence`
    pub fn new(
        persistence: Arc<dyn CardPersistence>,
        crypto: Arc<dyn CryptoPrimitives>,
        policy: DuplicateCardPolicy,
    ) -> Self {
        Self {
            persistence,
            crypto,
            policy,
            write_lock: Mutex::new(()),
        }
    }

    /// Policy applied when several current cards exist for an identity
    pub fn policy(&self) -> DuplicateCardPolicy {
        self.policy
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Cached card with its predecessor chain fully resolved
    pub fn get_card(&self, identifier: &str) -> Result<Option<Card>> {
        match self.persistence.query_by_identifier(identifier)? {
            Some(record) => {
                let card = self.load(&record)?;
                Ok(Some(self.resolve_chain(card)?))
            }
            None => Ok(None),
        }
    }

    /// Current card of each identity, with resolved chains
    ///
    /// Identities with no cached card are omitted. Several current cards for
    /// one identity are handled according to the configured policy.
    pub fn search_cards<S: AsRef<str>>(&self, identities: &[S]) -> Result<Vec<Card>> {
        let mut seen = HashSet::new();
        let mut cards = Vec::new();

        for identity in identities {
            let identity = identity.as_ref();
            if !seen.insert(identity) {
                continue;
            }

            let mut current: Vec<CardRecord> = self
                .persistence
                .query_by_identity(identity)?
                .into_iter()
                .filter(|record| !record.is_outdated)
                .collect();

            let record = match current.len() {
                0 => continue,
                1 => current.remove(0),
                count => self.pick_current(identity, current, count)?,
            };

            let card = self.load(&record)?;
            cards.push(self.resolve_chain(card)?);
        }

        Ok(cards)
    }

    /// Identifiers of every current card, one per identity chain head
    pub fn get_newest_card_ids(&self) -> Result<Vec<String>> {
        let mut ids = self.persistence.query_newest()?;
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Insert or update a card, applying rotation
    pub fn store_card(&self, card: &Card) -> Result<()> {
        let _guard = self.write_lock.lock();

        let mut record = CardRecord::from_card(card)?;

        // Outdated is never reverted
        if let Some(existing) = self.persistence.query_by_identifier(&card.identifier)? {
            record.is_outdated |= existing.is_outdated;
        }

        let mut flipped = None;
        if let Some(previous_id) = &card.previous_card_id {
            if let Some(mut previous) = self.persistence.query_by_identifier(previous_id)? {
                if previous.identity != card.identity {
                    return Err(Error::InvalidCardChain(format!(
                        "Card {} names a predecessor owned by another identity",
                        card.identifier
                    )));
                }
                if previous.created_at >= card.created_at {
                    return Err(Error::InvalidCardChain(format!(
                        "Card {} is not newer than its predecessor {}",
                        card.identifier, previous.identifier
                    )));
                }
                if !previous.is_outdated {
                    let original = previous.clone();
                    previous.is_outdated = true;
                    self.persistence.insert_or_replace(&previous)?;
                    flipped = Some(original);
                }
            }
        }

        let siblings = self.persistence.query_by_identity(&card.identity)?;

        let superseded = siblings.iter().any(|sibling| {
            sibling.identifier != card.identifier
                && sibling.previous_card_id.as_deref() == Some(card.identifier.as_str())
        });
        if superseded && !record.is_outdated {
            tracing::debug!("Card {} already has a cached successor", card.identifier);
            record.is_outdated = true;
        }

        if !record.is_outdated {
            let unexplained = siblings.iter().filter(|sibling| {
                !sibling.is_outdated
                    && sibling.identifier != card.identifier
                    && Some(sibling.identifier.as_str()) != card.previous_card_id.as_deref()
            });
            for sibling in unexplained {
                tracing::warn!(
                    "Identity {} now has unrelated current cards {} and {}",
                    card.identity,
                    sibling.identifier,
                    card.identifier
                );
            }
        }

        if let Err(e) = self.persistence.insert_or_replace(&record) {
            // Put the predecessor back so the identity keeps a current card
            if let Some(original) = flipped {
                if let Err(undo) = self.persistence.insert_or_replace(&original) {
                    tracing::warn!("Could not restore card {}: {}", original.identifier, undo);
                }
            }
            return Err(e);
        }
        if let Some(previous) = flipped {
            tracing::info!("Card {} rotated to {}", previous.identifier, card.identifier);
        }
        tracing::debug!("Stored card {} for {}", card.identifier, card.identity);
        Ok(())
    }

    /// Store a card and its resolved predecessors, oldest first
    pub fn store_chain(&self, card: &Card) -> Result<()> {
        let chain: Vec<&Card> = card.chain().collect();
        for link in chain.into_iter().rev() {
            self.store_card(link)?;
        }
        Ok(())
    }

    /// Remove every cached card
    pub fn reset(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.persistence.delete_all()?;
        tracing::info!("Card cache reset");
        Ok(())
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn load(&self, record: &CardRecord) -> Result<Card> {
        let raw = RawCard::from_json(&record.raw_json).map_err(|e| {
            Error::StorageCorrupted(format!("Cached card {}: {}", record.identifier, e))
        })?;
        let mut card = Card::parse(raw, self.crypto.as_ref()).map_err(|e| {
            Error::StorageCorrupted(format!("Cached card {}: {}", record.identifier, e))
        })?;

        if card.identifier != record.identifier {
            return Err(Error::StorageCorrupted(format!(
                "Cached card {} hashes to {}",
                record.identifier, card.identifier
            )));
        }

        card.is_outdated = record.is_outdated;
        Ok(card)
    }

    /// Attach the full predecessor chain, stopping at the first missing or
    /// inconsistent link
    fn resolve_chain(&self, mut card: Card) -> Result<Card> {
        let mut visited = HashSet::from([card.identifier.clone()]);
        let mut ancestors: Vec<Card> = Vec::new();
        let mut next_id = card.previous_card_id.clone();
        let mut newer_created_at = card.created_at;

        while let Some(id) = next_id {
            if !visited.insert(id.clone()) {
                tracing::warn!("Cycle in card chain of {} at {}", card.identity, id);
                break;
            }
            let Some(record) = self.persistence.query_by_identifier(&id)? else {
                break;
            };
            let previous = self.load(&record)?;
            if previous.identity != card.identity || previous.created_at >= newer_created_at {
                tracing::warn!("Inconsistent predecessor {} in chain of {}", id, card.identity);
                break;
            }

            newer_created_at = previous.created_at;
            next_id = previous.previous_card_id.clone();
            ancestors.push(previous);
        }

        let mut link: Option<Arc<Card>> = None;
        for mut ancestor in ancestors.into_iter().rev() {
            ancestor.previous_card = link;
            link = Some(Arc::new(ancestor));
        }
        card.previous_card = link;

        Ok(card)
    }

    fn pick_current(
        &self,
        identity: &str,
        current: Vec<CardRecord>,
        count: usize,
    ) -> Result<CardRecord> {
        match self.policy {
            DuplicateCardPolicy::Reject => Err(Error::AmbiguousCards {
                identity: identity.to_string(),
                count,
            }),
            DuplicateCardPolicy::PreferNewest => {
                tracing::warn!("{} current cards cached for {}, using newest", count, identity);
                current
                    .into_iter()
                    .max_by_key(|record| record.created_at)
                    .ok_or_else(|| Error::CardNotFound(identity.to_string()))
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::MemoryCardPersistence;
    use crate::crypto::{DefaultCrypto, KeyPair};

    fn storage(policy: DuplicateCardPolicy) -> CardStorage {
        CardStorage::new(
            Arc::new(MemoryCardPersistence::new()),
            Arc::new(DefaultCrypto),
            policy,
        )
    }

    fn card(identity: &str, prev: Option<&Card>, created_at: i64) -> Card {
        let kp = KeyPair::generate();
        let raw = RawCard::generate(
            &DefaultCrypto,
            &kp,
            identity,
            prev.map(|c| c.identifier.clone()),
            created_at,
        )
        .unwrap();
        Card::parse(raw, &DefaultCrypto).unwrap()
    }

    #[test]
    fn test_rotation_flips_predecessor() {
        let storage = storage(DuplicateCardPolicy::Reject);
        let c1 = card("alice", None, 100);
        let c2 = card("alice", Some(&c1), 200);
        let c3 = card("alice", Some(&c2), 300);

        for c in [&c1, &c2, &c3] {
            storage.store_card(c).unwrap();
        }

        assert_eq!(storage.get_newest_card_ids().unwrap(), vec![c3.identifier.clone()]);
        assert!(storage.get_card(&c1.identifier).unwrap().unwrap().is_outdated);
        assert!(storage.get_card(&c2.identifier).unwrap().unwrap().is_outdated);
        assert!(!storage.get_card(&c3.identifier).unwrap().unwrap().is_outdated);
    }

    #[test]
    fn test_search_resolves_chain() {
        let storage = storage(DuplicateCardPolicy::Reject);
        let a = card("alice", None, 100);
        let b = card("alice", Some(&a), 200);
        storage.store_card(&a).unwrap();
        storage.store_card(&b).unwrap();

        let found = storage.search_cards(&["alice"]).unwrap();
        assert_eq!(found.len(), 1);
        let head = &found[0];
        assert_eq!(head.identifier, b.identifier);

        let previous = head.previous_card.as_ref().unwrap();
        assert_eq!(previous.identifier, a.identifier);
        assert_eq!(previous.public_key, a.public_key);
        assert_eq!(previous.created_at, a.created_at);
        assert!(previous.is_outdated);
        assert!(previous.previous_card.is_none());
    }

    #[test]
    fn test_get_card_resolves_transitively() {
        let storage = storage(DuplicateCardPolicy::Reject);
        let c1 = card("bob", None, 1);
        let c2 = card("bob", Some(&c1), 2);
        let c3 = card("bob", Some(&c2), 3);
        for c in [&c1, &c2, &c3] {
            storage.store_card(c).unwrap();
        }

        let head = storage.get_card(&c3.identifier).unwrap().unwrap();
        let chain: Vec<_> = head.chain().map(|c| c.identifier.clone()).collect();
        assert_eq!(chain, vec![c3.identifier, c2.identifier, c1.identifier]);
    }

    #[test]
    fn test_out_of_order_store_keeps_single_head() {
        let storage = storage(DuplicateCardPolicy::Reject);
        let c1 = card("carol", None, 10);
        let c2 = card("carol", Some(&c1), 20);

        storage.store_card(&c2).unwrap();
        storage.store_card(&c1).unwrap();

        assert_eq!(storage.get_newest_card_ids().unwrap(), vec![c2.identifier.clone()]);
        assert!(storage.get_card(&c1.identifier).unwrap().unwrap().is_outdated);
    }

    #[test]
    fn test_outdated_flag_never_reverts() {
        let storage = storage(DuplicateCardPolicy::Reject);
        let c1 = card("dave", None, 10);
        let c2 = card("dave", Some(&c1), 20);
        storage.store_card(&c1).unwrap();
        storage.store_card(&c2).unwrap();

        // A stale copy that still claims to be current
        storage.store_card(&c1).unwrap();
        assert!(storage.get_card(&c1.identifier).unwrap().unwrap().is_outdated);
    }

    #[test]
    fn test_predecessor_of_other_identity_rejected() {
        let storage = storage(DuplicateCardPolicy::Reject);
        let a = card("alice", None, 10);
        storage.store_card(&a).unwrap();

        let forged = card("mallory", Some(&a), 20);
        assert!(matches!(
            storage.store_card(&forged),
            Err(Error::InvalidCardChain(_))
        ));
        assert!(!storage.get_card(&a.identifier).unwrap().unwrap().is_outdated);
    }

    #[test]
    fn test_predecessor_must_be_older() {
        let storage = storage(DuplicateCardPolicy::Reject);
        let a = card("alice", None, 50);
        storage.store_card(&a).unwrap();

        let b = card("alice", Some(&a), 50);
        assert!(matches!(storage.store_card(&b), Err(Error::InvalidCardChain(_))));
    }

    #[test]
    fn test_uncached_predecessor_accepted() {
        let storage = storage(DuplicateCardPolicy::Reject);
        let a = card("alice", None, 10);
        let b = card("alice", Some(&a), 20);
        storage.store_card(&b).unwrap();

        let head = storage.get_card(&b.identifier).unwrap().unwrap();
        assert!(head.previous_card.is_none());
        assert_eq!(head.previous_card_id, Some(a.identifier));
    }

    #[test]
    fn test_unrelated_current_cards_follow_policy() {
        let reject = storage(DuplicateCardPolicy::Reject);
        let newest = storage(DuplicateCardPolicy::PreferNewest);
        let x = card("erin", None, 10);
        let y = card("erin", None, 20);

        for s in [&reject, &newest] {
            s.store_card(&x).unwrap();
            s.store_card(&y).unwrap();
            assert_eq!(s.get_newest_card_ids().unwrap().len(), 2);
        }

        assert!(matches!(
            reject.search_cards(&["erin"]),
            Err(Error::AmbiguousCards { count: 2, .. })
        ));
        let picked = newest.search_cards(&["erin"]).unwrap();
        assert_eq!(picked[0].identifier, y.identifier);
    }

    #[test]
    fn test_search_omits_unknown_identities() {
        let storage = storage(DuplicateCardPolicy::Reject);
        storage.store_card(&card("alice", None, 1)).unwrap();

        let found = storage.search_cards(&["alice", "nobody", "alice"]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].identity, "alice");
    }

    #[test]
    fn test_store_chain_oldest_first() {
        let source = storage(DuplicateCardPolicy::Reject);
        let c1 = card("frank", None, 1);
        let c2 = card("frank", Some(&c1), 2);
        source.store_card(&c1).unwrap();
        source.store_card(&c2).unwrap();
        let head = source.get_card(&c2.identifier).unwrap().unwrap();

        let target = storage(DuplicateCardPolicy::Reject);
        target.store_chain(&head).unwrap();
        assert_eq!(target.get_newest_card_ids().unwrap(), vec![c2.identifier]);
        assert!(target.get_card(&c1.identifier).unwrap().unwrap().is_outdated);
    }

    #[test]
    fn test_reset_clears_everything() {
        let storage = storage(DuplicateCardPolicy::Reject);
        let a = card("alice", None, 1);
        let b = card("bob", None, 1);
        storage.store_card(&a).unwrap();
        storage.store_card(&b).unwrap();

        storage.reset().unwrap();
        storage.reset().unwrap();

        assert!(storage.get_card(&a.identifier).unwrap().is_none());
        assert!(storage.search_cards(&["alice", "bob"]).unwrap().is_empty());
        assert!(storage.get_newest_card_ids().unwrap().is_empty());
    }

    /// Fails every insert of one chosen card
    #[derive(Default)]
    struct RejectingPersistence {
        inner: MemoryCardPersistence,
        reject: Mutex<Option<String>>,
    }

    impl CardPersistence for RejectingPersistence {
        fn insert_or_replace(&self, record: &CardRecord) -> Result<()> {
            if self.reject.lock().as_deref() == Some(record.identifier.as_str()) {
                return Err(Error::DatabaseError("disk full".into()));
            }
            self.inner.insert_or_replace(record)
        }

        fn query_by_identifier(&self, identifier: &str) -> Result<Option<CardRecord>> {
            self.inner.query_by_identifier(identifier)
        }

        fn query_by_identity(&self, identity: &str) -> Result<Vec<CardRecord>> {
            self.inner.query_by_identity(identity)
        }

        fn query_newest(&self) -> Result<Vec<String>> {
            self.inner.query_newest()
        }

        fn delete_all(&self) -> Result<()> {
            self.inner.delete_all()
        }
    }

    #[test]
    fn test_failed_insert_restores_predecessor() {
        let persistence = Arc::new(RejectingPersistence::default());
        let storage = CardStorage::new(
            persistence.clone(),
            Arc::new(DefaultCrypto),
            DuplicateCardPolicy::Reject,
        );
        let c1 = card("alice", None, 10);
        let c2 = card("alice", Some(&c1), 20);
        storage.store_card(&c1).unwrap();

        *persistence.reject.lock() = Some(c2.identifier.clone());
        assert!(matches!(storage.store_card(&c2), Err(Error::DatabaseError(_))));

        assert_eq!(storage.get_newest_card_ids().unwrap(), vec![c1.identifier.clone()]);
        assert!(!storage.get_card(&c1.identifier).unwrap().unwrap().is_outdated);
    }
}
