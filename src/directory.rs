//! # Card Directory
//!
//! Boundary to the remote service that publishes and serves cards.
//!
//! ```text
//!   EThree ──publish(raw)──────────► directory ──► Card (current)
//!          ──search(identity)──────►           ──► [Card + chain]
//!          ──outdated([ids])───────►           ──► [ids superseded]
//!          ──revoke(id)────────────►
//! ```
//!
//! [`MemoryDirectory`] is a complete in-process implementation used by
//! tests and by embedders that run without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::cards::{Card, RawCard};
use crate::crypto::{CryptoPrimitives, DefaultCrypto};
use crate::error::{Error, Result};

/// Remote card directory
#[async_trait]
pub trait CardDirectory: Send + Sync {
    /// Publish a self-signed card, rotating its predecessor if it names one
    async fn publish(&self, raw: RawCard) -> Result<Card>;

    /// Current cards of `identity`, each with its resolved chain
    async fn search(&self, identity: &str) -> Result<Vec<Card>>;

    /// Which of `card_ids` have been superseded or revoked
    async fn outdated(&self, card_ids: &[String]) -> Result<Vec<String>>;

    /// Revoke a card so it is no longer served
    async fn revoke(&self, card_id: &str) -> Result<()>;
}

struct DirectoryEntry {
    card: Card,
    revoked: bool,
}

/// In-process directory
pub struct MemoryDirectory {
    crypto: Arc<dyn CryptoPrimitives>,
    entries: RwLock<HashMap<String, DirectoryEntry>>,
    unavailable: AtomicBool,
    search_calls: AtomicUsize,
}

impl MemoryDirectory {
    /// Create an empty directory verifying cards with [`DefaultCrypto`]
    pub fn new() -> Self {
        Self::with_crypto(Arc::new(DefaultCrypto))
    }

    /// Create an empty directory with explicit primitives
    pub fn with_crypto(crypto: Arc<dyn CryptoPrimitives>) -> Self {
        Self {
            crypto,
            entries: RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            search_calls: AtomicUsize::new(0),
        }
    }

    /// Simulate an outage: every call fails with [`Error::Directory`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `search` calls served so far
    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    /// Insert a card without the rotation checks of `publish`
    ///
    /// Lets tests reproduce inconsistent server state, such as two
    /// unrelated current cards for one identity.
    pub fn insert_unchecked(&self, raw: RawCard) -> Result<Card> {
        let card = Card::parse(raw, self.crypto.as_ref())?;
        self.entries.write().insert(
            card.identifier.clone(),
            DirectoryEntry {
                card: card.clone(),
                revoked: false,
            },
        );
        Ok(card)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Directory("Card directory unavailable".into()));
        }
        Ok(())
    }

    fn resolve(entries: &HashMap<String, DirectoryEntry>, head: &Card) -> Card {
        let mut ancestors = Vec::new();
        let mut next_id = head.previous_card_id.clone();
        while let Some(id) = next_id {
            match entries.get(&id) {
                Some(entry) if entry.card.identity == head.identity && ancestors.len() < entries.len() => {
                    next_id = entry.card.previous_card_id.clone();
                    ancestors.push(entry.card.clone());
                }
                _ => break,
            }
        }

        let mut link = None;
        for mut ancestor in ancestors.into_iter().rev() {
            ancestor.previous_card = link;
            link = Some(Arc::new(ancestor));
        }

        let mut card = head.clone();
        card.previous_card = link;
        card
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CardDirectory for MemoryDirectory {
    async fn publish(&self, raw: RawCard) -> Result<Card> {
        self.ensure_available()?;
        let card = Card::parse(raw, self.crypto.as_ref())?;

        let mut entries = self.entries.write();
        if entries.contains_key(&card.identifier) {
            return Err(Error::Directory(format!("Card {} already published", card.identifier)));
        }

        if let Some(previous_id) = &card.previous_card_id {
            let previous = entries
                .get_mut(previous_id)
                .ok_or_else(|| Error::Directory(format!("Predecessor {} not found", previous_id)))?;

            if previous.card.identity != card.identity {
                return Err(Error::Directory("Predecessor belongs to another identity".into()));
            }
            if previous.card.is_outdated {
                return Err(Error::Directory(format!("Predecessor {} is already outdated", previous_id)));
            }
            if previous.card.created_at >= card.created_at {
                return Err(Error::Directory("Card must be newer than its predecessor".into()));
            }
            previous.card.is_outdated = true;
        }

        entries.insert(
            card.identifier.clone(),
            DirectoryEntry {
                card: card.clone(),
                revoked: false,
            },
        );
        tracing::debug!("Directory published card {} for {}", card.identifier, card.identity);
        Ok(card)
    }

    async fn search(&self, identity: &str) -> Result<Vec<Card>> {
        self.ensure_available()?;
        self.search_calls.fetch_add(1, Ordering::SeqCst);

        let entries = self.entries.read();
        let mut current: Vec<Card> = entries
            .values()
            .filter(|entry| !entry.revoked && !entry.card.is_outdated && entry.card.identity == identity)
            .map(|entry| Self::resolve(&entries, &entry.card))
            .collect();
        current.sort_by_key(|card| card.created_at);
        Ok(current)
    }

    async fn outdated(&self, card_ids: &[String]) -> Result<Vec<String>> {
        self.ensure_available()?;

        let entries = self.entries.read();
        Ok(card_ids
            .iter()
            .filter(|id| {
                entries
                    .get(id.as_str())
                    .map(|entry| entry.revoked || entry.card.is_outdated)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn revoke(&self, card_id: &str) -> Result<()> {
        self.ensure_available()?;

        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(card_id)
            .ok_or_else(|| Error::Directory(format!("Card {} not found", card_id)))?;
        entry.revoked = true;
        entry.card.is_outdated = true;
        tracing::debug!("Directory revoked card {}", card_id);
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
