//! # Card Lookup
//!
//! Cache-first lookup of other users' cards.
//!
//! ```text
//! find_users([a, b, c])
//!   validate (empty, blank, duplicates)     no directory call on failure
//!   cache.search_cards            ──► a, b found
//!   directory.search(c)           ──► [C₂ → C₁]
//!   cache.store_chain(C₂)
//!   { a, b, c }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::cards::{Card, CardStorage};
use crate::config::DuplicateCardPolicy;
use crate::crypto::PublicKey;
use crate::directory::CardDirectory;
use crate::error::{Error, Result};

/// Cards found by a lookup, keyed by identity
pub type FindUsersResult = HashMap<String, Card>;

/// Current public keys, keyed by identity
pub type LookupResult = HashMap<String, PublicKey>;

/// Pick the one current card of `identity` out of `cards`
///
/// An empty list is [`Error::CardNotFound`]; more than one card follows
/// `policy`.
pub fn select_current(identity: &str, mut cards: Vec<Card>, policy: DuplicateCardPolicy) -> Result<Card> {
    match cards.len() {
        0 => Err(Error::CardNotFound(identity.to_string())),
        1 => Ok(cards.remove(0)),
        count => match policy {
            DuplicateCardPolicy::Reject => Err(Error::AmbiguousCards {
                identity: identity.to_string(),
                count,
            }),
            DuplicateCardPolicy::PreferNewest => {
                tracing::warn!("Directory returned {} current cards for {}, using newest", count, identity);
                cards
                    .into_iter()
                    .max_by_key(|card| card.created_at)
                    .ok_or_else(|| Error::CardNotFound(identity.to_string()))
            }
        },
    }
}

/// Lookup over the card cache and the directory
#[derive(Clone)]
pub struct LookupWorker {
    storage: Arc<CardStorage>,
    directory: Arc<dyn CardDirectory>,
}

impl LookupWorker {
    /// Create a worker over a cache and a directory
    pub fn new(storage: Arc<CardStorage>, directory: Arc<dyn CardDirectory>) -> Self {
        Self { storage, directory }
    }

    /// Current card of every identity, cache first
    ///
    /// With `force_reload` every identity is fetched from the directory.
    /// Fetched chains are written to the cache.
    pub async fn find_users(&self, identities: &[String], force_reload: bool) -> Result<FindUsersResult> {
        validate_identities(identities)?;

        let mut result = FindUsersResult::new();
        if !force_reload {
            for card in self.cached(identities.to_vec()).await? {
                result.insert(card.identity.clone(), card);
            }
        }

        for identity in identities {
            if result.contains_key(identity) {
                continue;
            }
            let card = self.fetch(identity).await?;
            result.insert(identity.clone(), card);
        }

        tracing::debug!("Found cards for {} identities", result.len());
        Ok(result)
    }

    /// Current card of one identity
    pub async fn find_user(&self, identity: &str, force_reload: bool) -> Result<Card> {
        let identities = [identity.to_string()];
        let mut found = self.find_users(&identities, force_reload).await?;
        found
            .remove(identity)
            .ok_or_else(|| Error::CardNotFound(identity.to_string()))
    }

    /// Cached cards only; identities not in the cache are left out
    pub async fn find_cached_users(&self, identities: &[String]) -> Result<FindUsersResult> {
        validate_identities(identities)?;
        Ok(self
            .cached(identities.to_vec())
            .await?
            .into_iter()
            .map(|card| (card.identity.clone(), card))
            .collect())
    }

    /// Cached card of one identity
    pub async fn find_cached_user(&self, identity: &str) -> Result<Option<Card>> {
        if identity.trim().is_empty() {
            return Err(Error::EmptyArgument("identity".into()));
        }
        Ok(self.cached(vec![identity.to_string()]).await?.into_iter().next())
    }

    /// Current public key of every identity
    pub async fn lookup_public_keys(&self, identities: &[String]) -> Result<LookupResult> {
        Ok(self
            .find_users(identities, false)
            .await?
            .into_iter()
            .map(|(identity, card)| (identity, card.public_key))
            .collect())
    }

    /// Cached current cards of `identities`, in cache order
    pub async fn search_cached_cards(&self, identities: &[String]) -> Result<Vec<Card>> {
        self.cached(identities.to_vec()).await
    }

    /// Refresh every cached identity whose newest card the directory
    /// reports as outdated
    ///
    /// Returns the identities whose keys changed, calling `on_key_changed`
    /// for each of them.
    pub async fn update_cached_users(
        &self,
        on_key_changed: Option<&(dyn Fn(&str) + Send + Sync)>,
    ) -> Result<Vec<String>> {
        let storage = self.storage.clone();
        let newest = tokio::task::spawn_blocking(move || storage.get_newest_card_ids()).await??;
        if newest.is_empty() {
            return Ok(Vec::new());
        }

        let outdated = self.directory.outdated(&newest).await?;

        // Stale heads keep their current flag until a replacement is fetched,
        // so a failed search leaves them visible to the next update.
        let mut stale: BTreeMap<String, Vec<Card>> = BTreeMap::new();
        for card_id in outdated {
            let storage = self.storage.clone();
            let cached = tokio::task::spawn_blocking(move || storage.get_card(&card_id)).await??;
            if let Some(card) = cached {
                stale.entry(card.identity.clone()).or_default().push(card.detached());
            }
        }

        let mut updated = Vec::new();
        for (identity, heads) in stale {
            let cards = self.directory.search(&identity).await?;
            let current = if cards.is_empty() {
                tracing::warn!("{} has no current card in the directory", identity);
                None
            } else {
                Some(select_current(&identity, cards, self.storage.policy())?)
            };

            let storage = self.storage.clone();
            let replacement = current.clone();
            tokio::task::spawn_blocking(move || -> Result<()> {
                for mut head in heads {
                    head.is_outdated = true;
                    storage.store_card(&head)?;
                }
                match replacement {
                    Some(card) => storage.store_chain(&card),
                    None => Ok(()),
                }
            })
            .await??;

            if current.is_none() {
                continue;
            }
            tracing::info!("Key of {} changed", identity);
            if let Some(callback) = on_key_changed {
                callback(&identity);
            }
            updated.push(identity);
        }

        Ok(updated)
    }

    async fn cached(&self, identities: Vec<String>) -> Result<Vec<Card>> {
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || storage.search_cards(&identities)).await?
    }

    async fn fetch(&self, identity: &str) -> Result<Card> {
        let cards = self.directory.search(identity).await?;
        let card = select_current(identity, cards, self.storage.policy())?;
        self.store(card.clone()).await?;
        Ok(card)
    }

    async fn store(&self, card: Card) -> Result<()> {
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || storage.store_chain(&card)).await?
    }
}

fn validate_identities(identities: &[String]) -> Result<()> {
    if identities.is_empty() {
        return Err(Error::EmptyArgument("identities".into()));
    }
    if identities.iter().any(|identity| identity.trim().is_empty()) {
        return Err(Error::EmptyArgument("identity".into()));
    }

    let mut seen = HashSet::new();
    let duplicates: BTreeSet<&String> = identities
        .iter()
        .filter(|identity| !seen.insert(identity.as_str()))
        .collect();
    if !duplicates.is_empty() {
        return Err(Error::DuplicateInput(duplicates.into_iter().cloned().collect()));
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::{MemoryCardPersistence, RawCard};
    use crate::crypto::{DefaultCrypto, KeyPair};
    use crate::directory::MemoryDirectory;
    use std::sync::Mutex;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn setup(policy: DuplicateCardPolicy) -> (LookupWorker, Arc<MemoryDirectory>, Arc<CardStorage>) {
        let directory = Arc::new(MemoryDirectory::new());
        let storage = Arc::new(CardStorage::new(
            Arc::new(MemoryCardPersistence::new()),
            Arc::new(DefaultCrypto),
            policy,
        ));
        (LookupWorker::new(storage.clone(), directory.clone()), directory, storage)
    }

    async fn publish(directory: &MemoryDirectory, identity: &str, prev: Option<&Card>, created_at: i64) -> Card {
        let raw = RawCard::generate(
            &DefaultCrypto,
            &KeyPair::generate(),
            identity,
            prev.map(|c| c.identifier.clone()),
            created_at,
        )
        .unwrap();
        directory.publish(raw).await.unwrap()
    }

    #[tokio::test]
    async fn test_find_users_caches_results() {
        let (worker, directory, storage) = setup(DuplicateCardPolicy::Reject);
        let alice = publish(&directory, "alice", None, 10).await;
        publish(&directory, "bob", None, 10).await;

        let found = worker.find_users(&ids(&["alice", "bob"]), false).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["alice"].identifier, alice.identifier);
        assert_eq!(directory.search_calls(), 2);

        worker.find_users(&ids(&["alice", "bob"]), false).await.unwrap();
        assert_eq!(directory.search_calls(), 2);
        assert_eq!(storage.get_newest_card_ids().unwrap().len(), 2);

        worker.find_users(&ids(&["alice"]), true).await.unwrap();
        assert_eq!(directory.search_calls(), 3);
    }

    #[tokio::test]
    async fn test_duplicates_rejected_before_directory_call() {
        let (worker, directory, _) = setup(DuplicateCardPolicy::Reject);

        let err = worker.lookup_public_keys(&ids(&["a", "a", "b"])).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateInput(ref dups) if dups == &ids(&["a"])));
        assert_eq!(directory.search_calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_and_unknown() {
        let (worker, _directory, _) = setup(DuplicateCardPolicy::Reject);

        assert!(matches!(worker.find_users(&[], false).await, Err(Error::EmptyArgument(_))));
        assert!(matches!(
            worker.find_users(&ids(&[" "]), false).await,
            Err(Error::EmptyArgument(_))
        ));
        assert!(matches!(
            worker.find_user("nobody", false).await,
            Err(Error::CardNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_multiple_current_cards_follow_policy() {
        let (strict, directory, _) = setup(DuplicateCardPolicy::Reject);
        let kp = KeyPair::generate();
        directory
            .insert_unchecked(RawCard::generate(&DefaultCrypto, &kp, "alice", None, 10).unwrap())
            .unwrap();
        let newest = directory
            .insert_unchecked(RawCard::generate(&DefaultCrypto, &KeyPair::generate(), "alice", None, 20).unwrap())
            .unwrap();

        assert!(matches!(
            strict.find_user("alice", false).await,
            Err(Error::AmbiguousCards { count: 2, .. })
        ));

        let storage = Arc::new(CardStorage::new(
            Arc::new(MemoryCardPersistence::new()),
            Arc::new(DefaultCrypto),
            DuplicateCardPolicy::PreferNewest,
        ));
        let lenient = LookupWorker::new(storage, directory.clone());
        assert_eq!(
            lenient.find_user("alice", false).await.unwrap().identifier,
            newest.identifier
        );
    }

    #[tokio::test]
    async fn test_cached_only_lookups() {
        let (worker, directory, _) = setup(DuplicateCardPolicy::Reject);
        publish(&directory, "alice", None, 10).await;

        assert!(worker.find_cached_user("alice").await.unwrap().is_none());
        worker.find_user("alice", false).await.unwrap();

        let cached = worker.find_cached_users(&ids(&["alice", "bob"])).await.unwrap();
        assert_eq!(cached.len(), 1);
        assert!(worker.find_cached_user("alice").await.unwrap().is_some());
        assert_eq!(worker.search_cached_cards(&ids(&["alice"])).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_cached_users_detects_rotation() {
        let (worker, directory, storage) = setup(DuplicateCardPolicy::Reject);
        let c1 = publish(&directory, "alice", None, 10).await;
        publish(&directory, "bob", None, 10).await;
        worker.find_users(&ids(&["alice", "bob"]), false).await.unwrap();

        let c2 = publish(&directory, "alice", Some(&c1), 20).await;

        let notified = Mutex::new(Vec::new());
        let callback: &(dyn Fn(&str) + Send + Sync) =
            &|identity: &str| notified.lock().unwrap().push(identity.to_string());
        let changed = worker.update_cached_users(Some(callback)).await.unwrap();

        assert_eq!(changed, ids(&["alice"]));
        assert_eq!(*notified.lock().unwrap(), ids(&["alice"]));

        let cached = worker.find_cached_user("alice").await.unwrap().unwrap();
        assert_eq!(cached.identifier, c2.identifier);
        assert!(storage.get_card(&c1.identifier).unwrap().unwrap().is_outdated);

        assert!(worker.update_cached_users(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_after_reregistration() {
        let (worker, directory, _) = setup(DuplicateCardPolicy::Reject);
        let old = publish(&directory, "alice", None, 10).await;
        worker.find_user("alice", false).await.unwrap();

        directory.revoke(&old.identifier).await.unwrap();
        let fresh = publish(&directory, "alice", None, 20).await;

        assert_eq!(worker.update_cached_users(None).await.unwrap(), ids(&["alice"]));
        assert_eq!(
            worker.find_cached_user("alice").await.unwrap().unwrap().identifier,
            fresh.identifier
        );
    }

    /// Delegates to a memory directory, failing the next `search` on demand
    struct FlakyDirectory {
        inner: Arc<MemoryDirectory>,
        fail_next_search: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl CardDirectory for FlakyDirectory {
        async fn publish(&self, raw: RawCard) -> Result<Card> {
            self.inner.publish(raw).await
        }

        async fn search(&self, identity: &str) -> Result<Vec<Card>> {
            if self.fail_next_search.swap(false, std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::Directory("transient".into()));
            }
            self.inner.search(identity).await
        }

        async fn outdated(&self, card_ids: &[String]) -> Result<Vec<String>> {
            self.inner.outdated(card_ids).await
        }

        async fn revoke(&self, card_id: &str) -> Result<()> {
            self.inner.revoke(card_id).await
        }
    }

    #[tokio::test]
    async fn test_update_survives_failed_search() {
        let inner = Arc::new(MemoryDirectory::new());
        let directory = Arc::new(FlakyDirectory {
            inner: inner.clone(),
            fail_next_search: std::sync::atomic::AtomicBool::new(false),
        });
        let storage = Arc::new(CardStorage::new(
            Arc::new(MemoryCardPersistence::new()),
            Arc::new(DefaultCrypto),
            DuplicateCardPolicy::Reject,
        ));
        let worker = LookupWorker::new(storage.clone(), directory.clone());

        let c1 = publish(&inner, "alice", None, 10).await;
        worker.find_user("alice", false).await.unwrap();
        let c2 = publish(&inner, "alice", Some(&c1), 20).await;

        directory
            .fail_next_search
            .store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(matches!(
            worker.update_cached_users(None).await,
            Err(Error::Directory(_))
        ));

        // The stale head is still current, so the change is found again
        assert_eq!(storage.get_newest_card_ids().unwrap(), vec![c1.identifier.clone()]);
        assert_eq!(worker.update_cached_users(None).await.unwrap(), ids(&["alice"]));

        let cached = worker.find_cached_user("alice").await.unwrap().unwrap();
        assert_eq!(cached.identifier, c2.identifier);
        assert!(storage.get_card(&c1.identifier).unwrap().unwrap().is_outdated);
    }
}
