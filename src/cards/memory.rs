//! In-memory [`CardPersistence`], for tests and ephemeral instances.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::cards::storage::{CardPersistence, CardRecord};
use crate::error::Result;

/// Card records held in a hash map
#[derive(Default)]
pub struct MemoryCardPersistence {
    records: RwLock<HashMap<String, CardRecord>>,
}

impl MemoryCardPersistence {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl CardPersistence for MemoryCardPersistence {
    fn insert_or_replace(&self, record: &CardRecord) -> Result<()> {
        self.records
            .write()
            .insert(record.identifier.clone(), record.clone());
        Ok(())
    }

    fn query_by_identifier(&self, identifier: &str) -> Result<Option<CardRecord>> {
        Ok(self.records.read().get(identifier).cloned())
    }

    fn query_by_identity(&self, identity: &str) -> Result<Vec<CardRecord>> {
        let records = self.records.read();
        let mut matching: Vec<CardRecord> = records
            .values()
            .filter(|record| record.identity == identity)
            .cloned()
            .collect();
        matching.sort_by_key(|record| record.created_at);
        Ok(matching)
    }

    fn query_newest(&self) -> Result<Vec<String>> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|record| !record.is_outdated)
            .map(|record| record.identifier.clone())
            .collect())
    }

    fn delete_all(&self) -> Result<()> {
        self.records.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, identity: &str, outdated: bool, created_at: i64) -> CardRecord {
        CardRecord {
            identifier: id.into(),
            identity: identity.into(),
            is_outdated: outdated,
            previous_card_id: None,
            created_at,
            raw_json: "{}".into(),
        }
    }

    #[test]
    fn test_insert_replace_query() {
        let store = MemoryCardPersistence::new();
        store.insert_or_replace(&record("a", "alice", false, 2)).unwrap();
        store.insert_or_replace(&record("b", "alice", false, 1)).unwrap();
        store.insert_or_replace(&record("a", "alice", true, 2)).unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.query_by_identifier("a").unwrap().unwrap().is_outdated);

        let by_identity = store.query_by_identity("alice").unwrap();
        assert_eq!(by_identity[0].identifier, "b");
        assert_eq!(store.query_newest().unwrap(), vec!["b".to_string()]);

        store.delete_all().unwrap();
        assert!(store.is_empty());
    }
}
