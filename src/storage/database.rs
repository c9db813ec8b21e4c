//! # SQLite Card Cache
//!
//! Persistent [`CardPersistence`] backed by SQLite. The connection sits
//! behind a mutex; every trait call is one short statement.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;

use super::schema;
use crate::cards::{CardPersistence, CardRecord};
use crate::error::{Error, Result};

/// The card cache database handle
pub struct Database {
    /// The underlying SQLite connection
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create a database
    ///
    /// If path is None, creates an in-memory database (useful for testing).
    pub async fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| Error::DatabaseError(format!("Failed to open database: {}", e)))?,
            None => Connection::open_in_memory().map_err(|e| {
                Error::DatabaseError(format!("Failed to create in-memory database: {}", e))
            })?,
        };

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .ok();

        match version {
            None => {
                conn.execute_batch(schema::CREATE_TABLES)
                    .map_err(|e| Error::DatabaseError(format!("Failed to create tables: {}", e)))?;

                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| Error::DatabaseError(format!("Failed to set schema version: {}", e)))?;

                tracing::info!("Card cache schema created (version {})", schema::SCHEMA_VERSION);
            }
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(Error::StorageCorrupted(format!(
                    "Card cache schema version {} is newer than supported {}",
                    v,
                    schema::SCHEMA_VERSION
                )));
            }
            Some(v) => {
                tracing::debug!("Card cache schema version: {}", v);
            }
        }

        Ok(())
    }

    fn record_from_row(row: &Row<'_>) -> rusqlite::Result<CardRecord> {
        Ok(CardRecord {
            identifier: row.get(0)?,
            identity: row.get(1)?,
            is_outdated: row.get(2)?,
            previous_card_id: row.get(3)?,
            created_at: row.get(4)?,
            raw_json: row.get(5)?,
        })
    }
}

impl CardPersistence for Database {
    fn insert_or_replace(&self, record: &CardRecord) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "INSERT OR REPLACE INTO cards (id, identity, is_outdated, previous_card_id, created_at, card)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                record.identifier,
                record.identity,
                record.is_outdated,
                record.previous_card_id,
                record.created_at,
                record.raw_json,
            ],
        )
        .map_err(|e| Error::DatabaseError(format!("Failed to store card: {}", e)))?;

        Ok(())
    }

    fn query_by_identifier(&self, identifier: &str) -> Result<Option<CardRecord>> {
        let conn = self.conn.lock();

        conn.query_row(
            "SELECT id, identity, is_outdated, previous_card_id, created_at, card
             FROM cards WHERE id = ?",
            params![identifier],
            Self::record_from_row,
        )
        .optional()
        .map_err(|e| Error::DatabaseError(format!("Failed to get card: {}", e)))
    }

    fn query_by_identity(&self, identity: &str) -> Result<Vec<CardRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, identity, is_outdated, previous_card_id, created_at, card
                 FROM cards WHERE identity = ? ORDER BY created_at ASC",
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let records = stmt
            .query_map(params![identity], Self::record_from_row)
            .map_err(|e| Error::DatabaseError(format!("Failed to query cards: {}", e)))?;

        records
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::DatabaseError(format!("Failed to read card: {}", e)))
    }

    fn query_newest(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id FROM cards WHERE is_outdated = 0")
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let ids = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| Error::DatabaseError(format!("Failed to query newest cards: {}", e)))?;

        ids.collect::<std::result::Result<Vec<String>, _>>()
            .map_err(|e| Error::DatabaseError(format!("Failed to read card id: {}", e)))
    }

    fn delete_all(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM cards", [])
            .map_err(|e| Error::DatabaseError(format!("Failed to clear cards: {}", e)))?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
