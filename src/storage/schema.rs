//! # Database Schema
//!
//! SQLite schema of the card cache.
//!
//! ```text
//! cards
//! ├── id                TEXT PRIMARY KEY   card identifier
//! ├── identity          TEXT               owning identity (indexed)
//! ├── is_outdated       INTEGER            0 = chain head
//! ├── previous_card_id  TEXT NULL          predecessor link
//! ├── created_at        INTEGER            Unix seconds
//! └── card              TEXT               RawCard JSON
//! ```

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Cached cards
-- One row per card; rotation only flips is_outdated
CREATE TABLE IF NOT EXISTS cards (
    id TEXT PRIMARY KEY,
    identity TEXT NOT NULL,
    is_outdated INTEGER NOT NULL DEFAULT 0,
    previous_card_id TEXT,
    created_at INTEGER NOT NULL,
    -- Signed card as JSON, re-verified on every read
    card TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cards_identity ON cards(identity);
CREATE INDEX IF NOT EXISTS idx_cards_outdated ON cards(is_outdated);
CREATE INDEX IF NOT EXISTS idx_cards_previous ON cards(previous_card_id);
"#;
