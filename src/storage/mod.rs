//! # Storage Module
//!
//! Local persistence: the SQLite card cache and private key storage.
//!
//! ## Storage Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        STORAGE ARCHITECTURE                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌───────────────────────────┐      ┌───────────────────────────────┐  │
//! │  │  Database (SQLite)        │      │  KeyStorage                    │  │
//! │  │                           │      │                                │  │
//! │  │  cards                    │      │  SecureStore                   │  │
//! │  │  - identifier, identity   │      │  - one slot per identity       │  │
//! │  │  - is_outdated            │      │  - optional AES-GCM at rest    │  │
//! │  │  - signed card JSON       │      │                                │  │
//! │  └───────────────────────────┘      └───────────────────────────────┘  │
//! │           ▲                                    ▲                        │
//! │           │ CardPersistence                    │ LocalKeyStorage        │
//! │     cards::CardStorage                    worker / facade              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod database;
mod key_storage;
mod schema;
mod secure_store;

pub use database::Database;
pub use key_storage::LocalKeyStorage;
pub use schema::SCHEMA_VERSION;
pub use secure_store::{KeyStorage, SecureStore};
