//! # EThree Core
//!
//! End-to-end encryption for application users. Each identity owns a
//! rotating, self-signed public key certificate (a [`Card`]) published to a
//! directory; peers encrypt to each other with looked-up cards and can still
//! verify messages written before a sender rotated keys.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         ETHREE CORE MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │                        ┌──────────────────┐                            │
//! │                        │      EThree      │  one instance per identity │
//! │                        └────────┬─────────┘                            │
//! │                                 │                                       │
//! │   ┌──────────────┬──────────────┼──────────────┬──────────────┐        │
//! │   │ AuthEncrypt  │ LegacyPeer   │   Lookup     │  KeyBackup   │ worker │
//! │   └──────┬───────┴──────┬───────┴──────┬───────┴──────┬───────┘        │
//! │          │              │              │              │                 │
//! │   ┌──────┴──────┐ ┌─────┴──────┐ ┌─────┴──────┐ ┌─────┴──────────┐     │
//! │   │   Crypto    │ │  Storage   │ │   Cards    │ │    Backup      │     │
//! │   │             │ │            │ │            │ │                │     │
//! │   │ - Ed25519   │ │ - SQLite   │ │ - Chain    │ │ - Transport    │     │
//! │   │ - X25519    │ │ - KeyStore │ │ - Cache    │ │ - Argon2id     │     │
//! │   │ - AES-GCM   │ │            │ │            │ │                │     │
//! │   └─────────────┘ └────────────┘ └─────┬──────┘ └────────────────┘     │
//! │                                        │                                │
//! │                                  ┌─────┴──────┐                        │
//! │                                  │ Directory  │  remote card service   │
//! │                                  └────────────┘                        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types and failure taxonomy
//! - [`config`] - Instance configuration
//! - [`crypto`] - Primitives behind the injectable [`CryptoPrimitives`] trait
//! - [`cards`] - Card model, chain walk and the rotation-aware cache
//! - [`storage`] - SQLite card cache and private key storage
//! - [`directory`] - Card directory boundary
//! - [`backup`] - Backup store boundary and password derivation
//! - [`worker`] - Encryption, lookup and backup workers
//! - [`ethree`] - The [`EThree`] facade
//!
//! ## Quick Start
//!
//! ```no_run
//! # async fn demo() -> ethree_core::Result<()> {
//! use ethree_core::{Backends, EThree, EThreeParams};
//!
//! let alice = EThree::new(EThreeParams::new("alice"), Backends::in_memory()).await?;
//! alice.register().await?;
//!
//! let sealed = alice.encrypt_text("note to self", None).await?;
//! assert_eq!(alice.decrypt_text(&sealed, None).await?, "note to self");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod backup;
pub mod cards;
pub mod config;
pub mod crypto;
pub mod directory;
pub mod error;
pub mod ethree;
pub mod storage;
/// Unix timestamp helpers.
pub mod time;
pub mod worker;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use backup::{BackupEntry, BackupTransport, DerivedPasswords, MemoryBackupTransport, PasswordKeyDeriver};
pub use cards::{Card, CardStorage, RawCard};
pub use config::{DuplicateCardPolicy, EThreeParams, KdfParams};
pub use crypto::{CryptoPrimitives, DefaultCrypto, KeyPair, PublicKey};
pub use directory::{CardDirectory, MemoryDirectory};
pub use error::{Error, ErrorKind, Result};
pub use ethree::{Backends, EThree};
pub use worker::{BackupState, FindUsersResult, LookupResult};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of EThree Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
