//! # Configuration
//!
//! Per-instance parameters for [`EThree`](crate::EThree).
//!
//! Every field except `identity` has a default, so a minimal JSON
//! configuration is just `{"identity": "alice"}`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default cooldown between a password derivation and the following
/// backup store request, in milliseconds
pub const DEFAULT_THROTTLE_COOLDOWN_MS: u64 = 2000;

/// What to do when more than one current card exists for an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateCardPolicy {
    /// Fail with [`Error::AmbiguousCards`]
    #[default]
    Reject,
    /// Pick the card with the greatest creation time and log a warning
    PreferNewest,
}

/// Argon2id parameters for password-based key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Configuration for one local identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EThreeParams {
    /// The local principal's identity
    pub identity: String,
    /// Name of the backup entry; defaults to the identity
    pub key_name: Option<String>,
    /// Delay inserted before backup store calls that follow a derivation
    pub throttle_cooldown_ms: u64,
    /// Policy for several current cards under one identity
    pub duplicate_card_policy: DuplicateCardPolicy,
    /// SQLite file for the card cache; `None` keeps the cache in memory
    pub card_cache_path: Option<String>,
    /// Password derivation parameters
    pub kdf: KdfParams,
}

impl Default for EThreeParams {
    fn default() -> Self {
        Self {
            identity: String::new(),
            key_name: None,
            throttle_cooldown_ms: DEFAULT_THROTTLE_COOLDOWN_MS,
            duplicate_card_policy: DuplicateCardPolicy::default(),
            card_cache_path: None,
            kdf: KdfParams::default(),
        }
    }
}

impl EThreeParams {
    /// Parameters with defaults for the given identity
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            ..Self::default()
        }
    }

    /// Parse parameters from JSON and validate them
    pub fn from_json(json: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(json)
            .map_err(|e| Error::DeserializationError(format!("Invalid parameters: {}", e)))?;
        params.validate()?;
        Ok(params)
    }

    /// Check that the parameters are usable
    pub fn validate(&self) -> Result<()> {
        if self.identity.trim().is_empty() {
            return Err(Error::EmptyArgument("identity".into()));
        }
        if matches!(&self.key_name, Some(name) if name.trim().is_empty()) {
            return Err(Error::EmptyArgument("key_name".into()));
        }
        if self.kdf.iterations == 0 || self.kdf.parallelism == 0 {
            return Err(Error::InvalidArgument(
                "KDF iterations and parallelism must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Name under which the private key backup is stored
    pub fn backup_key_name(&self) -> &str {
        self.key_name.as_deref().unwrap_or(&self.identity)
    }

    /// Cooldown before backup store calls
    pub fn throttle_cooldown(&self) -> Duration {
        Duration::from_millis(self.throttle_cooldown_ms)
    }

    /// Set the cooldown (builder style)
    pub fn with_throttle_cooldown(mut self, cooldown: Duration) -> Self {
        self.throttle_cooldown_ms = cooldown.as_millis() as u64;
        self
    }

    /// Set the duplicate card policy (builder style)
    pub fn with_duplicate_card_policy(mut self, policy: DuplicateCardPolicy) -> Self {
        self.duplicate_card_policy = policy;
        self
    }

    /// Set the KDF parameters (builder style)
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = EThreeParams::new("alice");
        assert_eq!(params.throttle_cooldown(), Duration::from_secs(2));
        assert_eq!(params.duplicate_card_policy, DuplicateCardPolicy::Reject);
        assert_eq!(params.backup_key_name(), "alice");
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_from_json_minimal() {
        let params = EThreeParams::from_json(r#"{"identity": "bob"}"#).unwrap();
        assert_eq!(params.identity, "bob");
        assert_eq!(params.kdf, KdfParams::default());
    }

    #[test]
    fn test_from_json_full() {
        let json = r#"{
            "identity": "carol",
            "key_name": "carol-laptop",
            "throttle_cooldown_ms": 0,
            "duplicate_card_policy": "prefer_newest",
            "kdf": {"memory_kib": 256, "iterations": 1}
        }"#;
        let params = EThreeParams::from_json(json).unwrap();
        assert_eq!(params.backup_key_name(), "carol-laptop");
        assert_eq!(params.throttle_cooldown(), Duration::ZERO);
        assert_eq!(params.duplicate_card_policy, DuplicateCardPolicy::PreferNewest);
        assert_eq!(params.kdf.memory_kib, 256);
        assert_eq!(params.kdf.parallelism, 1);
    }

    #[test]
    fn test_blank_identity_rejected() {
        let err = EThreeParams::from_json(r#"{"identity": "  "}"#).unwrap_err();
        assert!(matches!(err, Error::EmptyArgument(_)));
    }
}
