//! # Error Types
//!
//! Comprehensive error handling for ethree-core.
//!
//! ## Error Categories
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         ERROR HIERARCHY                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error                                                                 │
//! │  ├── Argument    (100-199)  Empty input, duplicates, same password     │
//! │  ├── KeyState    (200-299)  Local key present / missing, registration  │
//! │  ├── Crypto      (300-399)  Signature verification, primitive failure  │
//! │  ├── Card        (400-499)  Lookup, ambiguity, chain integrity         │
//! │  ├── Backup      (500-599)  Existing entry, wrong password, not found  │
//! │  ├── Storage     (600-699)  Card cache and key storage                 │
//! │  ├── Transport   (700-799)  Directory and backup store boundaries      │
//! │  └── Internal    (900-999)  Serialization, task failures               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Primitive crypto failures are reported as [`CryptoError`] and only reach
//! callers wrapped in [`Error::Crypto`] when no domain error applies. A
//! primitive `SignatureNotValid` is always surfaced as
//! [`Error::SignatureVerification`] so callers can react by re-fetching the
//! sender's current card.

use thiserror::Error;

/// Result type alias for ethree-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for the crypto primitive layer
pub type CryptoResult<T> = std::result::Result<T, CryptoError>;

/// Failures reported by the crypto primitive layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// A signature did not verify against any of the supplied keys
    #[error("Signature is not valid")]
    SignatureNotValid,

    /// The decrypting key is not among the ciphertext recipients
    #[error("Decrypting key is not among the recipients")]
    RecipientNotFound,

    /// The ciphertext or key material could not be parsed
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed (tampered data or wrong key)
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Invalid key bytes
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Key derivation failed
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// Reading or writing a stream failed
    #[error("Stream I/O failed: {0}")]
    Io(String),
}

/// Taxonomy of failures, independent of the concrete error variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Empty or malformed caller input
    InvalidArgument,
    /// Operation requires the absence (or presence) of a local key
    KeyStateConflict,
    /// Authenticated decryption's signature check failed
    SignatureVerification,
    /// A backup entry already exists
    BackupConflict,
    /// Backup password did not match
    WrongPassword,
    /// Backup entry or card not found
    NotFound,
    /// More than one current card for a single identity
    Ambiguous,
    /// Duplicate identities in a batch lookup
    DuplicateInput,
    /// Unmapped primitive crypto failure
    Crypto,
    /// Local storage failure
    Storage,
    /// Remote boundary failure
    Transport,
    /// Internal failure
    Internal,
}

/// Main error type for ethree-core
///
/// All errors are categorized by domain to make error handling
/// clearer and to provide meaningful error messages to users.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Argument Errors (100-199)
    // ========================================================================

    /// A required argument was empty or blank
    #[error("Argument must not be empty: {0}")]
    EmptyArgument(String),

    /// A recipient key list was provided but contains no keys
    #[error("Recipient key list was provided but is empty")]
    EmptyRecipients,

    /// An argument was present but invalid
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The same identity appeared more than once in a batch lookup
    #[error("Duplicate identities in lookup: {}", .0.join(", "))]
    DuplicateInput(Vec<String>),

    /// Text could not be converted to or from its byte form
    #[error("Conversion failed: {0}")]
    Conversion(String),

    /// Old and new backup passwords are identical
    #[error("New password must differ from the old one")]
    SamePassword,

    // ========================================================================
    // Key State Errors (200-299)
    // ========================================================================

    /// A private key is already stored on this device
    #[error("A private key already exists in local storage. Call cleanup() first.")]
    PrivateKeyExists,

    /// No private key is stored on this device
    #[error("No private key found in local storage. Register or restore first.")]
    MissingPrivateKey,

    /// The identity already has a card in the directory
    #[error("User is already registered: {0}")]
    UserAlreadyRegistered(String),

    /// The identity has no card in the directory
    #[error("User is not registered: {0}")]
    UserNotRegistered(String),

    // ========================================================================
    // Crypto Errors (300-399)
    // ========================================================================

    /// Signature of the decrypted data did not verify
    ///
    /// Most commonly the sender rotated keys and a stale card was used.
    #[error("Signature verification failed. The sender may have rotated keys; look up their card again.")]
    SignatureVerification,

    /// Unmapped primitive failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Password or seed based key derivation failed
    #[error("Failed to derive keys: {0}")]
    KeyDerivationFailed(String),

    // ========================================================================
    // Card Errors (400-499)
    // ========================================================================

    /// No card exists for the identity
    #[error("Card not found: {0}")]
    CardNotFound(String),

    /// More than one current card exists for the identity
    #[error("Found {count} current cards for identity {identity}")]
    AmbiguousCards {
        /// Identity with several current cards
        identity: String,
        /// Number of current cards found
        count: usize,
    },

    /// Card self-signature or identifier check failed
    #[error("Card verification failed: {0}")]
    CardVerification(String),

    /// A card's predecessor link violates the chain rules
    #[error("Invalid card chain: {0}")]
    InvalidCardChain(String),

    // ========================================================================
    // Backup Errors (500-599)
    // ========================================================================

    /// A backup entry already exists for the identity
    #[error("A private key backup already exists for this identity")]
    BackupAlreadyExists,

    /// The password does not open the backup entry
    #[error("Wrong backup password")]
    WrongPassword,

    /// No backup entry exists for the identity
    #[error("No private key backup found")]
    NoBackupFound,

    // ========================================================================
    // Storage Errors (600-699)
    // ========================================================================

    /// Failed to read from storage
    #[error("Failed to read from storage: {0}")]
    StorageReadError(String),

    /// Failed to write to storage
    #[error("Failed to write to storage: {0}")]
    StorageWriteError(String),

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Data corruption detected
    #[error("Data corruption detected: {0}")]
    StorageCorrupted(String),

    // ========================================================================
    // Transport Errors (700-799)
    // ========================================================================

    /// Card directory failure
    #[error("Card directory error: {0}")]
    Directory(String),

    /// Backup store failure
    #[error("Backup store error: {0}")]
    BackupTransport(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl Error {
    /// Get the numeric error code
    ///
    /// Error codes are organized by category:
    /// - 100-199: Arguments
    /// - 200-299: Key state
    /// - 300-399: Crypto
    /// - 400-499: Cards
    /// - 500-599: Backup
    /// - 600-699: Storage
    /// - 700-799: Transport
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            // Arguments (100-199)
            Error::EmptyArgument(_) => 100,
            Error::EmptyRecipients => 101,
            Error::InvalidArgument(_) => 102,
            Error::DuplicateInput(_) => 103,
            Error::Conversion(_) => 104,
            Error::SamePassword => 105,

            // Key state (200-299)
            Error::PrivateKeyExists => 200,
            Error::MissingPrivateKey => 201,
            Error::UserAlreadyRegistered(_) => 202,
            Error::UserNotRegistered(_) => 203,

            // Crypto (300-399)
            Error::SignatureVerification => 300,
            Error::Crypto(_) => 301,
            Error::KeyDerivationFailed(_) => 302,

            // Cards (400-499)
            Error::CardNotFound(_) => 400,
            Error::AmbiguousCards { .. } => 401,
            Error::CardVerification(_) => 402,
            Error::InvalidCardChain(_) => 403,

            // Backup (500-599)
            Error::BackupAlreadyExists => 500,
            Error::WrongPassword => 501,
            Error::NoBackupFound => 502,

            // Storage (600-699)
            Error::StorageReadError(_) => 600,
            Error::StorageWriteError(_) => 601,
            Error::DatabaseError(_) => 602,
            Error::StorageCorrupted(_) => 603,

            // Transport (700-799)
            Error::Directory(_) => 700,
            Error::BackupTransport(_) => 701,

            // Internal (900-999)
            Error::Internal(_) => 900,
            Error::SerializationError(_) => 901,
            Error::DeserializationError(_) => 902,
        }
    }

    /// Classify this error into the failure taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EmptyArgument(_)
            | Error::EmptyRecipients
            | Error::InvalidArgument(_)
            | Error::Conversion(_)
            | Error::SamePassword
            | Error::InvalidCardChain(_) => ErrorKind::InvalidArgument,

            Error::DuplicateInput(_) => ErrorKind::DuplicateInput,

            Error::PrivateKeyExists
            | Error::MissingPrivateKey
            | Error::UserAlreadyRegistered(_) => ErrorKind::KeyStateConflict,

            Error::SignatureVerification | Error::Crypto(CryptoError::SignatureNotValid) => {
                ErrorKind::SignatureVerification
            }
            Error::Crypto(_) | Error::KeyDerivationFailed(_) | Error::CardVerification(_) => {
                ErrorKind::Crypto
            }

            Error::CardNotFound(_) | Error::UserNotRegistered(_) | Error::NoBackupFound => {
                ErrorKind::NotFound
            }
            Error::AmbiguousCards { .. } => ErrorKind::Ambiguous,

            Error::BackupAlreadyExists => ErrorKind::BackupConflict,
            Error::WrongPassword => ErrorKind::WrongPassword,

            Error::StorageReadError(_)
            | Error::StorageWriteError(_)
            | Error::DatabaseError(_)
            | Error::StorageCorrupted(_) => ErrorKind::Storage,

            Error::Directory(_) | Error::BackupTransport(_) => ErrorKind::Transport,

            Error::Internal(_) | Error::SerializationError(_) | Error::DeserializationError(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can potentially be resolved by retrying,
    /// or by looking up the sender's card again.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Directory(_) | Error::BackupTransport(_) | Error::SignatureVerification
        )
    }

    /// Check if this error requires user action
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            Error::WrongPassword
                | Error::SamePassword
                | Error::PrivateKeyExists
                | Error::MissingPrivateKey
                | Error::BackupAlreadyExists
                | Error::NoBackupFound
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal(format!("Background task failed: {}", err))
    }
}

// ============================================================================
// TESTS
// ============================================================================
