//! Error types for the vault.

use std::time::Duration;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("transient store fault: {0}")]
    Transient(String),

    #[error("stored record corrupt: {0}")]
    Corrupt(String),

    #[error("could not allocate an unused link id")]
    IdExhausted,
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transient(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Transient(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Keyring errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum KeyringError {
    #[error("keyring is empty")]
    Empty,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("key {0} is already in the keyring")]
    DuplicateKey(String),

    #[error("encryption failed")]
    Encryption,

    #[error("decryption failed")]
    DecryptionFailed,
}

// ---------------------------------------------------------------------------
// Request validation (safe to report before any lookup)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("send either 'plaintext' or 'ciphertext' with 'salt' and 'nonce', not both")]
    AmbiguousMode,

    #[error("missing '{0}' field")]
    MissingField(&'static str),

    #[error("payload must not be empty")]
    EmptyPayload,

    #[error("secret exceeds maximum length of {max_kib}KB")]
    TooLarge { max_kib: usize },

    #[error("'{0}' is not valid base64url")]
    BadEncoding(&'static str),

    #[error("'{field}' must decode to {expected} bytes")]
    BadLength { field: &'static str, expected: usize },

    #[error("'ciphertext' is shorter than an authentication tag")]
    CiphertextTooShort,

    #[error("'ttlSeconds' must be between 1 and {max}")]
    TtlOutOfRange { max: u64 },

    #[error("'mimeType' must be 1-255 characters")]
    BadMimeType,

    #[error("malformed link id")]
    MalformedLinkId,
}

// ---------------------------------------------------------------------------
// Create path
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CreateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Keyring(#[from] KeyringError),
}
