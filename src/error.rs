//! Unified error types for the burnlink envelope.

use thiserror::Error;

/// Opening an envelope failed.
///
/// Deliberately carries no detail: a wrong passphrase, a flipped ciphertext
/// bit, a truncated tag and a malformed salt all produce this same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("decryption failed")]
pub struct OpenError;

/// Sealing an envelope failed (RNG or KDF parameter failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("encoding error")]
pub struct SealError;

/// Normalize seal-side errors into open errors (oracle discipline).
impl From<SealError> for OpenError {
    fn from(_: SealError) -> Self {
        OpenError
    }
}

/// The passphrase corpus could not be loaded.
#[derive(Debug, Error)]
pub enum WordlistError {
    #[error("wordlist unavailable: {0}")]
    Unavailable(#[from] std::io::Error),

    #[error("wordlist has {found} words, at least {required} required")]
    TooSmall { found: usize, required: usize },

    #[error("wordlist contains duplicate word {0:?}")]
    Duplicate(String),

    #[error("wordlist entry {0:?} contains whitespace or a separator")]
    InvalidWord(String),
}
