//! # Burnlink Envelope
//!
//! Client-side cryptography for one-time secret links.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use burnlink_envelope::{seal, unseal, PassphraseGenerator};
//!
//! let generator = PassphraseGenerator::bundled().unwrap();
//! let passphrase = generator.generate(6);
//!
//! let envelope = seal(b"launch code", &passphrase).unwrap();
//! // ... send `envelope` to the server, share `passphrase` out of band ...
//! let plaintext = unseal(&envelope, &passphrase).unwrap();
//!
//! assert_eq!(plaintext.as_slice(), b"launch code");
//! ```
//!
//! ## Security Properties
//!
//! - **Memory-hard KDF**: Argon2id, 64 MiB, 2 passes, 1 lane
//! - **AEAD**: AES-256-GCM with fresh salt and nonce per seal
//! - **Uniform errors**: wrong passphrase and corrupt envelope are the same error
//! - **Unbiased passphrases**: rejection sampling over the corpus
//!
//! ## What's NOT Provided
//!
//! - Storage or transport
//! - Server-side key management (see `burnlink-vault`)

#![deny(unsafe_code)]

pub mod aead;
pub mod envelope;
mod error;
pub mod kdf;
pub mod passphrase;
pub mod wire;
pub mod wordlist;

pub use envelope::{seal, seal_with, unseal, unseal_with, Envelope};
pub use error::{OpenError, SealError, WordlistError};
pub use kdf::KdfParams;
pub use passphrase::{PassphraseGenerator, Strength, StrengthLabel, DEFAULT_WORD_COUNT};
pub use wordlist::Wordlist;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
