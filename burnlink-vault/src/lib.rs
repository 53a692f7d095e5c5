//! # Burnlink Vault
//!
//! Server side of one-time secret links.
//!
//! Provides a rotating server keyring, single-use secret storage with
//! pluggable backends, and a retrieval gateway whose responses do not reveal
//! whether a link ever existed.
//!
//! Built on top of `burnlink-envelope` for the AEAD and wire formats.
//!
//! ## Quick Start
//!
//! ```ignore
//! use burnlink_vault::*;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(InMemoryBackend::new());
//! let keyring = Arc::new(ServerKeyring::new(KeyringEntry::generate()));
//! let gateway = RetrievalGateway::new(store, keyring, GatewayConfig::default());
//!
//! let link_id = gateway.create(CreateRequest::server_managed("hello")).await.unwrap();
//!
//! // First reveal delivers, every later one is indistinguishable from a bad link
//! let first = gateway.reveal(link_id.as_str()).await;
//! let second = gateway.reveal(link_id.as_str()).await;
//! assert!(!first.is_empty());
//! assert!(second.is_empty());
//! # });
//! ```

pub mod audit;
pub mod error;
pub mod gateway;
pub mod keyring;
pub mod policy;
pub mod storage;
pub mod types;

// Re-export main types for convenience
pub use audit::{
    AuditAction, AuditEvent, AuditSink, InMemoryAuditSink, RevealOutcome, TracingAuditSink,
};
pub use error::{CreateError, KeyringError, StoreError, ValidationError};
pub use gateway::{CreateRequest, E2eeParams, GatewayConfig, RetrievalGateway, RevealResponse};
pub use keyring::{KeyringEntry, KeyringSnapshot, ServerKeyring};
pub use policy::{RetentionDecision, RetentionPolicy};
pub use storage::{FileBackend, InMemoryBackend, SecretStore};
pub use types::{EncryptionMode, LinkId, Secret, SecretDraft, SecretPayload};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
