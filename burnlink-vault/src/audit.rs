//! Audit logging: internal outcomes that never reach the caller.
//!
//! Events carry a link-id prefix, the outcome and key ids. Never content.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;

use crate::types::{EncryptionMode, LinkId};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What actually happened to a reveal request.
///
/// Kept server-side only; all non-`Delivered` outcomes produce the same
/// external response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RevealOutcome {
    Delivered,
    NotFoundOrConsumed,
    DecryptionFailed,
    TransientStoreError,
    MalformedLinkId,
}

impl fmt::Display for RevealOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RevealOutcome::Delivered => "delivered",
            RevealOutcome::NotFoundOrConsumed => "not_found_or_consumed",
            RevealOutcome::DecryptionFailed => "decryption_failed",
            RevealOutcome::TransientStoreError => "transient_store_error",
            RevealOutcome::MalformedLinkId => "malformed_link_id",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Audit events
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AuditAction {
    SecretStored { mode: EncryptionMode, ttl_seconds: u64 },
    CreateFailed { reason: String },
    RevealAttempted { outcome: RevealOutcome },
    KeyRotated { key_id: String, keyring_version: u64 },
    KeyRetired { key_id: String },
    SweepRun { reclaimed: usize },
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    /// First 8 characters of the link id, when one was involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_ref: Option<String>,
    #[serde(flatten)]
    pub action: AuditAction,
}

impl AuditEvent {
    pub fn for_link(link_id: &LinkId, action: AuditAction) -> Self {
        Self {
            timestamp: Utc::now(),
            link_ref: Some(link_id.short().to_owned()),
            action,
        }
    }

    pub fn system(action: AuditAction) -> Self {
        Self {
            timestamp: Utc::now(),
            link_ref: None,
            action,
        }
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Where audit events go.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits each event as a structured `tracing` event on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let link = event.link_ref.as_deref().unwrap_or("-");
        match &event.action {
            AuditAction::RevealAttempted { outcome } => match outcome {
                RevealOutcome::Delivered | RevealOutcome::NotFoundOrConsumed => {
                    tracing::info!(target: "audit", link, %outcome, "reveal")
                }
                RevealOutcome::MalformedLinkId => {
                    tracing::debug!(target: "audit", %outcome, "reveal")
                }
                RevealOutcome::DecryptionFailed | RevealOutcome::TransientStoreError => {
                    tracing::warn!(target: "audit", link, %outcome, "reveal")
                }
            },
            AuditAction::CreateFailed { reason } => {
                tracing::warn!(target: "audit", reason = %reason, "create failed")
            }
            action => tracing::info!(target: "audit", link, action = ?action, "event"),
        }
    }
}

/// Keeps every event in memory (testing).
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Outcomes of every recorded reveal, in order.
    pub fn reveal_outcomes(&self) -> Vec<RevealOutcome> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e.action {
                AuditAction::RevealAttempted { outcome } => Some(outcome),
                _ => None,
            })
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}
