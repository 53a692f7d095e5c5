//! Retrieval gateway: create and reveal without an existence oracle.
//!
//! Reveal runs an explicit state machine:
//!
//! ```text
//! Received ──malformed id──────────────────────────────┐
//!    │                                                 ▼
//!    └─► LookedUp ──absent / store fault──────────► Responded
//!           │                                          ▲
//!           └─► DecryptAttempted ──delivered / failed──┘
//! ```
//!
//! Every path out of `Responded` that is not `Delivered` produces the same
//! empty body, padded to the same length and released no earlier than the
//! same response-time floor.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use zeroize::Zeroizing;

use burnlink_envelope::wire::{self, AEAD_TAG_BYTES, NONCE_BYTES, SALT_BYTES};
use burnlink_envelope::Envelope;

use crate::audit::{AuditAction, AuditEvent, AuditSink, RevealOutcome, TracingAuditSink};
use crate::error::{CreateError, KeyringError, StoreError, ValidationError};
use crate::keyring::{KeyringEntry, ServerKeyring};
use crate::policy::RetentionPolicy;
use crate::storage::SecretStore;
use crate::types::{LinkId, Secret, SecretDraft, SecretPayload};

pub const DEFAULT_MIME_TYPE: &str = "text/plain";
pub const MAX_MIME_TYPE_LEN: usize = 255;
pub const PADDING_FIELD: &str = "_padding";

/// Longest JSON string escape of a single input byte.
const MAX_JSON_ESCAPE_RATIO: usize = 6;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Largest accepted plaintext, or decoded E2EE ciphertext minus its tag.
    pub max_secret_bytes: usize,
    pub default_ttl: Duration,
    pub max_ttl: Duration,
    /// Per-attempt bound on each store call.
    pub store_timeout: Duration,
    pub store_retries: u32,
    pub retry_backoff: Duration,
    /// No reveal response is released before this has elapsed.
    pub min_response_time: Duration,
    /// Upper bound of the uniform random delay added to the floor.
    pub response_jitter: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_secret_bytes: 100 * 1024,
            default_ttl: Duration::from_secs(86400),
            max_ttl: Duration::from_secs(7 * 86400),
            store_timeout: Duration::from_secs(2),
            store_retries: 2,
            retry_backoff: Duration::from_millis(50),
            min_response_time: Duration::from_millis(50),
            response_jitter: Duration::from_millis(20),
        }
    }
}

impl GatewayConfig {
    /// Serialized size every reveal body is padded to.
    ///
    /// The payload budget is the larger of the base64url E2EE ciphertext and
    /// the JSON-escaped server-managed plaintext, where a control byte can
    /// become a six-char `\u00XX`. 1 KiB covers the mime type and the rest
    /// of the object.
    pub fn padded_body_bytes(&self) -> usize {
        let sealed = 4 * (self.max_secret_bytes + AEAD_TAG_BYTES).div_ceil(3);
        let escaped = MAX_JSON_ESCAPE_RATIO * self.max_secret_bytes;
        sealed.max(escaped) + 1024
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.max_ttl)
    }
}

// ---------------------------------------------------------------------------
// Create requests
// ---------------------------------------------------------------------------

/// Create body: either `plaintext`, or `ciphertext` + `salt` + `nonce`.
#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plaintext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

impl CreateRequest {
    pub fn server_managed(plaintext: impl Into<String>) -> Self {
        Self {
            plaintext: Some(plaintext.into()),
            ..Self::default()
        }
    }

    pub fn end_to_end(envelope: &Envelope) -> Self {
        Self {
            ciphertext: Some(envelope.ciphertext.clone()),
            salt: Some(envelope.salt.clone()),
            nonce: Some(envelope.nonce.clone()),
            ..Self::default()
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    /// All checks that can fail without touching the store or the keyring.
    pub fn validate(&self, config: &GatewayConfig) -> Result<ValidatedCreate, ValidationError> {
        let too_large = || ValidationError::TooLarge {
            max_kib: config.max_secret_bytes / 1024,
        };
        let e2ee_present =
            self.ciphertext.is_some() || self.salt.is_some() || self.nonce.is_some();

        let content = match (&self.plaintext, e2ee_present) {
            (Some(_), true) => return Err(ValidationError::AmbiguousMode),
            (None, false) => return Err(ValidationError::MissingField("plaintext")),
            (Some(plaintext), false) => {
                if plaintext.is_empty() {
                    return Err(ValidationError::EmptyPayload);
                }
                if plaintext.len() > config.max_secret_bytes {
                    return Err(too_large());
                }
                Content::Plaintext(Zeroizing::new(plaintext.as_bytes().to_vec()))
            }
            (None, true) => {
                let ciphertext = required(&self.ciphertext, "ciphertext")?;
                let salt = required(&self.salt, "salt")?;
                let nonce = required(&self.nonce, "nonce")?;

                let ciphertext = wire::decode_field(ciphertext)
                    .ok_or(ValidationError::BadEncoding("ciphertext"))?;
                if ciphertext.len() < AEAD_TAG_BYTES {
                    return Err(ValidationError::CiphertextTooShort);
                }
                if ciphertext.len() - AEAD_TAG_BYTES > config.max_secret_bytes {
                    return Err(too_large());
                }
                Content::Sealed {
                    ciphertext,
                    salt: decode_exact::<SALT_BYTES>(salt, "salt")?,
                    nonce: decode_exact::<NONCE_BYTES>(nonce, "nonce")?,
                }
            }
        };

        let max_ttl = config.max_ttl.as_secs();
        let ttl_seconds = match self.ttl_seconds {
            None => config.default_ttl.as_secs().min(max_ttl),
            Some(t) if t == 0 || t > max_ttl => {
                return Err(ValidationError::TtlOutOfRange { max: max_ttl })
            }
            Some(t) => t,
        };

        let mime_type = match self.mime_type.as_deref() {
            None => DEFAULT_MIME_TYPE.to_owned(),
            Some(m) if !is_valid_mime_type(m) => return Err(ValidationError::BadMimeType),
            Some(m) => m.to_owned(),
        };

        Ok(ValidatedCreate {
            content,
            mime_type,
            ttl_seconds,
        })
    }
}

impl fmt::Debug for CreateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateRequest")
            .field("plaintext", &self.plaintext.as_ref().map(|_| "[REDACTED]"))
            .field("ciphertext_len", &self.ciphertext.as_ref().map(String::len))
            .field("mime_type", &self.mime_type)
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}

/// Printable ASCII that serializes without escapes, so its size on the wire
/// is its length.
fn is_valid_mime_type(m: &str) -> bool {
    !m.is_empty()
        && m.len() <= MAX_MIME_TYPE_LEN
        && m.bytes().all(|b| (0x20..0x7f).contains(&b) && b != b'"' && b != b'\\')
}

fn required<'a>(
    field: &'a Option<String>,
    name: &'static str,
) -> Result<&'a str, ValidationError> {
    field.as_deref().ok_or(ValidationError::MissingField(name))
}

fn decode_exact<const N: usize>(s: &str, field: &'static str) -> Result<[u8; N], ValidationError> {
    let bytes = wire::decode_field(s).ok_or(ValidationError::BadEncoding(field))?;
    bytes
        .try_into()
        .map_err(|_| ValidationError::BadLength { field, expected: N })
}

/// A create request that passed validation.
pub struct ValidatedCreate {
    content: Content,
    pub mime_type: String,
    pub ttl_seconds: u64,
}

enum Content {
    Plaintext(Zeroizing<Vec<u8>>),
    Sealed {
        ciphertext: Vec<u8>,
        salt: [u8; SALT_BYTES],
        nonce: [u8; NONCE_BYTES],
    },
}

// ---------------------------------------------------------------------------
// Reveal responses
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct E2eeParams {
    pub salt: String,
    pub nonce: String,
}

/// What the caller sees. `Empty` covers every non-delivered outcome.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RevealResponse {
    EndToEnd {
        payload: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
        e2ee: E2eeParams,
    },
    ServerManaged {
        payload: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Empty {},
}

impl RevealResponse {
    pub fn empty() -> Self {
        RevealResponse::Empty {}
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RevealResponse::Empty {})
    }

    /// The envelope a client needs to unseal an end-to-end payload.
    pub fn envelope(&self) -> Option<Envelope> {
        match self {
            RevealResponse::EndToEnd { payload, e2ee, .. } => Some(Envelope {
                salt: e2ee.salt.clone(),
                nonce: e2ee.nonce.clone(),
                ciphertext: payload.clone(),
            }),
            _ => None,
        }
    }

    /// Serialize with a random `_padding` field so the body is exactly
    /// `target` bytes. Bodies already at or over `target` are not padded.
    pub fn to_padded_json(&self, target: usize) -> serde_json::Result<Vec<u8>> {
        let mut value = serde_json::to_value(self)?;
        let Some(object) = value.as_object_mut() else {
            return serde_json::to_vec(self);
        };
        object.insert(PADDING_FIELD.into(), Value::String(String::new()));
        let unpadded = serde_json::to_vec(&value)?.len();
        if unpadded >= target {
            return serde_json::to_vec(self);
        }
        if let Some(object) = value.as_object_mut() {
            object.insert(
                PADDING_FIELD.into(),
                Value::String(random_padding(target - unpadded)),
            );
        }
        serde_json::to_vec(&value)
    }
}

impl fmt::Debug for RevealResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevealResponse::EndToEnd { mime_type, .. } => {
                f.debug_struct("EndToEnd").field("mime_type", mime_type).finish()
            }
            RevealResponse::ServerManaged { mime_type, .. } => f
                .debug_struct("ServerManaged")
                .field("mime_type", mime_type)
                .finish(),
            RevealResponse::Empty {} => f.write_str("Empty"),
        }
    }
}

/// `len` random base64url characters (no JSON escaping needed).
fn random_padding(len: usize) -> String {
    let mut bytes = vec![0u8; len * 3 / 4 + 3];
    OsRng.fill_bytes(&mut bytes);
    let mut s = wire::encode_field(&bytes);
    s.truncate(len);
    s
}

// ---------------------------------------------------------------------------
// Reveal state machine
// ---------------------------------------------------------------------------

enum RevealState {
    Received(Result<LinkId, ValidationError>),
    LookedUp(LinkId, Result<Option<Secret>, StoreError>),
    DecryptAttempted(LinkId, Result<RevealResponse, RevealOutcome>),
    Responded(Option<LinkId>, RevealResponse, RevealOutcome),
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

pub struct RetrievalGateway {
    store: Arc<dyn SecretStore>,
    keyring: Arc<ServerKeyring>,
    audit: Arc<dyn AuditSink>,
    config: GatewayConfig,
}

impl RetrievalGateway {
    pub fn new(
        store: Arc<dyn SecretStore>,
        keyring: Arc<ServerKeyring>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            store,
            keyring,
            audit: Arc::new(TracingAuditSink),
            config,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn keyring(&self) -> &Arc<ServerKeyring> {
        &self.keyring
    }

    // -- create ------------------------------------------------------------

    /// Validate, encrypt if server-managed, and store. Returns the new link id.
    pub async fn create(&self, request: CreateRequest) -> Result<LinkId, CreateError> {
        let validated = request.validate(&self.config)?;
        let result = self.store_validated(validated).await;
        if let Err(e) = &result {
            self.audit.record(AuditEvent::system(AuditAction::CreateFailed {
                reason: e.to_string(),
            }));
        }
        result
    }

    async fn store_validated(&self, validated: ValidatedCreate) -> Result<LinkId, CreateError> {
        let payload = match validated.content {
            Content::Plaintext(plaintext) => {
                let keyring = Arc::clone(&self.keyring);
                let ciphertext = tokio::task::spawn_blocking(move || keyring.encrypt(&plaintext))
                    .await
                    .map_err(|e| {
                        tracing::error!(error = %e, "encryption task failed");
                        KeyringError::Encryption
                    })??;
                SecretPayload::ServerManaged { ciphertext }
            }
            Content::Sealed {
                ciphertext,
                salt,
                nonce,
            } => SecretPayload::EndToEnd {
                ciphertext,
                salt,
                nonce,
            },
        };
        let mode = payload.mode();
        let draft = SecretDraft {
            payload,
            mime_type: validated.mime_type,
            created_at: Utc::now(),
            ttl_seconds: validated.ttl_seconds,
        };
        let ttl_seconds = draft.ttl_seconds;

        let link_id = self
            .with_store_retry("put", || self.store.put(draft.clone()))
            .await?;

        self.audit.record(AuditEvent::for_link(
            &link_id,
            AuditAction::SecretStored { mode, ttl_seconds },
        ));
        Ok(link_id)
    }

    // -- reveal ------------------------------------------------------------

    /// Consume the secret behind `raw_link_id`, if any.
    ///
    /// Never fails: every non-delivered outcome maps to
    /// [`RevealResponse::Empty`]. The internal outcome goes to the audit sink.
    pub async fn reveal(&self, raw_link_id: &str) -> RevealResponse {
        let release_at = self.release_deadline();

        let mut state = RevealState::Received(LinkId::parse(raw_link_id));
        let (link_id, response, outcome) = loop {
            state = match state {
                RevealState::Received(Err(_)) => RevealState::Responded(
                    None,
                    RevealResponse::empty(),
                    RevealOutcome::MalformedLinkId,
                ),
                RevealState::Received(Ok(id)) => {
                    let looked_up = self
                        .with_store_retry("fetch_and_delete", || self.store.fetch_and_delete(&id))
                        .await;
                    RevealState::LookedUp(id, looked_up)
                }
                RevealState::LookedUp(id, Ok(None)) => RevealState::Responded(
                    Some(id),
                    RevealResponse::empty(),
                    RevealOutcome::NotFoundOrConsumed,
                ),
                RevealState::LookedUp(id, Ok(Some(secret))) => {
                    let opened = self.open(secret).await;
                    RevealState::DecryptAttempted(id, opened)
                }
                RevealState::LookedUp(id, Err(e)) => {
                    tracing::warn!(link = %id.short(), error = %e, "store lookup failed");
                    let outcome = match e {
                        // the record was consumed but cannot be read back
                        StoreError::Corrupt(_) => RevealOutcome::DecryptionFailed,
                        _ => RevealOutcome::TransientStoreError,
                    };
                    RevealState::Responded(Some(id), RevealResponse::empty(), outcome)
                }
                RevealState::DecryptAttempted(id, Ok(response)) => {
                    RevealState::Responded(Some(id), response, RevealOutcome::Delivered)
                }
                RevealState::DecryptAttempted(id, Err(outcome)) => {
                    RevealState::Responded(Some(id), RevealResponse::empty(), outcome)
                }
                RevealState::Responded(id, response, outcome) => break (id, response, outcome),
            };
        };

        let action = AuditAction::RevealAttempted { outcome };
        self.audit.record(match &link_id {
            Some(id) => AuditEvent::for_link(id, action),
            None => AuditEvent::system(action),
        });

        tokio::time::sleep_until(release_at).await;
        response
    }

    /// Reveal and serialize to the padded wire body.
    pub async fn reveal_body(&self, raw_link_id: &str) -> Vec<u8> {
        let response = self.reveal(raw_link_id).await;
        self.render(&response)
    }

    pub fn render(&self, response: &RevealResponse) -> Vec<u8> {
        match response.to_padded_json(self.config.padded_body_bytes()) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "could not serialize reveal response");
                b"{}".to_vec()
            }
        }
    }

    /// HEAD on a reveal URL: same timing floor, no store access.
    pub async fn acknowledge_head(&self) {
        tokio::time::sleep_until(self.release_deadline()).await;
    }

    async fn open(&self, secret: Secret) -> Result<RevealResponse, RevealOutcome> {
        let Secret {
            link_id,
            payload,
            mime_type,
            ..
        } = secret;
        match payload {
            SecretPayload::EndToEnd {
                ciphertext,
                salt,
                nonce,
            } => Ok(RevealResponse::EndToEnd {
                payload: wire::encode_field(&ciphertext),
                mime_type,
                e2ee: E2eeParams {
                    salt: wire::encode_field(&salt),
                    nonce: wire::encode_field(&nonce),
                },
            }),
            SecretPayload::ServerManaged { ciphertext } => {
                let keyring = Arc::clone(&self.keyring);
                let opened = tokio::task::spawn_blocking(move || keyring.decrypt(&ciphertext))
                    .await
                    .map_err(|e| {
                        tracing::error!(
                            link = %link_id.short(),
                            error = %e,
                            "decryption task failed"
                        );
                        RevealOutcome::DecryptionFailed
                    })?;
                let plaintext = opened.map_err(|_| RevealOutcome::DecryptionFailed)?;
                let payload = String::from_utf8(plaintext.to_vec())
                    .map_err(|_| RevealOutcome::DecryptionFailed)?;
                Ok(RevealResponse::ServerManaged { payload, mime_type })
            }
        }
    }

    // -- maintenance -------------------------------------------------------

    /// Remove expired secrets. Returns how many were reclaimed.
    pub async fn sweep(&self) -> Result<usize, StoreError> {
        let reclaimed = self.store.sweep_expired(Utc::now()).await?;
        if reclaimed > 0 {
            self.audit
                .record(AuditEvent::system(AuditAction::SweepRun { reclaimed }));
        }
        Ok(reclaimed)
    }

    /// Drop keyring entries past their retention window.
    pub fn retire_keys(&self) -> Vec<String> {
        let retired = self
            .keyring
            .retire(&self.config.retention_policy(), Utc::now());
        for key_id in &retired {
            self.audit.record(AuditEvent::system(AuditAction::KeyRetired {
                key_id: key_id.clone(),
            }));
        }
        retired
    }

    /// Make `entry` the newest key unless it already is. Returns the new
    /// keyring version, or `None` when nothing changed.
    pub fn install_key(&self, entry: KeyringEntry) -> Result<Option<u64>, KeyringError> {
        if self.keyring.is_newest(&entry) {
            return Ok(None);
        }
        let key_id = entry.key_id().to_owned();
        let version = self.keyring.rotate(entry)?;
        self.audit.record(AuditEvent::system(AuditAction::KeyRotated {
            key_id,
            keyring_version: version,
        }));
        Ok(Some(version))
    }

    // -- helpers -----------------------------------------------------------

    fn release_deadline(&self) -> Instant {
        let jitter_us = self.config.response_jitter.as_micros() as u64;
        let jitter = if jitter_us == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(OsRng.next_u64() % (jitter_us + 1))
        };
        Instant::now() + self.config.min_response_time + jitter
    }

    /// Run a store call under the configured timeout, retrying transient
    /// faults a bounded number of times.
    async fn with_store_retry<T, F, Fut>(
        &self,
        op: &'static str,
        mut call: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(self.config.store_timeout, call()).await {
                Ok(r) => r,
                Err(_) => Err(StoreError::Timeout(self.config.store_timeout)),
            };
            match result {
                Err(e) if e.is_transient() && attempt < self.config.store_retries => {
                    attempt += 1;
                    tracing::warn!(op, attempt, error = %e, "transient store fault, retrying");
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
                other => return other,
            }
        }
    }
}
