//! Core types: LinkId, EncryptionMode, SecretPayload, Secret.

use chrono::{DateTime, Duration, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;

use burnlink_envelope::wire::{NONCE_BYTES, SALT_BYTES};

use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// Link identifiers
// ---------------------------------------------------------------------------

const LINK_ID_BYTES: usize = 16;
const LINK_ID_HEX_LEN: usize = LINK_ID_BYTES * 2;

/// Unguessable secret handle (128 random bits, lowercase hex).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LinkId(String);

impl LinkId {
    /// Create a new random LinkId.
    pub fn generate() -> Self {
        let mut bytes = [0u8; LINK_ID_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Parse an untrusted link id. Only the canonical form is accepted, so a
    /// parsed id is always safe to use as a file name.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let canonical = raw.len() == LINK_ID_HEX_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if canonical {
            Ok(Self(raw.to_owned()))
        } else {
            Err(ValidationError::MalformedLinkId)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for logs and audit events.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for LinkId {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<LinkId> for String {
    fn from(id: LinkId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Who can decrypt a stored payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionMode {
    /// Sealed under the server keyring.
    ServerManaged,
    /// Sealed by the sender under a passphrase the server never sees.
    EndToEnd,
}

impl fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionMode::ServerManaged => write!(f, "server_managed"),
            EncryptionMode::EndToEnd => write!(f, "end_to_end"),
        }
    }
}

/// Stored ciphertext. The server can open only the `ServerManaged` variant.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SecretPayload {
    ServerManaged {
        #[serde(with = "b64")]
        ciphertext: Vec<u8>,
    },
    EndToEnd {
        #[serde(with = "b64")]
        ciphertext: Vec<u8>,
        #[serde(with = "b64_array")]
        salt: [u8; SALT_BYTES],
        #[serde(with = "b64_array")]
        nonce: [u8; NONCE_BYTES],
    },
}

impl SecretPayload {
    pub fn mode(&self) -> EncryptionMode {
        match self {
            SecretPayload::ServerManaged { .. } => EncryptionMode::ServerManaged,
            SecretPayload::EndToEnd { .. } => EncryptionMode::EndToEnd,
        }
    }

    pub fn ciphertext(&self) -> &[u8] {
        match self {
            SecretPayload::ServerManaged { ciphertext } => ciphertext,
            SecretPayload::EndToEnd { ciphertext, .. } => ciphertext,
        }
    }
}

impl fmt::Debug for SecretPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretPayload")
            .field("mode", &self.mode())
            .field("ciphertext_len", &self.ciphertext().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

/// A secret before it has been assigned a link id.
#[derive(Clone, Debug)]
pub struct SecretDraft {
    pub payload: SecretPayload,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl SecretDraft {
    pub fn into_secret(self, link_id: LinkId) -> Secret {
        Secret {
            link_id,
            payload: self.payload,
            mime_type: self.mime_type,
            created_at: self.created_at,
            ttl_seconds: self.ttl_seconds,
        }
    }
}

/// Upper bound applied when reading a TTL back from storage (100 years).
const MAX_RECORD_TTL_SECONDS: u64 = 100 * 365 * 24 * 3600;

/// A stored one-time secret.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub link_id: LinkId,
    pub payload: SecretPayload,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl Secret {
    pub fn expires_at(&self) -> DateTime<Utc> {
        // clamp so hostile records cannot overflow the arithmetic
        let ttl = self.ttl_seconds.min(MAX_RECORD_TTL_SECONDS) as i64;
        self.created_at
            .checked_add_signed(Duration::seconds(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Expired secrets are treated as absent by every lookup.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

mod b64 {
    use burnlink_envelope::wire;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&wire::encode_field(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        wire::decode_field(&s).ok_or_else(|| de::Error::custom("invalid base64url"))
    }
}

mod b64_array {
    use burnlink_envelope::wire;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        s: S,
    ) -> Result<S::Ok, S::Error> {
        s.serialize_str(&wire::encode_field(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        d: D,
    ) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(d)?;
        wire::decode_fixed::<N>(&s)
            .ok_or_else(|| de::Error::custom(format!("expected {N} base64url-encoded bytes")))
    }
}
