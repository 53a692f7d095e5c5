//! Server keyring: ordered symmetric keys for server-managed secrets.
//!
//! Readers take a lock-free snapshot; rotation and retirement publish a new
//! snapshot with [`ArcSwap::rcu`], so a concurrent rotate is never lost and an
//! in-flight decryption keeps the entries it started with.
//!
//! ```text
//! entries:  [ k3 (newest) | k2 | k1 (oldest) ]
//! encrypt:    k3
//! decrypt:    k3 → k2 → k1
//! ```

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use burnlink_envelope::aead::{aead_open, aead_seal, nonce};
use burnlink_envelope::wire::{self, KEY_BYTES, SERVER_AAD};

use crate::error::KeyringError;
use crate::policy::RetentionPolicy;

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// One server key. Material is zeroized on drop and never printed.
pub struct KeyringEntry {
    key_id: String,
    material: Zeroizing<[u8; KEY_BYTES]>,
    created_at: DateTime<Utc>,
}

impl KeyringEntry {
    pub fn new(material: [u8; KEY_BYTES], created_at: DateTime<Utc>) -> Self {
        let material = Zeroizing::new(material);
        let digest = Sha256::digest(&material[..]);
        Self {
            key_id: hex::encode(&digest[..8]),
            material,
            created_at,
        }
    }

    /// Fresh random key created now.
    pub fn generate() -> Self {
        let mut material = [0u8; KEY_BYTES];
        OsRng.fill_bytes(&mut material);
        Self::new(material, Utc::now())
    }

    /// Parse a base64url-encoded 32-byte key.
    pub fn from_encoded(encoded: &str, created_at: DateTime<Utc>) -> Result<Self, KeyringError> {
        let material = wire::decode_fixed::<KEY_BYTES>(encoded.trim()).ok_or_else(|| {
            KeyringError::InvalidKey(format!("expected {KEY_BYTES} base64url-encoded bytes"))
        })?;
        Ok(Self::new(material, created_at))
    }

    /// Fingerprint of the material, safe to log.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn same_material(&self, other: &KeyringEntry) -> bool {
        self.material[..].ct_eq(&other.material[..]).into()
    }
}

impl fmt::Debug for KeyringEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyringEntry")
            .field("key_id", &self.key_id)
            .field("created_at", &self.created_at)
            .field("material", &"[REDACTED]")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Immutable view of the keyring, newest entry first.
#[derive(Debug)]
pub struct KeyringSnapshot {
    pub version: u64,
    entries: Vec<Arc<KeyringEntry>>,
}

impl KeyringSnapshot {
    pub fn entries(&self) -> &[Arc<KeyringEntry>] {
        &self.entries
    }

    pub fn newest(&self) -> &KeyringEntry {
        // snapshots are never empty
        &self.entries[0]
    }

    /// When entry `index` stopped encrypting; `None` for the newest.
    pub fn superseded_at(&self, index: usize) -> Option<DateTime<Utc>> {
        index
            .checked_sub(1)
            .and_then(|newer| self.entries.get(newer))
            .map(|e| e.created_at)
    }

    pub fn key_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key_id.clone()).collect()
    }

    fn contains(&self, entry: &KeyringEntry) -> bool {
        self.entries
            .iter()
            .any(|e| e.key_id == entry.key_id || e.same_material(entry))
    }
}

// ---------------------------------------------------------------------------
// Keyring
// ---------------------------------------------------------------------------

pub struct ServerKeyring {
    current: ArcSwap<KeyringSnapshot>,
}

impl ServerKeyring {
    pub fn new(initial: KeyringEntry) -> Self {
        Self {
            current: ArcSwap::from_pointee(KeyringSnapshot {
                version: 1,
                entries: vec![Arc::new(initial)],
            }),
        }
    }

    /// Build from entries ordered newest first.
    pub fn from_entries(entries: Vec<KeyringEntry>) -> Result<Self, KeyringError> {
        if entries.is_empty() {
            return Err(KeyringError::Empty);
        }
        let mut snapshot = KeyringSnapshot {
            version: 1,
            entries: Vec::with_capacity(entries.len()),
        };
        for entry in entries {
            if snapshot.contains(&entry) {
                return Err(KeyringError::DuplicateKey(entry.key_id));
            }
            snapshot.entries.push(Arc::new(entry));
        }
        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
        })
    }

    pub fn snapshot(&self) -> Arc<KeyringSnapshot> {
        self.current.load_full()
    }

    pub fn len(&self) -> usize {
        self.current.load().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `entry` holds the same material as the current newest key.
    pub fn is_newest(&self, entry: &KeyringEntry) -> bool {
        self.current.load().newest().same_material(entry)
    }

    /// Encrypt under the newest key: `0x01 || nonce || aead_ct`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KeyringError> {
        let snapshot = self.current.load();
        let key = snapshot.newest();
        let n = nonce().map_err(|_| KeyringError::Encryption)?;
        let ct = aead_seal(&key.material, &n, plaintext, SERVER_AAD)
            .map_err(|_| KeyringError::Encryption)?;
        Ok(wire::join_server_ciphertext(&n, &ct))
    }

    /// Try each key newest to oldest. All failures look the same.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, KeyringError> {
        let (n, body) =
            wire::split_server_ciphertext(ciphertext).ok_or(KeyringError::DecryptionFailed)?;
        let snapshot = self.current.load();
        for (position, key) in snapshot.entries.iter().enumerate() {
            if let Ok(pt) = aead_open(&key.material, n, body, SERVER_AAD) {
                tracing::debug!(key_id = %key.key_id, position, "server ciphertext opened");
                return Ok(Zeroizing::new(pt));
            }
        }
        Err(KeyringError::DecryptionFailed)
    }

    /// Install `entry` as the newest key. Returns the new snapshot version.
    pub fn rotate(&self, entry: KeyringEntry) -> Result<u64, KeyringError> {
        let entry = Arc::new(entry);
        let mut result = Err(KeyringError::Empty);
        self.current.rcu(|snapshot| {
            if snapshot.contains(&entry) {
                result = Err(KeyringError::DuplicateKey(entry.key_id.clone()));
                return Arc::clone(snapshot);
            }
            let mut entries = Vec::with_capacity(snapshot.entries.len() + 1);
            entries.push(Arc::clone(&entry));
            entries.extend(snapshot.entries.iter().cloned());
            result = Ok(snapshot.version + 1);
            Arc::new(KeyringSnapshot {
                version: snapshot.version + 1,
                entries,
            })
        });
        if let Ok(version) = result {
            tracing::info!(key_id = %entry.key_id, version, "server key rotated");
        }
        result
    }

    /// Drop entries whose retention window has passed. The newest entry is
    /// never dropped. Returns the key ids that were removed.
    pub fn retire(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> Vec<String> {
        let mut retired = Vec::new();
        self.current.rcu(|snapshot| {
            retired.clear();
            let mut kept = Vec::with_capacity(snapshot.entries.len());
            for (index, entry) in snapshot.entries.iter().enumerate() {
                if policy.evaluate(snapshot.superseded_at(index), now).is_retire() {
                    retired.push(entry.key_id.clone());
                } else {
                    kept.push(Arc::clone(entry));
                }
            }
            if retired.is_empty() {
                return Arc::clone(snapshot);
            }
            Arc::new(KeyringSnapshot {
                version: snapshot.version + 1,
                entries: kept,
            })
        });
        for key_id in &retired {
            tracing::info!(key_id = %key_id, "server key retired");
        }
        retired
    }
}

impl fmt::Debug for ServerKeyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.current.load();
        f.debug_struct("ServerKeyring")
            .field("version", &snapshot.version)
            .field("key_ids", &snapshot.key_ids())
            .finish()
    }
}
