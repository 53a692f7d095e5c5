//! Storage backends: where one-time secrets live until they are read.
//!
//! The only read is [`SecretStore::fetch_and_delete`]; there is no way to
//! look at a secret without consuming it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand_core::{OsRng, RngCore};
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::types::{LinkId, Secret, SecretDraft};

/// How many fresh link ids `put` draws before giving up.
pub const MAX_ID_ATTEMPTS: usize = 4;

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// Backend for one-time secrets.
///
/// Implementations must make `fetch_and_delete` atomic: of any number of
/// concurrent calls for the same id, at most one returns `Some`.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Insert unless the id is taken. `Ok(false)` on collision.
    async fn put_if_absent(&self, secret: &Secret) -> Result<bool, StoreError>;

    /// Remove and return the secret. Expired secrets are removed and
    /// reported as absent.
    async fn fetch_and_delete(&self, id: &LinkId) -> Result<Option<Secret>, StoreError>;

    /// Remove every secret expired at `now`. Returns how many were removed.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Store under a fresh random id, redrawing on collision.
    async fn put(&self, draft: SecretDraft) -> Result<LinkId, StoreError> {
        let mut secret = draft.into_secret(LinkId::generate());
        for _ in 0..MAX_ID_ATTEMPTS {
            if self.put_if_absent(&secret).await? {
                return Ok(secret.link_id);
            }
            tracing::warn!(link = %secret.link_id.short(), "link id collision, redrawing");
            secret.link_id = LinkId::generate();
        }
        Err(StoreError::IdExhausted)
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// In-memory storage (single process, lost on restart).
pub struct InMemoryBackend {
    secrets: Mutex<HashMap<LinkId, Secret>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            secrets: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.secrets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretStore for InMemoryBackend {
    async fn put_if_absent(&self, secret: &Secret) -> Result<bool, StoreError> {
        let mut secrets = self.secrets.lock();
        if secrets.contains_key(&secret.link_id) {
            return Ok(false);
        }
        secrets.insert(secret.link_id.clone(), secret.clone());
        Ok(true)
    }

    async fn fetch_and_delete(&self, id: &LinkId) -> Result<Option<Secret>, StoreError> {
        let taken = self.secrets.lock().remove(id);
        Ok(taken.filter(|s| !s.is_expired(Utc::now())))
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut secrets = self.secrets.lock();
        let before = secrets.len();
        secrets.retain(|_, s| !s.is_expired(now));
        Ok(before - secrets.len())
    }
}

// ---------------------------------------------------------------------------
// File backend
// ---------------------------------------------------------------------------

/// File-based storage (one JSON file per secret).
///
/// Directory layout:
/// ```text
/// secrets/
///   {link_id}.json               published secret
///   .{link_id}.{rand}.tmp        being written
///   .{link_id}.{rand}.claim      taken by one reader, about to be removed
/// ```
///
/// Publishing uses `hard_link`, which fails if the target exists. Claiming
/// uses `rename` to a name unique to the claimant; the filesystem lets only
/// one rename of the same source succeed.
///
/// Scratch files outlive their owner when a write or claim is cut short (a
/// timed-out future whose blocking rename still lands, or a crash). A sweep
/// deletes any scratch file that was already present at the previous sweep,
/// so in-flight operations get a full sweep interval to finish.
pub struct FileBackend {
    dir: PathBuf,
    seen_scratch: Mutex<HashSet<PathBuf>>,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| StoreError::Transient(format!("create dir: {e}")))?;
        Ok(Self {
            dir,
            seen_scratch: Mutex::new(HashSet::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn secret_path(&self, id: &LinkId) -> PathBuf {
        self.dir.join(format!("{}.json", id.as_str()))
    }

    fn scratch_path(&self, id: &str, suffix: &str) -> PathBuf {
        let mut nonce = [0u8; 8];
        OsRng.fill_bytes(&mut nonce);
        self.dir
            .join(format!(".{}.{}.{}", id, hex::encode(nonce), suffix))
    }

    /// Atomically take ownership of a published file. `None` if someone
    /// else got there first.
    async fn claim(&self, path: &Path, id: &str) -> Result<Option<PathBuf>, StoreError> {
        let claim = self.scratch_path(id, "claim");
        match tokio::fs::rename(path, &claim).await {
            Ok(()) => Ok(Some(claim)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Transient(format!("claim: {e}"))),
        }
    }

    async fn consume_claim(&self, claim: &Path) -> Result<Secret, StoreError> {
        let data = tokio::fs::read(claim)
            .await
            .map_err(|e| StoreError::Transient(format!("read: {e}")));
        if let Err(e) = tokio::fs::remove_file(claim).await {
            tracing::warn!(error = %e, "could not remove claimed secret file");
        }
        serde_json::from_slice(&data?).map_err(|e| StoreError::Corrupt(format!("parse: {e}")))
    }
}

#[async_trait]
impl SecretStore for FileBackend {
    async fn put_if_absent(&self, secret: &Secret) -> Result<bool, StoreError> {
        let path = self.secret_path(&secret.link_id);
        let json = serde_json::to_vec(secret)
            .map_err(|e| StoreError::Corrupt(format!("serialize: {e}")))?;

        // Write fully to a private name, then publish without overwriting
        let tmp = self.scratch_path(secret.link_id.as_str(), "tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| StoreError::Transient(format!("write: {e}")))?;
        let published = tokio::fs::hard_link(&tmp, &path).await;
        if let Err(e) = tokio::fs::remove_file(&tmp).await {
            tracing::warn!(error = %e, "could not remove temp file");
        }
        match published {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StoreError::Transient(format!("publish: {e}"))),
        }
    }

    async fn fetch_and_delete(&self, id: &LinkId) -> Result<Option<Secret>, StoreError> {
        let Some(claim) = self.claim(&self.secret_path(id), id.as_str()).await? else {
            return Ok(None);
        };
        let secret = self.consume_claim(&claim).await?;
        if secret.link_id != *id || secret.is_expired(Utc::now()) {
            return Ok(None);
        }
        Ok(Some(secret))
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut reclaimed = 0;
        let previously_seen = std::mem::take(&mut *self.seen_scratch.lock());
        let mut still_pending = HashSet::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| StoreError::Transient(format!("readdir: {e}")))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Transient(format!("entry: {e}")))?
        {
            let path = entry.path();
            if is_scratch(&path) {
                if !previously_seen.contains(&path) {
                    still_pending.insert(path);
                    continue;
                }
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        tracing::warn!("removed abandoned scratch file");
                        reclaimed += 1;
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "could not remove abandoned scratch file");
                        still_pending.insert(path);
                    }
                }
                continue;
            }

            let Some(id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| LinkId::parse(n).ok())
            else {
                continue;
            };

            let expired = match tokio::fs::read(&path).await {
                Ok(data) => match serde_json::from_slice::<Secret>(&data) {
                    Ok(secret) => secret.is_expired(now),
                    Err(e) => {
                        tracing::warn!(link = %id.short(), error = %e, "unreadable secret file");
                        false
                    }
                },
                // consumed between listing and reading
                Err(e) if e.kind() == ErrorKind::NotFound => false,
                Err(e) => return Err(StoreError::Transient(format!("read: {e}"))),
            };
            if !expired {
                continue;
            }
            // Claim first so a concurrent reveal cannot also receive it
            if let Some(claim) = self.claim(&path, id.as_str()).await? {
                if let Err(e) = tokio::fs::remove_file(&claim).await {
                    tracing::warn!(error = %e, "could not remove swept secret file");
                }
                reclaimed += 1;
            }
        }
        *self.seen_scratch.lock() = still_pending;
        Ok(reclaimed)
    }
}

/// `.{id}.{rand}.tmp` or `.{id}.{rand}.claim`
fn is_scratch(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && (n.ends_with(".tmp") || n.ends_with(".claim")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SecretPayload;
    use chrono::Duration;
    use std::sync::Arc;

    fn draft(ttl_seconds: u64) -> SecretDraft {
        SecretDraft {
            payload: SecretPayload::ServerManaged {
                ciphertext: vec![1, 2, 3],
            },
            mime_type: "text/plain".into(),
            created_at: Utc::now(),
            ttl_seconds,
        }
    }

    fn expired_secret() -> Secret {
        let mut d = draft(10);
        d.created_at = Utc::now() - Duration::seconds(60);
        d.into_secret(LinkId::generate())
    }

    async fn single_use<S: SecretStore>(store: &S) {
        let id = store.put(draft(60)).await.unwrap();
        let first = store.fetch_and_delete(&id).await.unwrap().unwrap();
        assert_eq!(first.link_id, id);
        assert_eq!(first.payload.ciphertext(), &[1, 2, 3]);
        assert!(store.fetch_and_delete(&id).await.unwrap().is_none());
    }

    async fn expired_is_absent<S: SecretStore>(store: &S) {
        let secret = expired_secret();
        assert!(store.put_if_absent(&secret).await.unwrap());
        assert!(store.fetch_and_delete(&secret.link_id).await.unwrap().is_none());
        // and it was removed, not just hidden
        assert_eq!(store.sweep_expired(Utc::now()).await.unwrap(), 0);
    }

    async fn collision_is_reported<S: SecretStore>(store: &S) {
        let secret = draft(60).into_secret(LinkId::generate());
        assert!(store.put_if_absent(&secret).await.unwrap());
        assert!(!store.put_if_absent(&secret).await.unwrap());
    }

    async fn sweep_reclaims_only_expired<S: SecretStore>(store: &S) {
        let live = store.put(draft(3600)).await.unwrap();
        for _ in 0..3 {
            store.put_if_absent(&expired_secret()).await.unwrap();
        }
        assert_eq!(store.sweep_expired(Utc::now()).await.unwrap(), 3);
        assert!(store.fetch_and_delete(&live).await.unwrap().is_some());
    }

    async fn concurrent_fetch_has_one_winner<S: SecretStore + 'static>(store: Arc<S>) {
        let id = store.put(draft(60)).await.unwrap();
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let id = id.clone();
                tokio::spawn(async move { store.fetch_and_delete(&id).await.unwrap() })
            })
            .collect();
        let mut winners = 0;
        for t in tasks {
            if t.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn memory_single_use() {
        single_use(&InMemoryBackend::new()).await;
    }

    #[tokio::test]
    async fn memory_expired_is_absent() {
        expired_is_absent(&InMemoryBackend::new()).await;
    }

    #[tokio::test]
    async fn memory_collision_is_reported() {
        collision_is_reported(&InMemoryBackend::new()).await;
    }

    #[tokio::test]
    async fn memory_sweep() {
        let store = InMemoryBackend::new();
        sweep_reclaims_only_expired(&store).await;
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn memory_concurrent_fetch() {
        concurrent_fetch_has_one_winner(Arc::new(InMemoryBackend::new())).await;
    }

    #[tokio::test]
    async fn file_single_use() {
        let dir = tempfile::tempdir().unwrap();
        single_use(&FileBackend::new(dir.path()).unwrap()).await;
    }

    #[tokio::test]
    async fn file_expired_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        expired_is_absent(&FileBackend::new(dir.path()).unwrap()).await;
    }

    #[tokio::test]
    async fn file_collision_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        collision_is_reported(&FileBackend::new(dir.path()).unwrap()).await;
    }

    #[tokio::test]
    async fn file_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackend::new(dir.path()).unwrap();
        sweep_reclaims_only_expired(&store).await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn file_concurrent_fetch() {
        let dir = tempfile::tempdir().unwrap();
        concurrent_fetch_has_one_winner(Arc::new(FileBackend::new(dir.path()).unwrap())).await;
    }

    #[tokio::test]
    async fn file_leaves_no_scratch_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackend::new(dir.path()).unwrap();
        let id = store.put(draft(60)).await.unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![format!("{id}.json")]);

        store.fetch_and_delete(&id).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn file_sweep_removes_abandoned_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackend::new(dir.path()).unwrap();

        // a claim whose owner never got to delete it, and a half-finished write
        let secret = expired_secret();
        let json = serde_json::to_vec(&secret).unwrap();
        let claim = dir.path().join(format!(".{}.0011223344556677.claim", secret.link_id));
        let tmp = dir.path().join(format!(".{}.8899aabbccddeeff.tmp", LinkId::generate()));
        std::fs::write(&claim, &json).unwrap();
        std::fs::write(&tmp, &json).unwrap();
        let live = store.put(draft(3600)).await.unwrap();

        // first sight only marks them
        assert_eq!(store.sweep_expired(Utc::now()).await.unwrap(), 0);
        assert!(claim.exists());
        assert!(tmp.exists());

        assert_eq!(store.sweep_expired(Utc::now()).await.unwrap(), 2);
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![format!("{live}.json")]);
    }

    #[tokio::test]
    async fn file_sweep_spares_fresh_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackend::new(dir.path()).unwrap();
        store.sweep_expired(Utc::now()).await.unwrap();

        // appears between two sweeps: owner may still be working on it
        let tmp = dir.path().join(format!(".{}.0000000000000000.tmp", LinkId::generate()));
        std::fs::write(&tmp, b"{}").unwrap();
        assert_eq!(store.sweep_expired(Utc::now()).await.unwrap(), 0);
        assert!(tmp.exists());
    }

    #[tokio::test]
    async fn file_corrupt_record_is_consumed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackend::new(dir.path()).unwrap();
        let id = LinkId::generate();
        std::fs::write(dir.path().join(format!("{id}.json")), b"{not json").unwrap();

        assert!(matches!(
            store.fetch_and_delete(&id).await,
            Err(StoreError::Corrupt(_))
        ));
        assert!(store.fetch_and_delete(&id).await.unwrap().is_none());
    }
}
