//! Loading server keys from the environment or a keyring file.

use std::path::Path;

use chrono::{DateTime, Utc};
use thiserror::Error;
use zeroize::Zeroizing;

use burnlink_vault::{KeyringEntry, KeyringError, RetrievalGateway, ServerKeyring};

use crate::config::KeySource;

#[derive(Debug, Error)]
pub enum KeyLoadError {
    #[error("cannot read keyring file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("newest server key is invalid: {0}")]
    InvalidNewest(KeyringError),

    #[error(transparent)]
    Keyring(#[from] KeyringError),
}

/// Non-empty, non-comment lines of a keyring file, newest first.
pub fn keyring_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
}

/// Parse encoded keys, newest first. The newest must be valid; invalid older
/// keys are logged and skipped.
fn parse_entries<'a>(
    encoded: impl IntoIterator<Item = &'a str>,
    now: DateTime<Utc>,
) -> Result<Vec<KeyringEntry>, KeyLoadError> {
    let mut entries = Vec::new();
    for (position, key) in encoded.into_iter().enumerate() {
        match KeyringEntry::from_encoded(key, now) {
            Ok(entry) => {
                if entries.iter().any(|e: &KeyringEntry| e.same_material(&entry)) {
                    tracing::warn!(key_id = %entry.key_id(), "duplicate server key ignored");
                    continue;
                }
                entries.push(entry);
            }
            Err(e) if position == 0 => return Err(KeyLoadError::InvalidNewest(e)),
            Err(e) => tracing::warn!(position, error = %e, "ignoring invalid previous server key"),
        }
    }
    if entries.is_empty() {
        return Err(KeyringError::Empty.into());
    }
    Ok(entries)
}

fn read_file(path: &Path) -> Result<Zeroizing<String>, KeyLoadError> {
    std::fs::read_to_string(path)
        .map(Zeroizing::new)
        .map_err(|source| KeyLoadError::Read {
            path: path.display().to_string(),
            source,
        })
}

/// Build the startup keyring.
///
/// Every loaded key is stamped with the current time, so previous keys stay
/// in their retention window for a full max-TTL after startup.
pub fn load_keyring(source: &KeySource) -> Result<ServerKeyring, KeyLoadError> {
    let now = Utc::now();
    let entries = match source {
        KeySource::Env { master, previous } => parse_entries(
            std::iter::once(master.as_str()).chain(previous.iter().map(|k| k.as_str())),
            now,
        )?,
        KeySource::File(path) => {
            let text = read_file(path)?;
            parse_entries(keyring_lines(&text), now)?
        }
    };
    let keyring = ServerKeyring::from_entries(entries)?;
    tracing::info!(
        keys = keyring.len(),
        newest = %keyring.snapshot().newest().key_id(),
        "server keyring loaded"
    );
    Ok(keyring)
}

/// Re-read the keyring file and install its first key as the newest.
///
/// Returns the new keyring version, or `None` when the newest key is unchanged.
pub fn reload_keyring(
    gateway: &RetrievalGateway,
    path: &Path,
) -> Result<Option<u64>, KeyLoadError> {
    let text = read_file(path)?;
    let first = keyring_lines(&text).next().ok_or(KeyringError::Empty)?;
    let entry =
        KeyringEntry::from_encoded(first, Utc::now()).map_err(KeyLoadError::InvalidNewest)?;
    Ok(gateway.install_key(entry)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burnlink_envelope::wire;
    use burnlink_vault::{GatewayConfig, InMemoryBackend};
    use std::io::Write;
    use std::sync::Arc;

    fn encoded(byte: u8) -> String {
        wire::encode_field(&[byte; 32])
    }

    fn env_source(master: &str, previous: &[&str]) -> KeySource {
        KeySource::Env {
            master: Zeroizing::new(master.to_owned()),
            previous: previous.iter().map(|k| Zeroizing::new(k.to_string())).collect(),
        }
    }

    #[test]
    fn env_keys_newest_first() {
        let (two, three) = (encoded(2), encoded(3));
        let ring = load_keyring(&env_source(&encoded(1), &[two.as_str(), three.as_str()])).unwrap();
        assert_eq!(ring.len(), 3);
        assert!(ring.is_newest(&KeyringEntry::new([1; 32], Utc::now())));
    }

    #[test]
    fn invalid_previous_key_is_skipped() {
        let two = encoded(2);
        let ring = load_keyring(&env_source(&encoded(1), &["garbage", two.as_str()])).unwrap();
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn invalid_master_key_fails() {
        assert!(matches!(
            load_keyring(&env_source("garbage", &[encoded(2).as_str()])),
            Err(KeyLoadError::InvalidNewest(_))
        ));
    }

    #[test]
    fn keyring_file_skips_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# rotated 2026-10-01\n{}\n\n{}", encoded(7), encoded(6)).unwrap();
        let ring = load_keyring(&KeySource::File(file.path().to_path_buf())).unwrap();
        assert_eq!(ring.len(), 2);
        assert!(ring.is_newest(&KeyringEntry::new([7; 32], Utc::now())));
    }

    #[test]
    fn reload_rotates_only_on_change() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", encoded(1)).unwrap();
        let ring = load_keyring(&KeySource::File(file.path().to_path_buf())).unwrap();
        let gateway = RetrievalGateway::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(ring),
            GatewayConfig::default(),
        );

        assert_eq!(reload_keyring(&gateway, file.path()).unwrap(), None);

        std::fs::write(file.path(), format!("{}\n{}\n", encoded(2), encoded(1))).unwrap();
        assert_eq!(reload_keyring(&gateway, file.path()).unwrap(), Some(2));
        assert_eq!(gateway.keyring().len(), 2);
    }
}
