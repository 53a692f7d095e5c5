//! End-to-end encryption envelope.
//!
//! `seal` runs entirely on the sender's side; the server only ever sees the
//! resulting [`Envelope`]. `unseal` runs on the recipient's side.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::aead;
use crate::error::{OpenError, SealError};
use crate::kdf::{self, KdfParams};
use crate::wire::{self, E2EE_AAD, NONCE_BYTES, SALT_BYTES};

/// Ciphertext plus the public parameters needed to attempt decryption.
///
/// All fields are unpadded base64url. The struct is kept in encoded form so
/// that a malformed field is only discovered inside [`unseal`], on the same
/// code path (and after the same KDF cost) as a wrong passphrase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
}

/// Seal `plaintext` under `passphrase` with production KDF parameters.
pub fn seal(plaintext: &[u8], passphrase: &str) -> Result<Envelope, SealError> {
    seal_with(plaintext, passphrase, &KdfParams::default())
}

/// Seal with explicit KDF parameters.
pub fn seal_with(
    plaintext: &[u8],
    passphrase: &str,
    params: &KdfParams,
) -> Result<Envelope, SealError> {
    let mut salt = [0u8; SALT_BYTES];
    getrandom::getrandom(&mut salt).map_err(|_| SealError)?;

    let key = kdf::derive_key(passphrase, &salt, params)?;
    // Drawn after the key so it can never be reused from an earlier seal.
    let nonce = aead::nonce()?;
    let ciphertext = aead::aead_seal(&key, &nonce, plaintext, E2EE_AAD)?;

    Ok(Envelope {
        salt: wire::encode_field(&salt),
        nonce: wire::encode_field(&nonce),
        ciphertext: wire::encode_field(&ciphertext),
    })
}

/// Open an envelope with production KDF parameters.
pub fn unseal(envelope: &Envelope, passphrase: &str) -> Result<Zeroizing<Vec<u8>>, OpenError> {
    unseal_with(envelope, passphrase, &KdfParams::default())
}

/// Open an envelope with explicit KDF parameters.
///
/// The key is always derived, even when a field fails to decode, so a
/// malformed envelope costs the same as a wrong passphrase.
pub fn unseal_with(
    envelope: &Envelope,
    passphrase: &str,
    params: &KdfParams,
) -> Result<Zeroizing<Vec<u8>>, OpenError> {
    let salt = wire::decode_fixed::<SALT_BYTES>(&envelope.salt);
    let nonce = wire::decode_fixed::<NONCE_BYTES>(&envelope.nonce);
    let ciphertext = wire::decode_field(&envelope.ciphertext);

    let key = kdf::derive_key(passphrase, &salt.unwrap_or([0u8; SALT_BYTES]), params)?;

    match (salt, nonce, ciphertext) {
        (Some(_), Some(nonce), Some(ciphertext)) => {
            aead::aead_open(&key, &nonce, &ciphertext, E2EE_AAD).map(Zeroizing::new)
        }
        _ => Err(OpenError),
    }
}
