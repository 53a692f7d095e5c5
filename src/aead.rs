//! AEAD: AES-256-GCM

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use getrandom::getrandom;

use crate::error::{OpenError, SealError};
use crate::wire::{KEY_BYTES, NONCE_BYTES};

/// Draw a fresh random 12-byte nonce. Used during encryption only.
///
/// Nonces are never cached or derived; every seal calls this.
pub fn nonce() -> Result<[u8; NONCE_BYTES], SealError> {
    let mut n = [0u8; NONCE_BYTES];
    getrandom(&mut n).map_err(|_| SealError)?;
    Ok(n)
}

/// AEAD seal (encrypt path). Output is ciphertext with the tag appended.
pub fn aead_seal(
    key: &[u8; KEY_BYTES],
    nonce: &[u8; NONCE_BYTES],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, SealError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| SealError)?;
    let n = Nonce::from_slice(nonce);
    let payload = Payload { msg: plaintext, aad };
    cipher.encrypt(n, payload).map_err(|_| SealError)
}

/// AEAD open (decrypt path).
pub fn aead_open(
    key: &[u8; KEY_BYTES],
    nonce: &[u8; NONCE_BYTES],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, OpenError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| OpenError)?;
    let n = Nonce::from_slice(nonce);
    let payload = Payload { msg: ciphertext, aad };
    cipher.decrypt(n, payload).map_err(|_| OpenError)
}
