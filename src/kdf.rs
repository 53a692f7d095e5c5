//! Key derivation: Argon2id passphrase + salt → 256-bit key

use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::Zeroizing;

use crate::error::SealError;
use crate::wire::{KEY_BYTES, SALT_BYTES};

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Passes over memory (default: 2)
    pub time_cost: u32,
    /// Lanes (default: 1)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

/// Derive a 256-bit key from a passphrase and salt using Argon2id v1.3.
///
/// The result is zeroized on drop.
pub fn derive_key(
    passphrase: &str,
    salt: &[u8; SALT_BYTES],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_BYTES]>, SealError> {
    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_BYTES),
    )
    .map_err(|_| SealError)?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = Zeroizing::new([0u8; KEY_BYTES]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
        .map_err(|_| SealError)?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: KdfParams = KdfParams {
        mem_cost_kib: 1024,
        time_cost: 1,
        parallelism: 1,
    };

    #[test]
    fn deterministic() {
        let k1 = derive_key("test-passphrase", &[1u8; 16], &FAST).unwrap();
        let k2 = derive_key("test-passphrase", &[1u8; 16], &FAST).unwrap();
        assert_eq!(*k1, *k2, "KDF must be deterministic");
    }

    #[test]
    fn different_passphrases() {
        let k1 = derive_key("passphrase-a", &[1u8; 16], &FAST).unwrap();
        let k2 = derive_key("passphrase-b", &[1u8; 16], &FAST).unwrap();
        assert_ne!(*k1, *k2);
    }

    #[test]
    fn different_salts() {
        let k1 = derive_key("same", &[1u8; 16], &FAST).unwrap();
        let k2 = derive_key("same", &[2u8; 16], &FAST).unwrap();
        assert_ne!(*k1, *k2);
    }

    #[test]
    fn default_params_match_contract() {
        let p = KdfParams::default();
        assert_eq!(p.mem_cost_kib, 64 * 1024);
        assert_eq!(p.time_cost, 2);
        assert_eq!(p.parallelism, 1);
    }
}
