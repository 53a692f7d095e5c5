//! Wire constants and field encoding (v1)
//!
//! E2EE envelope fields travel as unpadded base64url strings:
//!   salt[16] , nonce[12] , ciphertext = aead_ct || tag[16]
//!
//! Server-managed ciphertext (opaque to clients):
//!   version[1] || nonce[12] || aead_ct || tag[16]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

/// AAD bound into every end-to-end envelope.
pub const E2EE_AAD: &[u8] = b"burnlink-e2ee-v1";

/// AAD bound into every server-managed ciphertext.
pub const SERVER_AAD: &[u8] = b"burnlink-server-v1";

/// Version byte for server-managed ciphertext.
pub const SERVER_FORMAT_VERSION: u8 = 0x01;

pub const SALT_BYTES: usize = 16;
pub const NONCE_BYTES: usize = 12;
pub const AEAD_TAG_BYTES: usize = 16;
pub const KEY_BYTES: usize = 32;

/// Smallest valid server-managed ciphertext: version + nonce + tag.
pub const MIN_SERVER_CIPHERTEXT_BYTES: usize = 1 + NONCE_BYTES + AEAD_TAG_BYTES;

/// Encode bytes as unpadded base64url.
pub fn encode_field(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode an unpadded base64url field. Trailing `=` padding is tolerated.
pub fn decode_field(s: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(s.trim_end_matches('=')).ok()
}

/// Decode a base64url field that must be exactly `N` bytes long.
pub fn decode_fixed<const N: usize>(s: &str) -> Option<[u8; N]> {
    decode_field(s)?.try_into().ok()
}

/// Split server-managed ciphertext into (nonce, aead_ct).
pub fn split_server_ciphertext(data: &[u8]) -> Option<(&[u8; NONCE_BYTES], &[u8])> {
    if data.len() < MIN_SERVER_CIPHERTEXT_BYTES || data[0] != SERVER_FORMAT_VERSION {
        return None;
    }
    let nonce: &[u8; NONCE_BYTES] = data[1..1 + NONCE_BYTES].try_into().ok()?;
    Some((nonce, &data[1 + NONCE_BYTES..]))
}

/// Assemble server-managed ciphertext from its parts.
pub fn join_server_ciphertext(nonce: &[u8; NONCE_BYTES], aead_ct: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + NONCE_BYTES + aead_ct.len());
    out.push(SERVER_FORMAT_VERSION);
    out.extend_from_slice(nonce);
    out.extend_from_slice(aead_ct);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_fixed_rejects_wrong_length() {
        let s = encode_field(&[7u8; 15]);
        assert!(decode_fixed::<SALT_BYTES>(&s).is_none());
        let s = encode_field(&[7u8; 16]);
        assert_eq!(decode_fixed::<SALT_BYTES>(&s), Some([7u8; 16]));
    }

    #[test]
    fn decode_tolerates_padding() {
        assert_eq!(decode_field("aGk="), Some(b"hi".to_vec()));
        assert!(decode_field("not base64!").is_none());
    }

    #[test]
    fn server_ciphertext_rejects_short_or_unknown_version() {
        let nonce = [1u8; NONCE_BYTES];
        let ct = join_server_ciphertext(&nonce, &[0u8; AEAD_TAG_BYTES]);
        assert!(split_server_ciphertext(&ct).is_some());
        assert!(split_server_ciphertext(&ct[..ct.len() - 1]).is_none());

        let mut bad = ct.clone();
        bad[0] = 0x02;
        assert!(split_server_ciphertext(&bad).is_none());
    }
}
