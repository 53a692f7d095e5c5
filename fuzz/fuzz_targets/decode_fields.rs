#![no_main]

use burnlink_envelope::wire;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = wire::split_server_ciphertext(data);

    if let Ok(s) = std::str::from_utf8(data) {
        if let Some(bytes) = wire::decode_field(s) {
            assert_eq!(wire::encode_field(&bytes), s.trim_end_matches('='));
        }
        let _ = wire::decode_fixed::<{ wire::SALT_BYTES }>(s);
        let _ = wire::decode_fixed::<{ wire::NONCE_BYTES }>(s);
    }
});
