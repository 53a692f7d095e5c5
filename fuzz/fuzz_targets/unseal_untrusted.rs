#![no_main]

use burnlink_envelope::{unseal_with, Envelope, KdfParams};
use libfuzzer_sys::fuzz_target;

const CHEAP: KdfParams = KdfParams {
    mem_cost_kib: 64,
    time_cost: 1,
    parallelism: 1,
};

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let mut parts = text.splitn(3, '.');
    let envelope = Envelope {
        salt: parts.next().unwrap_or_default().to_owned(),
        nonce: parts.next().unwrap_or_default().to_owned(),
        ciphertext: parts.next().unwrap_or_default().to_owned(),
    };

    // Anything that is not a genuine seal must fail closed.
    assert!(unseal_with(&envelope, "fuzz", &CHEAP).is_err());
});
