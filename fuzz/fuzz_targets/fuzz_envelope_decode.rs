#![no_main]

use libfuzzer_sys::fuzz_target;
use overlay_mesh::core::types::{decode_canonical_limited, ControlEnvelope};

const MAX_PAYLOAD_BYTES: usize = 1 << 20;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must never panic the canonical decoder, and a
    // successfully decoded envelope must respect its own declared bounds.
    if let Ok(envelope) = decode_canonical_limited::<ControlEnvelope>(data, MAX_PAYLOAD_BYTES) {
        assert!(envelope.payload.len() <= MAX_PAYLOAD_BYTES);
        let _ = envelope.message_id_hex();
    }
});
