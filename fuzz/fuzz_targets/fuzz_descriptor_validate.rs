#![no_main]

use libfuzzer_sys::fuzz_target;
use overlay_mesh::core::types::{decode_canonical_limited, PeerDescriptor};
use overlay_mesh::networking::descriptor::validate_descriptor;

const MAX_DESCRIPTOR_BYTES: usize = 64 * 1024;

fuzz_target!(|data: &[u8]| {
    // A descriptor decoded from arbitrary bytes must never panic on the way
    // through validation, however malformed its self-signature or fields.
    if let Ok(descriptor) = decode_canonical_limited::<PeerDescriptor>(data, MAX_DESCRIPTOR_BYTES) {
        let _ = validate_descriptor(&descriptor);
    }
});
