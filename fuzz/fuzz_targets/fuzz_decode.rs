#![no_main]

use bounce_notify::core::{decode_bytes, FrameLimits};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary input must be rejected cleanly, never panic or over-allocate
    let _ = decode_bytes(data, &FrameLimits::default());
});
