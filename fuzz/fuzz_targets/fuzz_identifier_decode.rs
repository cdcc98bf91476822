#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Decoding arbitrary input must never panic.
        if let Ok(addr) = nostr_core::decode(s) {
            assert!(addr.hex || addr.source.is_some());
        }
    }
});
