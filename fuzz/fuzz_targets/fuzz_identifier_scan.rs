#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Whatever the scanner extracts has to decode.
        if let Some(found) = nostr_core::scan(s, true) {
            assert!(nostr_core::decode(&found).is_ok());
        }
    }
});
