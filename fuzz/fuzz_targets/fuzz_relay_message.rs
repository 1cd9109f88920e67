#![no_main]
use libfuzzer_sys::fuzz_target;
use nostr_core::parse_relay_message;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = parse_relay_message(s);
    }
});
