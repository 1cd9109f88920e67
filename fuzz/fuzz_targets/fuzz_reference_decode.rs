#![no_main]
use libfuzzer_sys::fuzz_target;
use nostr_core::filter::build_filter;
use nostr_core::resolver::{encode, resolve};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Some(resolved) = resolve(s) {
            // Decoded keys go through the same paths a fetch would.
            let _ = build_filter(&resolved.key);
            let _ = encode(&resolved.key, &resolved.relays);
        }
    }
});
