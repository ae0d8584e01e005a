#![no_main]

use libfuzzer_sys::fuzz_target;

use signalr_client::{JsonHubProtocol, Payload};

fuzz_target!(|data: &[u8]| {
    // Binary payloads must be rejected without panicking.
    let _ = JsonHubProtocol.parse_messages(&Payload::Binary(data.to_vec()));

    // Valid UTF-8 input exercises framing, JSON decoding, and the
    // type-discriminator dispatch.
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = JsonHubProtocol.parse_messages(&Payload::Text(text.to_string()));
    }
});
