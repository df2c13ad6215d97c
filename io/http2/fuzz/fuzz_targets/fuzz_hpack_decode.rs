#![no_main]

use http2::{HpackDecoder, HpackEncoder};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut decoder = HpackDecoder::new();

    let Ok(headers) = decoder.decode(data) else {
        return;
    };

    // whatever decodes must survive a fresh encode/decode unchanged
    let mut encoded = Vec::new();
    HpackEncoder::new().encode(&headers, &mut encoded);
    let decoded = HpackDecoder::new()
        .decode(&encoded)
        .expect("re-encoded block must decode");
    assert_eq!(headers, decoded, "roundtrip mismatch");
});
