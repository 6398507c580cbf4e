#![no_main]

use libfuzzer_sys::fuzz_target;
use meshlink::core::frame::{HEADER_LEN, MAX_PAYLOAD_LEN};
use meshlink::FrameCodec;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // First byte picks the chunk size so split points vary too
    let chunk = usize::from(data[0]).max(1);
    let mut codec = FrameCodec::new();
    for part in data[1..].chunks(chunk) {
        for frame in codec.feed(part) {
            assert!(frame.len() <= MAX_PAYLOAD_LEN);
        }
        assert!(codec.buffered() < HEADER_LEN + MAX_PAYLOAD_LEN);
    }
});
