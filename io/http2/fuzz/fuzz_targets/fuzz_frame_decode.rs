#![no_main]

use bytes::BytesMut;
use http2::{Frame, FrameDecoder, MAX_FRAME_SIZE};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut decoder = FrameDecoder::new();
    if data.first().is_some_and(|b| b & 1 == 1) {
        decoder.set_max_frame_size(MAX_FRAME_SIZE);
    }
    let mut buf = BytesMut::from(data);

    while let Ok(Some(frame)) = decoder.decode(&mut buf) {
        let _ = frame.stream_id();
        match frame {
            Frame::Data(f) => assert!(f.data.len() <= f.flow_len as usize),
            Frame::Settings(f) => assert!(!f.ack || f.settings.is_empty()),
            Frame::WindowUpdate(f) => assert!(f.increment > 0),
            Frame::Headers(f) => {
                let _ = f.header_block;
            }
            _ => {}
        }
    }
});
