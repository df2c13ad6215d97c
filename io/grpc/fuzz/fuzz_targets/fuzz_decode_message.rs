#![no_main]

use grpc::{ByteBuffer, HEADER_SIZE, decode_message, encode_message};
use libfuzzer_sys::fuzz_target;

const MAX_SIZE: usize = 64 * 1024;

fuzz_target!(|data: &[u8]| {
    // feed in uneven pieces to exercise partial headers and payloads
    let mut buf = ByteBuffer::new();
    let chunk_size = (data.len() / 3).max(1);

    for chunk in data.chunks(chunk_size) {
        buf.write(chunk);
        loop {
            match decode_message(&mut buf, MAX_SIZE) {
                Ok(Some(message)) => {
                    assert!(message.payload.len() <= MAX_SIZE);

                    let mut reframed = ByteBuffer::new();
                    encode_message(&message.payload, message.compressed, &mut reframed);
                    assert_eq!(reframed.len(), HEADER_SIZE + message.payload.len());
                    let again = decode_message(&mut reframed, MAX_SIZE)
                        .expect("reframed message must decode")
                        .expect("reframed message is complete");
                    assert_eq!(message, again);
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
});
