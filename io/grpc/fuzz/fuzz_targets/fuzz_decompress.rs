#![no_main]

use grpc::Compression;
use libfuzzer_sys::fuzz_target;

const LIMIT: usize = 1024 * 1024;

fuzz_target!(|data: &[u8]| {
    for compression in [Compression::Gzip, Compression::Deflate] {
        if let Ok(plain) = compression.decompress(data, LIMIT) {
            assert!(plain.len() <= LIMIT);
        }

        let packed = compression.compress(data).expect("compression of a slice succeeds");
        let unpacked = compression
            .decompress(&packed, data.len().max(1))
            .expect("compressed data decompresses");
        assert_eq!(unpacked, data);
    }
});
