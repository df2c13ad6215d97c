#![no_main]

use grpc::{Metadata, Status, Timeout};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(timeout) = Timeout::parse(text) {
        // formatting may round up to a coarser unit, never down
        let again = Timeout::parse(&timeout.to_grpc_format()).expect("formatted timeout parses");
        assert!(again.as_duration() >= timeout.as_duration());
    }

    let mut trailers = Metadata::new();
    trailers.set("grpc-status", "13");
    trailers.set("grpc-message", text.to_string());
    let status = Status::from_trailers(&trailers).expect("grpc-status is present");

    // a decoded message must survive being written back out
    let mut written = Metadata::new();
    status.write_trailers(&mut written);
    let again = Status::from_trailers(&written).expect("status was written");
    assert_eq!(status.message(), again.message());
});
