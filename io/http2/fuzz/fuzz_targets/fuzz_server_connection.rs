#![no_main]

use http2::{CONNECTION_PREFACE, Connection, ConnectionSettings, ConnectionState, Role};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut server = Connection::new(Role::Server, ConnectionSettings::default());
    server.initiate_connection();

    let mut input = CONNECTION_PREFACE.to_vec();
    input.extend_from_slice(data);

    // feed in uneven pieces to exercise partial-frame buffering
    for chunk in input.chunks(7 + data.len() % 13) {
        if server.receive_data(chunk).is_err() {
            assert_eq!(server.state(), ConnectionState::Closed);
            break;
        }
        let _ = server.data_to_send();
    }
});
