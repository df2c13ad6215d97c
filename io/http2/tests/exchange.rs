//! Client and server engines talking to each other through memory.

use http2::{
    Connection, ConnectionSettings, ConnectionState, ErrorCode, Event, HeaderField, Role, StreamId,
};

struct Pair {
    client: Connection,
    server: Connection,
}

impl Pair {
    fn new(client: ConnectionSettings, server: ConnectionSettings) -> Self {
        let mut pair = Pair {
            client: Connection::new(Role::Client, client),
            server: Connection::new(Role::Server, server),
        };
        pair.client.initiate_connection();
        pair.server.initiate_connection();
        pair.to_server();
        pair.to_client();
        pair.to_server();
        pair
    }

    fn to_server(&mut self) -> Vec<Event> {
        let bytes = self.client.data_to_send();
        self.server.receive_data(&bytes).unwrap()
    }

    fn to_client(&mut self) -> Vec<Event> {
        let bytes = self.server.data_to_send();
        self.client.receive_data(&bytes).unwrap()
    }
}

fn request() -> Vec<HeaderField> {
    vec![
        HeaderField::new(":method", "POST"),
        HeaderField::new(":scheme", "http"),
        HeaderField::new(":path", "/helloworld.Greeter/SayHello"),
        HeaderField::new(":authority", "localhost:50051"),
        HeaderField::new("te", "trailers"),
        HeaderField::new("content-type", "application/grpc+proto"),
    ]
}

fn collect_data(events: &[Event], stream: StreamId) -> Vec<u8> {
    let mut out = Vec::new();
    for event in events {
        if let Event::DataReceived {
            stream_id, data, ..
        } = event
            && *stream_id == stream
        {
            out.extend_from_slice(data);
        }
    }
    out
}

#[test]
fn test_full_exchange_with_trailers() {
    let mut pair = Pair::new(ConnectionSettings::default(), ConnectionSettings::default());
    let id = pair.client.get_next_available_stream_id().unwrap();

    pair.client.send_headers(id, &request(), false).unwrap();
    pair.client.send_data(id, b"\0\0\0\0\x05hello", true).unwrap();

    let events = pair.to_server();
    assert!(matches!(
        events[0],
        Event::RequestReceived {
            end_stream: false,
            ..
        }
    ));
    assert_eq!(collect_data(&events, id), b"\0\0\0\0\x05hello");
    assert_eq!(events.last(), Some(&Event::StreamEnded { stream_id: id }));

    pair.server
        .send_headers(
            id,
            &[
                HeaderField::new(":status", "200"),
                HeaderField::new("content-type", "application/grpc+proto"),
            ],
            false,
        )
        .unwrap();
    pair.server.send_data(id, b"\0\0\0\0\x02hi", false).unwrap();
    pair.server
        .send_headers(id, &[HeaderField::new("grpc-status", "0")], true)
        .unwrap();

    let events = pair.to_client();
    assert!(matches!(
        events[0],
        Event::ResponseReceived {
            end_stream: false,
            ..
        }
    ));
    assert_eq!(collect_data(&events, id), b"\0\0\0\0\x02hi");
    assert!(events.contains(&Event::TrailersReceived {
        stream_id: id,
        headers: vec![HeaderField::new("grpc-status", "0")],
    }));
    assert_eq!(events.last(), Some(&Event::StreamEnded { stream_id: id }));

    assert_eq!(pair.client.open_streams(), 0);
    assert_eq!(pair.server.open_streams(), 0);
}

#[test]
fn test_header_block_spans_continuation_frames() {
    let mut pair = Pair::new(ConnectionSettings::default(), ConnectionSettings::default());
    let id = pair.client.get_next_available_stream_id().unwrap();

    let mut headers = request();
    // incompressible values well past one 16 KiB frame
    for i in 0..40 {
        let value: String = (0..1000)
            .map(|j| char::from(b'!' + ((i * 7 + j * 13) % 90) as u8))
            .collect();
        headers.push(HeaderField::new(format!("x-big-{}", i), value));
    }
    pair.client.send_headers(id, &headers, true).unwrap();

    let events = pair.to_server();
    match &events[0] {
        Event::RequestReceived {
            headers: received,
            end_stream,
            ..
        } => {
            assert!(*end_stream);
            assert_eq!(received, &headers);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn test_sender_blocks_until_window_update() {
    let mut pair = Pair::new(ConnectionSettings::default(), ConnectionSettings::default());
    let id = pair.client.get_next_available_stream_id().unwrap();
    pair.client.send_headers(id, &request(), true).unwrap();
    pair.to_server();

    pair.server
        .send_headers(id, &[HeaderField::new(":status", "200")], false)
        .unwrap();

    let window = pair.server.local_flow_control_window(id);
    assert_eq!(window, 65535);
    let payload = vec![7u8; window];
    pair.server.send_data(id, &payload, false).unwrap();
    assert_eq!(pair.server.local_flow_control_window(id), 0);
    assert!(pair.server.send_data(id, b"x", false).is_err());

    // receiving the data makes the client hand credit back
    let events = pair.to_client();
    assert_eq!(collect_data(&events, id).len(), 65535);

    let events = pair.to_server();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::WindowUpdated { stream_id, .. } if stream_id.is_connection_level()
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::WindowUpdated { stream_id, .. } if *stream_id == id
    )));
    assert!(pair.server.local_flow_control_window(id) > 0);
    pair.server.send_data(id, b"more", true).unwrap();
}

#[test]
fn test_held_window_reopens_on_release() {
    let mut pair = Pair::new(ConnectionSettings::default(), ConnectionSettings::default());
    pair.client.set_auto_release(false);
    let id = pair.client.get_next_available_stream_id().unwrap();
    pair.client.send_headers(id, &request(), true).unwrap();
    pair.to_server();
    pair.server
        .send_headers(id, &[HeaderField::new(":status", "200")], false)
        .unwrap();
    pair.server.send_data(id, &[1u8; 65535], false).unwrap();
    pair.to_client();

    // only the connection window comes back
    let events = pair.to_server();
    assert!(!events.iter().any(|e| matches!(
        e,
        Event::WindowUpdated { stream_id, .. } if *stream_id == id
    )));
    assert_eq!(pair.server.local_flow_control_window(id), 0);

    // below half the window: still held
    pair.client.release_capacity(id, 10_000);
    assert!(pair.to_server().is_empty());
    assert_eq!(pair.server.local_flow_control_window(id), 0);

    pair.client.release_capacity(id, 30_000);
    let events = pair.to_server();
    assert_eq!(
        events,
        vec![Event::WindowUpdated {
            stream_id: id,
            increment: 40_000,
        }]
    );
    assert_eq!(pair.server.local_flow_control_window(id), 40_000);
}

#[test]
fn test_larger_peer_frame_size_is_used() {
    let client_settings = ConnectionSettings::new()
        .max_frame_size(65536)
        .initial_window_size(1 << 20);
    let mut pair = Pair::new(client_settings, ConnectionSettings::default());
    assert_eq!(pair.server.max_outbound_frame_size(), 65536);
    assert_eq!(pair.client.max_outbound_frame_size(), 16384);

    let id = pair.client.get_next_available_stream_id().unwrap();
    pair.client.send_headers(id, &request(), true).unwrap();
    pair.to_server();
    pair.server
        .send_headers(id, &[HeaderField::new(":status", "200")], false)
        .unwrap();

    // stream window came from the client's SETTINGS, the connection window
    // from its initial WINDOW_UPDATE
    assert_eq!(pair.server.local_flow_control_window(id), 1 << 20);
    pair.server.send_data(id, &vec![1u8; 100_000], true).unwrap();
    let events = pair.to_client();
    assert_eq!(collect_data(&events, id).len(), 100_000);
}

#[test]
fn test_goaway_then_drain() {
    let mut pair = Pair::new(ConnectionSettings::default(), ConnectionSettings::default());
    let first = pair.client.get_next_available_stream_id().unwrap();
    pair.client.send_headers(first, &request(), false).unwrap();
    pair.to_server();

    pair.server.close_connection(ErrorCode::NoError);
    let events = pair.to_client();
    assert_eq!(
        events,
        vec![Event::ConnectionTerminated {
            error_code: ErrorCode::NoError,
            last_stream_id: first,
            debug_data: Default::default(),
        }]
    );
    assert_eq!(pair.client.state(), ConnectionState::Closing);
    assert!(pair.client.goaway_received().is_some());

    let second = pair.client.get_next_available_stream_id().unwrap();
    assert!(pair.client.send_headers(second, &request(), false).is_err());

    // the in-flight call completes normally
    pair.client.end_stream(first).unwrap();
    pair.to_server();
    pair.server
        .send_headers(
            first,
            &[
                HeaderField::new(":status", "200"),
                HeaderField::new("grpc-status", "0"),
            ],
            true,
        )
        .unwrap();
    let events = pair.to_client();
    assert!(matches!(
        events[..],
        [
            Event::ResponseReceived {
                end_stream: true,
                ..
            },
            Event::StreamEnded { .. }
        ]
    ));
    assert_eq!(pair.client.open_streams(), 0);
}

#[test]
fn test_peer_reset_is_reported() {
    let mut pair = Pair::new(ConnectionSettings::default(), ConnectionSettings::default());
    let id = pair.client.get_next_available_stream_id().unwrap();
    pair.client.send_headers(id, &request(), false).unwrap();
    pair.to_server();

    pair.client.reset_stream(id, ErrorCode::Cancel).unwrap();
    let events = pair.to_server();
    assert_eq!(
        events,
        vec![Event::StreamReset {
            stream_id: id,
            error_code: ErrorCode::Cancel,
        }]
    );
    assert_eq!(pair.server.open_streams(), 0);

    // the stream is gone on the server as well
    assert!(
        pair.server
            .send_headers(id, &[HeaderField::new(":status", "200")], false)
            .is_err()
    );
}
