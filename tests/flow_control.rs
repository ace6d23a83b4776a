use http2_engine::{
    events::Event, frame::Frame, Connection, FrameBuffer, Header, Http2Error, SettingsParameter,
};
use maplit::hashmap;

fn request_headers() -> Vec<Header> {
    vec![
        Header::new(":method", "POST"),
        Header::new(":scheme", "https"),
        Header::new(":path", "/upload"),
        Header::new(":authority", "example.com"),
    ]
}

fn exchange(from: &mut Connection, to: &mut Connection) -> Vec<Event> {
    let bytes = from.data_to_send(None);
    to.receive_data(&bytes).unwrap()
}

fn handshake() -> (Connection, Connection) {
    let mut client = Connection::client();
    let mut server = Connection::server();
    client.initiate_connection().unwrap();
    server.initiate_connection().unwrap();
    exchange(&mut client, &mut server);
    exchange(&mut server, &mut client);
    exchange(&mut client, &mut server);
    (client, server)
}

#[test]
fn sends_block_once_the_window_is_spent() {
    let (mut client, _server) = handshake();
    client.send_headers(1, request_headers(), false).unwrap();

    // Drain the default 65,535-byte window in MAX_FRAME_SIZE slices.
    let mut remaining = 65_535usize;
    while remaining > 0 {
        let chunk = remaining.min(16_384);
        client
            .send_data(1, vec![b'x'; chunk].into(), false)
            .unwrap();
        remaining -= chunk;
    }
    assert_eq!(client.local_flow_control_window(1).unwrap(), 0);

    assert!(matches!(
        client.send_data(1, b"x"[..].into(), false),
        Err(Http2Error::FlowControl(_))
    ));

    // The peer opens both windows by five bytes.
    let update = [
        Frame::WindowUpdate {
            stream_id: 0,
            increment: 5,
        }
        .serialize(),
        Frame::WindowUpdate {
            stream_id: 1,
            increment: 5,
        }
        .serialize(),
    ]
    .concat();
    let events = client.receive_data(&update).unwrap();
    assert_eq!(events.len(), 2);
    assert!(
        matches!(&events[0], Event::WindowUpdated(updated) if updated.stream_id == 0 && updated.delta == 5)
    );
    assert!(
        matches!(&events[1], Event::WindowUpdated(updated) if updated.stream_id == 1 && updated.delta == 5)
    );

    assert_eq!(client.local_flow_control_window(1).unwrap(), 5);
    client.send_data(1, b"abcde"[..].into(), false).unwrap();
    assert!(matches!(
        client.send_data(1, b"x"[..].into(), false),
        Err(Http2Error::FlowControl(_))
    ));
}

#[test]
fn oversized_data_frames_are_refused_on_send() {
    let (mut client, _server) = handshake();
    client.send_headers(1, request_headers(), false).unwrap();
    assert!(matches!(
        client.send_data(1, vec![b'x'; 16_385].into(), false),
        Err(Http2Error::FrameTooLarge {
            size: 16_385,
            max: 16_384
        })
    ));
}

#[test]
fn window_increment_of_zero_is_a_connection_error() {
    let (mut client, _server) = handshake();
    let frame = Frame::WindowUpdate {
        stream_id: 0,
        increment: 0,
    };
    assert!(matches!(
        client.receive_data(&frame.serialize()),
        Err(Http2Error::Protocol(_))
    ));
    // The engine queued a GOAWAY for the peer.
    let mut parser = FrameBuffer::new(false);
    parser.max_frame_size = 16_384;
    parser.add_data(&client.data_to_send(None)).unwrap();
    let mut saw_goaway = false;
    while let Some(frame) = parser.next_frame().unwrap() {
        if let Frame::GoAway { error_code, .. } = frame {
            assert_eq!(error_code, 1); // PROTOCOL_ERROR
            saw_goaway = true;
        }
    }
    assert!(saw_goaway);
}

#[test]
fn local_window_increments_are_range_checked() {
    let (mut client, _server) = handshake();
    assert!(matches!(
        client.increment_flow_control_window(0, None),
        Err(Http2Error::Protocol(_))
    ));
    // Default connection window is 65,535, so the maximum increment
    // overflows 2^31-1.
    assert!(matches!(
        client.increment_flow_control_window(u32::MAX >> 1, None),
        Err(Http2Error::FlowControl(_))
    ));
    client.increment_flow_control_window(1024, None).unwrap();
    assert_eq!(client.inbound_flow_control_window(), 65_535 + 1024);
}

#[test]
fn initial_window_size_change_moves_stream_windows_only() {
    let (mut client, mut server) = handshake();
    client.send_headers(1, request_headers(), false).unwrap();
    exchange(&mut client, &mut server);

    server
        .update_settings(hashmap! { SettingsParameter::InitialWindowSize => 1280 })
        .unwrap();
    let events = exchange(&mut server, &mut client);
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::RemoteSettingsChanged(_))));

    // The stream window moved by 1280 - 65535; the connection window kept
    // its value, per RFC 7540 §6.9.2.
    assert_eq!(client.local_flow_control_window(1).unwrap(), 1280);
    assert_eq!(client.outbound_flow_control_window(), 65_535);

    // The server hears its settings acknowledged.
    let events = exchange(&mut client, &mut server);
    assert!(events.iter().any(|event| matches!(
        event,
        Event::SettingsAcknowledged(acked)
            if acked.changed_settings.iter().any(|change| {
                change.setting == SettingsParameter::InitialWindowSize
                    && change.new_value == 1280
            })
    )));
}

#[test]
fn data_for_unknown_streams_still_debits_the_connection_window() {
    let mut server = Connection::server();
    server.initiate_connection().unwrap();

    let mut preamble = http2_engine::CONNECTION_PREFACE.to_vec();
    preamble.extend_from_slice(
        &Frame::Settings {
            flags: http2_engine::flags::SettingsFlags::empty(),
            params: vec![],
        }
        .serialize(),
    );
    server.receive_data(&preamble).unwrap();

    let data = Frame::Data {
        stream_id: 1,
        flags: http2_engine::flags::DataFlags::empty(),
        data: vec![b'x'; 100].into(),
        flow_controlled_length: 100,
    };
    // Stream 1 was never opened: the frame errors, but the connection
    // window stays in sync with the peer.
    assert!(matches!(
        server.receive_data(&data.serialize()),
        Err(Http2Error::NoSuchStream(1))
    ));
    assert_eq!(server.inbound_flow_control_window(), 65_535 - 100);
}

#[test]
fn receiving_more_than_the_stream_window_is_fatal() {
    let (mut client, mut server) = handshake();
    client.send_headers(1, request_headers(), false).unwrap();
    exchange(&mut client, &mut server);

    // Shrink our receive window view by having the server believe a tiny
    // initial window: instead, just send more than 65,535 bytes total.
    client
        .send_data(1, vec![b'x'; 16_384].into(), false)
        .unwrap();
    let bytes = client.data_to_send(None);
    server.receive_data(&bytes).unwrap();

    // Hand-craft a frame that overruns the remaining stream window.
    let overrun = Frame::Data {
        stream_id: 1,
        flags: http2_engine::flags::DataFlags::empty(),
        data: vec![b'x'; 16_384].into(),
        flow_controlled_length: 16_384,
    };
    let mut bytes = Vec::new();
    for _ in 0..3 {
        bytes.extend_from_slice(&overrun.serialize());
    }
    // 16_384 * 4 > 65_535: the last frame overdraws the window.
    assert!(matches!(
        server.receive_data(&bytes),
        Err(Http2Error::FlowControl(_))
    ));
}
