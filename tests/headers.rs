use http2_engine::{
    events::Event,
    flags::{ContinuationFlags, HeadersFlags, SettingsFlags},
    frame::Frame,
    Config, Connection, FrameBuffer, Header, HeaderCodec, HpackCodec, Http2Error,
    CONNECTION_PREFACE,
};

fn request_headers() -> Vec<Header> {
    vec![
        Header::new(":method", "GET"),
        Header::new(":scheme", "https"),
        Header::new(":path", "/"),
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

/// A client that sends whatever it is told to send.
fn permissive_client() -> Connection {
    let mut config = Config::client();
    config.validate_outbound_headers = false;
    config.normalize_outbound_headers = false;
    Connection::new(config)
}

#[test]
fn uppercase_header_names_from_the_peer_are_fatal() {
    let mut client = permissive_client();
    let mut server = Connection::server();
    client.initiate_connection().unwrap();

    let mut headers = request_headers();
    headers.push(Header::new("X-Custom", "v"));
    client.send_headers(1, headers, true).unwrap();

    let bytes = client.data_to_send(None);
    assert!(matches!(
        server.receive_data(&bytes),
        Err(Http2Error::Protocol(_))
    ));
}

#[test]
fn outbound_validation_rejects_missing_pseudo_headers() {
    let mut client = Connection::client();
    client.initiate_connection().unwrap();
    assert!(matches!(
        client.send_headers(1, vec![Header::new(":method", "GET")], true),
        Err(Http2Error::Protocol(_))
    ));
}

#[test]
fn ordinary_connect_round_trips() {
    let (mut client, mut server) = handshake();
    client
        .send_headers(
            1,
            vec![
                Header::new(":method", "CONNECT"),
                Header::new(":authority", "example.com:443"),
            ],
            false,
        )
        .unwrap();
    let events = exchange(&mut client, &mut server);
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::RequestReceived(_))));
}

#[test]
fn connect_with_a_path_is_rejected_without_protocol() {
    let mut client = Connection::client();
    client.initiate_connection().unwrap();
    assert!(matches!(
        client.send_headers(
            1,
            vec![
                Header::new(":method", "CONNECT"),
                Header::new(":authority", "example.com:443"),
                Header::new(":path", "/"),
            ],
            false,
        ),
        Err(Http2Error::Protocol(_))
    ));
}

#[test]
fn extended_connect_round_trips() {
    let (mut client, mut server) = handshake();
    client
        .send_headers(
            1,
            vec![
                Header::new(":method", "CONNECT"),
                Header::new(":protocol", "websocket"),
                Header::new(":scheme", "https"),
                Header::new(":path", "/chat"),
                Header::new(":authority", "ws.example.com"),
            ],
            false,
        )
        .unwrap();
    let events = exchange(&mut client, &mut server);
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::RequestReceived(_))));
}

#[test]
fn content_length_mismatch_is_fatal() {
    let (mut client, mut server) = handshake();
    let mut headers = request_headers();
    headers[0] = Header::new(":method", "POST");
    headers.push(Header::new("content-length", "5"));
    client.send_headers(1, headers, false).unwrap();
    client.send_data(1, b"abcd"[..].into(), true).unwrap();

    let bytes = client.data_to_send(None);
    assert!(matches!(
        server.receive_data(&bytes),
        Err(Http2Error::InvalidBodyLength {
            expected: 5,
            actual: 4
        })
    ));
}

#[test]
fn content_length_exact_match_is_fine() {
    let (mut client, mut server) = handshake();
    let mut headers = request_headers();
    headers[0] = Header::new(":method", "POST");
    headers.push(Header::new("content-length", "5"));
    client.send_headers(1, headers, false).unwrap();
    client.send_data(1, b"abcde"[..].into(), true).unwrap();
    let events = exchange(&mut client, &mut server);
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::StreamEnded(_))));
}

#[test]
fn informational_responses_precede_the_final_one() {
    let (mut client, mut server) = handshake();
    client.send_headers(1, request_headers(), true).unwrap();
    exchange(&mut client, &mut server);

    server
        .send_headers(1, vec![Header::new(":status", "103")], false)
        .unwrap();
    server
        .send_headers(1, vec![Header::new(":status", "200")], true)
        .unwrap();

    let events = exchange(&mut server, &mut client);
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::InformationalResponseReceived(info) if info.headers == vec![Header::new(":status", "103")])));
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::ResponseReceived(_))));
}

#[test]
fn informational_responses_cannot_end_the_stream() {
    let (mut client, mut server) = handshake();
    client.send_headers(1, request_headers(), true).unwrap();
    exchange(&mut client, &mut server);

    assert!(matches!(
        server.send_headers(1, vec![Header::new(":status", "100")], true),
        Err(Http2Error::Protocol(_))
    ));
}

#[test]
fn split_cookies_are_merged_on_receipt() {
    let mut config = Config::client();
    config.split_outbound_cookies = true;
    let mut client = Connection::new(config);
    let mut server = Connection::server();
    client.initiate_connection().unwrap();

    let mut headers = request_headers();
    headers.push(Header::new("cookie", "a=b; c=d; e=f"));
    client.send_headers(1, headers, true).unwrap();

    let events = exchange(&mut client, &mut server);
    let request = events
        .iter()
        .find_map(|event| match event {
            Event::RequestReceived(request) => Some(request),
            _ => None,
        })
        .expect("request received");
    let cookie: Vec<&Header> = request
        .headers
        .iter()
        .filter(|header| header.name.as_ref() == b"cookie")
        .collect();
    assert_eq!(cookie.len(), 1);
    assert_eq!(cookie[0].value.as_ref(), b"a=b; c=d; e=f");
    assert!(cookie[0].never_indexed);
}

#[test]
fn continuation_fusion_yields_one_request() {
    let mut server = Connection::server();
    server.initiate_connection().unwrap();

    // Build HEADERS + 3 CONTINUATIONs by hand, splitting the encoded block.
    let mut codec = HpackCodec::new();
    let block = codec.encode(&request_headers());
    assert!(block.len() >= 4);
    let quarter = block.len() / 4;

    let mut bytes = CONNECTION_PREFACE.to_vec();
    bytes.extend_from_slice(
        &Frame::Settings {
            flags: SettingsFlags::empty(),
            params: vec![],
        }
        .serialize(),
    );
    bytes.extend_from_slice(
        &Frame::Headers {
            stream_id: 1,
            flags: HeadersFlags::END_STREAM,
            priority: None,
            fragment: block.slice(..quarter),
        }
        .serialize(),
    );
    for piece in 1..4 {
        let end = if piece == 3 {
            block.len()
        } else {
            quarter * (piece + 1)
        };
        bytes.extend_from_slice(
            &Frame::Continuation {
                stream_id: 1,
                flags: if piece == 3 {
                    ContinuationFlags::END_HEADERS
                } else {
                    ContinuationFlags::empty()
                },
                fragment: block.slice(quarter * piece..end),
            }
            .serialize(),
        );
    }

    let events = server.receive_data(&bytes).unwrap();
    let requests: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            Event::RequestReceived(request) => Some(request),
            _ => None,
        })
        .collect();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].headers, request_headers());
    assert!(requests[0].stream_ended.is_some());
}

#[test]
fn hpack_bomb_is_a_denial_of_service() {
    let mut server = Connection::server();
    server.initiate_connection().unwrap();

    // One large literal with incremental indexing followed by many one-byte
    // references to it: a small frame that decompresses far past the
    // header-list bound.
    let mut codec = HpackCodec::new();
    let mut block = codec.encode(&request_headers()).to_vec();
    block.push(0x40); // literal with incremental indexing, new name
    block.push(8);
    block.extend_from_slice(b"x-filler");
    block.extend_from_slice(&[0x7f, 0xa1, 0x1e]); // value length 4000
    block.extend_from_slice(&[b'a'; 4000]);
    // The entry just inserted sits at dynamic index 62.
    block.extend_from_slice(&[0xbe; 100]);
    let block = http2_engine::Bytes::from(block);
    assert!(block.len() < 16_384, "bomb must fit one frame");

    let mut bytes = CONNECTION_PREFACE.to_vec();
    bytes.extend_from_slice(
        &Frame::Settings {
            flags: SettingsFlags::empty(),
            params: vec![],
        }
        .serialize(),
    );
    bytes.extend_from_slice(
        &Frame::Headers {
            stream_id: 1,
            flags: HeadersFlags::END_STREAM | HeadersFlags::END_HEADERS,
            priority: None,
            fragment: block,
        }
        .serialize(),
    );

    assert!(matches!(
        server.receive_data(&bytes),
        Err(Http2Error::DenialOfService(_))
    ));

    // The queued GOAWAY carries ENHANCE_YOUR_CALM.
    let mut parser = FrameBuffer::new(false);
    parser.max_frame_size = 16_384;
    parser.add_data(&server.data_to_send(None)).unwrap();
    let mut saw_goaway = false;
    while let Some(frame) = parser.next_frame().unwrap() {
        if let Frame::GoAway { error_code, .. } = frame {
            assert_eq!(error_code, 0xb);
            saw_goaway = true;
        }
    }
    assert!(saw_goaway);
}

#[test]
fn headers_with_priority_emit_a_companion_event() {
    let mut server = Connection::server();
    server.initiate_connection().unwrap();

    let mut codec = HpackCodec::new();
    let block = codec.encode(&request_headers());

    let mut bytes = CONNECTION_PREFACE.to_vec();
    bytes.extend_from_slice(
        &Frame::Settings {
            flags: SettingsFlags::empty(),
            params: vec![],
        }
        .serialize(),
    );
    bytes.extend_from_slice(
        &Frame::Headers {
            stream_id: 1,
            flags: HeadersFlags::END_HEADERS | HeadersFlags::PRIORITY,
            priority: Some(http2_engine::frame::PriorityInfo {
                depends_on: 0,
                weight: 15,
                exclusive: true,
            }),
            fragment: block,
        }
        .serialize(),
    );

    let events = server.receive_data(&bytes).unwrap();
    let request = events
        .iter()
        .find_map(|event| match event {
            Event::RequestReceived(request) => Some(request),
            _ => None,
        })
        .expect("request received");
    let updated = request.priority_updated.as_ref().expect("priority");
    assert_eq!(updated.weight, 16);
    assert!(updated.exclusive);
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::PriorityUpdated(_))));
}

#[test]
fn a_stream_may_not_depend_on_itself() {
    let mut server = Connection::server();
    server.initiate_connection().unwrap();

    let mut bytes = CONNECTION_PREFACE.to_vec();
    bytes.extend_from_slice(
        &Frame::Settings {
            flags: SettingsFlags::empty(),
            params: vec![],
        }
        .serialize(),
    );
    bytes.extend_from_slice(
        &Frame::Priority {
            stream_id: 3,
            priority: http2_engine::frame::PriorityInfo {
                depends_on: 3,
                weight: 0,
                exclusive: false,
            },
        }
        .serialize(),
    );
    assert!(matches!(
        server.receive_data(&bytes),
        Err(Http2Error::Protocol(_))
    ));
}
