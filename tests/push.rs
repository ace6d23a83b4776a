use http2_engine::{
    events::Event, Connection, ErrorCode, Header, Http2Error, SettingsParameter, StreamState,
};
use maplit::hashmap;

fn request_headers() -> Vec<Header> {
    vec![
        Header::new(":method", "GET"),
        Header::new(":scheme", "https"),
        Header::new(":path", "/"),
        Header::new(":authority", "example.com"),
    ]
}

fn pushed_request_headers() -> Vec<Header> {
    vec![
        Header::new(":method", "GET"),
        Header::new(":scheme", "https"),
        Header::new(":path", "/style.css"),
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
fn server_push_round_trip() {
    let (mut client, mut server) = handshake();
    client.send_headers(1, request_headers(), true).unwrap();
    exchange(&mut client, &mut server);

    server
        .push_stream(1, 2, pushed_request_headers())
        .unwrap();
    server
        .send_headers(2, vec![Header::new(":status", "200")], false)
        .unwrap();
    server
        .send_data(2, b"body { color: red }"[..].into(), true)
        .unwrap();
    server
        .send_headers(1, vec![Header::new(":status", "200")], true)
        .unwrap();

    let events = exchange(&mut server, &mut client);

    match &events[0] {
        Event::PushedStreamReceived(pushed) => {
            assert_eq!(pushed.pushed_stream_id, 2);
            assert_eq!(pushed.parent_stream_id, 1);
            assert_eq!(pushed.headers, pushed_request_headers());
        }
        other => panic!("unexpected: {:?}", other),
    }
    match &events[1] {
        Event::ResponseReceived(response) => assert_eq!(response.stream_id, 2),
        other => panic!("unexpected: {:?}", other),
    }
    match &events[2] {
        Event::DataReceived(data) => {
            assert_eq!(data.stream_id, 2);
            assert_eq!(&data.data[..], b"body { color: red }");
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert!(matches!(
        &events[3],
        Event::StreamEnded(ended) if ended.stream_id == 2
    ));
    assert!(matches!(
        &events[4],
        Event::ResponseReceived(response) if response.stream_id == 1
    ));
    assert!(matches!(
        &events[5],
        Event::StreamEnded(ended) if ended.stream_id == 1
    ));
}

#[test]
fn push_respects_enable_push() {
    let mut client = Connection::client();
    let mut server = Connection::server();
    client.initiate_connection().unwrap();
    client
        .update_settings(hashmap! { SettingsParameter::EnablePush => 0 })
        .unwrap();
    server.initiate_connection().unwrap();
    exchange(&mut client, &mut server);
    exchange(&mut server, &mut client);
    exchange(&mut client, &mut server);

    client.send_headers(1, request_headers(), true).unwrap();
    exchange(&mut client, &mut server);

    assert!(matches!(
        server.push_stream(1, 2, pushed_request_headers()),
        Err(Http2Error::Protocol(_))
    ));
}

#[test]
fn clients_cannot_push() {
    let (mut client, mut server) = handshake();
    client.send_headers(1, request_headers(), true).unwrap();
    exchange(&mut client, &mut server);
    assert!(matches!(
        client.push_stream(1, 2, pushed_request_headers()),
        Err(Http2Error::Protocol(_))
    ));
}

#[test]
fn promised_stream_ids_must_be_even() {
    let (mut client, mut server) = handshake();
    client.send_headers(1, request_headers(), true).unwrap();
    exchange(&mut client, &mut server);
    assert!(matches!(
        server.push_stream(1, 3, pushed_request_headers()),
        Err(Http2Error::Protocol(_))
    ));
}

#[test]
fn pushing_on_a_pushed_stream_is_refused() {
    let (mut client, mut server) = handshake();
    client.send_headers(1, request_headers(), true).unwrap();
    exchange(&mut client, &mut server);
    server.push_stream(1, 2, pushed_request_headers()).unwrap();
    assert!(matches!(
        server.push_stream(2, 4, pushed_request_headers()),
        Err(Http2Error::Protocol(_))
    ));
}

#[test]
fn receiving_a_push_with_push_disabled_is_fatal() {
    let (mut client, mut server) = handshake();
    client.send_headers(1, request_headers(), true).unwrap();
    exchange(&mut client, &mut server);
    server.push_stream(1, 2, pushed_request_headers()).unwrap();

    // Disable push locally after the promise went out.
    let mut strict_client = Connection::client();
    strict_client.initiate_connection().unwrap();
    strict_client
        .update_settings(hashmap! { SettingsParameter::EnablePush => 0 })
        .unwrap();
    strict_client.send_headers(1, request_headers(), true).unwrap();
    // Force the pending setting current by feeding a SETTINGS ACK.
    strict_client
        .receive_data(&http2_engine::frame::Frame::Settings {
            flags: http2_engine::flags::SettingsFlags::ACK,
            params: vec![],
        }
        .serialize())
        .unwrap();

    let push_bytes = server.data_to_send(None);
    assert!(matches!(
        strict_client.receive_data(&push_bytes),
        Err(Http2Error::Protocol(_))
    ));
}

#[test]
fn pushed_streams_reserve_their_state() {
    let (mut client, mut server) = handshake();
    client.send_headers(1, request_headers(), true).unwrap();
    exchange(&mut client, &mut server);
    server.push_stream(1, 2, pushed_request_headers()).unwrap();
    exchange(&mut server, &mut client);

    assert_eq!(client.stream_state(2), Some(StreamState::ReservedRemote));

    server
        .send_headers(2, vec![Header::new(":status", "200")], false)
        .unwrap();
    exchange(&mut server, &mut client);
    assert_eq!(client.stream_state(2), Some(StreamState::HalfClosedLocal));

    // Resetting the pushed stream before it opens is allowed.
    client.reset_stream(2, ErrorCode::Cancel).unwrap();
    let events = exchange(&mut client, &mut server);
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::StreamReset(reset) if reset.stream_id == 2)));
}
