//! Per-stream state tracking, RFC 7540 §5.1.
//!
//! The transition map is a total function over `(state, input)`: pairs with
//! no defined transition close the stream and raise a protocol error, and
//! the closed state carries explicit entries so that late frames draw the
//! right reaction (an automatic RST_STREAM for the peer, a
//! [`Http2Error::StreamClosed`] for the local caller).
//!
//! ```not_rust
//!                              +--------+
//!                      send PP |        | recv PP
//!                     ,--------|  idle  |--------.
//!                    /         |        |         \
//!                   v          +--------+          v
//!            +----------+          |           +----------+
//!            |          |          | send H /  |          |
//!     ,------| reserved |          | recv H    | reserved |------.
//!     |      | (local)  |          |           | (remote) |      |
//!     |      +----------+          v           +----------+      |
//!     |          |             +--------+             |          |
//!     |          |     recv ES |        | send ES     |          |
//!     |   send H |     ,-------|  open  |-------.     | recv H   |
//!     |          |    /        |        |        \    |          |
//!     |          v   v         +--------+         v   v          |
//!     |      +----------+          |           +----------+      |
//!     |      |   half   |          |           |   half   |      |
//!     |      |  closed  |          | send R /  |  closed  |      |
//!     |      | (remote) |          | recv R    | (local)  |      |
//!     |      +----------+          |           +----------+      |
//!     |           |                |                 |           |
//!     |           | send ES /      |       recv ES / |           |
//!     |           | send R /       v        send R / |           |
//!     |           | recv R     +--------+   recv R   |           |
//!     | send R /  `----------->|        |<-----------'  send R / |
//!     | recv R                 | closed |               recv R   |
//!     `----------------------->|        |<----------------------'
//!                              +--------+
//! ```

use crate::{
    error::Http2Error,
    events::{
        DataReceived, Event, InformationalResponseReceived, PushedStreamReceived,
        RequestReceived, ResponseReceived, StreamEnded, StreamReset, TrailersReceived,
        WindowUpdated,
    },
    flags::{ContinuationFlags, DataFlags, HeadersFlags, PushPromiseFlags},
    frame::Frame,
    headers::{content_length_from_headers, is_informational_response, Header},
    hpack::HeaderCodec,
    types::{ErrorCode, StreamId, MAX_WINDOW},
};
use bytes::Bytes;
use log::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamInput {
    SendHeaders,
    SendPushPromise,
    SendRstStream,
    SendData,
    SendWindowUpdate,
    SendEndStream,
    RecvHeaders,
    RecvPushPromise,
    RecvRstStream,
    RecvData,
    RecvWindowUpdate,
    RecvEndStream,
    RecvContinuation,
    SendInformationalHeaders,
    RecvInformationalHeaders,
}

/// What a transition does besides changing state. Effects either emit an
/// event, record stream direction, or abort with the error appropriate to
/// the input class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    RequestSent,
    ResponseSent,
    RequestReceived,
    ResponseReceived,
    DataReceived,
    WindowUpdated,
    StreamEnded,
    StreamReset,
    SendNewPushedStream,
    RecvNewPushedStream,
    SendPushPromise,
    RecvPushPromise,
    /// A frame arrived that obliges us to answer with RST_STREAM.
    AutoReset,
    SendOnClosedStream,
    PushOnClosedStream,
    SendInformationalResponse,
    RecvInformationalResponse,
}

/// The transition map. `None` means the input is invalid in that state.
fn transition(state: StreamState, input: StreamInput) -> Option<(Option<Effect>, StreamState)> {
    use Effect as E;
    use StreamInput as I;
    use StreamState as S;

    #[rustfmt::skip]
    let entry = match (state, input) {
        (S::Idle, I::SendHeaders) => (Some(E::RequestSent), S::Open),
        (S::Idle, I::RecvHeaders) => (Some(E::RequestReceived), S::Open),
        (S::Idle, I::RecvData) => (Some(E::AutoReset), S::Closed),
        (S::Idle, I::SendPushPromise) => (Some(E::SendNewPushedStream), S::ReservedLocal),
        (S::Idle, I::RecvPushPromise) => (Some(E::RecvNewPushedStream), S::ReservedRemote),

        (S::ReservedLocal, I::SendHeaders) => (None, S::HalfClosedRemote),
        (S::ReservedLocal, I::RecvData) => (Some(E::AutoReset), S::Closed),
        (S::ReservedLocal, I::SendWindowUpdate) => (None, S::ReservedLocal),
        (S::ReservedLocal, I::RecvWindowUpdate) => (Some(E::WindowUpdated), S::ReservedLocal),
        (S::ReservedLocal, I::SendRstStream) => (None, S::Closed),
        (S::ReservedLocal, I::RecvRstStream) => (Some(E::StreamReset), S::Closed),

        (S::ReservedRemote, I::RecvHeaders) => (Some(E::ResponseReceived), S::HalfClosedLocal),
        (S::ReservedRemote, I::RecvData) => (Some(E::AutoReset), S::Closed),
        (S::ReservedRemote, I::SendWindowUpdate) => (None, S::ReservedRemote),
        (S::ReservedRemote, I::RecvWindowUpdate) => (Some(E::WindowUpdated), S::ReservedRemote),
        (S::ReservedRemote, I::SendRstStream) => (None, S::Closed),
        (S::ReservedRemote, I::RecvRstStream) => (Some(E::StreamReset), S::Closed),

        (S::Open, I::SendHeaders) => (Some(E::ResponseSent), S::Open),
        (S::Open, I::RecvHeaders) => (Some(E::ResponseReceived), S::Open),
        (S::Open, I::SendData) => (None, S::Open),
        (S::Open, I::RecvData) => (Some(E::DataReceived), S::Open),
        (S::Open, I::SendEndStream) => (None, S::HalfClosedLocal),
        (S::Open, I::RecvEndStream) => (Some(E::StreamEnded), S::HalfClosedRemote),
        (S::Open, I::SendWindowUpdate) => (None, S::Open),
        (S::Open, I::RecvWindowUpdate) => (Some(E::WindowUpdated), S::Open),
        (S::Open, I::SendRstStream) => (None, S::Closed),
        (S::Open, I::RecvRstStream) => (Some(E::StreamReset), S::Closed),
        (S::Open, I::SendPushPromise) => (Some(E::SendPushPromise), S::Open),
        (S::Open, I::RecvPushPromise) => (Some(E::RecvPushPromise), S::Open),
        (S::Open, I::SendInformationalHeaders) => (Some(E::SendInformationalResponse), S::Open),
        (S::Open, I::RecvInformationalHeaders) => (Some(E::RecvInformationalResponse), S::Open),

        (S::HalfClosedRemote, I::SendHeaders) => (Some(E::ResponseSent), S::HalfClosedRemote),
        (S::HalfClosedRemote, I::RecvHeaders) => (Some(E::AutoReset), S::Closed),
        (S::HalfClosedRemote, I::SendData) => (None, S::HalfClosedRemote),
        (S::HalfClosedRemote, I::RecvData) => (Some(E::AutoReset), S::Closed),
        (S::HalfClosedRemote, I::SendEndStream) => (None, S::Closed),
        (S::HalfClosedRemote, I::SendWindowUpdate) => (None, S::HalfClosedRemote),
        (S::HalfClosedRemote, I::RecvWindowUpdate) => (Some(E::WindowUpdated), S::HalfClosedRemote),
        (S::HalfClosedRemote, I::SendRstStream) => (None, S::Closed),
        (S::HalfClosedRemote, I::RecvRstStream) => (Some(E::StreamReset), S::Closed),
        (S::HalfClosedRemote, I::SendPushPromise) => (Some(E::SendPushPromise), S::HalfClosedRemote),
        (S::HalfClosedRemote, I::RecvPushPromise) => (Some(E::AutoReset), S::Closed),
        (S::HalfClosedRemote, I::RecvContinuation) => (Some(E::AutoReset), S::Closed),
        (S::HalfClosedRemote, I::SendInformationalHeaders) => {
            (Some(E::SendInformationalResponse), S::HalfClosedRemote)
        }

        (S::HalfClosedLocal, I::RecvHeaders) => (Some(E::ResponseReceived), S::HalfClosedLocal),
        (S::HalfClosedLocal, I::RecvData) => (Some(E::DataReceived), S::HalfClosedLocal),
        (S::HalfClosedLocal, I::RecvEndStream) => (Some(E::StreamEnded), S::Closed),
        (S::HalfClosedLocal, I::SendWindowUpdate) => (None, S::HalfClosedLocal),
        (S::HalfClosedLocal, I::RecvWindowUpdate) => (Some(E::WindowUpdated), S::HalfClosedLocal),
        (S::HalfClosedLocal, I::SendRstStream) => (None, S::Closed),
        (S::HalfClosedLocal, I::RecvRstStream) => (Some(E::StreamReset), S::Closed),
        (S::HalfClosedLocal, I::RecvPushPromise) => (Some(E::RecvPushPromise), S::HalfClosedLocal),
        (S::HalfClosedLocal, I::RecvInformationalHeaders) => {
            (Some(E::RecvInformationalResponse), S::HalfClosedLocal)
        }

        // Late frames on closed streams get RST_STREAM; further RST_STREAMs
        // and END_STREAMs are swallowed; local sends surface errors.
        (S::Closed, I::RecvWindowUpdate) => (Some(E::WindowUpdated), S::Closed),
        (S::Closed, I::RecvRstStream) => (None, S::Closed),
        (S::Closed, I::RecvHeaders) => (Some(E::AutoReset), S::Closed),
        (S::Closed, I::RecvData) => (Some(E::AutoReset), S::Closed),
        (S::Closed, I::RecvPushPromise) => (Some(E::PushOnClosedStream), S::Closed),
        (S::Closed, I::RecvEndStream) => (None, S::Closed),
        (S::Closed, I::RecvContinuation) => (Some(E::AutoReset), S::Closed),
        (S::Closed, I::SendHeaders) => (Some(E::SendOnClosedStream), S::Closed),
        (S::Closed, I::SendPushPromise) => (Some(E::PushOnClosedStream), S::Closed),
        (S::Closed, I::SendRstStream) => (Some(E::SendOnClosedStream), S::Closed),
        (S::Closed, I::SendData) => (Some(E::SendOnClosedStream), S::Closed),
        (S::Closed, I::SendWindowUpdate) => (Some(E::SendOnClosedStream), S::Closed),
        (S::Closed, I::SendEndStream) => (Some(E::SendOnClosedStream), S::Closed),

        _ => return None,
    };
    Some(entry)
}

#[derive(Debug)]
pub struct StreamStateMachine {
    stream_id: StreamId,
    state: StreamState,
    /// Whether this peer is the client side of this stream. Assigned on the
    /// first directional input.
    client: Option<bool>,
    headers_sent: bool,
    trailers_sent: bool,
    headers_received: bool,
    trailers_received: bool,
}

impl StreamStateMachine {
    fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            state: StreamState::Idle,
            client: None,
            headers_sent: false,
            trailers_sent: false,
            headers_received: false,
            trailers_received: false,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn process_input(&mut self, input: StreamInput) -> Result<Vec<Event>, Http2Error> {
        let Some((effect, next_state)) = transition(self.state, input) else {
            let old_state = self.state;
            self.state = StreamState::Closed;
            return Err(Http2Error::protocol(format!(
                "invalid input {:?} in state {:?}",
                input, old_state
            )));
        };

        let previous_state = self.state;
        self.state = next_state;
        if previous_state != next_state {
            trace!(
                "stream {} {:?} -> {:?}",
                self.stream_id,
                previous_state,
                next_state
            );
        }

        let Some(effect) = effect else {
            return Ok(Vec::new());
        };
        let result = self.run_effect(effect, previous_state);
        if let Err(Http2Error::Protocol(_)) = &result {
            self.state = StreamState::Closed;
        }
        result
    }

    fn run_effect(
        &mut self,
        effect: Effect,
        previous_state: StreamState,
    ) -> Result<Vec<Event>, Http2Error> {
        let stream_id = self.stream_id;
        let events = match effect {
            Effect::RequestSent => {
                self.client = Some(true);
                self.headers_sent = true;
                Vec::new()
            }
            Effect::ResponseSent => {
                if !self.headers_sent {
                    if self.client != Some(false) {
                        return Err(Http2Error::protocol("client cannot send responses"));
                    }
                    self.headers_sent = true;
                } else {
                    self.trailers_sent = true;
                }
                Vec::new()
            }
            Effect::RequestReceived => {
                self.client = Some(false);
                self.headers_received = true;
                vec![Event::from(RequestReceived {
                    stream_id,
                    headers: Vec::new(),
                    stream_ended: None,
                    priority_updated: None,
                })]
            }
            Effect::ResponseReceived => {
                if !self.headers_received {
                    self.headers_received = true;
                    vec![Event::from(ResponseReceived {
                        stream_id,
                        headers: Vec::new(),
                        stream_ended: None,
                        priority_updated: None,
                    })]
                } else {
                    self.trailers_received = true;
                    vec![Event::from(TrailersReceived {
                        stream_id,
                        headers: Vec::new(),
                        stream_ended: None,
                        priority_updated: None,
                    })]
                }
            }
            Effect::DataReceived => vec![Event::from(DataReceived {
                stream_id,
                data: Bytes::new(),
                flow_controlled_length: 0,
                stream_ended: None,
            })],
            Effect::WindowUpdated => vec![Event::from(WindowUpdated {
                stream_id,
                delta: 0,
            })],
            Effect::StreamEnded => vec![Event::from(StreamEnded { stream_id })],
            Effect::StreamReset => vec![Event::from(StreamReset {
                stream_id,
                error_code: ErrorCode::NoError.to_wire(),
                remote_reset: true,
            })],
            Effect::SendNewPushedStream => {
                self.client = Some(false);
                Vec::new()
            }
            Effect::RecvNewPushedStream => {
                self.client = Some(true);
                Vec::new()
            }
            Effect::SendPushPromise => {
                if self.client == Some(true) {
                    return Err(Http2Error::protocol("cannot push streams from client peers"));
                }
                Vec::new()
            }
            Effect::RecvPushPromise => {
                if self.client != Some(true) {
                    return Err(Http2Error::protocol(if self.client.is_none() {
                        "idle streams cannot receive pushes"
                    } else {
                        "cannot receive pushed streams as a server"
                    }));
                }
                vec![Event::from(PushedStreamReceived {
                    pushed_stream_id: 0,
                    parent_stream_id: stream_id,
                    headers: Vec::new(),
                })]
            }
            Effect::AutoReset => {
                // Only announce the reset to the user the first time; the
                // stream was not yet closed then.
                let events = if previous_state != StreamState::Closed {
                    vec![Event::from(StreamReset {
                        stream_id,
                        error_code: ErrorCode::StreamClosed.to_wire(),
                        remote_reset: false,
                    })]
                } else {
                    Vec::new()
                };
                return Err(Http2Error::StreamClosed {
                    stream_id,
                    code: ErrorCode::StreamClosed,
                    events,
                });
            }
            Effect::SendOnClosedStream => {
                return Err(Http2Error::StreamClosed {
                    stream_id,
                    code: ErrorCode::StreamClosed,
                    events: Vec::new(),
                });
            }
            Effect::PushOnClosedStream => {
                return Err(Http2Error::protocol("attempted to push on closed stream"));
            }
            Effect::SendInformationalResponse => {
                if self.headers_sent {
                    return Err(Http2Error::protocol(
                        "informational response after final response",
                    ));
                }
                Vec::new()
            }
            Effect::RecvInformationalResponse => {
                if self.headers_received {
                    return Err(Http2Error::protocol(
                        "informational response after final response",
                    ));
                }
                vec![Event::from(InformationalResponseReceived {
                    stream_id,
                    headers: Vec::new(),
                })]
            }
        };
        Ok(events)
    }
}

/// A single stream: the state machine plus flow-control windows and body
/// length accounting.
#[derive(Debug)]
pub struct Stream {
    stream_id: StreamId,
    machine: StreamStateMachine,
    pub max_outbound_frame_size: u32,
    /// How much the peer will accept from us. Can go negative when the peer
    /// shrinks INITIAL_WINDOW_SIZE under us.
    pub outbound_window: i64,
    /// How much we will accept from the peer.
    pub inbound_window: i64,
    expected_content_length: Option<u64>,
    actual_content_length: u64,
}

impl Stream {
    #[must_use]
    pub fn new(
        stream_id: StreamId,
        outbound_window: u32,
        inbound_window: u32,
        max_outbound_frame_size: u32,
    ) -> Self {
        Self {
            stream_id,
            machine: StreamStateMachine::new(stream_id),
            max_outbound_frame_size,
            outbound_window: i64::from(outbound_window),
            inbound_window: i64::from(inbound_window),
            expected_content_length: None,
            actual_content_length: 0,
        }
    }

    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        self.machine.state()
    }

    /// Whether the stream counts against MAX_CONCURRENT_STREAMS. RFC 7540
    /// §5.1.2 counts the open and both half-closed states, excluding the
    /// reserved ones.
    #[must_use]
    pub fn open(&self) -> bool {
        matches!(
            self.machine.state(),
            StreamState::Open | StreamState::HalfClosedLocal | StreamState::HalfClosedRemote
        )
    }

    #[must_use]
    pub fn closed(&self) -> bool {
        self.machine.state() == StreamState::Closed
    }

    pub(crate) fn is_client(&self) -> Option<bool> {
        self.machine.client
    }

    pub(crate) fn headers_sent(&self) -> bool {
        self.machine.headers_sent
    }

    pub(crate) fn headers_received(&self) -> bool {
        self.machine.headers_received
    }

    /// Builds the HEADERS/CONTINUATION frames for a header or trailer block.
    pub fn send_headers(
        &mut self,
        headers: &[Header],
        end_stream: bool,
        encoder: &mut dyn HeaderCodec,
    ) -> Result<Vec<Frame>, Http2Error> {
        // Informational blocks only make sense from the server side of the
        // stream; from there, END_STREAM can never accompany a 1xx.
        let input = if self.machine.client != Some(true) && is_informational_response(headers) {
            if end_stream {
                return Err(Http2Error::protocol(
                    "cannot set END_STREAM on informational responses",
                ));
            }
            StreamInput::SendInformationalHeaders
        } else {
            StreamInput::SendHeaders
        };

        // The state transition comes first: encoding headers irreversibly
        // mutates the compression context.
        self.machine.process_input(input)?;

        let encoded = encoder.encode(headers);
        let mut frames = self.chunk_header_block(encoded, None);

        if end_stream {
            self.machine.process_input(StreamInput::SendEndStream)?;
            if let Some(Frame::Headers { flags, .. }) = frames.first_mut() {
                // END_STREAM belongs on the initial HEADERS frame, not the
                // trailing CONTINUATIONs.
                *flags |= HeadersFlags::END_STREAM;
            }
        }

        if self.machine.trailers_sent && !end_stream {
            return Err(Http2Error::protocol("trailers must have END_STREAM set"));
        }

        Ok(frames)
    }

    /// Builds the PUSH_PROMISE/CONTINUATION frames announcing a pushed
    /// stream. Called on the stream the promise rides on.
    pub fn push_stream_in_band(
        &mut self,
        promised_stream_id: StreamId,
        headers: &[Header],
        encoder: &mut dyn HeaderCodec,
    ) -> Result<Vec<Frame>, Http2Error> {
        self.machine.process_input(StreamInput::SendPushPromise)?;
        let encoded = encoder.encode(headers);
        Ok(self.chunk_header_block(encoded, Some(promised_stream_id)))
    }

    /// Marks this stream as pushed by us. Sends nothing.
    pub fn locally_pushed(&mut self) -> Result<(), Http2Error> {
        self.machine.process_input(StreamInput::SendPushPromise)?;
        Ok(())
    }

    /// Marks this stream as pushed by the peer. Sends nothing.
    pub fn remotely_pushed(&mut self) -> Result<Vec<Event>, Http2Error> {
        self.machine.process_input(StreamInput::RecvPushPromise)
    }

    /// Prepares a DATA frame. Flow-control checks live on the connection;
    /// this only keeps the stream window book.
    pub fn send_data(&mut self, data: Bytes, end_stream: bool) -> Result<Vec<Frame>, Http2Error> {
        self.machine.process_input(StreamInput::SendData)?;
        let mut flags = DataFlags::empty();
        if end_stream {
            self.machine.process_input(StreamInput::SendEndStream)?;
            flags |= DataFlags::END_STREAM;
        }
        self.outbound_window -= data.len() as i64;
        let flow_controlled_length = data.len() as u32;
        Ok(vec![Frame::Data {
            stream_id: self.stream_id,
            flags,
            data,
            flow_controlled_length,
        }])
    }

    /// Ends the stream with an empty DATA frame.
    pub fn end_stream(&mut self) -> Result<Vec<Frame>, Http2Error> {
        self.machine.process_input(StreamInput::SendEndStream)?;
        Ok(vec![Frame::Data {
            stream_id: self.stream_id,
            flags: DataFlags::END_STREAM,
            data: Bytes::new(),
            flow_controlled_length: 0,
        }])
    }

    /// Opens the peer's view of our receive window.
    pub fn increase_flow_control_window(
        &mut self,
        increment: u32,
    ) -> Result<Vec<Frame>, Http2Error> {
        self.machine.process_input(StreamInput::SendWindowUpdate)?;
        Ok(vec![Frame::WindowUpdate {
            stream_id: self.stream_id,
            increment,
        }])
    }

    /// Handles a received header or trailer block.
    pub fn receive_headers(
        &mut self,
        headers: Vec<Header>,
        end_stream: bool,
    ) -> Result<Vec<Event>, Http2Error> {
        let input = if is_informational_response(&headers) {
            if end_stream {
                return Err(Http2Error::protocol(
                    "cannot set END_STREAM on informational responses",
                ));
            }
            StreamInput::RecvInformationalHeaders
        } else {
            StreamInput::RecvHeaders
        };

        let mut events = self.machine.process_input(input)?;
        if end_stream {
            events.extend(self.machine.process_input(StreamInput::RecvEndStream)?);
        }

        self.expected_content_length = content_length_from_headers(&headers)?;

        if matches!(events.first(), Some(Event::TrailersReceived(_))) && !end_stream {
            return Err(Http2Error::protocol("trailers must have END_STREAM set"));
        }

        attach_headers(&mut events, headers);
        cross_reference_stream_ended(&mut events);
        Ok(events)
    }

    /// Handles received body bytes.
    pub fn receive_data(
        &mut self,
        data: Bytes,
        end_stream: bool,
        flow_controlled_length: u32,
    ) -> Result<Vec<Event>, Http2Error> {
        let mut events = self.machine.process_input(StreamInput::RecvData)?;
        self.inbound_window -= i64::from(flow_controlled_length);
        self.track_content_length(data.len() as u64, end_stream)?;

        if end_stream {
            events.extend(self.machine.process_input(StreamInput::RecvEndStream)?);
        }

        if let Some(Event::DataReceived(event)) = events.first_mut() {
            event.data = data;
            event.flow_controlled_length = flow_controlled_length;
        }
        cross_reference_stream_ended(&mut events);
        Ok(events)
    }

    /// Handles a received WINDOW_UPDATE for this stream.
    pub fn receive_window_update(&mut self, increment: u32) -> Result<Vec<Event>, Http2Error> {
        let mut events = self
            .machine
            .process_input(StreamInput::RecvWindowUpdate)?;
        if let Some(Event::WindowUpdated(event)) = events.first_mut() {
            event.delta = increment;
        }
        self.outbound_window = guard_increment_window(self.outbound_window, i64::from(increment))?;
        Ok(events)
    }

    /// Handles a PUSH_PROMISE received on this (parent) stream.
    pub fn receive_push_promise_in_band(
        &mut self,
        promised_stream_id: StreamId,
        headers: Vec<Header>,
    ) -> Result<Vec<Event>, Http2Error> {
        let mut events = self.machine.process_input(StreamInput::RecvPushPromise)?;
        if let Some(Event::PushedStreamReceived(event)) = events.first_mut() {
            event.pushed_stream_id = promised_stream_id;
            event.headers = headers;
        }
        Ok(events)
    }

    /// A CONTINUATION arrived with no header block in progress. The table
    /// routes every entry for this input into an error; the trailing return
    /// keeps that guarantee even if the table ever grew a silent entry.
    pub fn receive_naked_continuation(&mut self) -> Result<(), Http2Error> {
        self.machine.process_input(StreamInput::RecvContinuation)?;
        Err(Http2Error::protocol(
            "CONTINUATION frame without preceding HEADERS",
        ))
    }

    /// Resets the stream from our side.
    pub fn reset_stream(&mut self, error_code: ErrorCode) -> Result<Vec<Frame>, Http2Error> {
        self.machine.process_input(StreamInput::SendRstStream)?;
        Ok(vec![Frame::ResetStream {
            stream_id: self.stream_id,
            error_code: error_code.to_wire(),
        }])
    }

    /// Handles the peer resetting the stream. No event is fired when the
    /// stream was already closed.
    pub fn stream_reset(&mut self, error_code: u32) -> Result<Vec<Event>, Http2Error> {
        let mut events = self.machine.process_input(StreamInput::RecvRstStream)?;
        if let Some(Event::StreamReset(event)) = events.first_mut() {
            event.error_code = error_code;
            event.remote_reset = true;
        }
        Ok(events)
    }

    fn chunk_header_block(
        &self,
        encoded: Bytes,
        promised_stream_id: Option<StreamId>,
    ) -> Vec<Frame> {
        let chunk_size = self.max_outbound_frame_size as usize;
        let mut chunks: Vec<Bytes> = Vec::with_capacity(1 + encoded.len() / chunk_size.max(1));
        if encoded.is_empty() {
            chunks.push(encoded);
        } else {
            let mut rest = encoded;
            while rest.len() > chunk_size {
                chunks.push(rest.split_to(chunk_size));
            }
            chunks.push(rest);
        }

        let last = chunks.len() - 1;
        let mut frames = Vec::with_capacity(chunks.len());
        for (index, fragment) in chunks.into_iter().enumerate() {
            let end_headers = index == last;
            if index == 0 {
                frames.push(match promised_stream_id {
                    Some(promised) => Frame::PushPromise {
                        stream_id: self.stream_id,
                        flags: if end_headers {
                            PushPromiseFlags::END_HEADERS
                        } else {
                            PushPromiseFlags::empty()
                        },
                        promised_stream_id: promised,
                        fragment,
                    },
                    None => Frame::Headers {
                        stream_id: self.stream_id,
                        flags: if end_headers {
                            HeadersFlags::END_HEADERS
                        } else {
                            HeadersFlags::empty()
                        },
                        priority: None,
                        fragment,
                    },
                });
            } else {
                frames.push(Frame::Continuation {
                    stream_id: self.stream_id,
                    flags: if end_headers {
                        ContinuationFlags::END_HEADERS
                    } else {
                        ContinuationFlags::empty()
                    },
                    fragment,
                });
            }
        }
        frames
    }

    /// Accumulates received body length against the declared
    /// `content-length`, if one was declared.
    fn track_content_length(&mut self, length: u64, end_stream: bool) -> Result<(), Http2Error> {
        self.actual_content_length += length;
        let actual = self.actual_content_length;
        if let Some(expected) = self.expected_content_length {
            if expected < actual || (end_stream && expected != actual) {
                return Err(Http2Error::InvalidBodyLength { expected, actual });
            }
        }
        Ok(())
    }
}

fn attach_headers(events: &mut [Event], headers: Vec<Header>) {
    match events.first_mut() {
        Some(Event::RequestReceived(event)) => event.headers = headers,
        Some(Event::ResponseReceived(event)) => event.headers = headers,
        Some(Event::TrailersReceived(event)) => event.headers = headers,
        Some(Event::InformationalResponseReceived(event)) => event.headers = headers,
        _ => {}
    }
}

/// Copies a companion [`StreamEnded`] event into the primary event's
/// cross-reference field.
fn cross_reference_stream_ended(events: &mut [Event]) {
    let ended = events.iter().find_map(|event| match event {
        Event::StreamEnded(ended) => Some(ended.clone()),
        _ => None,
    });
    let Some(ended) = ended else { return };
    match events.first_mut() {
        Some(Event::RequestReceived(event)) => event.stream_ended = Some(ended),
        Some(Event::ResponseReceived(event)) => event.stream_ended = Some(ended),
        Some(Event::TrailersReceived(event)) => event.stream_ended = Some(ended),
        Some(Event::DataReceived(event)) => event.stream_ended = Some(ended),
        _ => {}
    }
}

/// Applies a WINDOW_UPDATE increment, refusing windows beyond 2^31-1.
pub(crate) fn guard_increment_window(current: i64, increment: i64) -> Result<i64, Http2Error> {
    let new_size = current + increment;
    if new_size > MAX_WINDOW {
        return Err(Http2Error::flow_control(format!(
            "may not increment flow control window past {}",
            MAX_WINDOW
        )));
    }
    Ok(new_size)
}
