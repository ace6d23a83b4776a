//! The connection engine: owns every other component, dispatches frames and
//! produces outbound bytes.
//!
//! The engine is sans-I/O: feed it received bytes through
//! [`Connection::receive_data`], drive it with the send operations, and
//! flush [`Connection::data_to_send`] to the transport. Each
//! `receive_data` call either returns the events the peer triggered and
//! leaves the engine consistent, or fails after queueing the GOAWAY the
//! caller should flush before closing the transport.

use crate::{
    config::{Config, HeaderEncoding},
    error::Http2Error,
    events::{
        AlternativeServiceAvailable, ConnectionTerminated, Event, PingAckReceived, PingReceived,
        PriorityUpdated, RemoteSettingsChanged, SettingsAcknowledged, UnknownFrameReceived,
        WindowUpdated,
    },
    flags::{DataFlags, HeadersFlags, PingFlags, SettingsFlags},
    frame::{Frame, PriorityInfo},
    frame_buffer::FrameBuffer,
    headers::{
        ensure_utf8, normalize_inbound_headers, normalize_outbound_headers,
        validate_inbound_headers, validate_outbound_headers, Header, ValidationFlags,
    },
    hpack::{HeaderCodec, HpackCodec},
    settings::{ChangedSetting, SettingsStore},
    stream::{guard_increment_window, Stream, StreamState},
    types::{
        ErrorCode, SettingsParameter, StreamId, CONNECTION_PREFACE, MAX_STREAM_ID,
        MAX_WINDOW_INCREMENT,
    },
};
use bytes::{Bytes, BytesMut};
use derivative::Derivative;
use log::{debug, trace, warn};
use std::collections::{HashMap, VecDeque};

/// The number of concurrent inbound streams we advertise. The protocol
/// default is unbounded, which invites unbounded resource use; 100 suits the
/// average application. The remote peer's own limit is whatever it says.
const ADVERTISED_MAX_CONCURRENT_STREAMS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    ClientOpen,
    ServerOpen,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ConnectionInput {
    SendHeaders,
    SendPushPromise,
    SendData,
    SendGoAway,
    SendWindowUpdate,
    SendPing,
    SendSettings,
    SendRstStream,
    SendPriority,
    RecvHeaders,
    RecvPushPromise,
    RecvData,
    RecvGoAway,
    RecvWindowUpdate,
    RecvPing,
    RecvSettings,
    RecvRstStream,
    RecvPriority,
}

/// The connection-level transition map. HEADERS and their CONTINUATIONs are
/// one jumbo frame by the time they reach this layer. `None` means the input
/// is invalid in that state.
fn connection_transition(
    state: ConnectionState,
    input: ConnectionInput,
) -> Option<ConnectionState> {
    use ConnectionInput as I;
    use ConnectionState as S;

    let next = match (state, input) {
        (S::Idle, I::SendHeaders) => S::ClientOpen,
        (S::Idle, I::RecvHeaders) => S::ServerOpen,
        (
            S::Idle,
            I::SendSettings
            | I::RecvSettings
            | I::SendWindowUpdate
            | I::RecvWindowUpdate
            | I::SendPing
            | I::RecvPing
            | I::SendPriority
            | I::RecvPriority,
        ) => S::Idle,
        (S::Idle, I::SendGoAway | I::RecvGoAway) => S::Closed,

        (
            S::ClientOpen,
            I::SendHeaders
            | I::SendData
            | I::SendWindowUpdate
            | I::SendPing
            | I::SendSettings
            | I::SendPriority
            | I::SendRstStream
            | I::RecvHeaders
            | I::RecvPushPromise
            | I::RecvData
            | I::RecvWindowUpdate
            | I::RecvPing
            | I::RecvSettings
            | I::RecvRstStream
            | I::RecvPriority,
        ) => S::ClientOpen,
        (S::ClientOpen, I::SendGoAway | I::RecvGoAway) => S::Closed,

        (
            S::ServerOpen,
            I::SendHeaders
            | I::SendPushPromise
            | I::SendData
            | I::SendWindowUpdate
            | I::SendPing
            | I::SendSettings
            | I::SendPriority
            | I::SendRstStream
            | I::RecvHeaders
            | I::RecvData
            | I::RecvWindowUpdate
            | I::RecvPing
            | I::RecvSettings
            | I::RecvRstStream
            | I::RecvPriority,
        ) => S::ServerOpen,
        (S::ServerOpen, I::SendGoAway | I::RecvGoAway) => S::Closed,

        (S::Closed, I::SendGoAway | I::RecvGoAway) => S::Closed,

        _ => return None,
    };
    Some(next)
}

#[derive(Debug)]
struct ConnectionStateMachine {
    state: ConnectionState,
}

impl ConnectionStateMachine {
    fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
        }
    }

    fn process_input(&mut self, input: ConnectionInput) -> Result<(), Http2Error> {
        match connection_transition(self.state, input) {
            Some(next) => {
                if next != self.state {
                    trace!("connection {:?} -> {:?}", self.state, next);
                }
                self.state = next;
                Ok(())
            }
            None => {
                let old_state = self.state;
                self.state = ConnectionState::Closed;
                Err(Http2Error::protocol(format!(
                    "invalid input {:?} in state {:?}",
                    input, old_state
                )))
            }
        }
    }
}

/// Which stream ID parity a peer may open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AllowedStreamIds {
    Even,
    Odd,
}

impl AllowedStreamIds {
    fn for_client(client: bool) -> Self {
        if client {
            Self::Odd
        } else {
            Self::Even
        }
    }

    fn admits(self, stream_id: StreamId) -> bool {
        stream_id % 2 == u32::from(self == Self::Odd)
    }
}

/// A sans-I/O HTTP/2 connection.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Connection {
    config: Config,
    state_machine: ConnectionStateMachine,
    streams: HashMap<StreamId, Stream>,
    highest_inbound_stream_id: StreamId,
    highest_outbound_stream_id: StreamId,
    #[derivative(Debug = "ignore")]
    codec: Box<dyn HeaderCodec>,
    local_settings: SettingsStore,
    remote_settings: SettingsStore,
    /// Connection-level flow-control windows.
    outbound_window: i64,
    inbound_window: i64,
    max_outbound_frame_size: u32,
    max_inbound_frame_size: u32,
    frame_buffer: FrameBuffer,
    outbound_buffer: BytesMut,
    /// Streams we reset, oldest first, so frames that were in flight when
    /// the RST_STREAM went out are dropped silently.
    reset_streams: VecDeque<StreamId>,
}

impl Connection {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_header_codec(config, Box::new(HpackCodec::new()))
    }

    /// A connection using a caller-provided HPACK implementation.
    #[must_use]
    pub fn with_header_codec(config: Config, codec: Box<dyn HeaderCodec>) -> Self {
        let mut local_settings = SettingsStore::new(config.client_side);
        local_settings.set_initial(
            SettingsParameter::MaxConcurrentStreams,
            ADVERTISED_MAX_CONCURRENT_STREAMS,
        );
        let remote_settings = SettingsStore::new(!config.client_side);

        Self {
            state_machine: ConnectionStateMachine::new(),
            streams: HashMap::new(),
            highest_inbound_stream_id: 0,
            highest_outbound_stream_id: 0,
            codec,
            outbound_window: i64::from(remote_settings.initial_window_size()),
            inbound_window: i64::from(local_settings.initial_window_size()),
            max_outbound_frame_size: remote_settings.max_frame_size(),
            max_inbound_frame_size: local_settings.max_frame_size(),
            frame_buffer: FrameBuffer::new(!config.client_side),
            outbound_buffer: BytesMut::new(),
            reset_streams: VecDeque::new(),
            local_settings,
            remote_settings,
            config,
        }
    }

    #[must_use]
    pub fn client() -> Self {
        Self::new(Config::client())
    }

    #[must_use]
    pub fn server() -> Self {
        Self::new(Config::server())
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state_machine.state
    }

    #[must_use]
    pub fn is_client(&self) -> bool {
        self.config.client_side
    }

    #[must_use]
    pub fn local_settings(&self) -> &SettingsStore {
        &self.local_settings
    }

    #[must_use]
    pub fn remote_settings(&self) -> &SettingsStore {
        &self.remote_settings
    }

    /// The state of a stream, if it is still live in the stream map.
    #[must_use]
    pub fn stream_state(&self, stream_id: StreamId) -> Option<StreamState> {
        self.streams.get(&stream_id).map(Stream::state)
    }

    /// The connection-level send window (zero when exhausted or negative).
    #[must_use]
    pub fn outbound_flow_control_window(&self) -> u32 {
        window_to_u32(self.outbound_window)
    }

    /// The connection-level receive window (zero when exhausted or
    /// negative).
    #[must_use]
    pub fn inbound_flow_control_window(&self) -> u32 {
        window_to_u32(self.inbound_window)
    }

    #[must_use]
    pub fn max_outbound_frame_size(&self) -> u32 {
        self.max_outbound_frame_size
    }

    #[must_use]
    pub fn max_inbound_frame_size(&self) -> u32 {
        self.max_inbound_frame_size
    }

    /// Queues the data every connection must open with: the client preface
    /// (for clients) and our SETTINGS frame.
    pub fn initiate_connection(&mut self) -> Result<(), Http2Error> {
        self.state_machine
            .process_input(ConnectionInput::SendSettings)?;
        if self.config.client_side {
            self.outbound_buffer.extend_from_slice(CONNECTION_PREFACE);
        }
        let frame = Frame::Settings {
            flags: SettingsFlags::empty(),
            params: self.local_settings.snapshot(),
        };
        self.prepare_for_sending(vec![frame]);
        Ok(())
    }

    /// The next stream ID this endpoint may use to open a stream: odd for
    /// clients, even for servers. The value does not advance until headers
    /// are actually sent, so call it close to the use of the ID.
    pub fn get_next_available_stream_id(&self) -> Result<StreamId, Http2Error> {
        if self.highest_outbound_stream_id == 0 {
            return Ok(if self.config.client_side { 1 } else { 2 });
        }
        let next = self.highest_outbound_stream_id + 2;
        if next > MAX_STREAM_ID {
            return Err(Http2Error::NoAvailableStreamIds);
        }
        Ok(next)
    }

    /// The number of streams this endpoint opened that are currently open.
    /// Sweeps closed streams out of the map as a side effect.
    pub fn open_outbound_streams(&mut self) -> usize {
        self.count_open_streams(u32::from(self.config.client_side))
    }

    /// The number of streams the peer opened that are currently open.
    /// Sweeps closed streams out of the map as a side effect.
    pub fn open_inbound_streams(&mut self) -> usize {
        self.count_open_streams(u32::from(!self.config.client_side))
    }

    /// Sends a header block, opening the stream if needed. For clients the
    /// block is a request (then optionally trailers); for servers, zero or
    /// more informational responses, one final response, then optionally
    /// trailers.
    pub fn send_headers(
        &mut self,
        stream_id: StreamId,
        headers: Vec<Header>,
        end_stream: bool,
    ) -> Result<(), Http2Error> {
        if !self.streams.contains_key(&stream_id) {
            let max_open_streams = self.remote_settings.max_concurrent_streams();
            let open = self.open_outbound_streams();
            if open + 1 > max_open_streams as usize {
                return Err(Http2Error::TooManyStreams {
                    open,
                    max: max_open_streams,
                });
            }
        }

        let is_trailer = self
            .streams
            .get(&stream_id)
            .map_or(false, Stream::headers_sent);
        let validation_flags = ValidationFlags {
            is_client: self.config.client_side,
            is_trailer,
            is_response_header: !self.config.client_side && !is_trailer,
            is_push_promise: false,
        };
        let headers = self.prepare_outbound_headers(headers, validation_flags)?;

        self.state_machine
            .process_input(ConnectionInput::SendHeaders)?;
        self.ensure_stream(
            stream_id,
            AllowedStreamIds::for_client(self.config.client_side),
        )?;

        let codec = self.codec.as_mut();
        let stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or(Http2Error::NoSuchStream(stream_id))?;
        let frames = stream.send_headers(&headers, end_stream, codec)?;
        self.prepare_for_sending(frames);
        Ok(())
    }

    /// Sends body bytes. The data must fit the flow-control window and the
    /// peer's MAX_FRAME_SIZE; the engine refuses rather than buffers.
    pub fn send_data(
        &mut self,
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
    ) -> Result<(), Http2Error> {
        let window = self.local_flow_control_window(stream_id)?;
        if data.len() as u64 > u64::from(window) {
            return Err(Http2Error::flow_control(format!(
                "cannot send {} bytes, flow control window is {}",
                data.len(),
                window
            )));
        }
        if data.len() as u64 > u64::from(self.max_outbound_frame_size) {
            return Err(Http2Error::FrameTooLarge {
                size: data.len(),
                max: self.max_outbound_frame_size as usize,
            });
        }

        self.state_machine.process_input(ConnectionInput::SendData)?;
        let length = data.len() as i64;
        let stream = self.stream_by_id(stream_id)?;
        let frames = stream.send_data(data, end_stream)?;
        self.prepare_for_sending(frames);
        self.outbound_window -= length;
        Ok(())
    }

    /// Cleanly ends a stream with an empty DATA frame carrying END_STREAM.
    pub fn end_stream(&mut self, stream_id: StreamId) -> Result<(), Http2Error> {
        self.state_machine.process_input(ConnectionInput::SendData)?;
        let stream = self.stream_by_id(stream_id)?;
        let frames = stream.end_stream()?;
        self.prepare_for_sending(frames);
        Ok(())
    }

    /// Opens a flow-control window so the peer may send more data. With a
    /// stream ID the stream window is opened, otherwise the connection
    /// window.
    pub fn increment_flow_control_window(
        &mut self,
        increment: u32,
        stream_id: Option<StreamId>,
    ) -> Result<(), Http2Error> {
        if !(1..=MAX_WINDOW_INCREMENT).contains(&increment) {
            return Err(Http2Error::protocol(format!(
                "flow control increment must be between 1 and {}",
                MAX_WINDOW_INCREMENT
            )));
        }
        self.state_machine
            .process_input(ConnectionInput::SendWindowUpdate)?;

        let frames = match stream_id {
            Some(stream_id) => {
                let stream = self.stream_by_id(stream_id)?;
                let frames = stream.increase_flow_control_window(increment)?;
                stream.inbound_window =
                    guard_increment_window(stream.inbound_window, i64::from(increment))?;
                frames
            }
            None => {
                self.inbound_window =
                    guard_increment_window(self.inbound_window, i64::from(increment))?;
                vec![Frame::WindowUpdate {
                    stream_id: 0,
                    increment,
                }]
            }
        };
        self.prepare_for_sending(frames);
        Ok(())
    }

    /// Promises a pushed stream in response to `stream_id`. Requires the
    /// server role and the peer's ENABLE_PUSH.
    pub fn push_stream(
        &mut self,
        stream_id: StreamId,
        promised_stream_id: StreamId,
        request_headers: Vec<Header>,
    ) -> Result<(), Http2Error> {
        if !self.remote_settings.enable_push() {
            return Err(Http2Error::protocol("remote peer has disabled stream push"));
        }

        let validation_flags = ValidationFlags {
            is_client: self.config.client_side,
            is_trailer: false,
            is_response_header: false,
            is_push_promise: true,
        };
        let request_headers = self.prepare_outbound_headers(request_headers, validation_flags)?;

        self.state_machine
            .process_input(ConnectionInput::SendPushPromise)?;
        self.stream_by_id(stream_id)?;

        // Pushing in response to a pushed (even) stream would recurse; only
        // client-initiated streams may carry promises. RFC 7540 §6.6.
        if stream_id % 2 == 0 {
            return Err(Http2Error::protocol("cannot recursively push streams"));
        }

        self.ensure_stream(promised_stream_id, AllowedStreamIds::Even)?;

        let codec = self.codec.as_mut();
        let parent = self
            .streams
            .get_mut(&stream_id)
            .ok_or(Http2Error::NoSuchStream(stream_id))?;
        let frames = parent.push_stream_in_band(promised_stream_id, &request_headers, codec)?;

        let promised = self
            .streams
            .get_mut(&promised_stream_id)
            .ok_or(Http2Error::NoSuchStream(promised_stream_id))?;
        promised.locally_pushed()?;

        self.prepare_for_sending(frames);
        Ok(())
    }

    /// Sends a PING with the given opaque payload.
    pub fn ping(&mut self, opaque_data: [u8; 8]) -> Result<(), Http2Error> {
        self.state_machine.process_input(ConnectionInput::SendPing)?;
        self.prepare_for_sending(vec![Frame::Ping {
            flags: PingFlags::empty(),
            data: opaque_data,
        }]);
        Ok(())
    }

    /// Forcibly closes a stream with RST_STREAM. The stream ID is retained
    /// for a while to absorb frames that were already in flight.
    pub fn reset_stream(
        &mut self,
        stream_id: StreamId,
        error_code: ErrorCode,
    ) -> Result<(), Http2Error> {
        self.state_machine
            .process_input(ConnectionInput::SendRstStream)?;
        let stream = self.stream_by_id(stream_id)?;
        let frames = stream.reset_stream(error_code)?;
        self.prepare_for_sending(frames);
        self.remember_reset_stream(stream_id);
        self.streams.remove(&stream_id);
        Ok(())
    }

    /// Closes the connection with a GOAWAY frame.
    pub fn close_connection(&mut self, error_code: ErrorCode) -> Result<(), Http2Error> {
        self.state_machine
            .process_input(ConnectionInput::SendGoAway)?;
        let frame = Frame::GoAway {
            last_stream_id: self.highest_inbound_stream_id,
            error_code: error_code.to_wire(),
            debug_data: Bytes::new(),
        };
        self.prepare_for_sending(vec![frame]);
        Ok(())
    }

    /// Stages new local settings and emits the SETTINGS frame. The values
    /// take effect once the peer acknowledges them.
    pub fn update_settings(
        &mut self,
        changes: HashMap<SettingsParameter, u32>,
    ) -> Result<(), Http2Error> {
        self.state_machine
            .process_input(ConnectionInput::SendSettings)?;

        let mut params: Vec<(SettingsParameter, u32)> = changes.into_iter().collect();
        params.sort_by_key(|&(setting, _)| setting as u16);
        // Validate the whole batch before staging any of it.
        for &(setting, value) in &params {
            crate::settings::validate_setting(setting, value)?;
        }
        for &(setting, value) in &params {
            self.local_settings.set(setting, value)?;
        }
        self.prepare_for_sending(vec![Frame::Settings {
            flags: SettingsFlags::empty(),
            params,
        }]);
        Ok(())
    }

    /// The most data we may send on `stream_id` right now: the smaller of
    /// the stream window and the connection window.
    pub fn local_flow_control_window(&mut self, stream_id: StreamId) -> Result<u32, Http2Error> {
        let connection_window = self.outbound_window;
        let stream = self.stream_by_id(stream_id)?;
        Ok(window_to_u32(connection_window.min(stream.outbound_window)))
    }

    /// The most data the peer may send on `stream_id` right now.
    pub fn remote_flow_control_window(&mut self, stream_id: StreamId) -> Result<u32, Http2Error> {
        let connection_window = self.inbound_window;
        let stream = self.stream_by_id(stream_id)?;
        Ok(window_to_u32(connection_window.min(stream.inbound_window)))
    }

    /// Drains up to `amt` bytes from the outbound buffer (all of it when
    /// `None`).
    pub fn data_to_send(&mut self, amt: Option<usize>) -> Bytes {
        match amt {
            None => self.outbound_buffer.split().freeze(),
            Some(amt) => {
                let take = amt.min(self.outbound_buffer.len());
                self.outbound_buffer.split_to(take).freeze()
            }
        }
    }

    /// Drops everything queued for sending.
    pub fn clear_outbound_data_buffer(&mut self) {
        self.outbound_buffer.clear();
    }

    /// Feeds received bytes to the engine, returning the events the peer
    /// triggered. On a connection-fatal error the matching GOAWAY is queued
    /// before the error surfaces; flush it, then close the transport.
    pub fn receive_data(&mut self, data: &[u8]) -> Result<Vec<Event>, Http2Error> {
        let mut events = Vec::new();
        match self.receive_data_inner(data, &mut events) {
            Ok(()) => Ok(events),
            Err(err) => {
                if let Some(code) = err.connection_error_code() {
                    warn!("terminating connection: {}", err);
                    self.terminate_connection(code);
                }
                Err(err)
            }
        }
    }

    fn receive_data_inner(
        &mut self,
        data: &[u8],
        events: &mut Vec<Event>,
    ) -> Result<(), Http2Error> {
        self.frame_buffer.max_frame_size = self.max_inbound_frame_size;
        self.frame_buffer.add_data(data)?;
        loop {
            let Some(frame) = self.frame_buffer.next_frame()? else {
                return Ok(());
            };
            events.extend(self.receive_frame(frame)?);
        }
    }

    /// Dispatches one frame, absorbing the stream-scoped conditions that are
    /// handled with an RST_STREAM or silence rather than an error.
    fn receive_frame(&mut self, frame: Frame) -> Result<Vec<Event>, Http2Error> {
        let frame_stream_id = frame.stream_id();
        match self.dispatch_frame(frame) {
            Ok((frames, events)) => {
                self.prepare_for_sending(frames);
                Ok(events)
            }
            Err(Http2Error::StreamClosed {
                stream_id,
                code,
                events,
            }) => {
                // Answer on behalf of the closed stream, unless we reset the
                // stream ourselves, in which case the frame is stale noise.
                if self.reset_streams.contains(&frame_stream_id) {
                    Ok(Vec::new())
                } else {
                    self.prepare_for_sending(vec![Frame::ResetStream {
                        stream_id,
                        error_code: code.to_wire(),
                    }]);
                    Ok(events)
                }
            }
            Err(err @ Http2Error::StreamIdTooLow { .. }) => {
                // Very likely a frame for a stream we reset and forgot.
                if self.reset_streams.contains(&frame_stream_id) {
                    Ok(Vec::new())
                } else {
                    Err(err)
                }
            }
            Err(err) => Err(err),
        }
    }

    #[allow(clippy::type_complexity)]
    fn dispatch_frame(&mut self, frame: Frame) -> Result<(Vec<Frame>, Vec<Event>), Http2Error> {
        debug!("received {:?}", frame);
        match frame {
            Frame::Headers {
                stream_id,
                flags,
                priority,
                fragment,
            } => self.receive_headers_frame(stream_id, flags, priority, &fragment),
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
                fragment,
                ..
            } => self.receive_push_promise_frame(stream_id, promised_stream_id, &fragment),
            Frame::Data {
                stream_id,
                flags,
                data,
                flow_controlled_length,
            } => self.receive_data_frame(stream_id, flags, data, flow_controlled_length),
            Frame::Settings { flags, params } => self.receive_settings_frame(flags, &params),
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => self.receive_window_update_frame(stream_id, increment),
            Frame::Ping { flags, data } => self.receive_ping_frame(flags, data),
            Frame::ResetStream {
                stream_id,
                error_code,
            } => self.receive_rst_stream_frame(stream_id, error_code),
            Frame::Priority {
                stream_id,
                priority,
            } => self.receive_priority_frame(stream_id, priority),
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => self.receive_goaway_frame(last_stream_id, error_code, debug_data),
            Frame::Continuation { stream_id, .. } => self.receive_naked_continuation(stream_id),
            Frame::AltSvc {
                origin,
                field_value,
                ..
            } => Ok((
                Vec::new(),
                vec![Event::from(AlternativeServiceAvailable {
                    origin,
                    field_value,
                })],
            )),
            Frame::Unknown {
                stream_id,
                frame_type,
                flags,
                payload,
            } => Ok((
                Vec::new(),
                vec![Event::from(UnknownFrameReceived {
                    frame_type,
                    flags,
                    stream_id,
                    payload,
                })],
            )),
        }
    }

    #[allow(clippy::type_complexity)]
    fn receive_headers_frame(
        &mut self,
        stream_id: StreamId,
        flags: HeadersFlags,
        priority: Option<PriorityInfo>,
        fragment: &[u8],
    ) -> Result<(Vec<Frame>, Vec<Event>), Http2Error> {
        if !self.streams.contains_key(&stream_id) {
            let max_open_streams = self.local_settings.max_concurrent_streams();
            let open = self.open_inbound_streams();
            if open + 1 > max_open_streams as usize {
                return Err(Http2Error::TooManyStreams {
                    open,
                    max: max_open_streams,
                });
            }
        }

        let is_trailer = self
            .streams
            .get(&stream_id)
            .map_or(false, Stream::headers_received);
        let validation_flags = ValidationFlags {
            is_client: self.config.client_side,
            is_trailer,
            is_response_header: self.config.client_side && !is_trailer,
            is_push_promise: false,
        };
        let headers = self.prepare_inbound_headers(fragment, validation_flags)?;

        self.state_machine
            .process_input(ConnectionInput::RecvHeaders)?;
        self.ensure_stream(
            stream_id,
            AllowedStreamIds::for_client(!self.config.client_side),
        )?;
        let stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or(Http2Error::NoSuchStream(stream_id))?;
        let mut events =
            stream.receive_headers(headers, flags.contains(HeadersFlags::END_STREAM))?;

        if let Some(priority) = priority {
            let (priority_frames, priority_events) =
                self.receive_priority_frame(stream_id, priority)?;
            debug_assert!(priority_frames.is_empty());
            if let Some(Event::PriorityUpdated(updated)) = priority_events.first() {
                match events.first_mut() {
                    Some(Event::RequestReceived(event)) => {
                        event.priority_updated = Some(updated.clone());
                    }
                    Some(Event::ResponseReceived(event)) => {
                        event.priority_updated = Some(updated.clone());
                    }
                    Some(Event::TrailersReceived(event)) => {
                        event.priority_updated = Some(updated.clone());
                    }
                    _ => {}
                }
            }
            events.extend(priority_events);
        }

        Ok((Vec::new(), events))
    }

    #[allow(clippy::type_complexity)]
    fn receive_push_promise_frame(
        &mut self,
        stream_id: StreamId,
        promised_stream_id: StreamId,
        fragment: &[u8],
    ) -> Result<(Vec<Frame>, Vec<Event>), Http2Error> {
        if !self.local_settings.enable_push() {
            return Err(Http2Error::protocol("received pushed stream"));
        }

        let validation_flags = ValidationFlags {
            is_client: self.config.client_side,
            is_trailer: false,
            is_response_header: false,
            is_push_promise: true,
        };
        let headers = self.prepare_inbound_headers(fragment, validation_flags)?;

        self.state_machine
            .process_input(ConnectionInput::RecvPushPromise)?;

        match self.stream_by_id(stream_id) {
            Ok(_) => {}
            Err(Http2Error::NoSuchStream(_) | Http2Error::StreamClosed { .. }) => {
                // A promise on a stream we reset was simply in flight; refuse
                // the new stream. A promise on a naturally closed stream
                // invents a stream the peer believes in, which only a
                // connection error can undo.
                if self.reset_streams.contains(&stream_id) {
                    return Ok((
                        vec![Frame::ResetStream {
                            stream_id: promised_stream_id,
                            error_code: ErrorCode::RefusedStream.to_wire(),
                        }],
                        Vec::new(),
                    ));
                }
                return Err(Http2Error::protocol("attempted to push on closed stream"));
            }
            Err(err) => return Err(err),
        }

        // Peers must not push on streams they pushed themselves. RFC 7540 §6.6.
        if stream_id % 2 == 0 {
            return Err(Http2Error::protocol("cannot recursively push streams"));
        }

        let parent = self
            .streams
            .get_mut(&stream_id)
            .ok_or(Http2Error::NoSuchStream(stream_id))?;
        let events = parent.receive_push_promise_in_band(promised_stream_id, headers)?;

        self.ensure_stream(promised_stream_id, AllowedStreamIds::Even)?;
        let promised = self
            .streams
            .get_mut(&promised_stream_id)
            .ok_or(Http2Error::NoSuchStream(promised_stream_id))?;
        promised.remotely_pushed()?;

        Ok((Vec::new(), events))
    }

    #[allow(clippy::type_complexity)]
    fn receive_data_frame(
        &mut self,
        stream_id: StreamId,
        flags: DataFlags,
        data: Bytes,
        flow_controlled_length: u32,
    ) -> Result<(Vec<Frame>, Vec<Event>), Http2Error> {
        let window = match self.remote_flow_control_window(stream_id) {
            Ok(window) => window,
            Err(err) => {
                // Keep the connection window in sync with the peer even when
                // the stream is gone.
                self.inbound_window -= i64::from(flow_controlled_length);
                return Err(err);
            }
        };
        if flow_controlled_length > window {
            return Err(Http2Error::flow_control(format!(
                "cannot receive {} bytes, flow control window is {}",
                flow_controlled_length, window
            )));
        }

        self.state_machine.process_input(ConnectionInput::RecvData)?;
        self.inbound_window -= i64::from(flow_controlled_length);
        let stream = self.stream_by_id(stream_id)?;
        let events = stream.receive_data(
            data,
            flags.contains(DataFlags::END_STREAM),
            flow_controlled_length,
        )?;
        Ok((Vec::new(), events))
    }

    #[allow(clippy::type_complexity)]
    fn receive_settings_frame(
        &mut self,
        flags: SettingsFlags,
        params: &[(SettingsParameter, u32)],
    ) -> Result<(Vec<Frame>, Vec<Event>), Http2Error> {
        self.state_machine
            .process_input(ConnectionInput::RecvSettings)?;

        if flags.contains(SettingsFlags::ACK) {
            let changed_settings = self.local_settings_acked();
            return Ok((
                Vec::new(),
                vec![Event::from(SettingsAcknowledged { changed_settings })],
            ));
        }

        // A frame may repeat a parameter; the last value wins.
        let mut merged: Vec<(SettingsParameter, u32)> = Vec::with_capacity(params.len());
        for &(setting, value) in params {
            match merged.iter_mut().find(|(seen, _)| *seen == setting) {
                Some(entry) => entry.1 = value,
                None => merged.push((setting, value)),
            }
        }

        let mut changed_settings = Vec::with_capacity(merged.len());
        for (setting, value) in merged {
            let original_value = self.remote_settings.get(setting);
            self.remote_settings.set(setting, value)?;
            changed_settings.push(ChangedSetting {
                setting,
                original_value,
                new_value: value,
            });
        }

        let frames = self.acknowledge_remote_settings()?;
        Ok((
            frames,
            vec![Event::from(RemoteSettingsChanged { changed_settings })],
        ))
    }

    #[allow(clippy::type_complexity)]
    fn receive_window_update_frame(
        &mut self,
        stream_id: StreamId,
        increment: u32,
    ) -> Result<(Vec<Frame>, Vec<Event>), Http2Error> {
        if !(1..=MAX_WINDOW_INCREMENT).contains(&increment) {
            return Err(Http2Error::protocol(format!(
                "flow control increment must be between 1 and {}, received {}",
                MAX_WINDOW_INCREMENT, increment
            )));
        }

        self.state_machine
            .process_input(ConnectionInput::RecvWindowUpdate)?;

        if stream_id != 0 {
            let stream = self.stream_by_id(stream_id)?;
            let events = stream.receive_window_update(increment)?;
            Ok((Vec::new(), events))
        } else {
            self.outbound_window =
                guard_increment_window(self.outbound_window, i64::from(increment))?;
            Ok((
                Vec::new(),
                vec![Event::from(WindowUpdated {
                    stream_id: 0,
                    delta: increment,
                })],
            ))
        }
    }

    #[allow(clippy::type_complexity)]
    fn receive_ping_frame(
        &mut self,
        flags: PingFlags,
        data: [u8; 8],
    ) -> Result<(Vec<Frame>, Vec<Event>), Http2Error> {
        self.state_machine.process_input(ConnectionInput::RecvPing)?;

        if flags.contains(PingFlags::ACK) {
            return Ok((
                Vec::new(),
                vec![Event::from(PingAckReceived { ping_data: data })],
            ));
        }
        Ok((
            vec![Frame::Ping {
                flags: PingFlags::ACK,
                data,
            }],
            vec![Event::from(PingReceived { ping_data: data })],
        ))
    }

    #[allow(clippy::type_complexity)]
    fn receive_rst_stream_frame(
        &mut self,
        stream_id: StreamId,
        error_code: u32,
    ) -> Result<(Vec<Frame>, Vec<Event>), Http2Error> {
        self.state_machine
            .process_input(ConnectionInput::RecvRstStream)?;

        match self.stream_by_id(stream_id) {
            Ok(stream) => {
                let events = stream.stream_reset(error_code)?;
                Ok((Vec::new(), events))
            }
            // The stream is gone; nothing to do.
            Err(Http2Error::NoSuchStream(_) | Http2Error::StreamClosed { .. }) => {
                Ok((Vec::new(), Vec::new()))
            }
            Err(err) => Err(err),
        }
    }

    #[allow(clippy::type_complexity)]
    fn receive_priority_frame(
        &mut self,
        stream_id: StreamId,
        priority: PriorityInfo,
    ) -> Result<(Vec<Frame>, Vec<Event>), Http2Error> {
        self.state_machine
            .process_input(ConnectionInput::RecvPriority)?;

        if priority.depends_on == stream_id {
            return Err(Http2Error::protocol(format!(
                "stream {} may not depend on itself",
                stream_id
            )));
        }
        Ok((
            Vec::new(),
            vec![Event::from(PriorityUpdated {
                stream_id,
                // The wire weight is 0..=255 for a semantic range of 1..=256.
                weight: u16::from(priority.weight) + 1,
                depends_on: priority.depends_on,
                exclusive: priority.exclusive,
            })],
        ))
    }

    #[allow(clippy::type_complexity)]
    fn receive_goaway_frame(
        &mut self,
        last_stream_id: StreamId,
        error_code: u32,
        debug_data: Bytes,
    ) -> Result<(Vec<Frame>, Vec<Event>), Http2Error> {
        self.state_machine
            .process_input(ConnectionInput::RecvGoAway)?;

        // Nothing we have queued may be sent any more.
        self.clear_outbound_data_buffer();

        Ok((
            Vec::new(),
            vec![Event::from(ConnectionTerminated {
                error_code,
                last_stream_id,
                additional_data: if debug_data.is_empty() {
                    None
                } else {
                    Some(debug_data)
                },
            })],
        ))
    }

    /// A CONTINUATION with no header block in progress. The stream state
    /// machine decides between an RST_STREAM answer and a connection error.
    #[allow(clippy::type_complexity)]
    fn receive_naked_continuation(
        &mut self,
        stream_id: StreamId,
    ) -> Result<(Vec<Frame>, Vec<Event>), Http2Error> {
        let stream = self.stream_by_id(stream_id)?;
        stream.receive_naked_continuation()?;
        Ok((Vec::new(), Vec::new()))
    }

    /// Applies the peer's acknowledgement of our settings.
    fn local_settings_acked(&mut self) -> Vec<ChangedSetting> {
        let changes = self.local_settings.acknowledge();
        for change in &changes {
            match change.setting {
                SettingsParameter::InitialWindowSize => {
                    let delta = i64::from(change.new_value)
                        - i64::from(change.original_value.unwrap_or(0));
                    for stream in self.streams.values_mut() {
                        stream.inbound_window += delta;
                    }
                }
                SettingsParameter::MaxFrameSize => {
                    self.max_inbound_frame_size = change.new_value;
                }
                SettingsParameter::HeaderTableSize => {
                    self.codec.set_decoder_table_size(change.new_value);
                }
                SettingsParameter::MaxHeaderListSize => {
                    self.codec.set_max_header_list_size(Some(change.new_value));
                }
                _ => {}
            }
        }
        changes
    }

    /// Promotes the peer's settings to current and applies the side
    /// effects, then queues the SETTINGS ACK.
    fn acknowledge_remote_settings(&mut self) -> Result<Vec<Frame>, Http2Error> {
        self.state_machine
            .process_input(ConnectionInput::SendSettings)?;

        let changes = self.remote_settings.acknowledge();
        for change in &changes {
            match change.setting {
                SettingsParameter::InitialWindowSize => {
                    // Every live stream's send window moves by the delta; the
                    // connection window stays put. RFC 7540 §6.9.2.
                    let delta = i64::from(change.new_value)
                        - i64::from(change.original_value.unwrap_or(0));
                    for stream in self.streams.values_mut() {
                        stream.outbound_window =
                            guard_increment_window(stream.outbound_window, delta)?;
                    }
                }
                SettingsParameter::HeaderTableSize => {
                    self.codec.set_encoder_table_size(change.new_value);
                }
                SettingsParameter::MaxFrameSize => {
                    self.max_outbound_frame_size = change.new_value;
                    for stream in self.streams.values_mut() {
                        stream.max_outbound_frame_size = change.new_value;
                    }
                }
                _ => {}
            }
        }

        Ok(vec![Frame::Settings {
            flags: SettingsFlags::ACK,
            params: Vec::new(),
        }])
    }

    /// Queues the GOAWAY for a connection-fatal error.
    fn terminate_connection(&mut self, error_code: ErrorCode) {
        let frame = Frame::GoAway {
            last_stream_id: self.highest_inbound_stream_id,
            error_code: error_code.to_wire(),
            debug_data: Bytes::new(),
        };
        // SEND_GOAWAY is valid in every connection state.
        self.state_machine
            .process_input(ConnectionInput::SendGoAway)
            .ok();
        self.prepare_for_sending(vec![frame]);
    }

    fn prepare_for_sending(&mut self, frames: Vec<Frame>) {
        for frame in frames {
            debug_assert!(frame.body_len() <= self.max_outbound_frame_size as usize);
            trace!("queueing {:?}", frame);
            self.outbound_buffer.extend_from_slice(&frame.serialize());
        }
    }

    /// Runs the configured outbound header pipelines.
    fn prepare_outbound_headers(
        &self,
        headers: Vec<Header>,
        validation_flags: ValidationFlags,
    ) -> Result<Vec<Header>, Http2Error> {
        let headers = if self.config.normalize_outbound_headers {
            normalize_outbound_headers(headers, self.config.split_outbound_cookies)
        } else {
            headers
        };
        if self.config.validate_outbound_headers {
            validate_outbound_headers(&headers, validation_flags)?;
        }
        Ok(headers)
    }

    /// Decodes a header block and runs the configured inbound pipelines.
    fn prepare_inbound_headers(
        &mut self,
        fragment: &[u8],
        validation_flags: ValidationFlags,
    ) -> Result<Vec<Header>, Http2Error> {
        let headers = self.codec.decode(fragment)?;
        if self.config.header_encoding == Some(HeaderEncoding::Utf8) {
            ensure_utf8(&headers)?;
        }
        let headers = if self.config.normalize_inbound_headers {
            normalize_inbound_headers(headers)
        } else {
            headers
        };
        if self.config.validate_inbound_headers {
            validate_inbound_headers(&headers, validation_flags)?;
        }
        Ok(headers)
    }

    /// Counts open streams with the given ID parity, deleting closed
    /// streams on the way.
    fn count_open_streams(&mut self, parity: u32) -> usize {
        let mut count = 0;
        let mut to_delete = Vec::new();
        for (&stream_id, stream) in &self.streams {
            if stream.open() && stream_id % 2 == parity {
                count += 1;
            } else if stream.closed() {
                to_delete.push(stream_id);
            }
        }
        for stream_id in to_delete {
            trace!("sweeping closed stream {}", stream_id);
            self.streams.remove(&stream_id);
        }
        count
    }

    fn stream_id_is_outbound(&self, stream_id: StreamId) -> bool {
        stream_id % 2 == u32::from(self.config.client_side)
    }

    /// Creates the stream if it does not exist, enforcing monotonic IDs and
    /// the caller's parity.
    fn ensure_stream(
        &mut self,
        stream_id: StreamId,
        allowed_ids: AllowedStreamIds,
    ) -> Result<(), Http2Error> {
        if self.streams.contains_key(&stream_id) {
            return Ok(());
        }

        let outbound = self.stream_id_is_outbound(stream_id);
        let highest = if outbound {
            self.highest_outbound_stream_id
        } else {
            self.highest_inbound_stream_id
        };
        if stream_id <= highest {
            return Err(Http2Error::StreamIdTooLow { stream_id, highest });
        }
        if !allowed_ids.admits(stream_id) {
            return Err(Http2Error::protocol("invalid stream ID for peer"));
        }

        let stream = Stream::new(
            stream_id,
            self.remote_settings.initial_window_size(),
            self.local_settings.initial_window_size(),
            self.max_outbound_frame_size,
        );
        trace!("created stream {}", stream_id);
        self.streams.insert(stream_id, stream);

        if outbound {
            self.highest_outbound_stream_id = stream_id;
        } else {
            self.highest_inbound_stream_id = stream_id;
        }
        Ok(())
    }

    /// Fetches a live stream. IDs above the highest seen were never opened;
    /// IDs at or below it belonged to a stream that has since been swept.
    fn stream_by_id(&mut self, stream_id: StreamId) -> Result<&mut Stream, Http2Error> {
        if self.streams.contains_key(&stream_id) {
            return self
                .streams
                .get_mut(&stream_id)
                .ok_or(Http2Error::NoSuchStream(stream_id));
        }
        let highest = if self.stream_id_is_outbound(stream_id) {
            self.highest_outbound_stream_id
        } else {
            self.highest_inbound_stream_id
        };
        if stream_id > highest {
            Err(Http2Error::NoSuchStream(stream_id))
        } else {
            Err(Http2Error::StreamClosed {
                stream_id,
                code: ErrorCode::StreamClosed,
                events: Vec::new(),
            })
        }
    }

    fn remember_reset_stream(&mut self, stream_id: StreamId) {
        self.reset_streams.push_back(stream_id);
        while self.reset_streams.len() > self.config.max_reset_streams {
            self.reset_streams.pop_front();
        }
    }
}

fn window_to_u32(window: i64) -> u32 {
    window.clamp(0, i64::from(u32::MAX)) as u32
}
