//! High-level protocol events.
//!
//! Each call to [`Connection::receive_data`](crate::Connection::receive_data)
//! returns the events the peer triggered, in the order the underlying frames
//! were parsed (after CONTINUATION fusion). Events that logically accompany
//! another one are both present in the returned list and cross-referenced on
//! the primary event, e.g. a HEADERS frame with END_STREAM yields a
//! [`RequestReceived`] whose `stream_ended` field repeats the companion
//! [`StreamEnded`] entry.

use crate::{headers::Header, settings::ChangedSetting, types::StreamId};
use bytes::Bytes;

/// Request headers arrived on a (possibly new) stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestReceived {
    pub stream_id: StreamId,
    pub headers: Vec<Header>,
    pub stream_ended: Option<StreamEnded>,
    pub priority_updated: Option<PriorityUpdated>,
}

/// Response headers arrived on a stream we opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseReceived {
    pub stream_id: StreamId,
    pub headers: Vec<Header>,
    pub stream_ended: Option<StreamEnded>,
    pub priority_updated: Option<PriorityUpdated>,
}

/// A second header block arrived after the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrailersReceived {
    pub stream_id: StreamId,
    pub headers: Vec<Header>,
    pub stream_ended: Option<StreamEnded>,
    pub priority_updated: Option<PriorityUpdated>,
}

/// A 1xx header block arrived ahead of the final response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InformationalResponseReceived {
    pub stream_id: StreamId,
    pub headers: Vec<Header>,
}

/// Body bytes arrived on a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataReceived {
    pub stream_id: StreamId,
    pub data: Bytes,
    /// The number of bytes that count against the flow-control window,
    /// which includes any padding the frame carried.
    pub flow_controlled_length: u32,
    pub stream_ended: Option<StreamEnded>,
}

/// The peer opened up a flow-control window (stream 0 = connection).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowUpdated {
    pub stream_id: StreamId,
    pub delta: u32,
}

/// The peer sent a SETTINGS frame; the listed values are already in effect
/// and the engine has queued the acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettingsChanged {
    pub changed_settings: Vec<ChangedSetting>,
}

/// The peer sent a PING; the engine has queued the PONG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingReceived {
    pub ping_data: [u8; 8],
}

/// The peer answered one of our PINGs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingAckReceived {
    pub ping_data: [u8; 8],
}

/// The peer acknowledged our SETTINGS frame; pending values are now current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsAcknowledged {
    pub changed_settings: Vec<ChangedSetting>,
}

/// The remote half of a stream ended cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEnded {
    pub stream_id: StreamId,
}

/// A stream was abruptly reset. `remote_reset` is false when the engine
/// itself queued the RST_STREAM on behalf of the stream state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReset {
    pub stream_id: StreamId,
    pub error_code: u32,
    pub remote_reset: bool,
}

/// The peer promised a pushed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedStreamReceived {
    pub pushed_stream_id: StreamId,
    pub parent_stream_id: StreamId,
    pub headers: Vec<Header>,
}

/// The peer sent GOAWAY; no further frames will be processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTerminated {
    pub error_code: u32,
    pub last_stream_id: StreamId,
    pub additional_data: Option<Bytes>,
}

/// Priority information arrived, either standalone or on a HEADERS frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityUpdated {
    pub stream_id: StreamId,
    /// Weight as defined in RFC 7540 §5.3.2, in the range 1..=256.
    pub weight: u16,
    pub depends_on: StreamId,
    pub exclusive: bool,
}

/// https://httpwg.org/specs/rfc7838.html#alt-svc-frame — receive-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlternativeServiceAvailable {
    pub origin: Bytes,
    pub field_value: Bytes,
}

/// A frame of a type this engine does not know. Never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFrameReceived {
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: StreamId,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, derive_more::From)]
pub enum Event {
    RequestReceived(RequestReceived),
    ResponseReceived(ResponseReceived),
    TrailersReceived(TrailersReceived),
    InformationalResponseReceived(InformationalResponseReceived),
    DataReceived(DataReceived),
    WindowUpdated(WindowUpdated),
    RemoteSettingsChanged(RemoteSettingsChanged),
    PingReceived(PingReceived),
    PingAckReceived(PingAckReceived),
    SettingsAcknowledged(SettingsAcknowledged),
    StreamEnded(StreamEnded),
    StreamReset(StreamReset),
    PushedStreamReceived(PushedStreamReceived),
    ConnectionTerminated(ConnectionTerminated),
    PriorityUpdated(PriorityUpdated),
    AlternativeServiceAvailable(AlternativeServiceAvailable),
    UnknownFrameReceived(UnknownFrameReceived),
}
