use crate::{
    events::Event,
    types::{ErrorCode, SettingsParameter, StreamId},
};

/// Everything that can go wrong while driving the protocol engine.
///
/// Errors that correspond to a connection error in RFC 7540 terms report a
/// wire code through [`Http2Error::connection_error_code`]; the engine uses
/// that code for the GOAWAY frame it queues before surfacing the error.
#[derive(thiserror::Error, Debug)]
pub enum Http2Error {
    /// The peer or the caller violated the HTTP/2 protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A flow-control window was exceeded or exhausted.
    #[error("flow control violated: {0}")]
    FlowControl(String),
    /// A frame would exceed the applicable MAX_FRAME_SIZE.
    #[error("frame of {size} bytes exceeds the maximum of {max}")]
    FrameTooLarge { size: usize, max: usize },
    /// A frame body was truncated or structurally malformed.
    #[error("frame body is missing data or malformed")]
    FrameDataMissing,
    /// A stream-scoped protocol error with a concrete stream ID attached.
    ///
    /// Carries the auto-reset events the engine generated on the way out so
    /// the dispatch layer can surface them after queueing the RST_STREAM.
    #[error("stream {stream_id} is closed")]
    StreamClosed {
        stream_id: StreamId,
        code: ErrorCode,
        events: Vec<Event>,
    },
    /// A stream ID that was never opened was referenced.
    #[error("stream {0} does not exist")]
    NoSuchStream(StreamId),
    /// A stream was opened with an ID at or below the highest seen.
    #[error("stream ID {stream_id} is not above the highest seen ID {highest}")]
    StreamIdTooLow { stream_id: StreamId, highest: StreamId },
    /// Opening one more stream would exceed MAX_CONCURRENT_STREAMS.
    #[error("cannot open stream: {open} streams open of a maximum {max}")]
    TooManyStreams { open: usize, max: u32 },
    /// The 31-bit outbound stream ID space is used up.
    #[error("exhausted the outbound stream ID space")]
    NoAvailableStreamIds,
    /// Received body length disagrees with the declared content-length.
    #[error("body length mismatch: declared {expected}, received {actual}")]
    InvalidBodyLength { expected: u64, actual: u64 },
    /// A SETTINGS value failed validation.
    #[error("setting {setting:?} has invalid value {value}")]
    InvalidSettingsValue {
        setting: SettingsParameter,
        value: u32,
        code: ErrorCode,
    },
    /// A decompression or CONTINUATION-flood guard tripped.
    #[error("denial of service guard tripped: {0}")]
    DenialOfService(String),
}

impl Http2Error {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub(crate) fn flow_control(msg: impl Into<String>) -> Self {
        Self::FlowControl(msg.into())
    }

    /// The GOAWAY code this error carries, or `None` when the error is not
    /// fatal to the connection.
    #[must_use]
    pub fn connection_error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Protocol(_) | Self::StreamIdTooLow { .. } | Self::TooManyStreams { .. } => {
                Some(ErrorCode::ProtocolError)
            }
            Self::InvalidBodyLength { .. } => Some(ErrorCode::ProtocolError),
            Self::FlowControl(_) => Some(ErrorCode::FlowControlError),
            Self::FrameTooLarge { .. } | Self::FrameDataMissing => Some(ErrorCode::FrameSizeError),
            Self::InvalidSettingsValue { code, .. } => Some(*code),
            Self::DenialOfService(_) => Some(ErrorCode::EnhanceYourCalm),
            Self::StreamClosed { .. } | Self::NoSuchStream(_) | Self::NoAvailableStreamIds => None,
        }
    }
}
