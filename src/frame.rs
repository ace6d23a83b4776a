//! Logical frames and their wire form.
//!
//! https://httpwg.org/specs/rfc7540.html#FrameHeader — every frame starts
//! with a 9-byte header: a 24-bit payload length, an 8-bit type, an 8-bit
//! flag field and a 31-bit stream ID. Parsing strips padding and priority
//! prefixes so the rest of the engine only ever sees logical payloads;
//! serialization never emits padding.

use crate::{
    error::Http2Error,
    flags::*,
    types::{FrameType, SettingsParameter, StreamId, MAX_STREAM_ID},
};
use bytes::{BufMut, Bytes, BytesMut};
use num_traits::FromPrimitive;

pub const FRAME_HEADER_LEN: usize = 9;

/// The fixed frame header, before the payload is understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHead {
    pub length: u32,
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: StreamId,
}

impl FrameHead {
    #[must_use]
    pub fn parse(header: &[u8; FRAME_HEADER_LEN]) -> Self {
        Self {
            length: u32::from_be_bytes([0, header[0], header[1], header[2]]),
            frame_type: header[3],
            flags: header[4],
            stream_id: u32::from_be_bytes([header[5], header[6], header[7], header[8]])
                & MAX_STREAM_ID,
        }
    }
}

/// https://httpwg.org/specs/rfc7540.html#StreamPriority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityInfo {
    pub depends_on: StreamId,
    /// Wire weight, 0..=255; RFC semantics add one.
    pub weight: u8,
    pub exclusive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream_id: StreamId,
        flags: DataFlags,
        data: Bytes,
        /// Full payload length including any padding, per RFC 7540 §6.9.1.
        flow_controlled_length: u32,
    },
    Headers {
        stream_id: StreamId,
        flags: HeadersFlags,
        priority: Option<PriorityInfo>,
        fragment: Bytes,
    },
    Priority {
        stream_id: StreamId,
        priority: PriorityInfo,
    },
    ResetStream {
        stream_id: StreamId,
        error_code: u32,
    },
    Settings {
        flags: SettingsFlags,
        params: Vec<(SettingsParameter, u32)>,
    },
    PushPromise {
        stream_id: StreamId,
        flags: PushPromiseFlags,
        promised_stream_id: StreamId,
        fragment: Bytes,
    },
    Ping {
        flags: PingFlags,
        data: [u8; 8],
    },
    GoAway {
        last_stream_id: StreamId,
        error_code: u32,
        debug_data: Bytes,
    },
    WindowUpdate {
        stream_id: StreamId,
        increment: u32,
    },
    Continuation {
        stream_id: StreamId,
        flags: ContinuationFlags,
        fragment: Bytes,
    },
    AltSvc {
        stream_id: StreamId,
        origin: Bytes,
        field_value: Bytes,
    },
    Unknown {
        stream_id: StreamId,
        frame_type: u8,
        flags: u8,
        payload: Bytes,
    },
}

impl Frame {
    /// Parses a frame body against its header. The payload must be exactly
    /// `head.length` bytes; the frame buffer guarantees that.
    pub fn parse(head: &FrameHead, payload: Bytes) -> Result<Self, Http2Error> {
        let frame = match FrameType::from_u8(head.frame_type) {
            Some(FrameType::Data) => {
                let flags = DataFlags::from_bits_truncate(head.flags);
                let data = strip_padding(flags.contains(DataFlags::PADDED), payload)?;
                Self::Data {
                    stream_id: head.stream_id,
                    flags,
                    data,
                    flow_controlled_length: head.length,
                }
            }
            Some(FrameType::Headers) => {
                let flags = HeadersFlags::from_bits_truncate(head.flags);
                let mut body = strip_padding(flags.contains(HeadersFlags::PADDED), payload)?;
                let priority = if flags.contains(HeadersFlags::PRIORITY) {
                    Some(parse_priority(&mut body)?)
                } else {
                    None
                };
                Self::Headers {
                    stream_id: head.stream_id,
                    flags,
                    priority,
                    fragment: body,
                }
            }
            Some(FrameType::Priority) => {
                if payload.len() != 5 {
                    return Err(Http2Error::FrameDataMissing);
                }
                let mut body = payload;
                Self::Priority {
                    stream_id: head.stream_id,
                    priority: parse_priority(&mut body)?,
                }
            }
            Some(FrameType::ResetStream) => {
                if payload.len() != 4 {
                    return Err(Http2Error::FrameDataMissing);
                }
                Self::ResetStream {
                    stream_id: head.stream_id,
                    error_code: read_u32(&payload, 0),
                }
            }
            Some(FrameType::Settings) => {
                let flags = SettingsFlags::from_bits_truncate(head.flags);
                if flags.contains(SettingsFlags::ACK) && !payload.is_empty() {
                    return Err(Http2Error::FrameDataMissing);
                }
                if payload.len() % 6 != 0 {
                    return Err(Http2Error::FrameDataMissing);
                }
                let mut params = Vec::with_capacity(payload.len() / 6);
                for chunk in payload.chunks(6) {
                    let code = u16::from_be_bytes([chunk[0], chunk[1]]);
                    // Unknown settings codes are accepted and ignored.
                    if let Some(param) = SettingsParameter::from_u16(code) {
                        params.push((param, read_u32(chunk, 2)));
                    }
                }
                Self::Settings { flags, params }
            }
            Some(FrameType::PushPromise) => {
                let flags = PushPromiseFlags::from_bits_truncate(head.flags);
                let mut body = strip_padding(flags.contains(PushPromiseFlags::PADDED), payload)?;
                if body.len() < 4 {
                    return Err(Http2Error::FrameDataMissing);
                }
                let promised_stream_id = read_u32(&body, 0) & MAX_STREAM_ID;
                Self::PushPromise {
                    stream_id: head.stream_id,
                    flags,
                    promised_stream_id,
                    fragment: body.split_off(4),
                }
            }
            Some(FrameType::Ping) => {
                if payload.len() != 8 {
                    return Err(Http2Error::FrameDataMissing);
                }
                let mut data = [0u8; 8];
                data.copy_from_slice(&payload);
                Self::Ping {
                    flags: PingFlags::from_bits_truncate(head.flags),
                    data,
                }
            }
            Some(FrameType::GoAway) => {
                if payload.len() < 8 {
                    return Err(Http2Error::FrameDataMissing);
                }
                Self::GoAway {
                    last_stream_id: read_u32(&payload, 0) & MAX_STREAM_ID,
                    error_code: read_u32(&payload, 4),
                    debug_data: payload.slice(8..),
                }
            }
            Some(FrameType::WindowUpdate) => {
                if payload.len() != 4 {
                    return Err(Http2Error::FrameDataMissing);
                }
                Self::WindowUpdate {
                    stream_id: head.stream_id,
                    increment: read_u32(&payload, 0) & MAX_STREAM_ID,
                }
            }
            Some(FrameType::Continuation) => Self::Continuation {
                stream_id: head.stream_id,
                flags: ContinuationFlags::from_bits_truncate(head.flags),
                fragment: payload,
            },
            Some(FrameType::AltSvc) => {
                if payload.len() < 2 {
                    return Err(Http2Error::FrameDataMissing);
                }
                let origin_len = u16::from_be_bytes([payload[0], payload[1]]) as usize;
                if payload.len() < 2 + origin_len {
                    return Err(Http2Error::FrameDataMissing);
                }
                Self::AltSvc {
                    stream_id: head.stream_id,
                    origin: payload.slice(2..2 + origin_len),
                    field_value: payload.slice(2 + origin_len..),
                }
            }
            None => Self::Unknown {
                stream_id: head.stream_id,
                frame_type: head.frame_type,
                flags: head.flags,
                payload,
            },
        };
        Ok(frame)
    }

    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        match self {
            Self::Data { stream_id, .. }
            | Self::Headers { stream_id, .. }
            | Self::Priority { stream_id, .. }
            | Self::ResetStream { stream_id, .. }
            | Self::PushPromise { stream_id, .. }
            | Self::WindowUpdate { stream_id, .. }
            | Self::Continuation { stream_id, .. }
            | Self::AltSvc { stream_id, .. }
            | Self::Unknown { stream_id, .. } => *stream_id,
            Self::Settings { .. } | Self::Ping { .. } | Self::GoAway { .. } => 0,
        }
    }

    /// The payload length this frame serializes to.
    #[must_use]
    pub fn body_len(&self) -> usize {
        match self {
            Self::Data { data, .. } => data.len(),
            Self::Headers {
                priority, fragment, ..
            } => fragment.len() + if priority.is_some() { 5 } else { 0 },
            Self::Priority { .. } => 5,
            Self::ResetStream { .. } | Self::WindowUpdate { .. } => 4,
            Self::Settings { params, .. } => params.len() * 6,
            Self::PushPromise { fragment, .. } => 4 + fragment.len(),
            Self::Ping { .. } => 8,
            Self::GoAway { debug_data, .. } => 8 + debug_data.len(),
            Self::Continuation { fragment, .. } => fragment.len(),
            Self::AltSvc {
                origin,
                field_value,
                ..
            } => 2 + origin.len() + field_value.len(),
            Self::Unknown { payload, .. } => payload.len(),
        }
    }

    #[must_use]
    pub fn serialize(&self) -> Bytes {
        let body_len = self.body_len();
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + body_len);
        let (frame_type, flags) = self.wire_type_and_flags();
        buf.put_slice(&(body_len as u32).to_be_bytes()[1..]);
        buf.put_u8(frame_type);
        buf.put_u8(flags);
        buf.put_u32(self.stream_id() & MAX_STREAM_ID);

        match self {
            Self::Data { data, .. } => buf.put_slice(data),
            Self::Headers {
                priority, fragment, ..
            } => {
                if let Some(priority) = priority {
                    put_priority(&mut buf, priority);
                }
                buf.put_slice(fragment);
            }
            Self::Priority { priority, .. } => put_priority(&mut buf, priority),
            Self::ResetStream { error_code, .. } => buf.put_u32(*error_code),
            Self::Settings { params, .. } => {
                for (param, value) in params {
                    buf.put_u16(*param as u16);
                    buf.put_u32(*value);
                }
            }
            Self::PushPromise {
                promised_stream_id,
                fragment,
                ..
            } => {
                buf.put_u32(promised_stream_id & MAX_STREAM_ID);
                buf.put_slice(fragment);
            }
            Self::Ping { data, .. } => buf.put_slice(data),
            Self::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                buf.put_u32(last_stream_id & MAX_STREAM_ID);
                buf.put_u32(*error_code);
                buf.put_slice(debug_data);
            }
            Self::WindowUpdate { increment, .. } => buf.put_u32(increment & MAX_STREAM_ID),
            Self::Continuation { fragment, .. } => buf.put_slice(fragment),
            Self::AltSvc {
                origin,
                field_value,
                ..
            } => {
                buf.put_u16(origin.len() as u16);
                buf.put_slice(origin);
                buf.put_slice(field_value);
            }
            Self::Unknown { payload, .. } => buf.put_slice(payload),
        }

        buf.freeze()
    }

    fn wire_type_and_flags(&self) -> (u8, u8) {
        match self {
            Self::Data { flags, .. } => (FrameType::Data as u8, flags.bits()),
            Self::Headers { flags, .. } => (FrameType::Headers as u8, flags.bits()),
            Self::Priority { .. } => (FrameType::Priority as u8, 0),
            Self::ResetStream { .. } => (FrameType::ResetStream as u8, 0),
            Self::Settings { flags, .. } => (FrameType::Settings as u8, flags.bits()),
            Self::PushPromise { flags, .. } => (FrameType::PushPromise as u8, flags.bits()),
            Self::Ping { flags, .. } => (FrameType::Ping as u8, flags.bits()),
            Self::GoAway { .. } => (FrameType::GoAway as u8, 0),
            Self::WindowUpdate { .. } => (FrameType::WindowUpdate as u8, 0),
            Self::Continuation { flags, .. } => (FrameType::Continuation as u8, flags.bits()),
            Self::AltSvc { .. } => (FrameType::AltSvc as u8, 0),
            Self::Unknown {
                frame_type, flags, ..
            } => (*frame_type, *flags),
        }
    }
}

/// Removes the pad-length prefix and trailing padding when the PADDED flag
/// is set. Padding that would swallow the whole payload is a protocol error.
fn strip_padding(padded: bool, payload: Bytes) -> Result<Bytes, Http2Error> {
    if !padded {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(Http2Error::FrameDataMissing);
    }
    let pad_length = payload[0] as usize;
    if pad_length + 1 > payload.len() {
        return Err(Http2Error::protocol("padding exceeds frame payload"));
    }
    Ok(payload.slice(1..payload.len() - pad_length))
}

fn parse_priority(body: &mut Bytes) -> Result<PriorityInfo, Http2Error> {
    if body.len() < 5 {
        return Err(Http2Error::FrameDataMissing);
    }
    let raw = read_u32(body, 0);
    let info = PriorityInfo {
        depends_on: raw & MAX_STREAM_ID,
        weight: body[4],
        exclusive: raw & !MAX_STREAM_ID != 0,
    };
    *body = body.slice(5..);
    Ok(info)
}

fn put_priority(buf: &mut BytesMut, priority: &PriorityInfo) {
    let mut raw = priority.depends_on & MAX_STREAM_ID;
    if priority.exclusive {
        raw |= !MAX_STREAM_ID;
    }
    buf.put_u32(raw);
    buf.put_u8(priority.weight);
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reparse(frame: &Frame) -> Frame {
        let bytes = frame.serialize();
        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&bytes[..FRAME_HEADER_LEN]);
        let head = FrameHead::parse(&header);
        assert_eq!(head.length as usize, bytes.len() - FRAME_HEADER_LEN);
        Frame::parse(&head, bytes.slice(FRAME_HEADER_LEN..)).unwrap()
    }

    #[test]
    fn data_round_trip() {
        let frame = Frame::Data {
            stream_id: 1,
            flags: DataFlags::END_STREAM,
            data: Bytes::from_static(b"hello"),
            flow_controlled_length: 5,
        };
        assert_eq!(reparse(&frame), frame);
    }

    #[test]
    fn padded_data_reports_full_flow_controlled_length() {
        // length 10 = pad byte + 5 data bytes + 4 padding bytes
        let head = FrameHead {
            length: 10,
            frame_type: FrameType::Data as u8,
            flags: DataFlags::PADDED.bits(),
            stream_id: 1,
        };
        let mut payload = vec![4u8];
        payload.extend_from_slice(b"hello");
        payload.extend_from_slice(&[0; 4]);
        match Frame::parse(&head, payload.into()).unwrap() {
            Frame::Data {
                data,
                flow_controlled_length,
                ..
            } => {
                assert_eq!(&data[..], b"hello");
                assert_eq!(flow_controlled_length, 10);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn overlong_padding_is_rejected() {
        let head = FrameHead {
            length: 3,
            frame_type: FrameType::Data as u8,
            flags: DataFlags::PADDED.bits(),
            stream_id: 1,
        };
        let payload = Bytes::from_static(&[200, 0, 0]);
        assert!(matches!(
            Frame::parse(&head, payload),
            Err(Http2Error::Protocol(_))
        ));
    }

    #[test]
    fn settings_parse_skips_unknown_codes() {
        let frame = Frame::Settings {
            flags: SettingsFlags::empty(),
            params: vec![(SettingsParameter::InitialWindowSize, 1280)],
        };
        let mut bytes = BytesMut::from(&frame.serialize()[..]);
        // append an unknown setting (code 0xff) after the known one
        bytes.put_u16(0xff);
        bytes.put_u32(1);
        bytes[2] = 12;
        let head = FrameHead {
            length: 12,
            frame_type: FrameType::Settings as u8,
            flags: 0,
            stream_id: 0,
        };
        match Frame::parse(&head, bytes.freeze().slice(FRAME_HEADER_LEN..)).unwrap() {
            Frame::Settings { params, .. } => {
                assert_eq!(params, vec![(SettingsParameter::InitialWindowSize, 1280)]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn ping_requires_exactly_eight_bytes() {
        let head = FrameHead {
            length: 7,
            frame_type: FrameType::Ping as u8,
            flags: 0,
            stream_id: 0,
        };
        assert!(matches!(
            Frame::parse(&head, Bytes::from_static(&[0; 7])),
            Err(Http2Error::FrameDataMissing)
        ));
    }

    #[test]
    fn unknown_frame_types_pass_through() {
        let head = FrameHead {
            length: 3,
            frame_type: 0x42,
            flags: 0x7,
            stream_id: 9,
        };
        match Frame::parse(&head, Bytes::from_static(b"abc")).unwrap() {
            Frame::Unknown {
                frame_type, flags, ..
            } => {
                assert_eq!(frame_type, 0x42);
                assert_eq!(flags, 0x7);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
