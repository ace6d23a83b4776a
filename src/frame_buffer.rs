//! Reassembly of logical frames from a raw byte stream.
//!
//! Servers additionally consume and verify the 24-byte client preface before
//! any framing. A HEADERS or PUSH_PROMISE without END_HEADERS and its
//! CONTINUATION frames are fused into one synthetic frame, so downstream
//! code never sees a partial header block.

use crate::{
    error::Http2Error,
    flags::{ContinuationFlags, HeadersFlags, PushPromiseFlags},
    frame::{Frame, FrameHead, FRAME_HEADER_LEN},
    types::CONNECTION_PREFACE,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::trace;

/// The maximum number of header-block fragments buffered before the
/// connection is torn down. Bounds the damage of a CONTINUATION flood: with
/// default frame sizes the largest header block this admits is 64 * 16384
/// bytes of compressed data.
const CONTINUATION_BACKLOG: usize = 64;

#[derive(Debug)]
struct HeaderBlock {
    leading: Frame,
    fragments: Vec<Bytes>,
}

#[derive(Debug)]
pub struct FrameBuffer {
    data: BytesMut,
    /// Refreshed from the connection's local MAX_FRAME_SIZE on every feed.
    pub max_frame_size: u32,
    preface_remaining: usize,
    header_block: Option<HeaderBlock>,
}

impl FrameBuffer {
    #[must_use]
    pub fn new(server: bool) -> Self {
        Self {
            data: BytesMut::new(),
            max_frame_size: 0,
            preface_remaining: if server { CONNECTION_PREFACE.len() } else { 0 },
            header_block: None,
        }
    }

    /// Appends received bytes, verifying any outstanding preface prefix.
    pub fn add_data(&mut self, mut data: &[u8]) -> Result<(), Http2Error> {
        if self.preface_remaining > 0 {
            let checked = self.preface_remaining.min(data.len());
            let offset = CONNECTION_PREFACE.len() - self.preface_remaining;
            if data[..checked] != CONNECTION_PREFACE[offset..offset + checked] {
                return Err(Http2Error::protocol("invalid HTTP/2 client preface"));
            }
            self.preface_remaining -= checked;
            data = &data[checked..];
        }
        self.data.extend_from_slice(data);
        Ok(())
    }

    /// The next complete logical frame, or `None` when more bytes are
    /// needed. Frames that only feed the header-block buffer are consumed
    /// internally and never returned.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, Http2Error> {
        loop {
            if self.data.len() < FRAME_HEADER_LEN {
                return Ok(None);
            }
            let mut header = [0u8; FRAME_HEADER_LEN];
            header.copy_from_slice(&self.data[..FRAME_HEADER_LEN]);
            let head = FrameHead::parse(&header);

            if self.data.len() < FRAME_HEADER_LEN + head.length as usize {
                return Ok(None);
            }
            if head.length > self.max_frame_size {
                return Err(Http2Error::FrameTooLarge {
                    size: head.length as usize,
                    max: self.max_frame_size as usize,
                });
            }

            self.data.advance(FRAME_HEADER_LEN);
            let payload = self.data.split_to(head.length as usize).freeze();
            let frame = Frame::parse(&head, payload)?;
            trace!("parsed {:?}", frame);

            if let Some(frame) = self.fold_header_block(frame)? {
                return Ok(Some(frame));
            }
        }
    }

    /// Runs a parsed frame through the header-block buffer. Returns the
    /// frame to surface, if any: a fused block once END_HEADERS arrives, the
    /// frame untouched when no block is in progress.
    fn fold_header_block(&mut self, frame: Frame) -> Result<Option<Frame>, Http2Error> {
        if let Some(mut block) = self.header_block.take() {
            let (stream_id, end_headers, fragment) = match frame {
                Frame::Continuation {
                    stream_id,
                    flags,
                    fragment,
                } => (
                    stream_id,
                    flags.contains(ContinuationFlags::END_HEADERS),
                    fragment,
                ),
                _ => return Err(Http2Error::protocol("invalid frame during header block")),
            };
            if stream_id != block.leading.stream_id() {
                return Err(Http2Error::protocol("invalid frame during header block"));
            }

            block.fragments.push(fragment);
            if block.fragments.len() > CONTINUATION_BACKLOG {
                return Err(Http2Error::DenialOfService(
                    "too many CONTINUATION frames received".into(),
                ));
            }
            if end_headers {
                return Ok(Some(fuse(block)));
            }
            self.header_block = Some(block);
            return Ok(None);
        }

        match &frame {
            Frame::Headers { flags, .. } if !flags.contains(HeadersFlags::END_HEADERS) => {
                self.header_block = Some(HeaderBlock {
                    leading: frame,
                    fragments: Vec::new(),
                });
                Ok(None)
            }
            Frame::PushPromise { flags, .. } if !flags.contains(PushPromiseFlags::END_HEADERS) => {
                self.header_block = Some(HeaderBlock {
                    leading: frame,
                    fragments: Vec::new(),
                });
                Ok(None)
            }
            _ => Ok(Some(frame)),
        }
    }
}

/// Concatenates the buffered fragments onto the leading frame and marks it
/// END_HEADERS, producing the single jumbo frame the rest of the engine
/// dispatches on.
fn fuse(block: HeaderBlock) -> Frame {
    let HeaderBlock { leading, fragments } = block;
    match leading {
        Frame::Headers {
            stream_id,
            flags,
            priority,
            fragment,
        } => Frame::Headers {
            stream_id,
            flags: flags | HeadersFlags::END_HEADERS,
            priority,
            fragment: concat_fragments(fragment, &fragments),
        },
        Frame::PushPromise {
            stream_id,
            flags,
            promised_stream_id,
            fragment,
        } => Frame::PushPromise {
            stream_id,
            flags: flags | PushPromiseFlags::END_HEADERS,
            promised_stream_id,
            fragment: concat_fragments(fragment, &fragments),
        },
        _ => unreachable!("only HEADERS and PUSH_PROMISE start header blocks"),
    }
}

fn concat_fragments(leading: Bytes, rest: &[Bytes]) -> Bytes {
    let total = leading.len() + rest.iter().map(Bytes::len).sum::<usize>();
    let mut fused = BytesMut::with_capacity(total);
    fused.put_slice(&leading);
    for fragment in rest {
        fused.put_slice(fragment);
    }
    fused.freeze()
}
