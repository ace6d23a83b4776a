//! Header compression behind a narrow interface.
//!
//! The engine only ever needs four things from HPACK: encode a block, decode
//! a block, resize the tables when SETTINGS say so, and refuse to decompress
//! absurdly large header lists. Everything else about RFC 7541 stays inside
//! the codec implementation.

use crate::{error::Http2Error, headers::Header};
use bytes::Bytes;
use derivative::Derivative;

/// Uncompressed header-list bound applied when the local
/// MAX_HEADER_LIST_SIZE setting is unset. Counting follows RFC 7540 §6.5.2:
/// name length + value length + 32 per field.
pub const DEFAULT_MAX_HEADER_LIST_SIZE: u32 = 1 << 16;

/// The compression capability the connection engine depends on.
pub trait HeaderCodec {
    /// Encodes a header block. Implementations may use
    /// [`Header::never_indexed`] to keep sensitive fields out of the dynamic
    /// table.
    fn encode(&mut self, headers: &[Header]) -> Bytes;

    /// Decodes a complete header block. Must fail with
    /// [`Http2Error::DenialOfService`] once the decoded list exceeds the
    /// configured bound, and with a protocol error for malformed input.
    fn decode(&mut self, block: &[u8]) -> Result<Vec<Header>, Http2Error>;

    fn set_encoder_table_size(&mut self, size: u32);
    fn set_decoder_table_size(&mut self, size: u32);
    fn set_max_header_list_size(&mut self, limit: Option<u32>);
}

/// Default codec over the `hpack` crate.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct HpackCodec {
    #[derivative(Debug = "ignore")]
    encoder: hpack::Encoder<'static>,
    #[derivative(Debug = "ignore")]
    decoder: hpack::Decoder<'static>,
    /// Table-size hints from SETTINGS. The `hpack` crate sizes its tables
    /// internally; the hints are recorded for introspection and for codecs
    /// that honour them.
    encoder_table_size: u32,
    decoder_table_size: u32,
    max_header_list_size: Option<u32>,
}

impl HpackCodec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            encoder: hpack::Encoder::new(),
            decoder: hpack::Decoder::new(),
            encoder_table_size: 4096,
            decoder_table_size: 4096,
            max_header_list_size: None,
        }
    }
}

impl Default for HpackCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderCodec for HpackCodec {
    fn encode(&mut self, headers: &[Header]) -> Bytes {
        let encoded = self
            .encoder
            .encode(headers.iter().map(|h| (h.name.as_ref(), h.value.as_ref())));
        Bytes::from(encoded)
    }

    fn decode(&mut self, block: &[u8]) -> Result<Vec<Header>, Http2Error> {
        let limit = self
            .max_header_list_size
            .unwrap_or(DEFAULT_MAX_HEADER_LIST_SIZE) as usize;
        let mut headers = Vec::new();
        let mut decoded_size = 0usize;
        let mut overflowed = false;

        self.decoder
            .decode_with_cb(block, |name, value| {
                decoded_size += name.len() + value.len() + 32;
                if decoded_size > limit {
                    // Stop materializing entries; the block is rejected below.
                    overflowed = true;
                }
                if !overflowed {
                    headers.push(Header::new(name.to_vec(), value.to_vec()));
                }
            })
            .map_err(|err| {
                Http2Error::protocol(format!("error decoding header block: {:?}", err))
            })?;

        if overflowed {
            return Err(Http2Error::DenialOfService(format!(
                "decoded header list exceeds {} bytes",
                limit
            )));
        }
        Ok(headers)
    }

    fn set_encoder_table_size(&mut self, size: u32) {
        self.encoder_table_size = size;
    }

    fn set_decoder_table_size(&mut self, size: u32) {
        self.decoder_table_size = size;
    }

    fn set_max_header_list_size(&mut self, limit: Option<u32>) {
        self.max_header_list_size = limit;
    }
}
