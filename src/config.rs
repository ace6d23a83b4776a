//! Connection behaviour knobs.

/// How inbound header bytes are surfaced in events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderEncoding {
    /// Reject header blocks that are not valid UTF-8, so every surfaced
    /// header can be read through [`Header::name_str`](crate::Header::name_str)
    /// and [`Header::value_str`](crate::Header::value_str).
    Utf8,
}

/// Configuration for a [`Connection`](crate::Connection).
///
/// The defaults match what a well-behaved endpoint wants: both validation
/// pipelines and both normalization pipelines on, cookie splitting off,
/// headers surfaced as raw bytes.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether this endpoint is the client side of the connection. Affects
    /// the state machines, default settings and allowable stream IDs.
    pub client_side: bool,
    /// When set, inbound header blocks are checked against the encoding and
    /// rejected with a protocol error if they do not conform.
    pub header_encoding: Option<HeaderEncoding>,
    pub validate_outbound_headers: bool,
    pub normalize_outbound_headers: bool,
    /// Split outbound `cookie` fields on `"; "` for better HPACK
    /// compression (RFC 7540 §8.1.2.5).
    pub split_outbound_cookies: bool,
    pub validate_inbound_headers: bool,
    pub normalize_inbound_headers: bool,
    /// How many locally-reset stream IDs to remember for absorbing frames
    /// that were in flight when the RST_STREAM went out. Oldest entries are
    /// evicted first.
    pub max_reset_streams: usize,
}

impl Config {
    #[must_use]
    pub fn client() -> Self {
        Self::new(true)
    }

    #[must_use]
    pub fn server() -> Self {
        Self::new(false)
    }

    #[must_use]
    pub fn new(client_side: bool) -> Self {
        Self {
            client_side,
            header_encoding: None,
            validate_outbound_headers: true,
            normalize_outbound_headers: true,
            split_outbound_cookies: false,
            validate_inbound_headers: true,
            normalize_inbound_headers: true,
            max_reset_streams: 1024,
        }
    }

    #[must_use]
    pub fn header_encoding(mut self, encoding: HeaderEncoding) -> Self {
        self.header_encoding = Some(encoding);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::client()
    }
}
