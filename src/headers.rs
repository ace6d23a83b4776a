//! Header-block conformance per RFC 7540 §8.1.2.
//!
//! Validation is a single pass composing every check: wire hygiene (empty
//! names, uppercase, surrounding whitespace), connection-specific fields,
//! pseudo-header ordering and acceptability (including ordinary and extended
//! CONNECT per RFC 8441), `:authority`/`Host` agreement, and `:path`
//! non-emptiness. Normalization rewrites blocks rather than rejecting them:
//! lowercasing, cookie splitting/merging, whitespace stripping, and marking
//! at-risk fields never-indexed for HPACK.

use crate::error::Http2Error;
use bytes::Bytes;

/// A single header field. Names and values are raw bytes; `never_indexed`
/// asks the HPACK encoder to keep the field out of compression contexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: Bytes,
    pub value: Bytes,
    pub never_indexed: bool,
}

impl Header {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            never_indexed: false,
        }
    }

    pub fn never_indexed(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            never_indexed: true,
        }
    }

    /// The name as UTF-8, if it is valid UTF-8.
    #[must_use]
    pub fn name_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.name).ok()
    }

    /// The value as UTF-8, if it is valid UTF-8.
    #[must_use]
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

impl<N: Into<Bytes>, V: Into<Bytes>> From<(N, V)> for Header {
    fn from((name, value): (N, V)) -> Self {
        Self::new(name, value)
    }
}

/// Hop-by-hop fields forbidden in HTTP/2, from RFC 7540 §8.1.2.2.
const CONNECTION_HEADERS: [&[u8]; 5] = [
    b"connection",
    b"proxy-connection",
    b"keep-alive",
    b"transfer-encoding",
    b"upgrade",
];

const ALLOWED_PSEUDO_HEADERS: [&[u8]; 6] = [
    b":method",
    b":scheme",
    b":authority",
    b":path",
    b":status",
    b":protocol",
];

/// May carry credentials vulnerable to dictionary attacks; kept out of HPACK
/// compression contexts. The rules follow Firefox and nghttp2.
const SECURE_HEADERS: [&[u8]; 2] = [b"authorization", b"proxy-authorization"];

/// Which checks apply to a given block.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationFlags {
    pub is_client: bool,
    pub is_trailer: bool,
    pub is_response_header: bool,
    pub is_push_promise: bool,
}

/// Full validation for blocks arriving off the wire.
pub fn validate_inbound_headers(
    headers: &[Header],
    flags: ValidationFlags,
) -> Result<(), Http2Error> {
    validate_block(headers, flags, true)
}

/// Validation for blocks we are about to send. Wire-hygiene checks are
/// skipped since normalization already rewrites those defects.
pub fn validate_outbound_headers(
    headers: &[Header],
    flags: ValidationFlags,
) -> Result<(), Http2Error> {
    validate_block(headers, flags, false)
}

fn validate_block(
    headers: &[Header],
    flags: ValidationFlags,
    wire_hygiene: bool,
) -> Result<(), Http2Error> {
    let mut seen_pseudo: Vec<&[u8]> = Vec::new();
    let mut seen_regular = false;
    let mut method: Option<&[u8]> = None;
    let mut authority: Option<&[u8]> = None;
    let mut host: Option<&[u8]> = None;
    let mut path: Option<&[u8]> = None;

    for header in headers {
        let name = header.name.as_ref();
        let value = header.value.as_ref();

        if wire_hygiene {
            if name.is_empty() {
                return Err(Http2Error::protocol("received header name of zero length"));
            }
            if name.iter().any(u8::is_ascii_uppercase) {
                return Err(Http2Error::protocol(format!(
                    "received uppercase header name {:?}",
                    String::from_utf8_lossy(name)
                )));
            }
            if is_surrounded_by_whitespace(name) || is_surrounded_by_whitespace(value) {
                return Err(Http2Error::protocol(
                    "received header surrounded by whitespace",
                ));
            }
        }

        if name == b"te" && !value.eq_ignore_ascii_case(b"trailers") {
            return Err(Http2Error::protocol(format!(
                "invalid value for te header: {:?}",
                String::from_utf8_lossy(value)
            )));
        }
        if CONNECTION_HEADERS.contains(&name) {
            return Err(Http2Error::protocol(format!(
                "connection-specific header field present: {:?}",
                String::from_utf8_lossy(name)
            )));
        }

        if name.first() == Some(&b':') {
            if seen_pseudo.contains(&name) {
                return Err(Http2Error::protocol(format!(
                    "received duplicate pseudo-header field {:?}",
                    String::from_utf8_lossy(name)
                )));
            }
            if seen_regular {
                return Err(Http2Error::protocol(format!(
                    "received pseudo-header field out of sequence: {:?}",
                    String::from_utf8_lossy(name)
                )));
            }
            if !ALLOWED_PSEUDO_HEADERS.contains(&name) {
                return Err(Http2Error::protocol(format!(
                    "received custom pseudo-header field {:?}",
                    String::from_utf8_lossy(name)
                )));
            }
            seen_pseudo.push(name);
            match name {
                b":method" => method = Some(value),
                b":authority" => authority = Some(value),
                b":path" => path = Some(value),
                _ => {}
            }
        } else {
            seen_regular = true;
            if name == b"host" {
                host = Some(value);
            }
        }
    }

    check_pseudo_header_acceptability(&seen_pseudo, method, flags)?;

    if !flags.is_response_header && !flags.is_trailer {
        if let Some(path) = path {
            if path.is_empty() {
                return Err(Http2Error::protocol("an empty :path header is forbidden"));
            }
        }
        if authority.is_none() && host.is_none() {
            return Err(Http2Error::protocol(
                "request header block has neither an :authority nor a Host header",
            ));
        }
        if let (Some(authority), Some(host)) = (authority, host) {
            if authority != host {
                return Err(Http2Error::protocol(
                    "request header block has mismatched :authority and Host headers",
                ));
            }
        }
    }

    Ok(())
}

/// Checks the collected pseudo-headers against the block kind, including the
/// CONNECT variants: an ordinary CONNECT omits `:scheme` and `:path` and
/// requires `:authority`; an extended CONNECT (RFC 8441) carries `:protocol`
/// and the full request pseudo-header set.
fn check_pseudo_header_acceptability(
    seen_pseudo: &[&[u8]],
    method: Option<&[u8]>,
    flags: ValidationFlags,
) -> Result<(), Http2Error> {
    let has = |name: &[u8]| seen_pseudo.iter().any(|&seen| seen == name);

    if flags.is_trailer {
        if !seen_pseudo.is_empty() {
            return Err(Http2Error::protocol("received pseudo-header in trailer"));
        }
        return Ok(());
    }

    if flags.is_response_header {
        if !has(b":status") {
            return Err(Http2Error::protocol(
                "response header block missing mandatory :status header",
            ));
        }
        if seen_pseudo.iter().any(|&name| name != b":status") {
            return Err(Http2Error::protocol(
                "response header block contains request-only pseudo-headers",
            ));
        }
        return Ok(());
    }

    // Request block (including push promises).
    if has(b":status") {
        return Err(Http2Error::protocol(
            "request header block contains response-only pseudo-headers",
        ));
    }
    if method == Some(b"CONNECT".as_ref()) && !has(b":protocol") {
        if !has(b":authority") {
            return Err(Http2Error::protocol(
                "CONNECT request missing mandatory :authority header",
            ));
        }
        if has(b":scheme") || has(b":path") {
            return Err(Http2Error::protocol(
                "CONNECT request must not carry :scheme or :path",
            ));
        }
        return Ok(());
    }
    for required in [b":method".as_ref(), b":scheme".as_ref(), b":path".as_ref()] {
        if !has(required) {
            return Err(Http2Error::protocol(format!(
                "request header block missing mandatory {:?} header",
                String::from_utf8_lossy(required)
            )));
        }
    }
    if method != Some(b"CONNECT".as_ref()) && has(b":protocol") {
        return Err(Http2Error::protocol(
            ":protocol is only valid on CONNECT requests",
        ));
    }
    Ok(())
}

/// Rewrites a block we are about to send: lowercase names, optionally split
/// cookie fields for compression efficiency (RFC 7540 §8.1.2.5), strip
/// surrounding whitespace, drop connection-specific fields, and mark at-risk
/// fields never-indexed.
#[must_use]
pub fn normalize_outbound_headers(headers: Vec<Header>, split_cookies: bool) -> Vec<Header> {
    let mut normalized = Vec::with_capacity(headers.len());
    for header in headers {
        let Header {
            name,
            value,
            never_indexed,
        } = header;
        let name = strip_whitespace(lowercase(name));
        let value = strip_whitespace(value);
        if CONNECTION_HEADERS.contains(&name.as_ref()) {
            continue;
        }
        if split_cookies && name.as_ref() == b"cookie" {
            for piece in split_cookie_value(&value) {
                normalized.push(secure(Header {
                    name: name.clone(),
                    value: piece,
                    never_indexed,
                }));
            }
            continue;
        }
        normalized.push(secure(Header {
            name,
            value,
            never_indexed,
        }));
    }
    normalized
}

/// Rewrites a received block: joins split cookie fields back into one, per
/// RFC 7540 §8.1.2.5. The merged field lands at the end of the block.
#[must_use]
pub fn normalize_inbound_headers(headers: Vec<Header>) -> Vec<Header> {
    let mut normalized = Vec::with_capacity(headers.len());
    let mut cookies: Vec<Bytes> = Vec::new();
    for header in headers {
        if header.name.as_ref() == b"cookie" {
            cookies.push(header.value);
        } else {
            normalized.push(header);
        }
    }
    if !cookies.is_empty() {
        normalized.push(Header::never_indexed(
            &b"cookie"[..],
            cookies.join(&b"; "[..]),
        ));
    }
    normalized
}

/// Marks `authorization`, `proxy-authorization` and short cookies as HPACK
/// never-indexed.
fn secure(mut header: Header) -> Header {
    if SECURE_HEADERS.contains(&header.name.as_ref())
        || (header.name.as_ref() == b"cookie" && header.value.len() < 20)
    {
        header.never_indexed = true;
    }
    header
}

fn lowercase(name: Bytes) -> Bytes {
    if name.iter().any(u8::is_ascii_uppercase) {
        let mut lowered = name.to_vec();
        lowered.make_ascii_lowercase();
        Bytes::from(lowered)
    } else {
        name
    }
}

fn strip_whitespace(value: Bytes) -> Bytes {
    if is_surrounded_by_whitespace(&value) {
        let start = value
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(value.len());
        let end = value
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map_or(start, |at| at + 1);
        value.slice(start..end)
    } else {
        value
    }
}

fn is_surrounded_by_whitespace(bytes: &[u8]) -> bool {
    let leading = bytes.first().map_or(false, u8::is_ascii_whitespace);
    let trailing = bytes.last().map_or(false, u8::is_ascii_whitespace);
    leading || trailing
}

fn split_cookie_value(value: &Bytes) -> Vec<Bytes> {
    let mut pieces = Vec::new();
    let mut rest = value.clone();
    while let Some(at) = rest.windows(2).position(|window| window == b"; ") {
        pieces.push(rest.slice(..at));
        rest = rest.slice(at + 2..);
    }
    pieces.push(rest);
    pieces
}

/// Searches the leading pseudo-headers for a 1xx `:status`. `101` is not a
/// valid informational response in HTTP/2.
#[must_use]
pub fn is_informational_response(headers: &[Header]) -> bool {
    for header in headers {
        if header.name.first() != Some(&b':') {
            return false;
        }
        if header.name.as_ref() != b":status" {
            continue;
        }
        return header.value.first() == Some(&b'1') && header.value.as_ref() != b"101";
    }
    false
}

/// Strict decimal parse for `content-length`, rejecting anything that is not
/// a plain non-negative integer.
pub(crate) fn parse_content_length(value: &[u8]) -> Result<u64, Http2Error> {
    if value.is_empty() || !value.iter().all(u8::is_ascii_digit) {
        return Err(Http2Error::protocol(format!(
            "invalid content-length header: {:?}",
            String::from_utf8_lossy(value)
        )));
    }
    std::str::from_utf8(value)
        .ok()
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| {
            Http2Error::protocol(format!(
                "invalid content-length header: {:?}",
                String::from_utf8_lossy(value)
            ))
        })
}

/// Finds the declared content length in a block, if any.
pub(crate) fn content_length_from_headers(
    headers: &[Header],
) -> Result<Option<u64>, Http2Error> {
    for header in headers {
        if header.name.as_ref() == b"content-length" {
            return parse_content_length(&header.value).map(Some);
        }
    }
    Ok(None)
}

/// Enforces the configured header encoding on a received block.
pub(crate) fn ensure_utf8(headers: &[Header]) -> Result<(), Http2Error> {
    for header in headers {
        if header.name_str().is_none() || header.value_str().is_none() {
            return Err(Http2Error::protocol(
                "header block is not valid UTF-8 under the configured encoding",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(headers: &[(&'static str, &'static str)]) -> Vec<Header> {
        headers
            .iter()
            .map(|&(name, value)| Header::new(name, value))
            .collect()
    }

    fn request_flags() -> ValidationFlags {
        ValidationFlags {
            is_client: true,
            ..ValidationFlags::default()
        }
    }

    const GET_HEADERS: [(&str, &str); 4] = [
        (":method", "GET"),
        (":scheme", "https"),
        (":path", "/"),
        (":authority", "example.com"),
    ];

    #[test]
    fn well_formed_request_passes() {
        validate_inbound_headers(&request(&GET_HEADERS), request_flags()).unwrap();
    }

    #[test]
    fn uppercase_names_are_rejected_inbound_only() {
        let headers = request(&[
            (":method", "GET"),
            (":scheme", "https"),
            (":path", "/"),
            (":authority", "example.com"),
            ("X-Custom", "v"),
        ]);
        assert!(validate_inbound_headers(&headers, request_flags()).is_err());
        // The outbound pipeline lowercases instead.
        assert!(validate_outbound_headers(&headers, request_flags()).is_ok());
    }

    #[test]
    fn pseudo_header_after_regular_is_rejected() {
        let headers = request(&[
            (":method", "GET"),
            (":scheme", "https"),
            ("accept", "*/*"),
            (":path", "/"),
            (":authority", "example.com"),
        ]);
        assert!(validate_inbound_headers(&headers, request_flags()).is_err());
    }

    #[test]
    fn duplicate_and_unknown_pseudo_headers_are_rejected() {
        let duplicated = request(&[
            (":method", "GET"),
            (":method", "GET"),
            (":scheme", "https"),
            (":path", "/"),
            (":authority", "example.com"),
        ]);
        assert!(validate_inbound_headers(&duplicated, request_flags()).is_err());

        let custom = request(&[
            (":method", "GET"),
            (":scheme", "https"),
            (":path", "/"),
            (":authority", "example.com"),
            (":custom", "x"),
        ]);
        assert!(validate_inbound_headers(&custom, request_flags()).is_err());
    }

    #[test]
    fn connection_specific_headers_are_rejected() {
        for name in ["connection", "keep-alive", "transfer-encoding"] {
            let mut headers = request(&GET_HEADERS);
            headers.push(Header::new(name, "x"));
            assert!(validate_inbound_headers(&headers, request_flags()).is_err());
        }
    }

    #[test]
    fn te_must_be_trailers() {
        let mut headers = request(&GET_HEADERS);
        headers.push(Header::new("te", "trailers"));
        validate_inbound_headers(&headers, request_flags()).unwrap();

        let mut headers = request(&GET_HEADERS);
        headers.push(Header::new("te", "chunked"));
        assert!(validate_inbound_headers(&headers, request_flags()).is_err());
    }

    #[test]
    fn authority_and_host_must_agree() {
        let missing_both = request(&[(":method", "GET"), (":scheme", "https"), (":path", "/")]);
        assert!(validate_inbound_headers(&missing_both, request_flags()).is_err());

        let mut agreeing = request(&GET_HEADERS);
        agreeing.push(Header::new("host", "example.com"));
        validate_inbound_headers(&agreeing, request_flags()).unwrap();

        let mut disagreeing = request(&GET_HEADERS);
        disagreeing.push(Header::new("host", "other.example.com"));
        assert!(validate_inbound_headers(&disagreeing, request_flags()).is_err());
    }

    #[test]
    fn empty_path_is_rejected() {
        let headers = request(&[
            (":method", "GET"),
            (":scheme", "https"),
            (":path", ""),
            (":authority", "example.com"),
        ]);
        assert!(validate_inbound_headers(&headers, request_flags()).is_err());
    }

    #[test]
    fn ordinary_connect_omits_scheme_and_path() {
        let headers = request(&[(":method", "CONNECT"), (":authority", "example.com:443")]);
        validate_inbound_headers(&headers, request_flags()).unwrap();

        let with_path = request(&[
            (":method", "CONNECT"),
            (":authority", "example.com:443"),
            (":path", "/"),
        ]);
        assert!(validate_inbound_headers(&with_path, request_flags()).is_err());
    }

    #[test]
    fn extended_connect_carries_protocol_scheme_and_path() {
        let headers = request(&[
            (":method", "CONNECT"),
            (":protocol", "websocket"),
            (":scheme", "https"),
            (":path", "/chat"),
            (":authority", "ws.example.com"),
        ]);
        validate_inbound_headers(&headers, request_flags()).unwrap();

        let protocol_on_get = request(&[
            (":method", "GET"),
            (":protocol", "websocket"),
            (":scheme", "https"),
            (":path", "/"),
            (":authority", "example.com"),
        ]);
        assert!(validate_inbound_headers(&protocol_on_get, request_flags()).is_err());
    }

    #[test]
    fn trailers_must_not_carry_pseudo_headers() {
        let flags = ValidationFlags {
            is_trailer: true,
            ..ValidationFlags::default()
        };
        validate_inbound_headers(&request(&[("checksum", "abc")]), flags).unwrap();
        assert!(validate_inbound_headers(&request(&[(":status", "200")]), flags).is_err());
    }

    #[test]
    fn responses_require_status_and_forbid_request_pseudo_headers() {
        let flags = ValidationFlags {
            is_response_header: true,
            ..ValidationFlags::default()
        };
        validate_inbound_headers(&request(&[(":status", "200")]), flags).unwrap();
        assert!(validate_inbound_headers(&request(&[("server", "x")]), flags).is_err());
        assert!(
            validate_inbound_headers(&request(&[(":status", "200"), (":path", "/")]), flags)
                .is_err()
        );
    }

    #[test]
    fn outbound_normalization_rewrites_blocks() {
        let headers = vec![
            Header::new("ACCEPT", " text/html "),
            Header::new("connection", "keep-alive"),
            Header::new("authorization", "Basic dXNlcg=="),
            Header::new("cookie", "short"),
        ];
        let normalized = normalize_outbound_headers(headers, false);
        assert_eq!(
            normalized,
            vec![
                Header::new("accept", "text/html"),
                Header::never_indexed("authorization", "Basic dXNlcg=="),
                Header::never_indexed("cookie", "short"),
            ]
        );
    }

    #[test]
    fn outbound_cookie_splitting() {
        let headers = vec![Header::new("cookie", "a=b; c=d; e=f")];
        let normalized = normalize_outbound_headers(headers, true);
        assert_eq!(
            normalized,
            vec![
                Header::never_indexed("cookie", "a=b"),
                Header::never_indexed("cookie", "c=d"),
                Header::never_indexed("cookie", "e=f"),
            ]
        );
    }

    #[test]
    fn inbound_cookie_fields_are_joined() {
        let headers = vec![
            Header::new("cookie", "a=b"),
            Header::new("accept", "*/*"),
            Header::new("cookie", "c=d"),
        ];
        let normalized = normalize_inbound_headers(headers);
        assert_eq!(
            normalized,
            vec![
                Header::new("accept", "*/*"),
                Header::never_indexed("cookie", "a=b; c=d"),
            ]
        );
    }

    #[test]
    fn informational_status_detection() {
        assert!(is_informational_response(&request(&[(":status", "100")])));
        assert!(!is_informational_response(&request(&[(":status", "101")])));
        assert!(!is_informational_response(&request(&[(":status", "200")])));
        assert!(!is_informational_response(&request(&[("x", "1")])));
    }

    #[test]
    fn content_length_parsing_is_strict() {
        assert_eq!(parse_content_length(b"0").unwrap(), 0);
        assert_eq!(parse_content_length(b"1234").unwrap(), 1234);
        assert!(parse_content_length(b"").is_err());
        assert!(parse_content_length(b"-1").is_err());
        assert!(parse_content_length(b"12a").is_err());
        assert!(parse_content_length(b" 12").is_err());
    }
}
