#![warn(future_incompatible, nonstandard_style, rust_2018_idioms, unused)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::similar_names,
    clippy::too_many_lines,
)]

//! A sans-I/O HTTP/2 protocol engine.
//!
//! The engine translates between HTTP/2 wire bytes and high-level protocol
//! events without owning sockets, threads or timers. Feed received bytes to
//! [`Connection::receive_data`], drive it with the send operations, and
//! write whatever [`Connection::data_to_send`] returns to your transport.
//!
//! ```
//! use http2_engine::{Config, Connection, Header};
//!
//! let mut client = Connection::client();
//! client.initiate_connection().unwrap();
//! client
//!     .send_headers(
//!         1,
//!         vec![
//!             Header::new(":method", "GET"),
//!             Header::new(":scheme", "https"),
//!             Header::new(":path", "/"),
//!             Header::new(":authority", "example.com"),
//!         ],
//!         true,
//!     )
//!     .unwrap();
//! let wire_bytes = client.data_to_send(None);
//! # let _ = (wire_bytes, Config::server());
//! ```

mod config;
mod connection;
mod error;
pub mod events;
pub mod flags;
pub mod frame;
mod frame_buffer;
mod headers;
mod hpack;
mod settings;
mod stream;
mod types;

pub use bytes::Bytes;
pub use config::{Config, HeaderEncoding};
pub use connection::{Connection, ConnectionState};
pub use error::Http2Error;
pub use events::Event;
pub use frame_buffer::FrameBuffer;
pub use headers::{
    is_informational_response, normalize_inbound_headers, normalize_outbound_headers,
    validate_inbound_headers, validate_outbound_headers, Header, ValidationFlags,
};
pub use hpack::{HeaderCodec, HpackCodec};
pub use settings::{ChangedSetting, SettingsStore};
pub use stream::{Stream, StreamInput, StreamState};
pub use types::{ErrorCode, FrameType, SettingsParameter, StreamId, CONNECTION_PREFACE};
