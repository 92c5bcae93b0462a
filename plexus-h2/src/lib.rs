//! Sans-IO HTTP/2 framing and HPACK header compression.
//!
//! Nothing in this crate performs I/O or spawns tasks. The async engine in
//! `plexus-http` reads frame headers off the socket, checks them with
//! [`FrameHeader::check_length`], parses payloads with [`Frame::parse`], and
//! keeps one [`Encoder`]/[`Decoder`] pair per connection.
//!
//! ```text
//!   TLS byte stream (ALPN h2)
//!        |
//!   +----v------------+
//!   | plexus-http     |  Connection, streams, dispatch loop
//!   +----+------------+
//!        |
//!   +----v------------+
//!   | plexus-h2       |  frames, HPACK, settings, windows
//!   +-----------------+
//! ```
//!
//! # Example
//!
//! ```rust
//! use plexus_h2::{Decoder, Encoder, HeaderField};
//!
//! let mut encoder = Encoder::default();
//! let mut decoder = Decoder::default();
//!
//! let headers = [
//!     HeaderField::new(":method", "GET"),
//!     HeaderField::new(":path", "/"),
//! ];
//! let mut block = Vec::new();
//! encoder.encode(&headers, &mut block);
//! assert_eq!(decoder.decode(&block).unwrap(), headers);
//! ```

pub mod error;
pub mod flowcontrol;
pub mod frame;
pub mod hpack;
pub mod huffman;
pub mod integer;
pub mod settings;
pub mod table;

pub use error::{ErrorCode, H2Error, HpackError};
pub use flowcontrol::Window;
pub use frame::{Frame, FrameHeader, FrameType};
pub use hpack::{Decoder, Encoder, HeaderField};
pub use settings::Settings;
