//! HTTP/2 frame encoding/decoding (RFC 7540 Section 4).
//!
//! Every frame starts with a fixed 9-byte header:
//! ```text
//! +-----------------------------------------------+
//! |                 Length (24)                    |
//! +---------------+---------------+---------------+
//! |   Type (8)    |   Flags (8)   |
//! +-+-------------+---------------+------...------+
//! |R|                 Stream Identifier (31)       |
//! +-+---------------------------------------------+
//! |                   Frame Payload ...            |
//! +-----------------------------------------------+
//! ```
//!
//! Reading is split in two so an async reader can validate the declared
//! length with [`FrameHeader::check_length`] before allocating the payload,
//! then hand the payload to [`Frame::parse`].

use crate::error::{ErrorCode, H2Error};
use crate::settings;

/// Frame header size in bytes.
pub const FRAME_HEADER_LEN: usize = 9;

/// The client connection preface (RFC 7540 Section 3.5).
pub const CONNECTION_PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

// Flags. END_STREAM and ACK share a bit; which one applies depends on the
// frame type.
pub const FLAG_END_STREAM: u8 = 0x1;
pub const FLAG_ACK: u8 = 0x1;
pub const FLAG_END_HEADERS: u8 = 0x4;
pub const FLAG_PADDED: u8 = 0x8;
pub const FLAG_PRIORITY: u8 = 0x20;

const STREAM_ID_MASK: u32 = 0x7fff_ffff;

/// Frame types (RFC 7540 Section 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    RstStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

impl FrameType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x0 => Self::Data,
            0x1 => Self::Headers,
            0x2 => Self::Priority,
            0x3 => Self::RstStream,
            0x4 => Self::Settings,
            0x5 => Self::PushPromise,
            0x6 => Self::Ping,
            0x7 => Self::GoAway,
            0x8 => Self::WindowUpdate,
            0x9 => Self::Continuation,
            _ => return None,
        })
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub kind: u8,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    pub fn new(length: u32, kind: FrameType, flags: u8, stream_id: u32) -> Self {
        Self {
            length,
            kind: kind as u8,
            flags,
            stream_id: stream_id & STREAM_ID_MASK,
        }
    }

    /// Decode a header. The reserved bit of the stream id is dropped.
    pub fn decode(buf: &[u8; FRAME_HEADER_LEN]) -> Self {
        let length = u32::from_be_bytes([0, buf[0], buf[1], buf[2]]);
        let stream_id = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) & STREAM_ID_MASK;
        Self {
            length,
            kind: buf[3],
            flags: buf[4],
            stream_id,
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.length.to_be_bytes()[1..]);
        buf.push(self.kind);
        buf.push(self.flags);
        buf.extend_from_slice(&(self.stream_id & STREAM_ID_MASK).to_be_bytes());
    }

    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_u8(self.kind)
    }

    /// Reject a declared payload length above `max_frame_size`.
    pub fn check_length(&self, max_frame_size: u32) -> Result<(), H2Error> {
        if self.length > max_frame_size {
            return Err(H2Error::FrameSizeError);
        }
        Ok(())
    }
}

/// Stream priority information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub exclusive: bool,
    pub dependency: u32,
    pub weight: u8,
}

impl Priority {
    fn decode(buf: &[u8]) -> Self {
        let raw = read_u32(buf);
        Self {
            exclusive: raw & 0x8000_0000 != 0,
            dependency: raw & STREAM_ID_MASK,
            weight: buf[4],
        }
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        let mut dep = self.dependency & STREAM_ID_MASK;
        if self.exclusive {
            dep |= 0x8000_0000;
        }
        buf.extend_from_slice(&dep.to_be_bytes());
        buf.push(self.weight);
    }
}

/// An HTTP/2 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Body bytes with padding removed. `flow_len` is the full payload length,
    /// padding included, which is what flow control charges.
    Data {
        stream_id: u32,
        data: Vec<u8>,
        end_stream: bool,
        flow_len: u32,
    },
    /// Header block fragment with padding and priority removed.
    Headers {
        stream_id: u32,
        fragment: Vec<u8>,
        end_stream: bool,
        end_headers: bool,
        priority: Option<Priority>,
    },
    Priority {
        stream_id: u32,
        priority: Priority,
    },
    RstStream {
        stream_id: u32,
        error_code: ErrorCode,
    },
    /// Raw `(id, value)` pairs in wire order. Apply them with
    /// [`Settings::apply`](crate::settings::Settings::apply).
    Settings {
        ack: bool,
        params: Vec<(u16, u32)>,
    },
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
        fragment: Vec<u8>,
        end_headers: bool,
    },
    Ping {
        ack: bool,
        payload: [u8; 8],
    },
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Vec<u8>,
    },
    /// A zero increment parses; rejecting it is the receiver's job.
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Continuation {
        stream_id: u32,
        fragment: Vec<u8>,
        end_headers: bool,
    },
    /// Unknown frame types are carried through and ignored (Section 4.1).
    Unknown {
        kind: u8,
        stream_id: u32,
    },
}

fn read_u32(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

/// Strip the PADDED prefix and trailer, if present.
fn strip_padding(payload: &[u8], flags: u8) -> Result<&[u8], H2Error> {
    if flags & FLAG_PADDED == 0 {
        return Ok(payload);
    }
    let (&pad_len, rest) = payload
        .split_first()
        .ok_or(H2Error::FrameSizeError)?;
    let pad_len = usize::from(pad_len);
    if pad_len > rest.len() {
        return Err(H2Error::ProtocolError("padding exceeds payload".into()));
    }
    Ok(&rest[..rest.len() - pad_len])
}

fn require_stream(stream_id: u32, what: &str) -> Result<(), H2Error> {
    if stream_id == 0 {
        return Err(H2Error::ProtocolError(format!("{what} on stream 0")));
    }
    Ok(())
}

fn require_connection(stream_id: u32, what: &str) -> Result<(), H2Error> {
    if stream_id != 0 {
        return Err(H2Error::ProtocolError(format!(
            "{what} on stream {stream_id}"
        )));
    }
    Ok(())
}

impl Frame {
    /// Parse a payload whose header has already been read and length-checked.
    pub fn parse(header: &FrameHeader, payload: Vec<u8>) -> Result<Self, H2Error> {
        let flags = header.flags;
        let stream_id = header.stream_id;
        let Some(kind) = header.frame_type() else {
            return Ok(Frame::Unknown {
                kind: header.kind,
                stream_id,
            });
        };

        let frame = match kind {
            FrameType::Data => {
                require_stream(stream_id, "DATA")?;
                Frame::Data {
                    stream_id,
                    data: strip_padding(&payload, flags)?.to_vec(),
                    end_stream: flags & FLAG_END_STREAM != 0,
                    flow_len: payload.len() as u32,
                }
            }
            FrameType::Headers => {
                require_stream(stream_id, "HEADERS")?;
                let data = strip_padding(&payload, flags)?;
                let (priority, fragment) = if flags & FLAG_PRIORITY != 0 {
                    if data.len() < 5 {
                        return Err(H2Error::FrameSizeError);
                    }
                    (Some(Priority::decode(data)), &data[5..])
                } else {
                    (None, data)
                };
                Frame::Headers {
                    stream_id,
                    fragment: fragment.to_vec(),
                    end_stream: flags & FLAG_END_STREAM != 0,
                    end_headers: flags & FLAG_END_HEADERS != 0,
                    priority,
                }
            }
            FrameType::Priority => {
                require_stream(stream_id, "PRIORITY")?;
                if payload.len() != 5 {
                    return Err(H2Error::FrameSizeError);
                }
                Frame::Priority {
                    stream_id,
                    priority: Priority::decode(&payload),
                }
            }
            FrameType::RstStream => {
                require_stream(stream_id, "RST_STREAM")?;
                if payload.len() != 4 {
                    return Err(H2Error::FrameSizeError);
                }
                Frame::RstStream {
                    stream_id,
                    error_code: ErrorCode::from_u32(read_u32(&payload)),
                }
            }
            FrameType::Settings => {
                require_connection(stream_id, "SETTINGS")?;
                let ack = flags & FLAG_ACK != 0;
                if ack && !payload.is_empty() {
                    return Err(H2Error::FrameSizeError);
                }
                Frame::Settings {
                    ack,
                    params: settings::decode_params(&payload)?,
                }
            }
            FrameType::PushPromise => {
                require_stream(stream_id, "PUSH_PROMISE")?;
                let data = strip_padding(&payload, flags)?;
                if data.len() < 4 {
                    return Err(H2Error::FrameSizeError);
                }
                Frame::PushPromise {
                    stream_id,
                    promised_stream_id: read_u32(data) & STREAM_ID_MASK,
                    fragment: data[4..].to_vec(),
                    end_headers: flags & FLAG_END_HEADERS != 0,
                }
            }
            FrameType::Ping => {
                require_connection(stream_id, "PING")?;
                let payload: [u8; 8] = payload
                    .as_slice()
                    .try_into()
                    .map_err(|_| H2Error::FrameSizeError)?;
                Frame::Ping {
                    ack: flags & FLAG_ACK != 0,
                    payload,
                }
            }
            FrameType::GoAway => {
                require_connection(stream_id, "GOAWAY")?;
                if payload.len() < 8 {
                    return Err(H2Error::FrameSizeError);
                }
                Frame::GoAway {
                    last_stream_id: read_u32(&payload) & STREAM_ID_MASK,
                    error_code: ErrorCode::from_u32(read_u32(&payload[4..])),
                    debug_data: payload[8..].to_vec(),
                }
            }
            FrameType::WindowUpdate => {
                if payload.len() != 4 {
                    return Err(H2Error::FrameSizeError);
                }
                Frame::WindowUpdate {
                    stream_id,
                    increment: read_u32(&payload) & STREAM_ID_MASK,
                }
            }
            FrameType::Continuation => {
                require_stream(stream_id, "CONTINUATION")?;
                Frame::Continuation {
                    stream_id,
                    fragment: payload,
                    end_headers: flags & FLAG_END_HEADERS != 0,
                }
            }
        };
        Ok(frame)
    }

    /// Append this frame (header + payload) to `buf`. Padding is never sent.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Frame::Data {
                stream_id,
                data,
                end_stream,
                ..
            } => {
                let flags = if *end_stream { FLAG_END_STREAM } else { 0 };
                FrameHeader::new(data.len() as u32, FrameType::Data, flags, *stream_id).encode(buf);
                buf.extend_from_slice(data);
            }
            Frame::Headers {
                stream_id,
                fragment,
                end_stream,
                end_headers,
                priority,
            } => {
                let mut flags = 0u8;
                if *end_stream {
                    flags |= FLAG_END_STREAM;
                }
                if *end_headers {
                    flags |= FLAG_END_HEADERS;
                }
                let mut len = fragment.len() as u32;
                if priority.is_some() {
                    flags |= FLAG_PRIORITY;
                    len += 5;
                }
                FrameHeader::new(len, FrameType::Headers, flags, *stream_id).encode(buf);
                if let Some(p) = priority {
                    p.encode(buf);
                }
                buf.extend_from_slice(fragment);
            }
            Frame::Priority {
                stream_id,
                priority,
            } => {
                FrameHeader::new(5, FrameType::Priority, 0, *stream_id).encode(buf);
                priority.encode(buf);
            }
            Frame::RstStream {
                stream_id,
                error_code,
            } => {
                FrameHeader::new(4, FrameType::RstStream, 0, *stream_id).encode(buf);
                buf.extend_from_slice(&(*error_code as u32).to_be_bytes());
            }
            Frame::Settings { ack, params } => {
                let flags = if *ack { FLAG_ACK } else { 0 };
                let len = (params.len() * settings::PARAM_LEN) as u32;
                FrameHeader::new(len, FrameType::Settings, flags, 0).encode(buf);
                settings::encode_params(params, buf);
            }
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
                fragment,
                end_headers,
            } => {
                let flags = if *end_headers { FLAG_END_HEADERS } else { 0 };
                let len = 4 + fragment.len() as u32;
                FrameHeader::new(len, FrameType::PushPromise, flags, *stream_id).encode(buf);
                buf.extend_from_slice(&(promised_stream_id & STREAM_ID_MASK).to_be_bytes());
                buf.extend_from_slice(fragment);
            }
            Frame::Ping { ack, payload } => {
                let flags = if *ack { FLAG_ACK } else { 0 };
                FrameHeader::new(8, FrameType::Ping, flags, 0).encode(buf);
                buf.extend_from_slice(payload);
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                let len = 8 + debug_data.len() as u32;
                FrameHeader::new(len, FrameType::GoAway, 0, 0).encode(buf);
                buf.extend_from_slice(&(last_stream_id & STREAM_ID_MASK).to_be_bytes());
                buf.extend_from_slice(&(*error_code as u32).to_be_bytes());
                buf.extend_from_slice(debug_data);
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                FrameHeader::new(4, FrameType::WindowUpdate, 0, *stream_id).encode(buf);
                buf.extend_from_slice(&(increment & STREAM_ID_MASK).to_be_bytes());
            }
            Frame::Continuation {
                stream_id,
                fragment,
                end_headers,
            } => {
                let flags = if *end_headers { FLAG_END_HEADERS } else { 0 };
                FrameHeader::new(fragment.len() as u32, FrameType::Continuation, flags, *stream_id)
                    .encode(buf);
                buf.extend_from_slice(fragment);
            }
            // Nothing to say for a type we do not understand.
            Frame::Unknown { .. } => {}
        }
    }
}

/// Split an encoded header block into one HEADERS frame followed by as many
/// CONTINUATION frames as `max_frame_size` requires. END_HEADERS is set on the
/// last fragment only. Returns the number of frames written.
pub fn encode_header_block(
    buf: &mut Vec<u8>,
    stream_id: u32,
    block: &[u8],
    end_stream: bool,
    max_frame_size: usize,
) -> usize {
    let max = max_frame_size.max(1);
    let mut chunks = block.chunks(max);
    let first = chunks.next().unwrap_or(&[]);
    let mut rest = chunks.peekable();
    Frame::Headers {
        stream_id,
        fragment: first.to_vec(),
        end_stream,
        end_headers: rest.peek().is_none(),
        priority: None,
    }
    .encode(buf);
    let mut frames = 1;
    while let Some(chunk) = rest.next() {
        Frame::Continuation {
            stream_id,
            fragment: chunk.to_vec(),
            end_headers: rest.peek().is_none(),
        }
        .encode(buf);
        frames += 1;
    }
    frames
}
