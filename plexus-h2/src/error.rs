/// HTTP/2 error codes (RFC 7540 Section 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    /// Map a wire value to a known code. Unknown codes are treated as
    /// INTERNAL_ERROR (RFC 7540 Section 7).
    pub fn from_u32(v: u32) -> Self {
        match v {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            _ => Self::InternalError,
        }
    }
}

/// Why a header block could not be decoded (or encoded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HpackError {
    /// Index 0, or an index past the end of the static + dynamic tables.
    InvalidIndex(usize),
    /// A prefix integer ran past the end of the block.
    TruncatedInteger,
    /// A prefix integer needed more than four continuation bytes.
    IntegerOverflow,
    /// A string literal's declared length runs past the end of the block.
    TruncatedString,
    /// A dynamic table size update asked for more than the advertised ceiling.
    TableSizeExceeded { requested: usize, ceiling: usize },
    /// Huffman input decoded to the end-of-string symbol.
    HuffmanEos,
    /// Huffman input followed a bit sequence with no code.
    HuffmanInvalidCode,
    /// Huffman padding was longer than 7 bits or not all ones.
    HuffmanPadding,
}

impl std::fmt::Display for HpackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIndex(i) => write!(f, "invalid table index {i}"),
            Self::TruncatedInteger => write!(f, "truncated integer"),
            Self::IntegerOverflow => write!(f, "integer overflow"),
            Self::TruncatedString => write!(f, "truncated string literal"),
            Self::TableSizeExceeded { requested, ceiling } => {
                write!(f, "table size update {requested} exceeds ceiling {ceiling}")
            }
            Self::HuffmanEos => write!(f, "huffman string contains EOS"),
            Self::HuffmanInvalidCode => write!(f, "invalid huffman code"),
            Self::HuffmanPadding => write!(f, "invalid huffman padding"),
        }
    }
}

impl std::error::Error for HpackError {}

/// Errors produced by the HTTP/2 framing layer.
///
/// Every variant is connection-fatal: the caller tears the connection down
/// with a GOAWAY carrying [`H2Error::code`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum H2Error {
    /// Frame length exceeds the maximum, or a fixed-size frame has the wrong size.
    FrameSizeError,
    /// Received a frame that violates the protocol.
    ProtocolError(String),
    /// HPACK header compression/decompression error.
    CompressionError(HpackError),
    /// Flow control violation.
    FlowControlError,
}

impl H2Error {
    /// The error code to put on the wire when this error closes the connection.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::FrameSizeError => ErrorCode::FrameSizeError,
            Self::ProtocolError(_) => ErrorCode::ProtocolError,
            Self::CompressionError(_) => ErrorCode::CompressionError,
            Self::FlowControlError => ErrorCode::FlowControlError,
        }
    }
}

impl From<HpackError> for H2Error {
    fn from(e: HpackError) -> Self {
        Self::CompressionError(e)
    }
}

impl std::fmt::Display for H2Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FrameSizeError => write!(f, "frame size error"),
            Self::ProtocolError(s) => write!(f, "protocol error: {s}"),
            Self::CompressionError(e) => write!(f, "HPACK compression error: {e}"),
            Self::FlowControlError => write!(f, "flow control error"),
        }
    }
}

impl std::error::Error for H2Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CompressionError(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_code_maps_to_internal() {
        assert_eq!(ErrorCode::from_u32(0x8), ErrorCode::Cancel);
        assert_eq!(ErrorCode::from_u32(0xff), ErrorCode::InternalError);
    }

    #[test]
    fn goaway_code_per_error_class() {
        assert_eq!(H2Error::FrameSizeError.code(), ErrorCode::FrameSizeError);
        assert_eq!(
            H2Error::from(HpackError::InvalidIndex(0)).code(),
            ErrorCode::CompressionError
        );
        assert_eq!(H2Error::FlowControlError.code(), ErrorCode::FlowControlError);
    }
}
