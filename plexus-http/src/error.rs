use std::io;
use std::sync::Arc;

use plexus_h2::{ErrorCode, H2Error, HpackError};

/// Errors produced by the HTTP/2 client engine.
///
/// `Clone` because one connection-fatal error is delivered to every stream
/// still waiting on that connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HttpError {
    /// Malformed or out-of-place frame. Connection-fatal.
    #[error("frame error: {0}")]
    Frame(H2Error),

    /// HPACK state could not be maintained. Connection-fatal.
    #[error("compression error: {0}")]
    Compression(#[from] HpackError),

    /// Zero window increment, window overflow, or receive window overrun.
    /// Connection-fatal.
    #[error("flow control error")]
    FlowControl,

    /// The peer reset this stream.
    #[error("stream reset by peer: {code:?}")]
    StreamReset { code: ErrorCode },

    /// The request was cancelled locally, or the peer reset it with CANCEL.
    #[error("request cancelled")]
    Cancelled,

    /// The underlying byte stream failed.
    #[error("io error: {0}")]
    Io(Arc<io::Error>),

    /// The connection is gone, or was shut down while the request was pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer's GOAWAY excluded this stream; it was never processed and may
    /// be retried on a new connection.
    #[error("stream {stream_id} refused by GOAWAY (last stream {last_stream_id})")]
    Refused { stream_id: u32, last_stream_id: u32 },

    /// The peer did not acknowledge our SETTINGS in time.
    #[error("settings handshake timed out")]
    HandshakeTimeout,

    /// The request URL cannot be sent as an HTTP/2 request.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Response-level protocol violation (e.g. a missing `:status`).
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl HttpError {
    /// Whether this error ends the whole connection rather than one stream.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::Frame(_)
                | Self::Compression(_)
                | Self::FlowControl
                | Self::Io(_)
                | Self::ConnectionClosed
                | Self::HandshakeTimeout
        )
    }

    /// Code to send in GOAWAY when this error tears the connection down.
    pub(crate) fn goaway_code(&self) -> ErrorCode {
        match self {
            Self::Frame(e) => e.code(),
            Self::Compression(_) => ErrorCode::CompressionError,
            Self::FlowControl => ErrorCode::FlowControlError,
            Self::Protocol(_) => ErrorCode::ProtocolError,
            _ => ErrorCode::InternalError,
        }
    }

    /// Map a peer's RST_STREAM code to the error reported for that stream.
    pub(crate) fn from_reset(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Cancel => Self::Cancelled,
            code => Self::StreamReset { code },
        }
    }
}

impl From<H2Error> for HttpError {
    fn from(e: H2Error) -> Self {
        match e {
            H2Error::CompressionError(e) => Self::Compression(e),
            H2Error::FlowControlError => Self::FlowControl,
            e => Self::Frame(e),
        }
    }
}

impl From<io::Error> for HttpError {
    fn from(e: io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_errors_classified() {
        assert!(matches!(
            HttpError::from(H2Error::FlowControlError),
            HttpError::FlowControl
        ));
        assert!(matches!(
            HttpError::from(H2Error::CompressionError(HpackError::HuffmanEos)),
            HttpError::Compression(HpackError::HuffmanEos)
        ));
        let frame = HttpError::from(H2Error::FrameSizeError);
        assert!(frame.is_connection_fatal());
        assert_eq!(frame.goaway_code(), ErrorCode::FrameSizeError);
    }

    #[test]
    fn stream_errors_are_isolated() {
        assert!(!HttpError::from_reset(ErrorCode::InternalError).is_connection_fatal());
        assert!(matches!(
            HttpError::from_reset(ErrorCode::Cancel),
            HttpError::Cancelled
        ));
        assert!(
            !HttpError::Refused {
                stream_id: 3,
                last_stream_id: 1
            }
            .is_connection_fatal()
        );
    }
}
