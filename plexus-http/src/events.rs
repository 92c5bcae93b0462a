//! Per-request diagnostics.
//!
//! A request may carry an [`EventSink`]; the connection calls it at each
//! milestone of that request's stream. Sinks are invoked inline from the
//! sending task or the connection's reader, so they must not block.

use std::time::Duration;

use plexus_h2::ErrorCode;

/// Milestones of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestEvent {
    /// A stream id was allocated.
    StreamOpened { stream_id: u32 },
    /// The header block was written, split over `frames` frames.
    HeadersSent { stream_id: u32, frames: usize },
    /// The full body was written.
    BodySent { stream_id: u32, bytes: usize },
    /// The sender ran out of flow-control credit and is waiting.
    FlowControlBlocked {
        stream_id: u32,
        stream_window: i64,
        connection_window: i64,
    },
    /// The final response header block was decoded.
    ResponseHeaders { stream_id: u32, status: u16 },
    /// The response finished.
    Completed {
        stream_id: u32,
        status: u16,
        body_len: usize,
        elapsed: Duration,
    },
    /// The request failed or was cancelled.
    Failed {
        stream_id: u32,
        reset_code: Option<ErrorCode>,
        reason: String,
    },
}

/// Receives [`RequestEvent`]s.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &RequestEvent);
}

/// Forwards every event to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &RequestEvent) {
        tracing::debug!(?event, "request event");
    }
}
