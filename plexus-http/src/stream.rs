//! Per-request stream state.
//!
//! A [`Stream`] is shared between the task sending the request and the
//! connection's reader. The reader accumulates the response into it; either
//! side may resolve its completion slot, and only the first resolution wins.

use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use plexus_h2::{ErrorCode, HeaderField, Window};
use tokio::sync::oneshot;

use crate::error::HttpError;
use crate::events::{EventSink, RequestEvent};
use crate::response::{Response, latin1};

pub(crate) type Completion = oneshot::Receiver<Result<Response, HttpError>>;

/// Stream states (RFC 7540 Section 5.1), client side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// What a decoded header block meant for the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeaderOutcome {
    /// 1xx response, discarded.
    Informational(u16),
    /// The final response headers.
    Final(u16),
    /// Trailers after the final headers, discarded.
    Trailers,
}

struct Inner {
    state: StreamState,
    /// Header block being assembled from HEADERS + CONTINUATION.
    header_block: Vec<u8>,
    status: Option<u16>,
    headers: Vec<(String, String)>,
    body: BytesMut,
}

pub(crate) struct Stream {
    id: u32,
    started: Instant,
    pub(crate) send_window: Window,
    pub(crate) recv_window: Window,
    inner: Mutex<Inner>,
    completion: Mutex<Option<oneshot::Sender<Result<Response, HttpError>>>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl Stream {
    pub(crate) fn new(
        id: u32,
        send_window: u32,
        recv_window: u32,
        sink: Option<Arc<dyn EventSink>>,
    ) -> (Arc<Self>, Completion) {
        let (tx, rx) = oneshot::channel();
        let stream = Arc::new(Self {
            id,
            started: Instant::now(),
            send_window: Window::new(send_window),
            recv_window: Window::new(recv_window),
            inner: Mutex::new(Inner {
                state: StreamState::Idle,
                header_block: Vec::new(),
                status: None,
                headers: Vec::new(),
                body: BytesMut::new(),
            }),
            completion: Mutex::new(Some(tx)),
            sink,
        });
        (stream, rx)
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn state(&self) -> StreamState {
        self.inner.lock().state
    }

    /// Whether the completion slot has been resolved.
    pub(crate) fn is_complete(&self) -> bool {
        self.completion.lock().is_none()
    }

    pub(crate) fn emit(&self, event: RequestEvent) {
        if let Some(sink) = &self.sink {
            sink.record(&event);
        }
    }

    /// HEADERS written. Without END_STREAM the stream opens for a body.
    pub(crate) fn headers_sent(&self, end_stream: bool) {
        let mut inner = self.inner.lock();
        if inner.state == StreamState::Idle {
            inner.state = if end_stream {
                StreamState::HalfClosedLocal
            } else {
                StreamState::Open
            };
        }
    }

    /// Final DATA frame (END_STREAM) written.
    pub(crate) fn body_sent(&self) {
        let mut inner = self.inner.lock();
        inner.state = match inner.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
    }

    /// Append a header block fragment.
    pub(crate) fn push_fragment(&self, fragment: &[u8]) {
        self.inner.lock().header_block.extend_from_slice(fragment);
    }

    /// Take the assembled header block, leaving the accumulator empty.
    pub(crate) fn take_header_block(&self) -> Vec<u8> {
        std::mem::take(&mut self.inner.lock().header_block)
    }

    /// Interpret a decoded header block.
    pub(crate) fn apply_headers(&self, fields: Vec<HeaderField>) -> Result<HeaderOutcome, HttpError> {
        let mut inner = self.inner.lock();
        if inner.status.is_some() {
            return Ok(HeaderOutcome::Trailers);
        }

        let mut status = None;
        let mut headers = Vec::with_capacity(fields.len());
        for field in fields {
            if field.name == b":status" {
                let text = std::str::from_utf8(&field.value).unwrap_or_default();
                status = Some(text.parse::<u16>().map_err(|_| {
                    HttpError::Protocol(format!("invalid :status {:?}", latin1(&field.value)))
                })?);
            } else if !field.name.starts_with(b":") {
                headers.push((latin1(&field.name), latin1(&field.value)));
            }
        }

        let status = status.ok_or_else(|| HttpError::Protocol("missing :status".into()))?;
        if (100..200).contains(&status) {
            return Ok(HeaderOutcome::Informational(status));
        }
        inner.status = Some(status);
        inner.headers = headers;
        drop(inner);

        self.emit(RequestEvent::ResponseHeaders {
            stream_id: self.id,
            status,
        });
        Ok(HeaderOutcome::Final(status))
    }

    /// Append response body bytes.
    pub(crate) fn push_data(&self, data: &[u8]) -> Result<(), HttpError> {
        let mut inner = self.inner.lock();
        if inner.status.is_none() {
            return Err(HttpError::Protocol("DATA before response headers".into()));
        }
        inner.body.extend_from_slice(data);
        Ok(())
    }

    /// The peer set END_STREAM. Resolves the completion with the response.
    pub(crate) fn remote_closed(&self) {
        let mut inner = self.inner.lock();
        inner.state = match inner.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            _ => StreamState::Closed,
        };
        let Some(status) = inner.status else {
            drop(inner);
            self.fail(HttpError::Protocol(
                "stream ended before response headers".into(),
            ));
            return;
        };
        let headers = std::mem::take(&mut inner.headers);
        let body: Bytes = std::mem::take(&mut inner.body).freeze();
        drop(inner);

        let elapsed = self.started.elapsed();
        let body_len = body.len();
        if self.resolve(Ok(Response::new(status, headers, body, elapsed))) {
            self.emit(RequestEvent::Completed {
                stream_id: self.id,
                status,
                body_len,
                elapsed,
            });
        }
    }

    /// Resolve the completion with `err` and close the stream. Returns
    /// `false` if the stream was already resolved.
    pub(crate) fn fail(&self, err: HttpError) -> bool {
        self.inner.lock().state = StreamState::Closed;
        let reset_code = match &err {
            HttpError::StreamReset { code } => Some(*code),
            HttpError::Cancelled => Some(ErrorCode::Cancel),
            _ => None,
        };
        let reason = err.to_string();
        if !self.resolve(Err(err)) {
            return false;
        }
        self.emit(RequestEvent::Failed {
            stream_id: self.id,
            reset_code,
            reason,
        });
        true
    }

    /// First caller wins; later calls are no-ops.
    fn resolve(&self, result: Result<Response, HttpError>) -> bool {
        let Some(tx) = self.completion.lock().take() else {
            return false;
        };
        // The receiver may have gone away (caller dropped the future).
        let _ = tx.send(result);
        true
    }
}
