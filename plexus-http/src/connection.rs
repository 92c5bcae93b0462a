//! One multiplexed HTTP/2 connection.
//!
//! A [`Connection`] owns a background reader task that decodes every inbound
//! frame and dispatches it to the addressed stream. Request senders share the
//! write half behind an async mutex; each lock acquisition writes a complete
//! batch of frames (a HEADERS + CONTINUATION run, one DATA frame, or one
//! control frame) so frames from different streams never interleave mid-run.
//! The lock is never held while waiting for flow-control credit.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use plexus_h2::flowcontrol::DEFAULT_WINDOW_SIZE;
use plexus_h2::frame::{self, CONNECTION_PREFACE, FRAME_HEADER_LEN};
use plexus_h2::table::DEFAULT_TABLE_SIZE;
use plexus_h2::{
    Decoder, Encoder, ErrorCode, Frame, FrameHeader, FrameType, H2Error, HeaderField, Settings,
    Window,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::futures::Notified;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace, warn};

use crate::config::ConnectionConfig;
use crate::error::HttpError;
use crate::events::RequestEvent;
use crate::request::Request;
use crate::response::Response;
use crate::stream::{Completion, Stream, StreamState};

/// Largest client stream id (31 bits, odd).
const MAX_STREAM_ID: u32 = 0x7fff_ffff;

/// Connection-specific headers that have no meaning in HTTP/2
/// (RFC 7540 Section 8.1.2.2), plus `host`, which `:authority` replaces.
const STRIPPED_HEADERS: [&str; 6] = [
    "connection",
    "transfer-encoding",
    "keep-alive",
    "proxy-connection",
    "upgrade",
    "host",
];

struct Writer {
    io: Box<dyn AsyncWrite + Send + Unpin>,
    encoder: Encoder,
    buf: Vec<u8>,
    /// Set while a write is in progress. Still set on entry means the last
    /// writer was dropped mid-frame and the byte stream is unusable.
    dirty: bool,
}

impl Writer {
    async fn flush(&mut self) -> io::Result<()> {
        if self.dirty {
            self.buf.clear();
            return Err(io::Error::other("previous frame write was interrupted"));
        }
        self.dirty = true;
        let result = self.io.write_all(&self.buf).await;
        self.buf.clear();
        result?;
        self.io.flush().await?;
        self.dirty = false;
        Ok(())
    }
}

struct Shared {
    host: String,
    port: u16,
    config: ConnectionConfig,
    remote: RwLock<Settings>,
    streams: DashMap<u32, Arc<Stream>>,
    next_stream_id: AtomicU32,
    send_window: Window,
    recv_window: Window,
    /// Connection-level receive window we keep topping up to.
    recv_target: u32,
    alive: AtomicBool,
    closing: AtomicBool,
    /// Last stream id from the peer's GOAWAY, if one arrived.
    goaway_last: Mutex<Option<u32>>,
    /// The error that ended the connection.
    fatal: Mutex<Option<HttpError>>,
    writer: tokio::sync::Mutex<Writer>,
    settings_ack: Mutex<Option<oneshot::Sender<()>>>,
    /// Signalled whenever credit, concurrency, or liveness changes.
    changed: Notify,
    shutdown: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn new(
        host: String,
        port: u16,
        config: ConnectionConfig,
        io: Box<dyn AsyncWrite + Send + Unpin>,
        settings_ack: oneshot::Sender<()>,
    ) -> Self {
        let recv_target = config.settings.initial_window_size.max(DEFAULT_WINDOW_SIZE);
        let buf_len = FRAME_HEADER_LEN + config.settings.max_frame_size as usize;
        Self {
            host,
            port,
            remote: RwLock::new(Settings::default()),
            streams: DashMap::new(),
            next_stream_id: AtomicU32::new(1),
            send_window: Window::new(DEFAULT_WINDOW_SIZE),
            recv_window: Window::new(recv_target),
            recv_target,
            alive: AtomicBool::new(true),
            closing: AtomicBool::new(false),
            goaway_last: Mutex::new(None),
            fatal: Mutex::new(None),
            writer: tokio::sync::Mutex::new(Writer {
                io,
                encoder: Encoder::new(DEFAULT_TABLE_SIZE),
                buf: Vec::with_capacity(buf_len),
                dirty: false,
            }),
            settings_ack: Mutex::new(Some(settings_ack)),
            changed: Notify::new(),
            shutdown: CancellationToken::new(),
            reader: Mutex::new(None),
            config,
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn stream(&self, id: u32) -> Option<Arc<Stream>> {
        self.streams.get(&id).map(|s| Arc::clone(s.value()))
    }

    /// Add a new stream to the active set.
    ///
    /// A sweep by [`Shared::fail_all`] or a GOAWAY may run between the
    /// caller's liveness check and the insert. Liveness is re-read after the
    /// insert, so either the sweep saw the stream or this call fails it.
    fn register(&self, stream: &Arc<Stream>) -> Result<(), HttpError> {
        let id = stream.id();
        self.streams.insert(id, Arc::clone(stream));
        if self.is_alive() {
            return Ok(());
        }
        self.streams.remove(&id);
        let err = match *self.goaway_last.lock() {
            Some(last_stream_id) if id > last_stream_id => HttpError::Refused {
                stream_id: id,
                last_stream_id,
            },
            _ => self.fatal_error(),
        };
        stream.fail(err.clone());
        self.changed.notify_waiters();
        Err(err)
    }

    /// Drop a stream from the active set and wake anyone waiting on capacity.
    fn finish(&self, id: u32) -> Option<Arc<Stream>> {
        let removed = self.streams.remove(&id).map(|(_, s)| s);
        self.changed.notify_waiters();
        removed
    }

    /// Write one batch of frames under the write lock.
    async fn send(&self, frames: &[Frame]) -> Result<(), HttpError> {
        let mut writer = self.writer.lock().await;
        for frame in frames {
            frame.encode(&mut writer.buf);
        }
        if let Err(e) = writer.flush().await {
            drop(writer);
            let err = HttpError::from(e);
            self.fail_all(err.clone());
            return Err(err);
        }
        Ok(())
    }

    /// Best-effort RST_STREAM from a context that must not wait on the socket.
    /// Skipped when no runtime is available, as in a drop during shutdown.
    fn spawn_reset(self: &Arc<Self>, stream_id: u32, error_code: ErrorCode) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let shared = Arc::clone(self);
        runtime.spawn(async move {
            let _ = shared
                .send(&[Frame::RstStream {
                    stream_id,
                    error_code,
                }])
                .await;
        });
    }

    /// Mark the connection dead and fail every outstanding stream with `err`.
    fn fail_all(&self, err: HttpError) {
        self.alive.store(false, Ordering::Release);
        self.fatal.lock().get_or_insert_with(|| err.clone());
        // Dropping the sender wakes a pending handshake.
        self.settings_ack.lock().take();

        let ids: Vec<u32> = self.streams.iter().map(|s| *s.key()).collect();
        for id in ids {
            if let Some((_, stream)) = self.streams.remove(&id) {
                stream.fail(err.clone());
            }
        }
        self.changed.notify_waiters();
    }

    fn fatal_error(&self) -> HttpError {
        self.fatal
            .lock()
            .clone()
            .unwrap_or(HttpError::ConnectionClosed)
    }
}

/// A live HTTP/2 connection to one origin. Cheap to clone; the reader task
/// stops once the last clone is dropped.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
    _reader_guard: Arc<DropGuard>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.shared.host)
            .field("port", &self.shared.port)
            .field("alive", &self.is_alive())
            .field("streams", &self.active_streams())
            .finish()
    }
}

impl Connection {
    /// Run the client side of the HTTP/2 handshake over `io`.
    ///
    /// `io` must already be an encrypted byte stream with ALPN resolved to
    /// `h2`. Writes the preface and our SETTINGS, starts the reader, and
    /// waits for the peer to acknowledge our SETTINGS.
    pub async fn handshake<T>(
        io: T,
        host: impl Into<String>,
        port: u16,
        config: ConnectionConfig,
    ) -> Result<Self, HttpError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (rd, wr) = tokio::io::split(io);
        let (ack_tx, ack_rx) = oneshot::channel();
        let shared = Arc::new(Shared::new(host.into(), port, config, Box::new(wr), ack_tx));
        let recv_target = shared.recv_target;

        let mut preface = vec![Frame::Settings {
            ack: false,
            params: shared.config.settings.to_params(),
        }];
        if recv_target > DEFAULT_WINDOW_SIZE {
            preface.push(Frame::WindowUpdate {
                stream_id: 0,
                increment: recv_target - DEFAULT_WINDOW_SIZE,
            });
        }
        {
            let mut writer = shared.writer.lock().await;
            writer.buf.extend_from_slice(CONNECTION_PREFACE);
            for frame in &preface {
                frame.encode(&mut writer.buf);
            }
            writer.flush().await?;
        }

        let reader = Reader::new(Arc::clone(&shared));
        let handle = tokio::spawn(reader.run(rd));
        *shared.reader.lock() = Some(handle);

        let conn = Self {
            _reader_guard: Arc::new(shared.shutdown.clone().drop_guard()),
            shared,
        };
        match tokio::time::timeout(conn.shared.config.settings_timeout, ack_rx).await {
            Ok(Ok(())) => {
                debug!(host = %conn.shared.host, port = conn.shared.port, "h2 handshake complete");
                Ok(conn)
            }
            Ok(Err(_)) => Err(conn.shared.fatal_error()),
            Err(_) => {
                warn!(host = %conn.shared.host, "settings ack timed out");
                conn.shared.shutdown.cancel();
                conn.shared.fail_all(HttpError::HandshakeTimeout);
                Err(HttpError::HandshakeTimeout)
            }
        }
    }

    pub fn host(&self) -> &str {
        &self.shared.host
    }

    pub fn port(&self) -> u16 {
        self.shared.port
    }

    /// Whether new requests may be sent. False once a GOAWAY arrived, the
    /// reader stopped, or [`Connection::close`] began.
    pub fn is_alive(&self) -> bool {
        self.shared.is_alive()
    }

    /// Number of streams awaiting a response.
    pub fn active_streams(&self) -> usize {
        self.shared.streams.len()
    }

    /// The peer's current SETTINGS.
    pub fn remote_settings(&self) -> Settings {
        self.shared.remote.read().clone()
    }

    /// Last stream id from the peer's GOAWAY.
    pub fn goaway_last_stream_id(&self) -> Option<u32> {
        *self.shared.goaway_last.lock()
    }

    /// Send a PING. The acknowledgement is not awaited.
    pub async fn ping(&self, payload: [u8; 8]) -> Result<(), HttpError> {
        if !self.is_alive() {
            return Err(HttpError::ConnectionClosed);
        }
        self.shared.send(&[Frame::Ping { ack: false, payload }]).await
    }

    /// Send `req` on a new stream and wait for the complete response.
    ///
    /// Cancelling the request's token resets the stream and returns
    /// [`HttpError::Cancelled`] without waiting for the peer.
    pub async fn send_request(&self, req: Request) -> Result<Response, HttpError> {
        let cancel = req.cancellation().clone();
        if cancel.is_cancelled() {
            return Err(HttpError::Cancelled);
        }
        let fields = request_fields(&req)?;
        let body = req.body_bytes().filter(|b| !b.is_empty()).cloned();

        // Writes are never abandoned halfway: cancellation is only observed
        // while waiting, and the stream is then reset from a separate task.
        // Dropping this future resets the stream through the guard.
        let (guard, completion) = self
            .open_stream(&req, &fields, body.is_none(), &cancel)
            .await?;
        let stream = &guard.stream;
        if let Some(body) = body {
            match self.send_body(stream, body, &cancel).await {
                Ok(()) => {}
                Err(HttpError::Cancelled) => return self.cancel_stream(stream),
                Err(err) => return Err(err),
            }
        }

        tokio::select! {
            biased;
            r = completion => r.unwrap_or_else(|_| Err(self.shared.fatal_error())),
            _ = cancel.cancelled() => self.cancel_stream(stream),
        }
    }

    fn cancel_stream(&self, stream: &Stream) -> Result<Response, HttpError> {
        if stream.fail(HttpError::Cancelled) {
            debug!(stream_id = stream.id(), "request cancelled");
            self.shared.finish(stream.id());
            self.shared.spawn_reset(stream.id(), ErrorCode::Cancel);
        }
        Err(HttpError::Cancelled)
    }

    /// Wait for concurrency headroom, then allocate a stream id and write
    /// the request headers.
    async fn open_stream(
        &self,
        req: &Request,
        fields: &[HeaderField],
        end_stream: bool,
        cancel: &CancellationToken,
    ) -> Result<(ResetOnDrop<'_>, Completion), HttpError> {
        let shared = &self.shared;
        loop {
            let notified = shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !shared.is_alive() {
                return Err(shared.fatal_error());
            }
            if self.at_capacity() {
                tokio::select! {
                    _ = notified => {}
                    _ = cancel.cancelled() => return Err(HttpError::Cancelled),
                }
                continue;
            }

            let mut writer = shared.writer.lock().await;
            if !shared.is_alive() {
                return Err(shared.fatal_error());
            }
            // Re-check under the lock: another sender may have taken the slot.
            if self.at_capacity() {
                drop(writer);
                continue;
            }

            // Ids are allocated under the write lock so they reach the wire in
            // increasing order, as the peer requires.
            let id = shared.next_stream_id.fetch_add(2, Ordering::AcqRel);
            if id > MAX_STREAM_ID {
                shared.alive.store(false, Ordering::Release);
                return Err(HttpError::ConnectionClosed);
            }

            let (send_initial, max_frame) = {
                let remote = shared.remote.read();
                (remote.initial_window_size, remote.max_frame_size)
            };
            let (stream, completion) = Stream::new(
                id,
                send_initial,
                shared.config.settings.initial_window_size,
                req.sink().cloned(),
            );
            shared.register(&stream)?;
            let guard = ResetOnDrop {
                conn: self,
                stream,
            };
            let stream = &guard.stream;
            stream.emit(RequestEvent::StreamOpened { stream_id: id });

            let mut block = Vec::new();
            writer.encoder.encode(fields, &mut block);
            let frames = frame::encode_header_block(
                &mut writer.buf,
                id,
                &block,
                end_stream,
                max_frame as usize,
            );
            trace!(stream_id = id, frames, block_len = block.len(), "send headers");

            if let Err(e) = writer.flush().await {
                drop(writer);
                let err = HttpError::from(e);
                shared.fail_all(err.clone());
                return Err(err);
            }
            drop(writer);

            stream.headers_sent(end_stream);
            stream.emit(RequestEvent::HeadersSent {
                stream_id: id,
                frames,
            });
            return Ok((guard, completion));
        }
    }

    fn at_capacity(&self) -> bool {
        match self.shared.remote.read().max_concurrent_streams {
            Some(max) => self.shared.streams.len() >= max as usize,
            None => false,
        }
    }

    /// Write `body` as DATA frames within both flow-control windows.
    async fn send_body(
        &self,
        stream: &Stream,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> Result<(), HttpError> {
        let shared = &self.shared;
        let id = stream.id();
        let mut offset = 0;

        while offset < body.len() {
            let notified = shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if cancel.is_cancelled() {
                return Err(HttpError::Cancelled);
            }
            if stream.is_complete() {
                // The peer answered (or the stream failed) before the body was
                // done. Stop sending; the completion carries the outcome.
                if stream.state() == StreamState::HalfClosedRemote {
                    shared.spawn_reset(id, ErrorCode::NoError);
                }
                return Ok(());
            }

            let max_frame = shared.remote.read().max_frame_size as usize;
            let want = (body.len() - offset).min(max_frame) as u32;
            let granted = stream.send_window.reserve(want);
            if granted == 0 {
                self.blocked(stream, notified, cancel).await;
                continue;
            }
            let credit = shared.send_window.reserve(granted);
            if credit < granted {
                stream.send_window.release(granted - credit);
            }
            if credit == 0 {
                self.blocked(stream, notified, cancel).await;
                continue;
            }

            let end = offset + credit as usize;
            let end_stream = end == body.len();
            shared
                .send(&[Frame::Data {
                    stream_id: id,
                    data: body[offset..end].to_vec(),
                    end_stream,
                    flow_len: credit,
                }])
                .await?;
            offset = end;
        }

        stream.body_sent();
        stream.emit(RequestEvent::BodySent {
            stream_id: id,
            bytes: body.len(),
        });
        Ok(())
    }

    async fn blocked(
        &self,
        stream: &Stream,
        notified: Pin<&mut Notified<'_>>,
        cancel: &CancellationToken,
    ) {
        stream.emit(RequestEvent::FlowControlBlocked {
            stream_id: stream.id(),
            stream_window: stream.send_window.get(),
            connection_window: self.shared.send_window.get(),
        });
        trace!(stream_id = stream.id(), "flow control blocked");
        tokio::select! {
            _ = notified => {}
            _ = cancel.cancelled() => {}
            _ = self.shared.shutdown.cancelled() => {}
        }
    }

    /// Shut the connection down.
    ///
    /// Stops accepting requests, waits up to the configured shutdown timeout
    /// for in-flight streams, sends GOAWAY, stops the reader, and fails
    /// anything still outstanding with [`HttpError::ConnectionClosed`].
    pub async fn close(&self) {
        let shared = &self.shared;
        if shared.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        shared.alive.store(false, Ordering::Release);
        debug!(host = %shared.host, streams = shared.streams.len(), "closing connection");

        let drain = async {
            loop {
                let notified = shared.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if shared.streams.is_empty() || shared.shutdown.is_cancelled() {
                    break;
                }
                tokio::select! {
                    _ = notified => {}
                    _ = shared.shutdown.cancelled() => {}
                }
            }
        };
        let _ = tokio::time::timeout(shared.config.shutdown_timeout, drain).await;

        // We never accept pushed streams, so the last peer-initiated id is 0.
        let goaway = Frame::GoAway {
            last_stream_id: 0,
            error_code: ErrorCode::NoError,
            debug_data: Vec::new(),
        };
        let _ = tokio::time::timeout(shared.config.shutdown_timeout, shared.send(&[goaway])).await;

        shared.shutdown.cancel();
        let reader = shared.reader.lock().take();
        if let Some(handle) = reader {
            let _ = handle.await;
        }
        shared.fail_all(HttpError::ConnectionClosed);

        let _ = tokio::time::timeout(shared.config.shutdown_timeout, async {
            let mut writer = shared.writer.lock().await;
            let _ = writer.io.shutdown().await;
        })
        .await;
    }
}

/// Cancels a registered stream when the request future is dropped before
/// the stream resolves.
struct ResetOnDrop<'a> {
    conn: &'a Connection,
    stream: Arc<Stream>,
}

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        if !self.stream.is_complete() {
            let _ = self.conn.cancel_stream(&self.stream);
        }
    }
}

/// Pseudo-headers first, then the caller's headers lower-cased with
/// connection-specific ones removed.
fn request_fields(req: &Request) -> Result<Vec<HeaderField>, HttpError> {
    let mut fields = vec![
        HeaderField::new(":method", req.method()),
        HeaderField::new(":scheme", req.scheme()),
        HeaderField::new(":authority", req.authority()?),
        HeaderField::new(":path", req.path()),
    ];
    for (name, value) in req.headers() {
        let name = name.to_ascii_lowercase();
        if STRIPPED_HEADERS.contains(&name.as_str()) {
            continue;
        }
        fields.push(HeaderField::new(name, value.as_str()));
    }
    Ok(fields)
}

/// Where the fragments of an open header block go.
enum BlockTarget {
    Stream(Arc<Stream>),
    /// Unknown stream or PUSH_PROMISE: decoded only to keep HPACK in sync.
    Discard,
}

struct OpenBlock {
    stream_id: u32,
    end_stream: bool,
    target: BlockTarget,
}

/// The connection's single reader.
struct Reader {
    shared: Arc<Shared>,
    decoder: Decoder,
    /// Set while a header block awaits CONTINUATION frames.
    open_block: Option<OpenBlock>,
    discard_buf: Vec<u8>,
}

impl Reader {
    fn new(shared: Arc<Shared>) -> Self {
        let table_size = shared.config.settings.header_table_size as usize;
        Self {
            shared,
            decoder: Decoder::new(table_size),
            open_block: None,
            discard_buf: Vec::new(),
        }
    }

    async fn run<R>(mut self, mut rd: ReadHalf<R>)
    where
        R: AsyncRead + Send + Unpin,
    {
        let shared = Arc::clone(&self.shared);
        let result = tokio::select! {
            r = self.read_loop(&mut rd) => r,
            _ = shared.shutdown.cancelled() => Ok(()),
        };
        match result {
            Ok(()) => {
                debug!(host = %shared.host, "reader stopped");
                shared.fail_all(HttpError::ConnectionClosed);
            }
            Err(err) => {
                warn!(host = %shared.host, error = %err, "connection failed");
                if !matches!(err, HttpError::Io(_)) {
                    let goaway = Frame::GoAway {
                        last_stream_id: 0,
                        error_code: err.goaway_code(),
                        debug_data: err.to_string().into_bytes(),
                    };
                    let limit = shared.config.shutdown_timeout;
                    let _ = tokio::time::timeout(limit, shared.send(&[goaway])).await;
                }
                shared.fail_all(err);
            }
        }
    }

    async fn read_loop<R>(&mut self, rd: &mut ReadHalf<R>) -> Result<(), HttpError>
    where
        R: AsyncRead + Send + Unpin,
    {
        let max_frame = self.shared.config.settings.max_frame_size;
        loop {
            let mut head = [0u8; FRAME_HEADER_LEN];
            match rd.read_exact(&mut head).await {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e.into()),
            }
            let header = FrameHeader::decode(&head);
            header.check_length(max_frame)?;

            // A header block must be finished before anything else arrives.
            let is_continuation = header.frame_type() == Some(FrameType::Continuation);
            match &self.open_block {
                Some(open) if !is_continuation || header.stream_id != open.stream_id => {
                    return Err(protocol("expected CONTINUATION"));
                }
                None if is_continuation => return Err(protocol("unexpected CONTINUATION")),
                _ => {}
            }

            let mut payload = vec![0u8; header.length as usize];
            rd.read_exact(&mut payload).await?;
            trace!(
                kind = header.kind,
                flags = header.flags,
                stream_id = header.stream_id,
                len = header.length,
                "recv frame"
            );
            let frame = Frame::parse(&header, payload)?;
            self.dispatch(frame).await?;
        }
    }

    async fn dispatch(&mut self, frame: Frame) -> Result<(), HttpError> {
        match frame {
            Frame::Data {
                stream_id,
                data,
                end_stream,
                flow_len,
            } => self.on_data(stream_id, &data, end_stream, flow_len).await,
            Frame::Headers {
                stream_id,
                fragment,
                end_stream,
                end_headers,
                ..
            } => {
                let target = match self.shared.stream(stream_id) {
                    Some(stream) => BlockTarget::Stream(stream),
                    None => BlockTarget::Discard,
                };
                self.open_block = Some(OpenBlock {
                    stream_id,
                    end_stream,
                    target,
                });
                self.on_fragment(&fragment, end_headers).await
            }
            Frame::Continuation {
                fragment,
                end_headers,
                ..
            } => self.on_fragment(&fragment, end_headers).await,
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
                fragment,
                end_headers,
            } => {
                warn!(stream_id, promised_stream_id, "refusing server push");
                self.shared
                    .send(&[Frame::RstStream {
                        stream_id: promised_stream_id,
                        error_code: ErrorCode::RefusedStream,
                    }])
                    .await?;
                self.open_block = Some(OpenBlock {
                    stream_id,
                    end_stream: false,
                    target: BlockTarget::Discard,
                });
                self.on_fragment(&fragment, end_headers).await
            }
            Frame::Settings { ack: true, .. } => {
                if let Some(tx) = self.shared.settings_ack.lock().take() {
                    let _ = tx.send(());
                }
                Ok(())
            }
            Frame::Settings { ack: false, params } => self.on_settings(&params).await,
            Frame::Ping { ack: false, payload } => {
                self.shared.send(&[Frame::Ping { ack: true, payload }]).await
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                self.on_goaway(last_stream_id, error_code, &debug_data);
                Ok(())
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => self.on_window_update(stream_id, increment),
            Frame::RstStream {
                stream_id,
                error_code,
            } => {
                if let Some(stream) = self.shared.finish(stream_id) {
                    debug!(stream_id, ?error_code, "stream reset by peer");
                    stream.fail(HttpError::from_reset(error_code));
                }
                Ok(())
            }
            Frame::Ping { ack: true, .. } | Frame::Priority { .. } | Frame::Unknown { .. } => {
                Ok(())
            }
        }
    }

    async fn on_data(
        &mut self,
        stream_id: u32,
        data: &[u8],
        end_stream: bool,
        flow_len: u32,
    ) -> Result<(), HttpError> {
        let shared = &self.shared;
        shared.recv_window.consume(flow_len)?;
        let mut updates = Vec::new();
        if let Some(increment) = shared.recv_window.replenish(shared.recv_target) {
            updates.push(Frame::WindowUpdate {
                stream_id: 0,
                increment,
            });
        }

        // Closed or unknown stream: the connection window still pays.
        if let Some(stream) = shared.stream(stream_id) {
            stream.recv_window.consume(flow_len)?;
            if let Err(err) = stream.push_data(data) {
                shared.finish(stream_id);
                stream.fail(err);
                updates.push(Frame::RstStream {
                    stream_id,
                    error_code: ErrorCode::ProtocolError,
                });
            } else if end_stream {
                shared.finish(stream_id);
                stream.remote_closed();
            } else if let Some(increment) = stream
                .recv_window
                .replenish(shared.config.settings.initial_window_size)
            {
                updates.push(Frame::WindowUpdate {
                    stream_id,
                    increment,
                });
            }
        }

        if updates.is_empty() {
            return Ok(());
        }
        shared.send(&updates).await
    }

    async fn on_fragment(&mut self, fragment: &[u8], end_headers: bool) -> Result<(), HttpError> {
        let Some(open) = &self.open_block else {
            return Err(protocol("header fragment outside a header block"));
        };
        match &open.target {
            BlockTarget::Stream(stream) => stream.push_fragment(fragment),
            BlockTarget::Discard => self.discard_buf.extend_from_slice(fragment),
        }
        if !end_headers {
            return Ok(());
        }
        let Some(open) = self.open_block.take() else {
            return Ok(());
        };

        let stream = match open.target {
            BlockTarget::Discard => {
                let end = self.discard_buf.len();
                self.decoder.decode_range(&self.discard_buf, 0, end)?;
                self.discard_buf.clear();
                return Ok(());
            }
            BlockTarget::Stream(stream) => stream,
        };

        // Decoding must happen even if the stream is about to fail, so the
        // dynamic table stays in step with the peer's encoder.
        let fields = self.decoder.decode(&stream.take_header_block())?;
        let id = open.stream_id;
        match stream.apply_headers(fields) {
            Ok(outcome) => {
                trace!(stream_id = id, ?outcome, "response headers");
                if open.end_stream {
                    self.shared.finish(id);
                    stream.remote_closed();
                }
                Ok(())
            }
            Err(err) => {
                self.shared.finish(id);
                stream.fail(err);
                self.shared
                    .send(&[Frame::RstStream {
                        stream_id: id,
                        error_code: ErrorCode::ProtocolError,
                    }])
                    .await
            }
        }
    }

    async fn on_settings(&mut self, params: &[(u16, u32)]) -> Result<(), HttpError> {
        let shared = &self.shared;
        // Holding the write lock keeps stream creation, which reads the
        // initial window under the same lock, from missing the delta.
        let mut writer = shared.writer.lock().await;
        let (window_delta, table_size) = {
            let mut remote = shared.remote.write();
            let old_window = remote.initial_window_size;
            let old_table = remote.header_table_size;
            for &(id, value) in params {
                remote.apply(id, value)?;
            }
            let delta = i64::from(remote.initial_window_size) - i64::from(old_window);
            let table = (remote.header_table_size != old_table).then_some(remote.header_table_size);
            (delta, table)
        };

        if window_delta != 0 {
            let streams: Vec<Arc<Stream>> =
                shared.streams.iter().map(|s| Arc::clone(s.value())).collect();
            for stream in streams {
                stream.send_window.adjust(window_delta)?;
            }
        }

        if let Some(size) = table_size {
            // Never grow past the default; a smaller ceiling must be honoured.
            writer
                .encoder
                .set_max_table_size((size as usize).min(DEFAULT_TABLE_SIZE));
        }
        Frame::Settings {
            ack: true,
            params: Vec::new(),
        }
        .encode(&mut writer.buf);
        writer.flush().await?;
        drop(writer);

        debug!(?params, window_delta, "applied peer settings");
        shared.changed.notify_waiters();
        Ok(())
    }

    fn on_goaway(&self, last_stream_id: u32, error_code: ErrorCode, debug_data: &[u8]) {
        let shared = &self.shared;
        // Recorded before liveness drops so a racing `register` sees it.
        *shared.goaway_last.lock() = Some(last_stream_id);
        shared.alive.store(false, Ordering::Release);
        debug!(
            last_stream_id,
            ?error_code,
            debug = %String::from_utf8_lossy(debug_data),
            "received GOAWAY"
        );

        let refused: Vec<u32> = shared
            .streams
            .iter()
            .map(|s| *s.key())
            .filter(|&id| id > last_stream_id)
            .collect();
        for stream_id in refused {
            if let Some((_, stream)) = shared.streams.remove(&stream_id) {
                stream.fail(HttpError::Refused {
                    stream_id,
                    last_stream_id,
                });
            }
        }
        shared.changed.notify_waiters();
    }

    fn on_window_update(&self, stream_id: u32, increment: u32) -> Result<(), HttpError> {
        if increment == 0 {
            return Err(protocol("zero WINDOW_UPDATE increment"));
        }
        if stream_id == 0 {
            self.shared.send_window.increase(increment)?;
        } else if let Some(stream) = self.shared.stream(stream_id) {
            stream.send_window.increase(increment)?;
        }
        self.shared.changed.notify_waiters();
        Ok(())
    }
}

fn protocol(msg: &str) -> HttpError {
    HttpError::Frame(H2Error::ProtocolError(msg.into()))
}
