//! A scripted HTTP/2 server speaking over one end of a `tokio::io::duplex`.

#![allow(dead_code)]

use std::time::Duration;

use plexus_h2::frame::{self, CONNECTION_PREFACE, FRAME_HEADER_LEN};
use plexus_h2::{Decoder, Encoder, Frame, FrameHeader, HeaderField};
use plexus_http::{Connection, ConnectionConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing_subscriber::EnvFilter;

pub const HOST: &str = "example.com";

pub struct Peer {
    io: DuplexStream,
    pub encoder: Encoder,
    decoder: Decoder,
}

/// A request as the server saw it.
#[derive(Debug)]
pub struct Received {
    pub stream_id: u32,
    pub fields: Vec<HeaderField>,
    pub end_stream: bool,
    /// HEADERS plus CONTINUATION frames.
    pub frames: usize,
}

impl Received {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name.as_bytes())
            .map(|f| std::str::from_utf8(&f.value).unwrap())
    }
}

/// Connect a client to a fresh peer that advertises `params`.
pub async fn connect(params: Vec<(u16, u32)>) -> (Connection, Peer) {
    connect_with(params, ConnectionConfig::default()).await
}

/// Route engine logs to the test output; `RUST_LOG=plexus_http=trace` shows
/// every frame.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn connect_with(params: Vec<(u16, u32)>, config: ConnectionConfig) -> (Connection, Peer) {
    init_tracing();
    let (client, server) = tokio::io::duplex(1 << 20);
    let (conn, peer) = tokio::join!(
        Connection::handshake(client, HOST, 443, config),
        Peer::accept(server, params)
    );
    (conn.unwrap(), peer)
}

impl Peer {
    /// Read the client preface and SETTINGS, then answer with our SETTINGS
    /// and the acknowledgement.
    pub async fn accept(mut io: DuplexStream, params: Vec<(u16, u32)>) -> Self {
        let mut preface = [0u8; 24];
        io.read_exact(&mut preface).await.unwrap();
        assert_eq!(&preface, CONNECTION_PREFACE);

        let mut peer = Self {
            io,
            encoder: Encoder::default(),
            decoder: Decoder::default(),
        };
        match peer.read_frame().await {
            Frame::Settings { ack: false, .. } => {}
            other => panic!("expected client SETTINGS, got {other:?}"),
        }
        peer.send(Frame::Settings { ack: false, params }).await;
        peer.send(Frame::Settings {
            ack: true,
            params: Vec::new(),
        })
        .await;
        peer
    }

    pub async fn read_frame(&mut self) -> Frame {
        let mut head = [0u8; FRAME_HEADER_LEN];
        self.io.read_exact(&mut head).await.unwrap();
        let header = FrameHeader::decode(&head);
        let mut payload = vec![0u8; header.length as usize];
        self.io.read_exact(&mut payload).await.unwrap();
        Frame::parse(&header, payload).unwrap()
    }

    /// Next frame that is not a SETTINGS ack.
    pub async fn next(&mut self) -> Frame {
        loop {
            match self.read_frame().await {
                Frame::Settings { ack: true, .. } => continue,
                frame => return frame,
            }
        }
    }

    /// Assert the client stays quiet for a short while.
    pub async fn expect_silence(&mut self) {
        let quiet = tokio::time::timeout(Duration::from_millis(50), self.next()).await;
        assert!(quiet.is_err(), "unexpected frame: {:?}", quiet.unwrap());
    }

    pub async fn send(&mut self, frame: Frame) {
        let mut buf = Vec::new();
        frame.encode(&mut buf);
        self.send_raw(&buf).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.io.write_all(bytes).await.unwrap();
        self.io.flush().await.unwrap();
    }

    /// Read one request header block, following CONTINUATION frames.
    pub async fn read_request(&mut self) -> Received {
        let (stream_id, mut block, end_stream, mut done) = match self.next().await {
            Frame::Headers {
                stream_id,
                fragment,
                end_stream,
                end_headers,
                ..
            } => (stream_id, fragment, end_stream, end_headers),
            other => panic!("expected HEADERS, got {other:?}"),
        };
        let mut frames = 1;
        while !done {
            match self.read_frame().await {
                Frame::Continuation {
                    stream_id: id,
                    fragment,
                    end_headers,
                } => {
                    assert_eq!(id, stream_id);
                    block.extend_from_slice(&fragment);
                    done = end_headers;
                    frames += 1;
                }
                other => panic!("expected CONTINUATION, got {other:?}"),
            }
        }
        Received {
            stream_id,
            fields: self.decoder.decode(&block).unwrap(),
            end_stream,
            frames,
        }
    }

    /// Read DATA frames on `stream_id` until `len` bytes have arrived.
    pub async fn read_data(&mut self, stream_id: u32, len: usize) -> (Vec<u8>, bool) {
        let mut body = Vec::new();
        let mut end = false;
        while body.len() < len {
            match self.next().await {
                Frame::Data {
                    stream_id: id,
                    data,
                    end_stream,
                    ..
                } => {
                    assert_eq!(id, stream_id);
                    body.extend_from_slice(&data);
                    end = end_stream;
                }
                other => panic!("expected DATA, got {other:?}"),
            }
        }
        assert_eq!(body.len(), len);
        (body, end)
    }

    pub async fn send_headers(&mut self, stream_id: u32, fields: &[(&str, &str)], end_stream: bool) {
        let fields: Vec<HeaderField> = fields
            .iter()
            .map(|(n, v)| HeaderField::new(*n, *v))
            .collect();
        let mut block = Vec::new();
        self.encoder.encode(&fields, &mut block);
        let mut buf = Vec::new();
        frame::encode_header_block(&mut buf, stream_id, &block, end_stream, 16_384);
        self.send_raw(&buf).await;
    }

    pub async fn send_data(&mut self, stream_id: u32, data: &[u8], end_stream: bool) {
        self.send(Frame::Data {
            stream_id,
            data: data.to_vec(),
            end_stream,
            flow_len: data.len() as u32,
        })
        .await;
    }

    /// A complete response: `:status`, then the body if any.
    pub async fn respond(&mut self, stream_id: u32, status: u16, body: &[u8]) {
        let status = status.to_string();
        let fields = [(":status", status.as_str())];
        if body.is_empty() {
            self.send_headers(stream_id, &fields, true).await;
        } else {
            self.send_headers(stream_id, &fields, false).await;
            self.send_data(stream_id, body, true).await;
        }
    }
}
