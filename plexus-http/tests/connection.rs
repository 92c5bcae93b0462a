mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Peer, connect, connect_with};
use parking_lot::Mutex;
use plexus_h2::settings::{SETTINGS_INITIAL_WINDOW_SIZE, SETTINGS_MAX_CONCURRENT_STREAMS};
use plexus_h2::{ErrorCode, Frame, HeaderField, Settings};
use plexus_http::{Connection, ConnectionConfig, EventSink, HttpError, Request, RequestEvent, Response};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn spawn_request(conn: &Connection, req: Request) -> JoinHandle<Result<Response, HttpError>> {
    let conn = conn.clone();
    tokio::spawn(async move { conn.send_request(req).await })
}

#[derive(Default)]
struct Recorder(Mutex<Vec<RequestEvent>>);

impl EventSink for Recorder {
    fn record(&self, event: &RequestEvent) {
        self.0.lock().push(event.clone());
    }
}

#[tokio::test]
async fn get_with_empty_body() {
    let (conn, mut peer) = connect(vec![]).await;
    let task = spawn_request(&conn, Request::get("https://example.com/").unwrap());

    let req = peer.read_request().await;
    assert_eq!(req.stream_id, 1);
    assert!(req.end_stream);
    let fields: Vec<(String, String)> = req
        .fields
        .iter()
        .map(|f| {
            let text = |b: &[u8]| String::from_utf8(b.to_vec()).unwrap();
            (text(&f.name), text(&f.value))
        })
        .collect();
    let expected = [
        (":method", "GET"),
        (":scheme", "https"),
        (":authority", "example.com"),
        (":path", "/"),
    ]
    .map(|(n, v)| (n.to_string(), v.to_string()));
    assert_eq!(fields, expected);

    peer.respond(1, 200, b"").await;
    let resp = task.await.unwrap().unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.body().is_empty());
    assert_eq!(conn.active_streams(), 0);
}

#[tokio::test]
async fn headers_are_normalized_and_response_collected() {
    let (conn, mut peer) = connect(vec![]).await;
    let req = Request::get("https://example.com:8443/search?q=h2")
        .unwrap()
        .header("Connection", "keep-alive")
        .header("Host", "other.example")
        .header("X-Trace-Id", "abc123");
    let task = spawn_request(&conn, req);

    let req = peer.read_request().await;
    assert_eq!(req.get(":authority"), Some("example.com:8443"));
    assert_eq!(req.get(":path"), Some("/search?q=h2"));
    assert_eq!(req.get("x-trace-id"), Some("abc123"));
    assert_eq!(req.get("connection"), None);
    assert_eq!(req.get("host"), None);

    peer.send_headers(
        1,
        &[(":status", "200"), ("content-type", "text/plain")],
        false,
    )
    .await;
    peer.send_data(1, b"hello ", false).await;
    peer.send_data(1, b"world", true).await;

    let resp = task.await.unwrap().unwrap();
    assert_eq!(resp.header("Content-Type"), Some("text/plain"));
    assert_eq!(resp.text().unwrap(), "hello world");
}

#[tokio::test]
async fn informational_and_trailers_are_skipped() {
    let (conn, mut peer) = connect(vec![]).await;
    let task = spawn_request(&conn, Request::get("https://example.com/grpc").unwrap());
    peer.read_request().await;

    peer.send_headers(1, &[(":status", "103")], false).await;
    peer.send_headers(1, &[(":status", "200")], false).await;
    peer.send_data(1, b"payload", false).await;
    peer.send_headers(1, &[("grpc-status", "0")], true).await;

    let resp = task.await.unwrap().unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.body().as_ref(), b"payload");
    assert_eq!(resp.header("grpc-status"), None);
}

#[tokio::test]
async fn large_header_block_uses_continuation() {
    let (conn, mut peer) = connect(vec![]).await;
    // Huffman-coded 'a' is five bits, so this is ~25 KB on the wire.
    let big = "a".repeat(40_000);
    let req = Request::get("https://example.com/")
        .unwrap()
        .header("x-big", big.clone());
    let task = spawn_request(&conn, req);

    let req = peer.read_request().await;
    assert_eq!(req.frames, 2);
    assert_eq!(req.get("x-big"), Some(big.as_str()));

    peer.respond(1, 204, b"").await;
    assert_eq!(task.await.unwrap().unwrap().status(), 204);
}

#[tokio::test]
async fn body_waits_for_stream_credit() {
    let (conn, mut peer) = connect(vec![(SETTINGS_INITIAL_WINDOW_SIZE, 10)]).await;
    let body: Vec<u8> = (0u8..25).collect();
    let task = spawn_request(&conn, Request::post("https://example.com/upload", body.clone()).unwrap());

    let req = peer.read_request().await;
    assert!(!req.end_stream);
    let (first, end) = peer.read_data(1, 10).await;
    assert!(!end);
    peer.expect_silence().await;

    peer.send(Frame::WindowUpdate {
        stream_id: 1,
        increment: 15,
    })
    .await;
    let (rest, end) = peer.read_data(1, 15).await;
    assert!(end);
    assert_eq!([first, rest].concat(), body);

    peer.respond(1, 201, b"").await;
    assert_eq!(task.await.unwrap().unwrap().status(), 201);
}

#[tokio::test]
async fn initial_window_change_shifts_open_streams() {
    let (conn, mut peer) = connect(vec![(SETTINGS_INITIAL_WINDOW_SIZE, 10)]).await;
    let task = spawn_request(&conn, Request::post("https://example.com/", vec![7u8; 30]).unwrap());

    peer.read_request().await;
    peer.read_data(1, 10).await;
    peer.expect_silence().await;

    // Raising the initial window by 15 credits the blocked stream by 15.
    peer.send(Frame::Settings {
        ack: false,
        params: vec![(SETTINGS_INITIAL_WINDOW_SIZE, 25)],
    })
    .await;
    let (_, end) = peer.read_data(1, 15).await;
    assert!(!end);
    peer.expect_silence().await;
    assert_eq!(conn.remote_settings().initial_window_size, 25);

    peer.send(Frame::WindowUpdate {
        stream_id: 1,
        increment: 5,
    })
    .await;
    let (_, end) = peer.read_data(1, 5).await;
    assert!(end);

    peer.respond(1, 200, b"").await;
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn body_waits_for_connection_credit() {
    // Stream credit is plentiful, so the connection window is the limit.
    let (conn, mut peer) = connect(vec![(SETTINGS_INITIAL_WINDOW_SIZE, 1_000_000)]).await;
    let body: Vec<u8> = (0..70_000u32).map(|i| i as u8).collect();
    let task = spawn_request(&conn, Request::post("https://example.com/big", body.clone()).unwrap());

    peer.read_request().await;
    let (first, end) = peer.read_data(1, 65_535).await;
    assert!(!end);
    peer.expect_silence().await;

    peer.send(Frame::WindowUpdate {
        stream_id: 0,
        increment: 10_000,
    })
    .await;
    let (rest, end) = peer.read_data(1, 4_465).await;
    assert!(end);
    assert_eq!([first, rest].concat(), body);

    peer.respond(1, 200, b"").await;
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn received_data_replenishes_both_windows() {
    let (conn, mut peer) = connect(vec![]).await;
    let task = spawn_request(&conn, Request::get("https://example.com/download").unwrap());
    peer.read_request().await;

    peer.send_headers(1, &[(":status", "200")], false).await;
    let chunk = vec![b'z'; 16_000];
    for _ in 0..3 {
        peer.send_data(1, &chunk, false).await;
    }
    // 48000 of 65535 consumed drops both windows below half.
    assert_eq!(
        peer.next().await,
        Frame::WindowUpdate {
            stream_id: 0,
            increment: 48_000
        }
    );
    assert_eq!(
        peer.next().await,
        Frame::WindowUpdate {
            stream_id: 1,
            increment: 48_000
        }
    );

    peer.send_data(1, b"", true).await;
    let resp = task.await.unwrap().unwrap();
    assert_eq!(resp.body().len(), 48_000);
}

#[tokio::test]
async fn data_beyond_the_stream_window_is_fatal() {
    let config = ConnectionConfig {
        settings: Settings {
            initial_window_size: 1_000,
            ..Settings::client_default()
        },
        ..Default::default()
    };
    let (conn, mut peer) = connect_with(vec![], config).await;
    let task = spawn_request(&conn, Request::get("https://example.com/").unwrap());
    peer.read_request().await;

    peer.send_headers(1, &[(":status", "200")], false).await;
    peer.send_data(1, &[0u8; 2_000], false).await;
    match peer.next().await {
        Frame::GoAway { error_code, .. } => assert_eq!(error_code, ErrorCode::FlowControlError),
        other => panic!("expected GOAWAY, got {other:?}"),
    }
    assert!(matches!(task.await.unwrap(), Err(HttpError::FlowControl)));
    assert!(!conn.is_alive());
}

#[tokio::test]
async fn zero_window_update_is_fatal() {
    let (conn, mut peer) = connect(vec![]).await;
    let task = spawn_request(&conn, Request::get("https://example.com/").unwrap());
    peer.read_request().await;

    peer.send(Frame::WindowUpdate {
        stream_id: 0,
        increment: 0,
    })
    .await;
    match peer.next().await {
        Frame::GoAway { error_code, .. } => assert_eq!(error_code, ErrorCode::ProtocolError),
        other => panic!("expected GOAWAY, got {other:?}"),
    }
    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_connection_fatal(), "{err:?}");
    assert!(!conn.is_alive());
}

#[tokio::test]
async fn goaway_fails_only_streams_above_last_id() {
    let (conn, mut peer) = connect(vec![]).await;
    let first = spawn_request(&conn, Request::get("https://example.com/a").unwrap());
    assert_eq!(peer.read_request().await.stream_id, 1);
    let second = spawn_request(&conn, Request::get("https://example.com/b").unwrap());
    assert_eq!(peer.read_request().await.stream_id, 3);

    peer.send(Frame::GoAway {
        last_stream_id: 1,
        error_code: ErrorCode::NoError,
        debug_data: b"maintenance".to_vec(),
    })
    .await;
    match second.await.unwrap() {
        Err(HttpError::Refused {
            stream_id,
            last_stream_id,
        }) => assert_eq!((stream_id, last_stream_id), (3, 1)),
        other => panic!("expected refusal, got {other:?}"),
    }
    assert!(!conn.is_alive());
    assert_eq!(conn.goaway_last_stream_id(), Some(1));

    // Stream 1 was accepted and still completes.
    peer.respond(1, 200, b"done").await;
    assert_eq!(first.await.unwrap().unwrap().body().as_ref(), b"done");

    let late = conn.send_request(Request::get("https://example.com/c").unwrap()).await;
    assert!(matches!(late, Err(HttpError::ConnectionClosed)));
}

#[tokio::test]
async fn reset_fails_only_that_stream() {
    let (conn, mut peer) = connect(vec![]).await;
    let first = spawn_request(&conn, Request::get("https://example.com/a").unwrap());
    peer.read_request().await;
    let second = spawn_request(&conn, Request::get("https://example.com/b").unwrap());
    peer.read_request().await;

    peer.send(Frame::RstStream {
        stream_id: 3,
        error_code: ErrorCode::InternalError,
    })
    .await;
    assert!(matches!(
        second.await.unwrap(),
        Err(HttpError::StreamReset {
            code: ErrorCode::InternalError
        })
    ));

    peer.respond(1, 200, b"ok").await;
    assert_eq!(first.await.unwrap().unwrap().status(), 200);
    assert!(conn.is_alive());
}

#[tokio::test]
async fn ping_is_echoed() {
    let (conn, mut peer) = connect(vec![]).await;
    let payload = *b"12345678";
    peer.send(Frame::Ping {
        ack: false,
        payload,
    })
    .await;
    assert_eq!(peer.next().await, Frame::Ping { ack: true, payload });

    conn.ping(*b"abcdefgh").await.unwrap();
    assert_eq!(
        peer.next().await,
        Frame::Ping {
            ack: false,
            payload: *b"abcdefgh"
        }
    );
}

#[tokio::test]
async fn push_promise_is_refused_but_decoded() {
    let (conn, mut peer) = connect(vec![]).await;
    let task = spawn_request(&conn, Request::get("https://example.com/").unwrap());
    peer.read_request().await;

    let promised = [
        HeaderField::new(":method", "GET"),
        HeaderField::new(":path", "/style.css"),
        HeaderField::new("x-pushed-by", "edge-7"),
    ];
    let mut block = Vec::new();
    peer.encoder.encode(&promised, &mut block);
    peer.send(Frame::PushPromise {
        stream_id: 1,
        promised_stream_id: 2,
        fragment: block,
        end_headers: true,
    })
    .await;
    assert_eq!(
        peer.next().await,
        Frame::RstStream {
            stream_id: 2,
            error_code: ErrorCode::RefusedStream
        }
    );

    // This block references entries the promise inserted; it only decodes
    // if the client kept its table in step.
    peer.send_headers(1, &[(":status", "200"), ("x-pushed-by", "edge-7")], true)
        .await;
    let resp = task.await.unwrap().unwrap();
    assert_eq!(resp.header("x-pushed-by"), Some("edge-7"));
}

#[tokio::test]
async fn corrupt_header_block_tears_down_connection() {
    let (conn, mut peer) = connect(vec![]).await;
    let task = spawn_request(&conn, Request::get("https://example.com/").unwrap());
    peer.read_request().await;

    // Index 62 with an empty dynamic table.
    peer.send(Frame::Headers {
        stream_id: 1,
        fragment: vec![0xbe],
        end_stream: true,
        end_headers: true,
        priority: None,
    })
    .await;
    match peer.next().await {
        Frame::GoAway { error_code, .. } => assert_eq!(error_code, ErrorCode::CompressionError),
        other => panic!("expected GOAWAY, got {other:?}"),
    }
    assert!(matches!(
        task.await.unwrap(),
        Err(HttpError::Compression(_))
    ));
    assert!(!conn.is_alive());
}

#[tokio::test]
async fn interleaved_frames_inside_header_block_are_rejected() {
    let (conn, mut peer) = connect(vec![]).await;
    let task = spawn_request(&conn, Request::get("https://example.com/").unwrap());
    peer.read_request().await;

    peer.send(Frame::Headers {
        stream_id: 1,
        fragment: vec![0x88],
        end_stream: true,
        end_headers: false,
        priority: None,
    })
    .await;
    peer.send(Frame::Ping {
        ack: false,
        payload: [0; 8],
    })
    .await;
    match peer.next().await {
        Frame::GoAway { error_code, .. } => assert_eq!(error_code, ErrorCode::ProtocolError),
        other => panic!("expected GOAWAY, got {other:?}"),
    }
    assert!(task.await.unwrap().is_err());
}

#[tokio::test]
async fn cancellation_resets_the_stream() {
    let (conn, mut peer) = connect(vec![]).await;
    let token = CancellationToken::new();
    let req = Request::get("https://example.com/slow")
        .unwrap()
        .cancel_token(token.clone());
    let task = spawn_request(&conn, req);
    peer.read_request().await;

    token.cancel();
    assert!(matches!(task.await.unwrap(), Err(HttpError::Cancelled)));
    assert_eq!(
        peer.next().await,
        Frame::RstStream {
            stream_id: 1,
            error_code: ErrorCode::Cancel
        }
    );
    assert!(conn.is_alive());
    assert_eq!(conn.active_streams(), 0);
}

#[tokio::test]
async fn dropping_the_request_resets_the_stream() {
    let (conn, mut peer) = connect(vec![]).await;
    let task = spawn_request(&conn, Request::get("https://example.com/abandoned").unwrap());
    peer.read_request().await;

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert_eq!(
        peer.next().await,
        Frame::RstStream {
            stream_id: 1,
            error_code: ErrorCode::Cancel
        }
    );
    assert!(conn.is_alive());
    assert_eq!(conn.active_streams(), 0);
}

#[tokio::test]
async fn cancelled_before_send_writes_nothing() {
    let (conn, mut peer) = connect(vec![]).await;
    let token = CancellationToken::new();
    token.cancel();
    let req = Request::get("https://example.com/").unwrap().cancel_token(token);
    assert!(matches!(conn.send_request(req).await, Err(HttpError::Cancelled)));
    peer.expect_silence().await;
}

#[tokio::test]
async fn concurrency_limit_queues_requests() {
    let (conn, mut peer) = connect(vec![(SETTINGS_MAX_CONCURRENT_STREAMS, 1)]).await;
    let first = spawn_request(&conn, Request::get("https://example.com/1").unwrap());
    assert_eq!(peer.read_request().await.stream_id, 1);
    let second = spawn_request(&conn, Request::get("https://example.com/2").unwrap());
    peer.expect_silence().await;

    peer.respond(1, 200, b"").await;
    assert!(first.await.unwrap().is_ok());
    assert_eq!(peer.read_request().await.stream_id, 3);
    peer.respond(3, 200, b"").await;
    assert!(second.await.unwrap().is_ok());
}

#[tokio::test]
async fn events_follow_the_request() {
    let (conn, mut peer) = connect(vec![]).await;
    let recorder = Arc::new(Recorder::default());
    let req = Request::post("https://example.com/", &b"abc"[..])
        .unwrap()
        .event_sink(recorder.clone());
    let task = spawn_request(&conn, req);
    peer.read_request().await;
    peer.read_data(1, 3).await;
    peer.respond(1, 200, b"xy").await;
    task.await.unwrap().unwrap();

    let events = recorder.0.lock().clone();
    assert_eq!(events[0], RequestEvent::StreamOpened { stream_id: 1 });
    assert_eq!(
        events[1],
        RequestEvent::HeadersSent {
            stream_id: 1,
            frames: 1
        }
    );
    assert!(events.contains(&RequestEvent::BodySent {
        stream_id: 1,
        bytes: 3
    }));
    assert!(events.contains(&RequestEvent::ResponseHeaders {
        stream_id: 1,
        status: 200
    }));
    assert!(events.iter().any(|e| matches!(
        e,
        RequestEvent::Completed {
            stream_id: 1,
            status: 200,
            body_len: 2,
            ..
        }
    )));
}

#[tokio::test]
async fn close_sends_goaway_and_fails_stragglers() {
    let config = ConnectionConfig {
        shutdown_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let (conn, mut peer) = connect_with(vec![], config).await;
    let task = spawn_request(&conn, Request::get("https://example.com/").unwrap());
    peer.read_request().await;

    conn.close().await;
    assert!(!conn.is_alive());
    assert!(matches!(task.await.unwrap(), Err(HttpError::ConnectionClosed)));
    match peer.next().await {
        Frame::GoAway {
            last_stream_id,
            error_code,
            ..
        } => assert_eq!((last_stream_id, error_code), (0, ErrorCode::NoError)),
        other => panic!("expected GOAWAY, got {other:?}"),
    }
}

#[tokio::test]
async fn peer_hangup_fails_pending_requests() {
    let (conn, mut peer) = connect(vec![]).await;
    let task = spawn_request(&conn, Request::get("https://example.com/").unwrap());
    peer.read_request().await;
    drop(peer);

    assert!(matches!(task.await.unwrap(), Err(HttpError::ConnectionClosed)));
    assert!(!conn.is_alive());
}

#[tokio::test(start_paused = true)]
async fn handshake_times_out_without_settings_ack() {
    let (client, _server) = tokio::io::duplex(1 << 16);
    let result = Connection::handshake(client, common::HOST, 443, ConnectionConfig::default()).await;
    assert!(matches!(result, Err(HttpError::HandshakeTimeout)));
}

#[tokio::test]
async fn handshake_fails_when_peer_hangs_up() {
    let (client, server) = tokio::io::duplex(1 << 16);
    drop(server);
    let result = Connection::handshake(client, common::HOST, 443, ConnectionConfig::default()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn peer_settings_are_visible() {
    let (conn, _peer): (Connection, Peer) =
        connect(vec![(SETTINGS_MAX_CONCURRENT_STREAMS, 42)]).await;
    assert_eq!(conn.remote_settings().max_concurrent_streams, Some(42));
    assert_eq!(conn.host(), "example.com");
    assert_eq!(conn.port(), 443);
}
