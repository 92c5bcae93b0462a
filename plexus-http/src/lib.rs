//! Multiplexed async HTTP/2 client engine.
//!
//! Built on the sans-IO `plexus-h2` framing layer and tokio. The caller
//! supplies an already-negotiated byte stream (TLS with ALPN `h2`); this crate
//! runs the protocol over it.
//!
//! # Architecture
//!
//! [`Connection`] performs the handshake, then spawns one reader task that
//! decodes frames and resolves per-request streams. Any number of tasks may
//! call [`Connection::send_request`] concurrently; their frames are
//! serialized through a single write lock.
//!
//! [`ConnectionManager`] caches one connection per origin and makes sure
//! concurrent first requests share a single handshake.
//!
//! # Example
//!
//! ```rust,ignore
//! use plexus_http::{Connection, ConnectionConfig, Request};
//!
//! async fn example(tls: impl plexus_http::AsyncIo + 'static) -> Result<(), plexus_http::HttpError> {
//!     let conn = Connection::handshake(tls, "example.com", 443, ConnectionConfig::default()).await?;
//!
//!     let req = Request::get("https://example.com/api/data")?
//!         .header("authorization", "Bearer tok");
//!     let resp = conn.send_request(req).await?;
//!
//!     assert_eq!(resp.status(), 200);
//!     let body = resp.bytes();
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod manager;
pub mod request;
pub mod response;
mod stream;

pub use config::{ConnectionConfig, ManagerConfig};
pub use connection::Connection;
pub use error::HttpError;
pub use events::{EventSink, RequestEvent, TracingSink};
pub use manager::{AsyncIo, BoxIo, ConnectionManager, Connector};
pub use request::Request;
pub use response::Response;
pub use stream::StreamState;
