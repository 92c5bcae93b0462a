//! Per-origin connection cache.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;
use tracing::debug;

use crate::config::ManagerConfig;
use crate::connection::Connection;
use crate::error::HttpError;
use crate::request::Request;
use crate::response::Response;

/// A bidirectional byte stream a connection can run over.
pub trait AsyncIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncIo for T {}

pub type BoxIo = Box<dyn AsyncIo>;

/// Opens transport streams to an origin.
///
/// Implementations own TCP, TLS, and ALPN; the stream they return must
/// already speak HTTP/2.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> Result<BoxIo, HttpError>;
}

type Origin = (String, u16);

/// Caches one [`Connection`] per `host:port`.
///
/// Concurrent first requests to the same origin share a single handshake.
/// A cached connection that has died is replaced on the next lookup.
pub struct ConnectionManager<C> {
    connector: C,
    config: ManagerConfig,
    connections: DashMap<Origin, Connection>,
    creating: DashMap<Origin, Arc<tokio::sync::Mutex<()>>>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, config: ManagerConfig) -> Self {
        Self {
            connector,
            config,
            connections: DashMap::new(),
            creating: DashMap::new(),
        }
    }

    /// Send `req` on the connection for its origin, connecting first if
    /// needed.
    pub async fn send(&self, req: Request) -> Result<Response, HttpError> {
        let (host, port) = req.origin()?;
        let conn = self.get_or_connect(&host, port).await?;
        conn.send_request(req).await
    }

    /// The live connection for `host:port`, opened on first use.
    pub async fn get_or_connect(&self, host: &str, port: u16) -> Result<Connection, HttpError> {
        let origin = (host.to_ascii_lowercase(), port);
        if let Some(conn) = self.live(&origin) {
            return Ok(conn);
        }

        let lock = Arc::clone(self.creating.entry(origin.clone()).or_default().value());
        let result = self.connect_locked(&lock, &origin).await;
        // The map and `lock` are the only holders once no caller is queued.
        // New callers clone under the same shard lock, so none can slip in.
        self.creating
            .remove_if(&origin, |_, l| Arc::ptr_eq(l, &lock) && Arc::strong_count(l) == 2);
        result
    }

    async fn connect_locked(
        &self,
        lock: &tokio::sync::Mutex<()>,
        origin: &Origin,
    ) -> Result<Connection, HttpError> {
        let _creating = lock.lock().await;
        // Someone else may have finished connecting while we waited.
        if let Some(conn) = self.live(origin) {
            return Ok(conn);
        }

        let (host, port) = (origin.0.as_str(), origin.1);
        debug!(host, port, "opening connection");
        let io = self.connector.connect(host, port).await?;
        let conn = Connection::handshake(io, host, port, self.config.connection.clone()).await?;
        self.connections.insert(origin.clone(), conn.clone());
        Ok(conn)
    }

    /// Cached connection if it can still take requests. A dead one is evicted.
    fn live(&self, origin: &Origin) -> Option<Connection> {
        let conn = self.connections.get(origin)?.value().clone();
        if conn.is_alive() {
            return Some(conn);
        }
        self.connections.remove_if(origin, |_, c| !c.is_alive());
        None
    }

    /// Drop and close the connection for `host:port`. Returns whether one was
    /// cached.
    pub async fn remove(&self, host: &str, port: u16) -> bool {
        let origin = (host.to_ascii_lowercase(), port);
        match self.connections.remove(&origin) {
            Some((_, conn)) => {
                conn.close().await;
                true
            }
            None => false,
        }
    }

    /// Close every cached connection.
    pub async fn close_all(&self) {
        let conns: Vec<Connection> = self.connections.iter().map(|c| c.value().clone()).collect();
        self.connections.clear();
        let mut closing = JoinSet::new();
        for conn in conns {
            closing.spawn(async move { conn.close().await });
        }
        while closing.join_next().await.is_some() {}
    }

    /// Number of cached connections, live or not yet evicted.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
