//! Request model.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::HttpError;
use crate::events::EventSink;

/// An HTTP request addressed by absolute URL.
///
/// Built in the usual chained style:
///
/// ```rust
/// use plexus_http::Request;
///
/// let req = Request::get("https://example.com/api?q=1")
///     .unwrap()
///     .header("accept", "application/json");
/// assert_eq!(req.path(), "/api?q=1");
/// ```
#[derive(Clone)]
pub struct Request {
    method: String,
    url: Url,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
    cancel: CancellationToken,
    sink: Option<Arc<dyn EventSink>>,
}

impl Request {
    pub fn new(method: impl Into<String>, url: Url) -> Self {
        Self {
            method: method.into(),
            url,
            headers: Vec::new(),
            body: None,
            cancel: CancellationToken::new(),
            sink: None,
        }
    }

    /// Parse `url` and build a request for `method`.
    pub fn parse(method: impl Into<String>, url: &str) -> Result<Self, HttpError> {
        let url = Url::parse(url).map_err(|e| HttpError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::new(method, url))
    }

    pub fn get(url: &str) -> Result<Self, HttpError> {
        Self::parse("GET", url)
    }

    pub fn post(url: &str, body: impl Into<Bytes>) -> Result<Self, HttpError> {
        Ok(Self::parse("POST", url)?.body(body))
    }

    /// Add a header. Names are lower-cased when the request is sent.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Use `token` to cancel this request. Cancelling resets the stream and
    /// fails the request with [`HttpError::Cancelled`].
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn sink(&self) -> Option<&Arc<dyn EventSink>> {
        self.sink.as_ref()
    }

    /// `:scheme` pseudo-header value.
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// `:path` pseudo-header value: path plus query, never empty.
    pub fn path(&self) -> String {
        let path = match self.url.path() {
            "" => "/",
            p => p,
        };
        match self.url.query() {
            Some(q) => format!("{path}?{q}"),
            None => path.to_string(),
        }
    }

    /// `:authority` pseudo-header value. The port appears only when it is not
    /// the scheme's default.
    pub fn authority(&self) -> Result<String, HttpError> {
        let host = self.host()?;
        Ok(match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }

    /// Origin `(host, port)` this request must be sent to.
    pub fn origin(&self) -> Result<(String, u16), HttpError> {
        let host = self.host()?;
        let port = self
            .url
            .port_or_known_default()
            .ok_or_else(|| HttpError::InvalidUrl(format!("{}: unknown port", self.url)))?;
        Ok((host.to_string(), port))
    }

    fn host(&self) -> Result<&str, HttpError> {
        self.url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| HttpError::InvalidUrl(format!("{}: missing host", self.url)))
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers.len())
            .field("body", &self.body.as_ref().map(Bytes::len))
            .finish_non_exhaustive()
    }
}
