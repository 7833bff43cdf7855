//! Core types for urlconn

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

use crate::error::{Error, Result};

/// Connection lifecycle state
///
/// Transitions: `Created → Enqueued → Running → {Finished | Cancelled}`, plus
/// `Created → Cancelled` for a cancel before enqueue. Terminal states are
/// absorbing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Created but not yet submitted to a queue
    Created,
    /// Admitted and waiting for a queue slot
    Enqueued,
    /// Transport operation in progress
    Running,
    /// Terminal: completed, successfully or with a network error
    Finished,
    /// Terminal: reached via explicit cancel
    Cancelled,
}

impl ConnectionState {
    /// True for the absorbing states (Finished, Cancelled)
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Finished | ConnectionState::Cancelled)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Deterministic key identifying the resource a request targets, used to
/// detect duplicate in-flight requests.
///
/// Derived from scheme + lowercased host + effective port + path. Query and
/// fragment are excluded, so `/search?page=1` and `/search?page=2` count as
/// the same resource; user-info is excluded as well. The port is the explicit
/// one when given, otherwise the scheme default.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Derive the resource identifier for a URL
    pub fn from_url(url: &Url) -> Self {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let key = match url.port_or_known_default() {
            Some(port) => format!("{}://{}:{}{}", url.scheme(), host, port, url.path()),
            None => format!("{}://{}{}", url.scheme(), host, url.path()),
        };
        Self(key)
    }

    /// The identifier as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Description of one URL operation: target, method, headers, optional body.
///
/// Deliberately thin; anything beyond this shape (multipart, streaming
/// bodies, redirect policy) belongs to the transport client, not here.
#[derive(Clone, Debug)]
pub struct Request {
    url: Url,
    method: Method,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl Request {
    /// Create a request with an explicit method
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Create a GET request from a URL string
    pub fn get(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|source| Error::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        Ok(Self::new(Method::GET, parsed))
    }

    /// Create a POST request from a URL string
    pub fn post(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|source| Error::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        Ok(Self::new(Method::POST, parsed))
    }

    /// Add a header (builder style)
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attach a request body (builder style)
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// The request target
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The request method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The request body, if one was attached
    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// The dedup key this request resolves to
    pub fn resource_id(&self) -> ResourceId {
        ResourceId::from_url(&self.url)
    }
}

/// Response metadata delivered to `on_response`: final URL, status, headers.
///
/// Body bytes are not part of this type; they arrive through `on_data` or the
/// connection buffer.
#[derive(Clone, Debug)]
pub struct ResponseInfo {
    /// Final URL after any transport-level redirects
    pub url: Url,
    /// HTTP status code
    pub status: reqwest::StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Content length as reported by the transport, when known
    pub content_length: Option<u64>,
}

impl ResponseInfo {
    /// The status code as a plain integer
    pub fn http_status(&self) -> u16 {
        self.status.as_u16()
    }
}

/// Callback invoked with the response metadata, at most once per connection.
///
/// Runs on the connection's driver task, not the submitting thread.
pub type OnResponse = Box<dyn FnOnce(&ResponseInfo) + Send>;

/// Callback invoked once per arriving body chunk.
///
/// When set, chunks are handed over and not retained in the connection
/// buffer. Runs on the connection's driver task.
pub type OnData = Box<dyn FnMut(Bytes) + Send>;

/// Callback reporting admission outcome at enqueue time: `true` when the
/// connection was admitted and scheduled, `false` when admission was refused.
pub type OnRequest = Arc<dyn Fn(bool) + Send + Sync>;
