//! Response cache seam.
//!
//! The crate owns no caching policy. When a context carries a
//! [`ResponseCache`] and a connection buffered its body (no `on_data`
//! streaming), the completed response is offered to the cache on success.
//! A connection's `on_will_cache_response` callback sits in front of the
//! store: its return value replaces what is cached, and returning `None`
//! suppresses caching for that connection.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::types::{ResourceId, ResponseInfo};

/// A completed response as offered to the caching policy
#[derive(Clone, Debug)]
pub struct CachedResponse {
    /// Response metadata (final URL, status, headers)
    pub info: ResponseInfo,
    /// The full buffered body
    pub body: Bytes,
}

/// Callback deciding what, if anything, gets cached for a connection.
///
/// Invoked at most once, on the driver task, only when the owning context
/// has a cache configured.
pub type OnWillCache = Box<dyn FnOnce(CachedResponse) -> Option<CachedResponse> + Send>;

/// External caching policy consulted after successful, buffered connections
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Store a completed response under its resource identifier
    async fn store(&self, key: ResourceId, response: CachedResponse);

    /// Look up a previously stored response
    async fn load(&self, key: &ResourceId) -> Option<CachedResponse>;
}

/// In-memory cache keyed by resource identifier.
///
/// No eviction; intended for tests and short-lived processes.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<ResourceId, CachedResponse>>,
}

impl MemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored responses
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True when nothing has been stored
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn store(&self, key: ResourceId, response: CachedResponse) {
        tracing::debug!(resource = %key, bytes = response.body.len(), "Caching response");
        self.entries.write().await.insert(key, response);
    }

    async fn load(&self, key: &ResourceId) -> Option<CachedResponse> {
        self.entries.read().await.get(key).cloned()
    }
}
