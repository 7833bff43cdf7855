//! Connections: one request's lifecycle from creation through terminal
//! state, with callback dispatch.
//!
//! A [`Connection`] is a cloneable handle; the driver task spawned at
//! enqueue time holds one clone and performs the transport operation through
//! `reqwest`. Callbacks therefore run on the driver task, never on the
//! thread that submitted the connection.
//!
//! Call-count guarantees, per connection:
//! - `on_response`: 0 or 1
//! - `on_data`: 0..N, in arrival order, after `on_response`
//! - `on_finished`: exactly once for any connection that was enqueued, and
//!   also once for a connection cancelled before enqueue
//! - `on_will_cache_response`: 0 or 1, only when the context has a cache

use bytes::Bytes;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{PROXY_AUTHENTICATE, WWW_AUTHENTICATE};
use std::any::Any;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::auth::{Credentials, parse_challenge};
use crate::cache::{CachedResponse, OnWillCache};
use crate::context::{RequestContext, lock};
use crate::error::{Error, Result};
use crate::types::{ConnectionState, OnData, OnResponse, Request, ResourceId, ResponseInfo};

/// Terminal callback, invoked with the connection so the caller can read
/// its status, error, and buffered data.
///
/// Runs on the connection's driver task (or, for a cancel before enqueue,
/// on the cancelling thread). Invoked exactly once per enqueued connection.
pub type OnFinished = Box<dyn FnOnce(&Connection) + Send>;

#[derive(Default)]
struct Callbacks {
    on_response: Option<OnResponse>,
    on_data: Option<OnData>,
    on_finished: Option<OnFinished>,
    on_will_cache: Option<OnWillCache>,
}

struct ConnectionInner {
    context: RequestContext,
    state: Mutex<ConnectionState>,
    resource: Mutex<Option<ResourceId>>,
    response: Mutex<Option<ResponseInfo>>,
    buffer: Mutex<Vec<u8>>,
    error: Mutex<Option<Arc<Error>>>,
    user_info: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
    callbacks: Mutex<Callbacks>,
    cancel: CancellationToken,
    done_tx: watch::Sender<bool>,
    // Held so done_tx always has a live receiver.
    _done_rx: watch::Receiver<bool>,
}

/// One issued request: holds its callbacks, buffered data, and terminal
/// result, and reports progress back through the callbacks.
///
/// Cheap to clone; all clones observe the same state.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub(crate) fn new(context: RequestContext) -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            inner: Arc::new(ConnectionInner {
                context,
                state: Mutex::new(ConnectionState::Created),
                resource: Mutex::new(None),
                response: Mutex::new(None),
                buffer: Mutex::new(Vec::new()),
                error: Mutex::new(None),
                user_info: Mutex::new(None),
                callbacks: Mutex::new(Callbacks::default()),
                cancel: CancellationToken::new(),
                done_tx,
                _done_rx: done_rx,
            }),
        }
    }

    // ---- callback slots -------------------------------------------------

    /// Set the response callback. Assign before enqueueing.
    pub fn set_on_response(&self, callback: impl FnOnce(&ResponseInfo) + Send + 'static) {
        lock(&self.inner.callbacks).on_response = Some(Box::new(callback));
    }

    /// Set the per-chunk data callback. When set, chunks are handed to it
    /// and not retained in the connection buffer. Assign before enqueueing.
    pub fn set_on_data(&self, callback: impl FnMut(Bytes) + Send + 'static) {
        lock(&self.inner.callbacks).on_data = Some(Box::new(callback));
    }

    /// Set the terminal callback. Assign before enqueueing.
    pub fn set_on_finished(&self, callback: impl FnOnce(&Connection) + Send + 'static) {
        self.set_on_finished_boxed(Box::new(callback));
    }

    pub(crate) fn set_on_finished_boxed(&self, callback: OnFinished) {
        lock(&self.inner.callbacks).on_finished = Some(callback);
    }

    /// Set the cache-decision callback. Only consulted when the owning
    /// context carries a response cache; returning `None` suppresses
    /// caching for this connection.
    pub fn set_on_will_cache_response(
        &self,
        callback: impl FnOnce(CachedResponse) -> Option<CachedResponse> + Send + 'static,
    ) {
        lock(&self.inner.callbacks).on_will_cache = Some(Box::new(callback));
    }

    /// Attach an arbitrary caller-owned value; opaque to this crate.
    pub fn set_user_info<T: Any + Send + Sync>(&self, value: T) {
        *lock(&self.inner.user_info) = Some(Arc::new(value));
    }

    /// The caller-attached value, if any. Downcast with `Arc::downcast`.
    pub fn user_info(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        lock(&self.inner.user_info).clone()
    }

    // ---- observable state -----------------------------------------------

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *lock(&self.inner.state)
    }

    /// Response metadata, present once the transport delivered headers
    pub fn response(&self) -> Option<ResponseInfo> {
        lock(&self.inner.response).clone()
    }

    /// HTTP status code, derived from the response when present
    pub fn http_status(&self) -> Option<u16> {
        lock(&self.inner.response)
            .as_ref()
            .map(ResponseInfo::http_status)
    }

    /// Terminal error, set at most once. Absent error plus Finished state is
    /// the success signal.
    pub fn error(&self) -> Option<Arc<Error>> {
        lock(&self.inner.error).clone()
    }

    /// The accumulated body. Populated only when no `on_data` callback was
    /// supplied; after Finished it is the exact concatenation, in arrival
    /// order, of every chunk the transport delivered.
    pub fn data(&self) -> Bytes {
        Bytes::from(lock(&self.inner.buffer).clone())
    }

    /// True once the connection completed, successfully or with an error
    pub fn is_finished(&self) -> bool {
        self.state() == ConnectionState::Finished
    }

    /// True once the connection was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.state() == ConnectionState::Cancelled
    }

    /// The dedup key this connection holds a reservation for, once enqueued
    pub fn resource_id(&self) -> Option<ResourceId> {
        lock(&self.inner.resource).clone()
    }

    // ---- lifecycle ------------------------------------------------------

    /// Submit the connection with the given request.
    ///
    /// Valid only from Created. Runs the admission check against the owning
    /// context (reporting the outcome through the context's on-request
    /// callback), reserves the resource, and spawns the driver task. Returns
    /// immediately; it never waits for a queue slot.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue_with_request(&self, request: Request) -> Result<()> {
        let resource = request.resource_id();

        {
            let state = lock(&self.inner.state);
            if *state != ConnectionState::Created {
                return Err(Error::InvalidState {
                    operation: "enqueue",
                    state: *state,
                });
            }
        }

        let on_request = self.inner.context.on_request();

        if let Err(err) = self.inner.context.try_reserve(&resource) {
            if let Some(callback) = on_request {
                callback(false);
            }
            return Err(err);
        }

        {
            let mut state = lock(&self.inner.state);
            if *state != ConnectionState::Created {
                // Lost a race with cancel(); give the reservation back.
                self.inner.context.release(&resource);
                return Err(Error::InvalidState {
                    operation: "enqueue",
                    state: *state,
                });
            }
            *state = ConnectionState::Enqueued;
        }
        *lock(&self.inner.resource) = Some(resource.clone());

        tracing::debug!(
            resource = %resource,
            queue = self.inner.context.queue().name(),
            "Connection enqueued"
        );

        if let Some(callback) = on_request {
            callback(true);
        }

        let connection = self.clone();
        tokio::spawn(async move {
            connection.run(request).await;
        });

        Ok(())
    }

    /// Cancel the connection.
    ///
    /// From Created the connection moves straight to Cancelled: no
    /// `on_response` or `on_data` will ever fire, but `on_finished` still
    /// fires once with a cancellation error. From Enqueued/Running the
    /// transport operation is asked to abort; no further callbacks are
    /// dispatched except the single terminal `on_finished`. On terminal
    /// connections this is a no-op.
    ///
    /// Returns without waiting for the abort; use
    /// [`cancel_and_wait`](Self::cancel_and_wait) when callback quiescence
    /// must be guaranteed.
    pub fn cancel(&self) {
        let from_created = {
            let state = lock(&self.inner.state);
            match *state {
                ConnectionState::Created => true,
                ConnectionState::Enqueued | ConnectionState::Running => false,
                ConnectionState::Finished | ConnectionState::Cancelled => return,
            }
        };

        tracing::debug!(resource = ?self.resource_id(), "Cancelling connection");

        if from_created {
            // Never scheduled; finish synchronously.
            self.finish(Err(Error::Cancelled));
        } else {
            self.inner.cancel.cancel();
        }
    }

    /// Cancel and wait until no further callback invocation can occur.
    ///
    /// Returns only after the terminal `on_finished` has completed, so state
    /// captured by the callbacks can be dropped safely afterward. Safe to
    /// call on a connection that already reached a terminal state.
    pub async fn cancel_and_wait(&self) {
        self.cancel();
        self.finished().await;
    }

    /// Wait until the connection has reached a terminal state and its last
    /// callback invocation has completed.
    ///
    /// Does not cancel anything. A connection that was never enqueued and
    /// never cancelled stays in Created forever; this would wait forever
    /// for it.
    pub async fn finished(&self) {
        let mut done = self.inner.done_tx.subscribe();
        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                break;
            }
        }
    }

    // ---- driver ---------------------------------------------------------

    async fn run(self, request: Request) {
        // The Arc clone keeps the queue alive until this task finishes.
        let queue = Arc::clone(self.inner.context.queue());
        let token = self.inner.cancel.clone();

        let permit = tokio::select! {
            _ = token.cancelled() => {
                self.finish(Err(Error::Cancelled));
                return;
            }
            permit = queue.acquire() => match permit {
                Some(permit) => permit,
                None => {
                    self.finish(Err(Error::Cancelled));
                    return;
                }
            },
        };

        {
            let mut state = lock(&self.inner.state);
            if state.is_terminal() {
                return;
            }
            *state = ConnectionState::Running;
        }

        let result = self.execute(&request, &token).await;
        drop(permit);
        self.finish(result);
    }

    async fn execute(&self, request: &Request, token: &CancellationToken) -> Result<()> {
        let mut response = tokio::select! {
            _ = token.cancelled() => return Err(Error::Cancelled),
            sent = self.send(request, None) => sent?,
        };

        if let Some(retried) = self.answer_challenge(request, &response, token).await? {
            response = retried;
        }

        let info = ResponseInfo {
            url: response.url().clone(),
            status: response.status(),
            headers: response.headers().clone(),
            content_length: response.content_length(),
        };
        *lock(&self.inner.response) = Some(info.clone());

        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let on_response = lock(&self.inner.callbacks).on_response.take();
        if let Some(callback) = on_response {
            callback(&info);
        }

        let mut body = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                _ = token.cancelled() => return Err(Error::Cancelled),
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(Ok(chunk)) => self.deliver_chunk(chunk),
                Some(Err(err)) => return Err(Error::Network(err)),
                None => break,
            }
        }

        self.offer_to_cache(info).await;
        Ok(())
    }

    async fn send(
        &self,
        request: &Request,
        credentials: Option<&Credentials>,
    ) -> Result<reqwest::Response> {
        let mut builder = self
            .inner
            .context
            .client()
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());
        if let Some(body) = request.body_bytes() {
            builder = builder.body(body.clone());
        }
        if let Some(credentials) = credentials {
            builder = builder.basic_auth(&credentials.username, Some(&credentials.password));
        }
        Ok(builder.send().await?)
    }

    /// On a 401/407 with a configured delegate, consult it once and re-send
    /// with Basic credentials. Returns the retried response, or `None` when
    /// the original response stands.
    async fn answer_challenge(
        &self,
        request: &Request,
        response: &reqwest::Response,
        token: &CancellationToken,
    ) -> Result<Option<reqwest::Response>> {
        let proxy = match response.status() {
            StatusCode::UNAUTHORIZED => false,
            StatusCode::PROXY_AUTHENTICATION_REQUIRED => true,
            _ => return Ok(None),
        };
        let Some(delegate) = self.inner.context.authentication() else {
            return Ok(None);
        };

        let header_name = if proxy { PROXY_AUTHENTICATE } else { WWW_AUTHENTICATE };
        let header = response
            .headers()
            .get(header_name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("Basic");
        let challenge = parse_challenge(request.url(), header, proxy);

        tracing::debug!(
            url = %challenge.url,
            scheme = %challenge.scheme,
            realm = ?challenge.realm,
            proxy,
            "Forwarding authentication challenge"
        );

        let Some(credentials) = delegate.credentials(&challenge).await else {
            return Ok(None);
        };

        let retried = tokio::select! {
            _ = token.cancelled() => return Err(Error::Cancelled),
            sent = self.send(request, Some(&credentials)) => sent?,
        };
        Ok(Some(retried))
    }

    fn deliver_chunk(&self, chunk: Bytes) {
        // Take the callback out so user code never runs under our lock.
        let callback = lock(&self.inner.callbacks).on_data.take();
        match callback {
            Some(mut callback) => {
                callback(chunk);
                lock(&self.inner.callbacks).on_data = Some(callback);
            }
            None => lock(&self.inner.buffer).extend_from_slice(&chunk),
        }
    }

    async fn offer_to_cache(&self, info: ResponseInfo) {
        let Some(cache) = self.inner.context.cache() else {
            return;
        };
        // A streamed body is gone by now; only buffered bodies are cached.
        if lock(&self.inner.callbacks).on_data.is_some() {
            return;
        }
        let Some(key) = self.resource_id() else {
            return;
        };

        let candidate = CachedResponse {
            info,
            body: self.data(),
        };
        let on_will_cache = lock(&self.inner.callbacks).on_will_cache.take();
        let decision = match on_will_cache {
            Some(callback) => callback(candidate),
            None => Some(candidate),
        };
        match decision {
            Some(response) => cache.store(key, response).await,
            None => tracing::debug!(resource = %key, "Caching suppressed by callback"),
        }
    }

    /// Terminal transition; first caller wins, everyone else is a no-op.
    ///
    /// Releases the context's dedup reservation regardless of outcome,
    /// invokes `on_finished` exactly once, and signals quiescence for
    /// `cancel_and_wait`.
    fn finish(&self, result: Result<()>) {
        {
            let mut state = lock(&self.inner.state);
            if state.is_terminal() {
                return;
            }
            *state = match &result {
                Err(Error::Cancelled) => ConnectionState::Cancelled,
                _ => ConnectionState::Finished,
            };
        }

        if let Err(err) = result {
            *lock(&self.inner.error) = Some(Arc::new(err));
        }

        if let Some(resource) = lock(&self.inner.resource).take() {
            self.inner.context.release(&resource);
        }

        tracing::debug!(
            state = %self.state(),
            status = ?self.http_status(),
            error = ?self.error().map(|e| e.to_string()),
            "Connection reached terminal state"
        );

        let callback = lock(&self.inner.callbacks).on_finished.take();
        if let Some(callback) = callback {
            callback(self);
        }

        let _ = self.inner.done_tx.send(true);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("resource", &self.resource_id())
            .field("status", &self.http_status())
            .finish()
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::queue::Queue;
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context() -> RequestContext {
        RequestContext::new(Queue::new(1))
    }

    #[tokio::test]
    #[serial(global_settings)]
    async fn new_connection_starts_created() {
        config::reset();
        let connection = context().connection();
        assert_eq!(connection.state(), ConnectionState::Created);
        assert!(connection.response().is_none());
        assert!(connection.error().is_none());
        assert!(connection.data().is_empty());
    }

    #[tokio::test]
    #[serial(global_settings)]
    async fn cancel_before_enqueue_finishes_with_cancellation() {
        config::reset();
        let connection = context().connection();
        let finished = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&finished);
        connection.set_on_finished(move |conn| {
            assert!(conn.is_cancelled());
            assert!(conn.error().unwrap().is_cancelled());
            counter.fetch_add(1, Ordering::SeqCst);
        });
        connection.set_on_response(|_| panic!("on_response after pre-enqueue cancel"));
        connection.set_on_data(|_| panic!("on_data after pre-enqueue cancel"));

        connection.cancel();
        assert_eq!(connection.state(), ConnectionState::Cancelled);
        assert_eq!(finished.load(Ordering::SeqCst), 1);

        // Terminal states are absorbing.
        connection.cancel();
        connection.cancel_and_wait().await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[serial(global_settings)]
    async fn enqueue_refused_after_terminal_state() {
        config::reset();
        let connection = context().connection();
        connection.cancel();

        let err = connection
            .enqueue_with_request(Request::get("http://example.invalid/a").unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                operation: "enqueue",
                state: ConnectionState::Cancelled,
            }
        ));
    }

    #[tokio::test]
    #[serial(global_settings)]
    async fn user_info_round_trips() {
        config::reset();
        let connection = context().connection();
        connection.set_user_info(String::from("tag"));

        let info = connection.user_info().unwrap();
        let tag: Arc<String> = info.downcast().unwrap();
        assert_eq!(tag.as_str(), "tag");
    }
}
