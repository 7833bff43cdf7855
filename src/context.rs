//! Request contexts: queue binding, per-context policy, and in-flight
//! resource bookkeeping.
//!
//! A context is the namespace connections are created in. It owns the queue
//! handle, the transport client, the context-scoped on-request callback,
//! authentication delegate, and response cache, and the set of resource
//! identifiers currently in flight. Admission (the dedup check) and
//! reservation are one critical section on the in-flight table; the
//! reservation is released on the connection's terminal transition, whatever
//! the outcome.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

use crate::auth::AuthenticationDelegate;
use crate::cache::ResponseCache;
use crate::config;
use crate::connection::{Connection, OnFinished};
use crate::error::{Error, Result};
use crate::queue::Queue;
use crate::types::{OnRequest, Request, ResourceId};

/// Lock a mutex, recovering the data from a poisoned guard.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Context-scoped overrides applied on top of the global defaults.
///
/// Any field left `None` falls back to what the global settings held when
/// the context was created.
#[derive(Default)]
pub struct ContextConfig {
    /// Per-context override of unique-resource enforcement. When set it
    /// wins over the process-wide flag for this context's admission checks;
    /// when unset the live global setting applies.
    pub enforce_unique_requested_resource: Option<bool>,
    /// Admission-outcome callback for connections created in this context
    pub on_request: Option<OnRequest>,
    /// Authentication delegate consulted on 401/407 challenges
    pub authentication: Option<Arc<dyn AuthenticationDelegate>>,
    /// Cache offered completed, buffered responses
    pub cache: Option<Arc<dyn ResponseCache>>,
    /// Transport client; one is built when absent
    pub client: Option<reqwest::Client>,
}

struct ContextInner {
    queue: Arc<Queue>,
    client: reqwest::Client,
    enforce_unique: Option<bool>,
    on_request: Option<OnRequest>,
    authentication: Option<Arc<dyn AuthenticationDelegate>>,
    cache: Option<Arc<dyn ResponseCache>>,
    /// Reservation counts per resource. A count above one can only happen
    /// while enforcement is off; the reservation is dropped when the count
    /// reaches zero.
    in_flight: Mutex<HashMap<ResourceId, usize>>,
}

/// A queue-bound namespace for creating and tracking connections under
/// shared policy.
///
/// Cheap to clone; all clones share the same in-flight table.
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

static SHARED: LazyLock<Mutex<Option<RequestContext>>> = LazyLock::new(|| Mutex::new(None));

impl RequestContext {
    /// Create a context bound to the given queue, capturing the current
    /// global defaults for everything else.
    pub fn new(queue: Arc<Queue>) -> Self {
        Self::with_config(queue, ContextConfig::default())
    }

    /// Create a context whose on-request callback overrides the global
    /// default for connections created through it.
    pub fn with_on_request(queue: Arc<Queue>, on_request: OnRequest) -> Self {
        Self::with_config(
            queue,
            ContextConfig {
                on_request: Some(on_request),
                ..ContextConfig::default()
            },
        )
    }

    /// Create a context with explicit overrides; unset fields fall back to
    /// the global defaults captured now.
    pub fn with_config(queue: Arc<Queue>, overrides: ContextConfig) -> Self {
        let global = config::snapshot();
        tracing::debug!(queue = queue.name(), "Creating request context");
        Self {
            inner: Arc::new(ContextInner {
                queue,
                client: overrides.client.unwrap_or_default(),
                enforce_unique: overrides.enforce_unique_requested_resource,
                on_request: overrides.on_request.or(global.on_request),
                authentication: overrides.authentication.or(global.authentication),
                cache: overrides.cache.or(global.cache),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The process-wide shared context, created from the global settings on
    /// first use.
    ///
    /// The first call fixes the shared context's queue and defaults; global
    /// setters called afterward do not reach it (except the enforcement
    /// flag, which is always read live). [`crate::config::reset`] drops it
    /// so the next call rebuilds from fresh settings.
    pub fn shared() -> RequestContext {
        let mut slot = lock(&SHARED);
        if let Some(context) = slot.as_ref() {
            return context.clone();
        }
        let global = config::snapshot();
        let queue = global.queue.clone().unwrap_or_else(|| {
            Queue::named("shared", global.settings.default_queue_concurrency)
        });
        let context = Self::with_config(queue, ContextConfig::default());
        *slot = Some(context.clone());
        context
    }

    /// Drop the shared context; the next [`shared`](Self::shared) call
    /// rebuilds it from the current global settings.
    pub(crate) fn reset_shared() {
        *lock(&SHARED) = None;
    }

    /// Create a connection in the Created state with no request yet.
    ///
    /// Assign callbacks, then submit it with
    /// [`Connection::enqueue_with_request`].
    pub fn connection(&self) -> Connection {
        Connection::new(self.clone())
    }

    /// Create, configure, and enqueue a connection in one step.
    ///
    /// The admission check runs synchronously: if the resource is already in
    /// flight and enforcement is on, this fails with
    /// [`Error::DuplicateResource`] and no connection object is returned.
    pub fn connection_with_request(
        &self,
        request: Request,
        on_finished: OnFinished,
    ) -> Result<Connection> {
        let connection = self.connection();
        connection.set_on_finished_boxed(on_finished);
        connection.enqueue_with_request(request)?;
        Ok(connection)
    }

    /// Number of distinct resources currently reserved under this context
    pub fn in_flight_len(&self) -> usize {
        lock(&self.inner.in_flight).len()
    }

    /// True when the given resource currently holds a reservation
    pub fn is_in_flight(&self, resource: &ResourceId) -> bool {
        lock(&self.inner.in_flight).contains_key(resource)
    }

    /// The enforcement flag this context's admission checks use: the
    /// per-context override when one was configured, otherwise the live
    /// process-wide setting.
    pub fn enforces_unique_requested_resource(&self) -> bool {
        self.inner
            .enforce_unique
            .unwrap_or_else(config::enforce_unique_requested_resource)
    }

    /// Admission check and reservation, one critical section.
    ///
    /// With enforcement on (per-context override, or the live global flag),
    /// an existing reservation refuses admission. With enforcement off the
    /// reservation is counted so overlapping connections to one resource
    /// each release exactly their own share.
    pub(crate) fn try_reserve(&self, resource: &ResourceId) -> Result<()> {
        let mut in_flight = lock(&self.inner.in_flight);
        let count = in_flight.entry(resource.clone()).or_insert(0);
        if *count > 0 && self.enforces_unique_requested_resource() {
            // Entry was present before us; leave its count untouched.
            tracing::debug!(resource = %resource, "Admission refused, resource in flight");
            return Err(Error::DuplicateResource {
                resource: resource.clone(),
            });
        }
        *count += 1;
        Ok(())
    }

    /// Release one reservation for the resource.
    pub(crate) fn release(&self, resource: &ResourceId) {
        let mut in_flight = lock(&self.inner.in_flight);
        if let Some(count) = in_flight.get_mut(resource) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                in_flight.remove(resource);
            }
        }
    }

    pub(crate) fn queue(&self) -> &Arc<Queue> {
        &self.inner.queue
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.inner.client
    }

    pub(crate) fn on_request(&self) -> Option<OnRequest> {
        self.inner.on_request.clone()
    }

    pub(crate) fn authentication(&self) -> Option<Arc<dyn AuthenticationDelegate>> {
        self.inner.authentication.clone()
    }

    pub(crate) fn cache(&self) -> Option<Arc<dyn ResponseCache>> {
        self.inner.cache.clone()
    }
}
