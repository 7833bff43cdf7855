//! Process-wide settings for urlconn.
//!
//! Global configuration lives in one explicitly constructed
//! [`GlobalSettings`] value held in a single process-wide slot, never in
//! loose globals. Two kinds of setting live here:
//!
//! - `enforce_unique_requested_resource` is read live at every admission
//!   check, so toggling it affects all future admissions in every context
//!   that has not configured its own override
//!   (`ContextConfig::enforce_unique_requested_resource`).
//! - The default on-request callback, authentication delegate, response
//!   cache, and queue are captured by contexts at creation time; changing
//!   them affects contexts created afterward, not existing ones.
//!
//! [`reset`] restores defaults and drops the shared context; tests that
//! touch global settings serialize themselves with `serial_test` and call it
//! between cases.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock, RwLock};

use crate::auth::AuthenticationDelegate;
use crate::cache::ResponseCache;
use crate::queue::Queue;
use crate::types::OnRequest;

/// Plain-data settings (the serializable part of the global configuration)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    /// Refuse admission for a resource already in flight under the same
    /// context (default: true)
    #[serde(default = "default_true")]
    pub enforce_unique_requested_resource: bool,

    /// Concurrency bound used when the shared context has to build its own
    /// queue (default: 4)
    #[serde(default = "default_queue_concurrency")]
    pub default_queue_concurrency: usize,
}

fn default_true() -> bool {
    true
}

fn default_queue_concurrency() -> usize {
    4
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enforce_unique_requested_resource: default_true(),
            default_queue_concurrency: default_queue_concurrency(),
        }
    }
}

/// The full global configuration: plain settings plus the default callback,
/// delegate, cache, and queue slots captured by new contexts.
#[derive(Clone, Default)]
pub struct GlobalSettings {
    /// Plain-data settings
    pub settings: Settings,
    pub(crate) on_request: Option<OnRequest>,
    pub(crate) authentication: Option<Arc<dyn AuthenticationDelegate>>,
    pub(crate) cache: Option<Arc<dyn ResponseCache>>,
    pub(crate) queue: Option<Arc<Queue>>,
}

static GLOBAL: LazyLock<RwLock<GlobalSettings>> =
    LazyLock::new(|| RwLock::new(GlobalSettings::default()));

fn read() -> GlobalSettings {
    GLOBAL
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

fn write(apply: impl FnOnce(&mut GlobalSettings)) {
    let mut guard = GLOBAL
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    apply(&mut guard);
}

/// Whether duplicate in-flight resources are refused admission.
///
/// Read live by every admission check.
pub fn enforce_unique_requested_resource() -> bool {
    GLOBAL
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .settings
        .enforce_unique_requested_resource
}

/// Globally set whether in-flight requested resources must be unique.
///
/// Affects all future admission checks in every context, including ones
/// created before the call, except contexts carrying their own
/// `ContextConfig::enforce_unique_requested_resource` override.
pub fn set_enforce_unique_requested_resource(enforce: bool) {
    tracing::debug!(enforce, "Setting unique-resource enforcement");
    write(|global| global.settings.enforce_unique_requested_resource = enforce);
}

/// Set the default on-request callback for contexts created afterward.
///
/// Pass `None` to clear. Existing contexts keep whatever they captured.
pub fn set_on_request(callback: Option<OnRequest>) {
    write(|global| global.on_request = callback);
}

/// Set the default authentication delegate for contexts created afterward.
pub fn set_authentication_delegate(delegate: Option<Arc<dyn AuthenticationDelegate>>) {
    write(|global| global.authentication = delegate);
}

/// Set the default response cache for contexts created afterward.
pub fn set_response_cache(cache: Option<Arc<dyn ResponseCache>>) {
    write(|global| global.cache = cache);
}

/// Set the default queue used by the shared context and by contexts that do
/// not bring their own.
///
/// Takes effect for contexts created afterward, not retroactively.
pub fn set_queue(queue: Option<Arc<Queue>>) {
    write(|global| global.queue = queue);
}

/// Snapshot of the current global configuration, captured by new contexts
pub(crate) fn snapshot() -> GlobalSettings {
    read()
}

/// Restore default settings and drop the shared context.
///
/// Intended for tests; connections already in flight are unaffected.
pub fn reset() {
    tracing::debug!("Resetting global settings");
    write(|global| *global = GlobalSettings::default());
    crate::context::RequestContext::reset_shared();
}
