//! Error types for urlconn
//!
//! Three failure classes reach callers in different ways:
//! - Admission errors ([`Error::DuplicateResource`], [`Error::InvalidState`])
//!   are returned synchronously from the call that caused them; no connection
//!   is created and `on_finished` never fires for them.
//! - Terminal errors ([`Error::Network`], [`Error::Cancelled`]) are stored on
//!   the connection and delivered through its single `on_finished` callback.
//! - [`Error::InvalidUrl`] is returned when building a request description.

use crate::types::{ConnectionState, ResourceId};
use thiserror::Error;

/// Result type alias for urlconn operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for urlconn
#[derive(Debug, Error)]
pub enum Error {
    /// Another connection for the same resource is already in flight under
    /// this context and unique-resource enforcement is active.
    ///
    /// Reported synchronously at admission time, never via `on_finished`.
    #[error("resource already in flight: {resource}")]
    DuplicateResource {
        /// The resource identifier that was refused admission
        resource: ResourceId,
    },

    /// The underlying transport reported a failure (DNS, TLS, timeout,
    /// connection refused, malformed response). The cause is whatever
    /// `reqwest` surfaced; no retry is attempted.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The connection reached its terminal state through an explicit cancel.
    #[error("connection cancelled")]
    Cancelled,

    /// Operation not valid in the connection's current state
    #[error("cannot {operation} connection in state {state:?}")]
    InvalidState {
        /// The operation that was attempted (e.g., "enqueue")
        operation: &'static str,
        /// The state that refused it
        state: ConnectionState,
    },

    /// The request target could not be parsed as a URL
    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        /// The string that failed to parse
        url: String,
        /// The underlying parse error
        #[source]
        source: url::ParseError,
    },
}

impl Error {
    /// True when this error marks an explicit cancellation.
    ///
    /// `on_finished` callbacks use this to distinguish a cancelled connection
    /// from a transport failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// True when this error was an admission refusal (duplicate resource).
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Error::DuplicateResource { .. })
    }
}
