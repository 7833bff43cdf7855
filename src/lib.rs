//! # urlconn
//!
//! Callback-based HTTP connection library: issue requests and receive
//! response/data/completion notifications via closures instead of wiring up
//! a delegate protocol. The actual network work (connections, TLS,
//! redirects, proxies) is done by `reqwest`; this crate contributes request
//! enqueuing on concurrency-bounded queues, per-connection callback dispatch
//! with documented call-count guarantees, single-flight deduplication of
//! identical in-flight resources, and cancellation.
//!
//! Callbacks run on the connection's driver task, never on the thread that
//! submitted the connection.
//!
//! ## Quick Start
//!
//! ```no_run
//! use urlconn::{Request, RequestContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let context = RequestContext::shared();
//!
//!     let connection = context.connection_with_request(
//!         Request::get("https://www.example.com/")?,
//!         Box::new(|conn| {
//!             match conn.error() {
//!                 None => println!(
//!                     "status {:?}, {} bytes",
//!                     conn.http_status(),
//!                     conn.data().len()
//!                 ),
//!                 Some(err) => eprintln!("failed: {err}"),
//!             }
//!         }),
//!     )?;
//!
//!     connection.finished().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Custom queue context
//!
//! ```no_run
//! use std::sync::Arc;
//! use urlconn::{Queue, Request, RequestContext};
//!
//! # fn example() -> urlconn::Result<()> {
//! let queue = Queue::new(2);
//! let context = RequestContext::with_on_request(
//!     queue,
//!     Arc::new(|started| println!("admission: {started}")),
//! );
//!
//! let connection = context.connection();
//! connection.set_on_response(|info| println!("status {}", info.http_status()));
//! connection.set_on_data(|chunk| println!("{} bytes", chunk.len()));
//! connection.set_on_finished(|_conn| println!("done"));
//! connection.enqueue_with_request(Request::get("https://www.example.com/")?)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Authentication delegate seam
pub mod auth;
/// Response cache seam
pub mod cache;
/// Process-wide settings
pub mod config;
/// Connection lifecycle and callback dispatch
pub mod connection;
/// Request contexts and in-flight bookkeeping
pub mod context;
/// Error types
pub mod error;
/// Concurrency-bounded queues
pub mod queue;
/// Core types
pub mod types;

// Re-export commonly used types
pub use auth::{AuthChallenge, AuthenticationDelegate, Credentials, StaticCredentials};
pub use cache::{CachedResponse, MemoryCache, OnWillCache, ResponseCache};
pub use config::{
    Settings, reset, set_authentication_delegate, set_enforce_unique_requested_resource,
    set_on_request, set_queue, set_response_cache,
};
pub use connection::{Connection, OnFinished};
pub use context::{ContextConfig, RequestContext};
pub use error::{Error, Result};
pub use queue::Queue;
pub use types::{
    ConnectionState, OnData, OnRequest, OnResponse, Request, ResourceId, ResponseInfo,
};
