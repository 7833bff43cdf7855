//! Authentication delegate seam.
//!
//! The crate implements none of the challenge-response protocol itself. When
//! a connection receives a 401/407 and a delegate is configured, the
//! challenge header is parsed into an [`AuthChallenge`], the delegate is
//! consulted once, and the request is re-sent with Basic credentials if any
//! were supplied. A second refusal is surfaced to the caller as the final
//! response.

use async_trait::async_trait;
use url::Url;

/// An authentication challenge extracted from a 401/407 response
#[derive(Clone, Debug)]
pub struct AuthChallenge {
    /// The URL that was being fetched when the challenge arrived
    pub url: Url,
    /// Challenge scheme as sent by the server (e.g. "Basic", "Digest")
    pub scheme: String,
    /// The protection-space realm, when the server named one
    pub realm: Option<String>,
    /// True when the challenge came from a proxy (407) rather than the
    /// origin server (401)
    pub proxy: bool,
}

/// Username/password pair handed back by a delegate
#[derive(Clone)]
pub struct Credentials {
    /// Account name
    pub username: String,
    /// Account password
    pub password: String,
}

impl Credentials {
    /// Create a credentials pair
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Externally supplied capability consulted for authentication challenges.
///
/// Stored on the global settings or a context; the crate only forwards
/// challenges to it, it implements no auth protocol of its own.
#[async_trait]
pub trait AuthenticationDelegate: Send + Sync {
    /// Return credentials for the given challenge, or `None` to let the
    /// challenge response stand as the connection's final response.
    async fn credentials(&self, challenge: &AuthChallenge) -> Option<Credentials>;
}

/// Delegate answering every challenge with one fixed credentials pair
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    /// Create a delegate that always answers with the given pair
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::new(username, password),
        }
    }
}

#[async_trait]
impl AuthenticationDelegate for StaticCredentials {
    async fn credentials(&self, _challenge: &AuthChallenge) -> Option<Credentials> {
        Some(self.credentials.clone())
    }
}

/// Parse a `WWW-Authenticate`/`Proxy-Authenticate` header value.
///
/// Only the scheme token and a `realm="..."` parameter are extracted; other
/// parameters are delegate business.
pub(crate) fn parse_challenge(url: &Url, header: &str, proxy: bool) -> AuthChallenge {
    let mut parts = header.trim().splitn(2, char::is_whitespace);
    let scheme = parts.next().unwrap_or("Basic").to_string();
    let realm = parts.next().and_then(extract_realm);
    AuthChallenge {
        url: url.clone(),
        scheme,
        realm,
        proxy,
    }
}

fn extract_realm(params: &str) -> Option<String> {
    for param in params.split(',') {
        let param = param.trim();
        if let Some(value) = param.strip_prefix("realm=") {
            return Some(value.trim_matches('"').to_string());
        }
    }
    None
}
