//! Request key derivation.

use serde::{Deserialize, Serialize};

/// Key used when no client address is available. Deriving a key must never
/// fail a request, so missing inputs collapse onto this fixed sentinel.
pub const FALLBACK_KEY: &str = "unknown";

/// The slice of an inbound request the limiter consumes: the client address,
/// the request path, and the identity attached by upstream auth middleware,
/// if any ran.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    /// Client address, absent when the transport did not provide one
    pub client_addr: Option<String>,
    /// Request path
    pub path: String,
    /// Authenticated user id, if an auth step ran and succeeded
    pub user_id: Option<i64>,
    /// Authenticated username, if an auth step ran and succeeded
    pub username: Option<String>,
}

/// How a request is reduced to the identity string that partitions the
/// counter store. Each variant is a pure, total function of the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// The raw client address
    ClientAddr,
    /// `user:<id>` when authenticated, otherwise the client address
    UserId,
    /// `username:<name>` when authenticated, otherwise the client address
    Username,
    /// `endpoint:<path>`, aggregating all callers of a path
    Endpoint,
    /// `<address>:<path>` composite
    AddrEndpoint,
}

impl KeyStrategy {
    /// Derive the counter key for a request.
    pub fn derive(&self, request: &RequestInfo) -> String {
        match self {
            KeyStrategy::ClientAddr => client_addr(request),
            KeyStrategy::UserId => match request.user_id {
                Some(id) => format!("user:{}", id),
                None => client_addr(request),
            },
            KeyStrategy::Username => match &request.username {
                Some(name) => format!("username:{}", name),
                None => client_addr(request),
            },
            KeyStrategy::Endpoint => format!("endpoint:{}", request.path),
            KeyStrategy::AddrEndpoint => {
                format!("{}:{}", client_addr(request), request.path)
            }
        }
    }
}

fn client_addr(request: &RequestInfo) -> String {
    request
        .client_addr
        .clone()
        .unwrap_or_else(|| FALLBACK_KEY.to_string())
}
