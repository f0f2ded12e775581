//! OssBridge library: an OSS-protocol gateway in front of a Swift-style
//! object store.
//!
//! Incoming OSS requests are authenticated against the backend's auth
//! layer, translated into backend calls, and the answers are translated
//! back into OSS responses.  Requests that carry no OSS credentials pass
//! through to the backend untouched.

use std::sync::Arc;

pub mod acl;
pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod signer;
pub mod swift;
pub mod validate;
pub mod xml;

use crate::config::Config;
use crate::swift::backend::SwiftBackend;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Gateway configuration.
    pub config: Arc<Config>,
    /// Backend every translated call is sent to.
    pub backend: Arc<dyn SwiftBackend>,
}
