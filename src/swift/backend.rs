//! Abstract backend object-store trait.
//!
//! Every translated request ends up as a [`BackendCall`] handed to a
//! [`SwiftBackend`].  The trait is transport-agnostic so the gateway can
//! be driven against an in-process backend in tests.

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::future::Future;
use std::pin::Pin;

/// Path the backend actually served, after its auth layer rewrote it.
pub const BACKEND_PATH: &str = "x-backend-path";
/// Authenticated principal, set by the backend auth layer on success.
pub const BACKEND_REMOTE_USER: &str = "x-backend-remote-user";
/// Federated user name.  Its presence marks a federated identity.
pub const BACKEND_USER_NAME: &str = "x-backend-user-name";
/// Federated tenant (project) name.
pub const BACKEND_TENANT_NAME: &str = "x-backend-tenant-name";
/// Token issued by the federated identity service.
pub const BACKEND_AUTH_TOKEN: &str = "x-backend-auth-token";

/// Access-log treatment requested for a backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessLog {
    /// Let the backend decide.
    #[default]
    Default,
    /// Log even though an outer stage already logged the client request.
    Force,
    /// Do not log this call.
    Suppress,
}

/// One fully translated call to the backend.
#[derive(Debug, Clone)]
pub struct BackendCall {
    pub method: Method,
    pub account: String,
    pub container: Option<String>,
    pub object: Option<String>,
    /// Unencoded path: `/<api-version>/<account>[/<container>[/<object>]]`.
    pub path: String,
    /// Encoded query string without the leading `?`.
    pub query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub access_log: AccessLog,
    /// Identity was already established; downstream auth may skip checks.
    pub pre_authorized: bool,
}

/// What the backend answered.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl BackendResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Builder-style header insert.  Invalid values are skipped.
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Path echoed back by the backend, if any.
    pub fn resolved_path(&self) -> Option<&str> {
        self.header(BACKEND_PATH)
    }

    pub fn remote_user(&self) -> Option<&str> {
        self.header(BACKEND_REMOTE_USER).filter(|u| !u.is_empty())
    }

    /// `tenant:user` for a federated identity, `None` for shared-secret
    /// auth.
    pub fn federated_user(&self) -> Option<String> {
        let user = self.header(BACKEND_USER_NAME)?;
        let tenant = self.header(BACKEND_TENANT_NAME).unwrap_or_default();
        Some(format!("{tenant}:{user}"))
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.header(BACKEND_AUTH_TOKEN)
    }
}

/// Async backend contract.
pub trait SwiftBackend: Send + Sync + 'static {
    /// Execute one call.  Transport failures are errors; any HTTP status,
    /// including 4xx/5xx, is a successful [`BackendResponse`].
    fn call(
        &self,
        call: BackendCall,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<BackendResponse>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_headers() {
        let resp = BackendResponse::new(StatusCode::NO_CONTENT)
            .with_header(BACKEND_PATH, "/v1/AUTH_test")
            .with_header(BACKEND_REMOTE_USER, "test:tester")
            .with_header(BACKEND_USER_NAME, "tester")
            .with_header(BACKEND_TENANT_NAME, "test");
        assert_eq!(resp.resolved_path(), Some("/v1/AUTH_test"));
        assert_eq!(resp.remote_user(), Some("test:tester"));
        assert_eq!(resp.federated_user().as_deref(), Some("test:tester"));
        assert_eq!(resp.auth_token(), None);
    }

    #[test]
    fn test_shared_secret_has_no_federated_user() {
        let resp = BackendResponse::new(StatusCode::OK).with_header(BACKEND_REMOTE_USER, "");
        assert_eq!(resp.federated_user(), None);
        assert_eq!(resp.remote_user(), None);
    }
}
