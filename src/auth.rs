//! OSS credential extraction.
//!
//! The gateway accepts the two legacy OSS credential forms:
//! - `Authorization: OSS <AccessKeyId>:<Signature>` (header-based auth)
//! - `OSSAccessKeyId=..&Expires=..&Signature=..` query parameters
//!   (presigned URLs)
//!
//! Secrets never reach this process.  Extraction only pulls out the access
//! key and the client's signature; verification happens behind the backend
//! against the token built by [`crate::signer`].

use http::HeaderMap;
use percent_encoding::percent_decode_str;
use std::collections::BTreeMap;

use crate::errors::OssError;

/// Query parameter carrying the access key of a presigned URL.
pub const QUERY_ACCESS_KEY: &str = "OSSAccessKeyId";

/// Accepted alternate spelling of [`QUERY_ACCESS_KEY`].
pub const QUERY_ACCESS_KEY_ALIAS: &str = "AccessKeyId";

/// Scheme prefix of the `Authorization` header.
const AUTH_SCHEME: &str = "OSS ";

// ── Parsed types ────────────────────────────────────────────────────

/// The credential form a request used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// `Authorization: OSS ak:sig` header.
    Header,
    /// Presigned query parameters.
    Query,
}

/// Access key and signature pulled out of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub signature: String,
    pub mode: AuthMode,
}

/// Who the caller is, as far as the backend has told us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// No backend call has succeeded yet.
    Unresolved,
    /// Account and user echoed back by the backend.
    Resolved { account: String, user: String },
}

/// Per-request authentication state.
///
/// Credentials are fixed at construction.  The identity starts out
/// [`Identity::Unresolved`] and moves to [`Identity::Resolved`] exactly
/// once, after the first backend round trip that echoes it.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub access_key: String,
    pub signature: String,
    pub mode: AuthMode,
    /// Request time in epoch seconds, when one was supplied.
    pub timestamp: Option<i64>,
    identity: Identity,
}

impl AuthContext {
    pub fn new(credentials: Credentials, timestamp: Option<i64>) -> Self {
        Self {
            access_key: credentials.access_key,
            signature: credentials.signature,
            mode: credentials.mode,
            timestamp,
            identity: Identity::Unresolved,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Account used in backend paths.  Before resolution this is the raw
    /// access key.
    pub fn account(&self) -> &str {
        match &self.identity {
            Identity::Resolved { account, .. } => account,
            Identity::Unresolved => &self.access_key,
        }
    }

    /// Resolved user id, if any.
    pub fn user_id(&self) -> Option<&str> {
        match &self.identity {
            Identity::Resolved { user, .. } => Some(user),
            Identity::Unresolved => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.identity, Identity::Resolved { .. })
    }

    /// Record the identity the backend reported.  Returns `false` (and
    /// leaves the context untouched) when it was already resolved.
    pub fn resolve(&mut self, account: impl Into<String>, user: impl Into<String>) -> bool {
        if self.is_resolved() {
            return false;
        }
        self.identity = Identity::Resolved {
            account: account.into(),
            user: user.into(),
        };
        true
    }

    /// The credential in `Authorization` header form.
    pub fn authorization_value(&self) -> String {
        format!("{AUTH_SCHEME}{}:{}", self.access_key, self.signature)
    }
}

// ── Detection ───────────────────────────────────────────────────────

/// Extract OSS credentials from a request.
///
/// Query parameters take precedence over the `Authorization` header when
/// both are present.  A request carrying neither is
/// [`OssError::NotOssRequest`]; one carrying an incomplete set is
/// [`OssError::AccessDenied`].
pub fn extract_credentials(
    headers: &HeaderMap,
    params: &BTreeMap<String, String>,
) -> Result<Credentials, OssError> {
    let query_key = params
        .get(QUERY_ACCESS_KEY)
        .or_else(|| params.get(QUERY_ACCESS_KEY_ALIAS));

    if let Some(access_key) = query_key {
        let has_expires = params.get("Expires").is_some_and(|v| !v.is_empty());
        let signature = params.get("Signature").filter(|v| !v.is_empty());
        return match (has_expires, signature) {
            (true, Some(signature)) if !access_key.is_empty() => Ok(Credentials {
                access_key: access_key.clone(),
                signature: signature.clone(),
                mode: AuthMode::Query,
            }),
            _ => Err(OssError::access_denied()),
        };
    }

    let Some(value) = headers.get(http::header::AUTHORIZATION) else {
        return Err(OssError::NotOssRequest);
    };
    let value = value.to_str().map_err(|_| OssError::access_denied())?;
    parse_authorization_header(value)
}

/// Parse `OSS <access>:<signature>`.  Other schemes are not ours.
pub fn parse_authorization_header(value: &str) -> Result<Credentials, OssError> {
    let rest = value
        .strip_prefix(AUTH_SCHEME)
        .ok_or(OssError::NotOssRequest)?;

    // Signatures are base64 and never contain ':'; access keys might.
    let (access_key, signature) = rest.rsplit_once(':').ok_or_else(OssError::access_denied)?;
    if access_key.is_empty() || signature.is_empty() {
        return Err(OssError::access_denied());
    }

    Ok(Credentials {
        access_key: access_key.to_string(),
        signature: signature.to_string(),
        mode: AuthMode::Header,
    })
}

/// Account segment of a backend path such as `/v1/AUTH_test/bucket/key`.
pub fn account_from_path(path: &str, api_version: &str) -> Option<String> {
    let mut parts = path.trim_start_matches('/').splitn(3, '/');
    if parts.next()? != api_version {
        return None;
    }
    parts
        .next()
        .filter(|account| !account.is_empty())
        .map(str::to_string)
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse a raw query string into decoded key/value pairs.  Repeated keys
/// keep their last value; keys without `=` map to the empty string.
pub fn parse_query_string(query: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        let (k, v) = part.split_once('=').unwrap_or((part, ""));
        map.insert(form_decode(k), form_decode(v));
    }
    map
}

fn form_decode(s: &str) -> String {
    let s = s.replace('+', " ");
    percent_decode_str(&s).decode_utf8_lossy().into_owned()
}

// ── Tests ───────────────────────────────────────────────────────────
