//! HTTP transport to the backend proxy.
//!
//! Forwards each [`BackendCall`] to the configured endpoint with
//! `reqwest`.  Control markers that only make sense inside one process
//! (access-log treatment, pre-authorization) travel as backend control
//! headers.

use http::{HeaderMap, HeaderName, HeaderValue};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info};

use super::backend::{AccessLog, BackendCall, BackendResponse, SwiftBackend};
use super::mapper::encode_path;
use crate::config::BackendConfig;

/// Control header carrying the [`AccessLog`] marker.
pub const ACCESS_LOG_HEADER: &str = "x-backend-access-log";
/// Control header set on pre-authorized calls.
pub const PRE_AUTHORIZED_HEADER: &str = "x-backend-pre-authorized";
/// Control header naming the calling middleware.
pub const SOURCE_HEADER: &str = "x-backend-source";

/// Headers scoped to a single connection; never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Backend reached over HTTP.
pub struct HttpSwiftBackend {
    client: reqwest::Client,
    /// Base URL without a trailing slash.
    endpoint: String,
}

impl HttpSwiftBackend {
    pub fn new(config: &BackendConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        info!("HTTP backend initialized: endpoint={}", endpoint);

        Ok(Self { client, endpoint })
    }

    /// Full URL for `call`.
    pub fn url_for(&self, call: &BackendCall) -> String {
        let mut url = format!("{}{}", self.endpoint, encode_path(&call.path));
        if !call.query.is_empty() {
            url.push('?');
            url.push_str(&call.query);
        }
        url
    }

    async fn send(&self, call: BackendCall) -> anyhow::Result<BackendResponse> {
        let url = self.url_for(&call);
        let headers = outgoing_headers(&call);

        let resp = self
            .client
            .request(call.method.clone(), &url)
            .headers(headers)
            .body(call.body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Backend request {} {} failed: {}", call.method, url, e))?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp
            .bytes()
            .await
            .map_err(|e| anyhow::anyhow!("Backend response body read failed: {}", e))?;

        debug!(method = %call.method, path = %call.path, status = status.as_u16(), "backend call");

        Ok(BackendResponse {
            status,
            headers,
            body,
        })
    }
}

/// Call headers minus hop-by-hop ones, plus the control markers.
fn outgoing_headers(call: &BackendCall) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(call.headers.len() + 3);
    for (name, value) in call.headers.iter() {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    headers.insert(HeaderName::from_static(SOURCE_HEADER), HeaderValue::from_static("OSS"));
    match call.access_log {
        AccessLog::Default => {}
        AccessLog::Force => {
            headers.insert(HeaderName::from_static(ACCESS_LOG_HEADER), HeaderValue::from_static("force"));
        }
        AccessLog::Suppress => {
            headers.insert(HeaderName::from_static(ACCESS_LOG_HEADER), HeaderValue::from_static("suppress"));
        }
    }
    if call.pre_authorized {
        headers.insert(HeaderName::from_static(PRE_AUTHORIZED_HEADER), HeaderValue::from_static("true"));
    }
    headers
}

impl SwiftBackend for HttpSwiftBackend {
    fn call(
        &self,
        call: BackendCall,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<BackendResponse>> + Send + '_>> {
        Box::pin(self.send(call))
    }
}
