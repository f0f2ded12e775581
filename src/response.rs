//! Backend response translation and status mapping.
//!
//! Every backend round trip goes through [`OssRequest::get_response`].
//! For object targets a container HEAD is sent first so a missing bucket
//! is reported as such instead of as a missing key.  The real call's
//! status is then matched against a per-(method, resource) success table,
//! then an error table, then a few generic fallbacks.  Anything left over
//! is an internal error naming the status.

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::header::{HeaderName, CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, warn};

use crate::acl::{AclDescriptor, CannedAcl, CONTAINER_READ, CONTAINER_WRITE};
use crate::auth::account_from_path;
use crate::errors::OssError;
use crate::metrics::record_backend_call;
use crate::request::OssRequest;
use crate::swift::backend::{BackendCall, BackendResponse, SwiftBackend};
use crate::swift::mapper::{decode_header_value, Call, Target, OBJECT_META_PREFIX, OSS_META_PREFIX};

/// Entity headers copied to the client unchanged.
const PASS_THROUGH_HEADERS: &[&str] = &[
    "accept-ranges",
    "cache-control",
    "content-disposition",
    "content-encoding",
    "content-language",
    "content-length",
    "content-range",
    "content-type",
    "expires",
    "last-modified",
];

const CONTAINER_SYSMETA_PREFIX: &str = "x-container-sysmeta-";
const OBJECT_SYSMETA_PREFIX: &str = "x-object-sysmeta-";
const WEB_INDEX_META: &str = "x-container-meta-web-index";
const WEB_ERROR_META: &str = "x-container-meta-web-error";
const STATIC_LARGE_OBJECT: &str = "x-static-large-object";

/// Client-facing headers set by the website and large-object handling.
pub const OSS_OBJECT_TYPE: &str = "x-oss-object-type";
pub const OSS_WEB_INDEX: &str = "x-oss-web-index";
pub const OSS_WEB_ERROR: &str = "x-oss-web-error";
pub const OSS_INDEX: &str = "x-oss-index";
pub const OSS_WEBSITE_REDIRECT: &str = "x-oss-website-redirect";

/// A translated backend response, or a response a handler built itself.
#[derive(Debug, Clone, Default)]
pub struct GatewayResponse {
    pub status: StatusCode,
    /// Headers in the OSS namespace, ready for the client.
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Untranslated backend headers.
    pub backend_headers: HeaderMap,
    /// `x-container-sysmeta-*` and `x-object-sysmeta-*` values, keyed by
    /// lower-case header name.
    pub sysmeta: BTreeMap<String, String>,
    /// The object is a static large object.
    pub is_slo: bool,
    pub container_read: Option<String>,
    pub container_write: Option<String>,
    pub web_index: Option<String>,
    pub web_error: Option<String>,
    pub canned_acl: Option<CannedAcl>,
    pub bucket_acl: Option<AclDescriptor>,
    pub object_acl: Option<AclDescriptor>,
}

impl GatewayResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    /// Response carrying an XML document.
    pub fn xml(status: StatusCode, body: String) -> Self {
        let mut resp = Self::new(status);
        resp.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/xml"));
        resp.body = Bytes::from(body);
        resp
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set a client header.  Invalid values are skipped.
    pub fn set_header(&mut self, name: &'static str, value: &str) {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
    }

    /// Translate a raw backend response into the OSS namespace.
    pub fn from_backend(resp: BackendResponse) -> Self {
        let mut out = Self::new(resp.status);

        for (name, value) in resp.headers.iter() {
            let lower = name.as_str();

            if let Some(meta) = lower.strip_prefix(OBJECT_META_PREFIX) {
                let decoded = decode_header_value(&String::from_utf8_lossy(value.as_bytes()));
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(format!("{OSS_META_PREFIX}{meta}").as_bytes()),
                    HeaderValue::from_bytes(decoded.as_bytes()),
                ) {
                    out.headers.append(name, value);
                }
                continue;
            }

            if lower.starts_with(CONTAINER_SYSMETA_PREFIX) || lower.starts_with(OBJECT_SYSMETA_PREFIX)
            {
                out.sysmeta.insert(
                    lower.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                );
                continue;
            }

            let text = || value.to_str().ok().map(str::to_string);
            match lower {
                WEB_INDEX_META => out.web_index = text(),
                WEB_ERROR_META => out.web_error = text(),
                CONTAINER_READ => out.container_read = text(),
                CONTAINER_WRITE => out.container_write = text(),
                STATIC_LARGE_OBJECT => {
                    out.is_slo = value
                        .to_str()
                        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"))
                        .unwrap_or(false);
                }
                "etag" => {
                    let etag = String::from_utf8_lossy(value.as_bytes());
                    let quoted = if etag.starts_with('"') {
                        etag.into_owned()
                    } else {
                        format!("\"{etag}\"")
                    };
                    if let Ok(value) = HeaderValue::from_str(&quoted) {
                        out.headers.insert(ETAG, value);
                    }
                }
                _ if PASS_THROUGH_HEADERS.contains(&lower) => {
                    out.headers.append(name.clone(), value.clone());
                }
                _ => {}
            }
        }

        if out.is_slo {
            out.headers
                .insert(OSS_OBJECT_TYPE, HeaderValue::from_static("Multipart"));
        }

        out.backend_headers = resp.headers;
        out.body = resp.body;
        out
    }

    /// Copy website settings of the owning container onto this response.
    fn surface_website(&mut self, index: Option<&str>, error: Option<&str>) {
        if let Some(index) = index {
            self.set_header(OSS_WEB_INDEX, index);
        }
        if let Some(error) = error {
            self.set_header(OSS_WEB_ERROR, error);
        }
    }
}

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        let mut headers = self.headers;
        if !self.body.is_empty() {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(self.body.len()));
        }
        let mut response = Response::new(axum::body::Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = headers;
        response
    }
}

// -- Status tables ------------------------------------------------------------

/// Backend statuses that mean success for a call.
fn success_codes(method: &Method, target: &Target) -> &'static [u16] {
    match target {
        Target::Account => match *method {
            Method::GET | Method::HEAD => &[200, 204],
            _ => &[],
        },
        Target::Container(_) => match *method {
            Method::HEAD => &[204],
            Method::GET => &[200, 204],
            Method::PUT => &[201, 202],
            Method::POST | Method::DELETE => &[204],
            _ => &[],
        },
        Target::Object(..) => match *method {
            Method::HEAD | Method::GET => &[200, 206, 304],
            Method::PUT => &[201],
            Method::POST => &[202],
            Method::DELETE => &[200, 204],
            _ => &[],
        },
    }
}

impl OssRequest {
    /// Named protocol error for a non-success status, if the table has
    /// one.
    fn mapped_error(&self, method: &Method, target: &Target, status: StatusCode) -> Option<OssError> {
        let no_such_bucket = |c: &str| OssError::NoSuchBucket {
            bucket: c.to_string(),
        };
        let no_such_key = |o: &str| OssError::NoSuchKey { key: o.to_string() };

        match (target, method.as_str(), status.as_u16()) {
            (Target::Container(c), "HEAD" | "GET" | "POST" | "DELETE", 404) => Some(no_such_bucket(c)),
            (Target::Container(c), "DELETE", 409) => Some(OssError::BucketNotEmpty {
                bucket: c.clone(),
            }),
            (Target::Object(_, o), "HEAD" | "GET" | "POST" | "DELETE", 404) => Some(no_such_key(o)),
            (Target::Object(..), "HEAD" | "GET" | "POST", 412) => Some(OssError::PreconditionFailed),
            (Target::Object(..), "GET", 416) => Some(OssError::InvalidRange),
            (Target::Object(..), "PUT", 422) => Some(OssError::BadDigest {
                content_md5: self.header("content-md5").unwrap_or_default().to_string(),
            }),
            (Target::Object(..), "PUT", 413) => Some(OssError::EntityTooLarge),
            (Target::Object(..), "PUT", 411) => Some(OssError::MissingContentLength),
            (Target::Object(..), "PUT", 408) => Some(OssError::RequestTimeout),
            _ => None,
        }
    }

    // -- Call state machine ---------------------------------------------------

    /// Send `call` to the backend and translate the answer.  The strict
    /// ACL variant wraps the call in grant checks.
    pub async fn get_response(
        &mut self,
        backend: &dyn SwiftBackend,
        call: Call,
    ) -> Result<GatewayResponse, OssError> {
        if self.is_strict_acl() {
            self.acl_checked_response(backend, call).await
        } else {
            self.backend_response(backend, call).await
        }
    }

    /// One backend round trip without any ACL checks.
    pub async fn backend_response(
        &mut self,
        backend: &dyn SwiftBackend,
        call: Call,
    ) -> Result<GatewayResponse, OssError> {
        self.backend_response_in(backend, call, None).await
    }

    /// [`Self::backend_response`] for a caller that already fetched the
    /// owning container.  A supplied `container` stands in for the
    /// container pre-check of object calls.
    pub(crate) async fn backend_response_in(
        &mut self,
        backend: &dyn SwiftBackend,
        call: Call,
        container: Option<GatewayResponse>,
    ) -> Result<GatewayResponse, OssError> {
        let method = call.method.clone().unwrap_or_else(|| self.method.clone());
        let target = call.target.clone().unwrap_or_else(|| self.default_target());

        if target.object().is_some_and(|o| o.starts_with('/')) {
            return Err(OssError::InvalidObjectName);
        }

        let mut container_info = container;
        let precheck = match &target {
            Target::Object(container, _) if container_info.is_none() => Some(container.clone()),
            _ => None,
        };
        if let Some(container) = &precheck {
            let head = Call::new()
                .method(Method::HEAD)
                .container(container.clone())
                .body(Bytes::new());
            let head_target = Target::Container(container.clone());
            let backend_call = self.to_backend_call(&Method::HEAD, &head_target, &head)?;
            let resp = send(backend, backend_call).await?;
            self.resolve_identity(&resp);
            if resp.status == StatusCode::NOT_FOUND {
                debug!(bucket = %container, "bucket pre-check found no bucket");
                return Err(OssError::NoSuchBucket {
                    bucket: container.clone(),
                });
            }
            container_info = Some(GatewayResponse::from_backend(resp));
        }

        let backend_call = self.to_backend_call(&method, &target, &call)?;
        let raw = send(backend, backend_call).await?;
        self.resolve_identity(&raw);

        let mut resp = GatewayResponse::from_backend(raw);
        let status = resp.status;

        let info = container_info.as_ref().unwrap_or(&resp);
        let web_index = info.web_index.clone();
        let web_error = info.web_error.clone();
        resp.surface_website(web_index.as_deref(), web_error.as_deref());

        if success_codes(&method, &target).contains(&status.as_u16()) {
            return Ok(resp);
        }

        if status == StatusCode::NOT_FOUND {
            if let Some(object) = target.object() {
                if let (Some(index), true) = (web_index.as_deref(), object.ends_with('/')) {
                    resp.set_header(OSS_INDEX, index);
                    return Ok(resp);
                }
                if web_error.is_some() {
                    return Ok(resp);
                }
            }
        }

        if let Some(err) = self.mapped_error(&method, &target, status) {
            debug!(method = %method, status = status.as_u16(), code = err.code(), "backend status mapped to error");
            return Err(err);
        }

        match status {
            StatusCode::BAD_REQUEST => Err(OssError::MalformedRequest {
                message: String::from_utf8_lossy(&resp.body).into_owned(),
            }),
            StatusCode::UNAUTHORIZED => Err(OssError::SignatureDoesNotMatch),
            StatusCode::FORBIDDEN => Err(OssError::access_denied()),
            StatusCode::MOVED_PERMANENTLY => {
                resp.set_header(OSS_WEBSITE_REDIRECT, "true");
                Ok(resp)
            }
            _ => {
                warn!(method = %method, status = status.as_u16(), "unexpected backend status");
                Err(OssError::InternalError(anyhow::anyhow!(
                    "unexpected status code {}",
                    status.as_u16()
                )))
            }
        }
    }

    /// Adopt the identity the backend reports, once per request.
    fn resolve_identity(&mut self, resp: &BackendResponse) {
        if self.auth.is_resolved() {
            return;
        }
        let account = match resp.resolved_path() {
            Some(path) => account_from_path(path, &self.config.backend.api_version)
                .unwrap_or_else(|| self.auth.account().to_string()),
            None if resp.status.is_success() => self.auth.account().to_string(),
            None => return,
        };
        let user = resp
            .federated_user()
            .unwrap_or_else(|| self.auth.access_key.clone());
        debug!(account = %account, user = %user, "identity resolved");
        self.auth.resolve(account, user);
    }
}

/// Execute one backend call, recording its outcome.
pub(crate) async fn send(backend: &dyn SwiftBackend, call: BackendCall) -> Result<BackendResponse, OssError> {
    let method = call.method.to_string();
    let path = call.path.clone();
    let start = Instant::now();
    let result = backend.call(call).await;
    let elapsed = start.elapsed();

    match &result {
        Ok(resp) => {
            record_backend_call(&method, Some(resp.status.as_u16()), elapsed);
            debug!(method = %method, path = %path, status = resp.status.as_u16(), "backend call");
        }
        Err(err) => {
            record_backend_call(&method, None, elapsed);
            warn!(method = %method, path = %path, error = %err, "backend call failed");
        }
    }
    result.map_err(OssError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::tests::signed_request;
    use crate::swift::backend::BACKEND_PATH;
    use crate::swift::mapper::encode_header_value;
    use crate::swift::mock::MockBackend;

    const BUCKET_PATH: &str = "/v1/test:tester/mybucket";

    /// Bucket exists; every object call answers `status`.
    fn object_backend(status: StatusCode) -> MockBackend {
        MockBackend::new(move |call| {
            if call.path == BUCKET_PATH {
                BackendResponse::new(StatusCode::NO_CONTENT)
            } else {
                BackendResponse::new(status)
            }
        })
    }

    #[tokio::test]
    async fn test_put_object_end_to_end() {
        let backend = object_backend(StatusCode::CREATED);
        let mut req = signed_request(Method::PUT, "/mybucket/key1", &[]);
        let resp = req.get_response(&backend, Call::new()).await.unwrap();
        assert_eq!(resp.status, StatusCode::CREATED);
        assert_eq!(
            backend.call_lines(),
            vec![
                "HEAD /v1/test:tester/mybucket".to_string(),
                "PUT /v1/test:tester/mybucket/key1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_bucket_stops_before_object_call() {
        let backend = MockBackend::always(StatusCode::NOT_FOUND);
        let mut req = signed_request(Method::PUT, "/mybucket/key1", &[]);
        let err = req.get_response(&backend, Call::new()).await.unwrap_err();
        match err {
            OssError::NoSuchBucket { bucket } => assert_eq!(bucket, "mybucket"),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(backend.calls().len(), 1);

        let mut req = signed_request(Method::GET, "/mybucket/any", &[]);
        let err = req.get_response(&backend, Call::new()).await.unwrap_err();
        assert_eq!(err.code(), "NoSuchBucket");
    }

    #[tokio::test]
    async fn test_missing_key() {
        let backend = object_backend(StatusCode::NOT_FOUND);
        let mut req = signed_request(Method::GET, "/mybucket/gone", &[]);
        let err = req.get_response(&backend, Call::new()).await.unwrap_err();
        match err {
            OssError::NoSuchKey { key } => assert_eq!(key, "gone"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_table() {
        let cases = [
            (Method::DELETE, "/mybucket", StatusCode::CONFLICT, "BucketNotEmpty"),
            (Method::HEAD, "/mybucket", StatusCode::NOT_FOUND, "NoSuchBucket"),
            (Method::GET, "/mybucket/k", StatusCode::RANGE_NOT_SATISFIABLE, "InvalidRange"),
            (Method::HEAD, "/mybucket/k", StatusCode::PRECONDITION_FAILED, "PreconditionFailed"),
            (Method::PUT, "/mybucket/k", StatusCode::UNPROCESSABLE_ENTITY, "BadDigest"),
            (Method::PUT, "/mybucket/k", StatusCode::PAYLOAD_TOO_LARGE, "EntityTooLarge"),
            (Method::PUT, "/mybucket/k", StatusCode::LENGTH_REQUIRED, "MissingContentLength"),
            (Method::PUT, "/mybucket/k", StatusCode::REQUEST_TIMEOUT, "RequestTimeout"),
            (Method::GET, "/mybucket/k", StatusCode::UNAUTHORIZED, "SignatureDoesNotMatch"),
            (Method::GET, "/mybucket/k", StatusCode::FORBIDDEN, "AccessDenied"),
        ];
        for (method, uri, status, code) in cases {
            let backend = MockBackend::new(move |call| {
                if call.object.is_none() && uri.contains("/k") {
                    BackendResponse::new(StatusCode::NO_CONTENT)
                } else {
                    BackendResponse::new(status)
                }
            });
            let mut req = signed_request(method.clone(), uri, &[]);
            let err = req.get_response(&backend, Call::new()).await.unwrap_err();
            assert_eq!(err.code(), code, "{method} {uri} {status}");
        }
    }

    #[tokio::test]
    async fn test_bad_request_carries_backend_body() {
        let backend = MockBackend::new(|_| {
            BackendResponse::new(StatusCode::BAD_REQUEST).with_body("Invalid header")
        });
        let mut req = signed_request(Method::GET, "/mybucket", &[]);
        match req.get_response(&backend, Call::new()).await.unwrap_err() {
            OssError::MalformedRequest { message } => assert_eq!(message, "Invalid header"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unexpected_status_is_internal_error() {
        let backend = object_backend(StatusCode::IM_A_TEAPOT);
        let mut req = signed_request(Method::GET, "/mybucket/k", &[]);
        match req.get_response(&backend, Call::new()).await.unwrap_err() {
            OssError::InternalError(err) => assert!(err.to_string().contains("418")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_object_name() {
        let backend = MockBackend::always(StatusCode::OK);
        let mut req = signed_request(Method::GET, "/mybucket//lead", &[]);
        let err = req.get_response(&backend, Call::new()).await.unwrap_err();
        assert_eq!(err.code(), "InvalidObjectName");
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_identity_resolved_from_echoed_path() {
        let backend = MockBackend::new(|call| {
            if call.object.is_none() {
                BackendResponse::new(StatusCode::NO_CONTENT).with_header(BACKEND_PATH, "/v1/AUTH_test/mybucket")
            } else {
                BackendResponse::new(StatusCode::OK)
            }
        });
        let mut req = signed_request(Method::GET, "/mybucket/key1", &[]);
        req.get_response(&backend, Call::new()).await.unwrap();
        assert_eq!(backend.call_lines()[1], "GET /v1/AUTH_test/mybucket/key1");
        assert_eq!(req.auth.account(), "AUTH_test");
        assert_eq!(req.auth.user_id(), Some("test:tester"));
    }

    #[tokio::test]
    async fn test_website_index_on_directory_miss() {
        let backend = MockBackend::new(|call| {
            if call.object.is_none() {
                BackendResponse::new(StatusCode::NO_CONTENT)
                    .with_header(WEB_INDEX_META, "index.html")
                    .with_header(WEB_ERROR_META, "error.html")
            } else {
                BackendResponse::new(StatusCode::NOT_FOUND)
            }
        });
        let mut req = signed_request(Method::GET, "/mybucket/docs/", &[]);
        let resp = req.get_response(&backend, Call::new()).await.unwrap();
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
        assert_eq!(resp.header(OSS_INDEX), Some("index.html"));
        assert_eq!(resp.header(OSS_WEB_ERROR), Some("error.html"));

        let mut req = signed_request(Method::GET, "/mybucket/missing.html", &[]);
        let resp = req.get_response(&backend, Call::new()).await.unwrap();
        assert_eq!(resp.header(OSS_INDEX), None);
        assert_eq!(resp.header(OSS_WEB_INDEX), Some("index.html"));
    }

    #[tokio::test]
    async fn test_redirect_marker() {
        let backend = object_backend(StatusCode::MOVED_PERMANENTLY);
        let mut req = signed_request(Method::GET, "/mybucket/k", &[]);
        let resp = req.get_response(&backend, Call::new()).await.unwrap();
        assert_eq!(resp.header(OSS_WEBSITE_REDIRECT), Some("true"));
    }

    #[test]
    fn test_from_backend_translates_headers() {
        let encoded = encode_header_value("héllo");
        let raw = BackendResponse::new(StatusCode::OK)
            .with_header("x-object-meta-name", &encoded)
            .with_header("x-object-meta-plain", "value")
            .with_header("etag", "d41d8cd98f00b204e9800998ecf8427e")
            .with_header("content-type", "text/plain")
            .with_header("x-object-sysmeta-oss-acl", "{}")
            .with_header("x-trans-id", "tx123")
            .with_header(STATIC_LARGE_OBJECT, "True")
            .with_body("abc");
        let resp = GatewayResponse::from_backend(raw);

        assert_eq!(
            resp.headers.get("x-oss-meta-name").unwrap().as_bytes(),
            "héllo".as_bytes()
        );
        assert_eq!(resp.header("x-oss-meta-plain"), Some("value"));
        assert_eq!(resp.header("etag"), Some("\"d41d8cd98f00b204e9800998ecf8427e\""));
        assert_eq!(resp.header("content-type"), Some("text/plain"));
        assert_eq!(resp.header("x-trans-id"), None);
        assert_eq!(resp.sysmeta.get("x-object-sysmeta-oss-acl").map(String::as_str), Some("{}"));
        assert!(resp.is_slo);
        assert_eq!(resp.header(OSS_OBJECT_TYPE), Some("Multipart"));
        assert_eq!(resp.body, Bytes::from_static(b"abc"));
    }

    #[test]
    fn test_from_backend_container_headers() {
        let raw = BackendResponse::new(StatusCode::NO_CONTENT)
            .with_header(CONTAINER_READ, ".r:*,.rlistings")
            .with_header(STATIC_LARGE_OBJECT, "false");
        let resp = GatewayResponse::from_backend(raw);
        assert_eq!(resp.container_read.as_deref(), Some(".r:*,.rlistings"));
        assert_eq!(resp.container_write, None);
        assert!(!resp.is_slo);
        assert_eq!(resp.header(OSS_OBJECT_TYPE), None);
    }

    #[test]
    fn test_success_tables() {
        let container = Target::Container("b".to_string());
        let object = Target::Object("b".to_string(), "k".to_string());
        assert!(success_codes(&Method::PUT, &container).contains(&202));
        assert!(!success_codes(&Method::PUT, &object).contains(&202));
        assert!(success_codes(&Method::GET, &object).contains(&304));
        assert!(success_codes(&Method::GET, &Target::Account).contains(&200));
    }
}
