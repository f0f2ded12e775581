//! The normalized OSS request.
//!
//! [`OssRequest::from_parts`] runs every construction-time step in a fixed
//! order: credential extraction, host and URI resolution, header
//! validation, then token derivation.  Any failure aborts the request
//! before a single backend call is made.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use md5::{Digest, Md5};
use percent_encoding::percent_decode_str;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::auth::{extract_credentials, parse_query_string, AuthContext};
use crate::config::Config;
use crate::errors::OssError;
use crate::response::GatewayResponse;
use crate::router::{route, OperationKind};
use crate::signer::{derive_token, string_to_sign, SigningInput};
use crate::swift::backend::SwiftBackend;
use crate::swift::mapper::Call;
use crate::validate::{validate_bucket_name, validate_headers, ValidatedHeaders, MAX_32BIT_INT};

/// Conditional headers of a copy request, as sent by the client.
const COPY_SOURCE_CONDITION_PREFIX: &str = "x-oss-copy-source-";

#[derive(Debug)]
pub struct OssRequest {
    pub method: Method,
    /// Decoded request path.
    pub path: String,
    /// Raw query string, if the request had one.
    pub query_string: Option<String>,
    pub headers: HeaderMap,
    /// Decoded query parameters, last value wins.
    pub params: BTreeMap<String, String>,
    pub body: Bytes,
    pub bucket: Option<String>,
    pub object: Option<String>,
    /// Bucket taken from a virtual-hosted `Host` header.
    pub bucket_in_host: Option<String>,
    pub auth: AuthContext,
    /// Credential forwarded to the backend auth layer.
    pub token: String,
    pub validated: ValidatedHeaders,
    /// Identity is established; backend calls skip re-authorization.
    pub pre_authorized: bool,
    /// Drop the OSS `Authorization` header from backend calls.
    pub strip_authorization: bool,
    pub config: Arc<Config>,
}

impl OssRequest {
    /// Build a request from its HTTP parts.  `now` is the server clock in
    /// epoch seconds.
    pub fn from_parts(
        method: Method,
        uri: &Uri,
        headers: HeaderMap,
        body: Bytes,
        config: Arc<Config>,
        now: i64,
    ) -> Result<Self, OssError> {
        let query_string = uri.query().map(str::to_string);
        let params = parse_query_string(query_string.as_deref().unwrap_or_default());

        let credentials = extract_credentials(&headers, &params)?;
        let bucket_in_host = parse_host(&headers, uri, &config.gateway.storage_domain);

        let path = decode_path(uri.path())?;
        let (bucket, object) = match &bucket_in_host {
            Some(bucket) => {
                let object = path.strip_prefix('/').unwrap_or(&path);
                (
                    Some(bucket.clone()),
                    (!object.is_empty()).then(|| object.to_string()),
                )
            }
            None => split_path(&path),
        };
        if let Some(bucket) = &bucket {
            if !validate_bucket_name(bucket, config.gateway.dns_compliant_bucket_names) {
                return Err(OssError::InvalidBucketName {
                    name: bucket.clone(),
                });
            }
        }

        let validated = validate_headers(&method, &headers, &params, credentials.mode, now)?;

        let resource = match &bucket_in_host {
            Some(bucket) => format!("/{bucket}{path}"),
            None => path.clone(),
        };
        let canonical = string_to_sign(&SigningInput {
            method: method.as_str(),
            headers: &headers,
            mode: credentials.mode,
            resource: &resource,
            params: &params,
            has_query: query_string.as_deref().is_some_and(|q| !q.is_empty()),
        });
        let token = derive_token(&canonical);

        let auth = AuthContext::new(credentials, validated.timestamp);

        Ok(Self {
            method,
            path,
            query_string,
            headers,
            params,
            body,
            bucket,
            object,
            bucket_in_host,
            auth,
            token,
            validated,
            pre_authorized: false,
            strip_authorization: false,
            config,
        })
    }

    pub fn is_service_request(&self) -> bool {
        self.bucket.is_none()
    }

    pub fn is_bucket_request(&self) -> bool {
        self.bucket.is_some() && self.object.is_none()
    }

    pub fn is_object_request(&self) -> bool {
        self.bucket.is_some() && self.object.is_some()
    }

    pub fn is_strict_acl(&self) -> bool {
        self.config.gateway.oss_acl
    }

    /// Bucket name, for handlers that only run on bucket requests.
    pub fn bucket_name(&self) -> &str {
        self.bucket.as_deref().unwrap_or_default()
    }

    /// Object name, for handlers that only run on object requests.
    pub fn object_name(&self) -> &str {
        self.object.as_deref().unwrap_or_default()
    }

    /// The operation this request selects.
    pub fn operation(&self) -> Result<OperationKind, OssError> {
        route(
            &self.params,
            self.bucket.is_some(),
            self.object.is_some(),
            self.config.gateway.allow_multipart_uploads,
        )
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Request body for small XML documents, bounded by `max_length`.
    pub fn xml_body(&self, max_length: usize, check_md5: bool) -> Result<Bytes, OssError> {
        if let Some(te) = self.header("transfer-encoding") {
            let codings: Vec<&str> = te.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
            if !codings.is_empty() && (codings.len() > 1 || codings[codings.len() - 1] != "chunked") {
                return Err(OssError::not_implemented(
                    "A header you provided implies functionality that is not implemented",
                ));
            }
        }

        let length = self
            .validated
            .content_length
            .map(|n| n as usize)
            .unwrap_or(self.body.len());
        if length > max_length || self.body.len() > max_length {
            return Err(OssError::MalformedXml);
        }

        if check_md5 {
            self.check_md5(&self.body)?;
        }
        Ok(self.body.clone())
    }

    fn check_md5(&self, body: &[u8]) -> Result<(), OssError> {
        let expected = self.header("content-md5").ok_or_else(|| OssError::InvalidRequest {
            message: "Missing required header for this request: Content-MD5".to_string(),
        })?;
        let digest = STANDARD.encode(Md5::digest(body));
        if expected != digest {
            return Err(OssError::BadDigest {
                content_md5: expected.to_string(),
            });
        }
        Ok(())
    }

    /// Integer query parameter in `[0, 2^31-1]`, clamped to `limit`.
    pub fn get_validated_param(&self, name: &str, default: i64, limit: i64) -> Result<i64, OssError> {
        let Some(raw) = self.params.get(name) else {
            return Ok(default);
        };
        let not_integer = || {
            OssError::invalid_argument(
                name,
                raw.as_str(),
                format!("Provided {name} not an integer or within integer range"),
            )
        };

        let value: i64 = raw.trim().parse().map_err(|_| not_integer())?;
        if value < 0 {
            return Err(OssError::invalid_argument(
                name,
                raw.as_str(),
                format!("Argument {name} must be an integer between 0 and {MAX_32BIT_INT}"),
            ));
        }
        if value > MAX_32BIT_INT {
            return Err(not_integer());
        }
        Ok(value.min(limit))
    }

    /// HEAD the copy source, honouring the `x-oss-copy-source-if-*`
    /// conditions.  Without a copy source the new object is tagged as a
    /// normal (non-multipart) object instead.
    pub async fn check_copy_source(
        &mut self,
        backend: &dyn SwiftBackend,
    ) -> Result<Option<GatewayResponse>, OssError> {
        let Some((src_bucket, src_object)) = self.validated.copy_source.clone() else {
            self.headers.insert(
                "x-object-meta-object-type",
                HeaderValue::from_static("Normal"),
            );
            return Ok(None);
        };

        let mut call = Call::new()
            .method(Method::HEAD)
            .object(src_bucket, src_object)
            .body(Bytes::new());
        for (name, value) in self.headers.iter() {
            if let Some(condition) = name.as_str().strip_prefix(COPY_SOURCE_CONDITION_PREFIX) {
                if condition.starts_with("if-") {
                    if let Ok(value) = value.to_str() {
                        call = call.header(condition, value);
                    }
                }
            }
        }

        let resp = self.get_response(backend, call).await?;
        if resp.status == StatusCode::NOT_MODIFIED {
            return Err(OssError::PreconditionFailed);
        }

        if let Some(source) = self.header("x-oss-copy-source") {
            let normalized = format!("/{}", source.trim_start_matches('/'));
            if let Ok(value) = HeaderValue::from_str(&normalized) {
                self.headers.insert("x-oss-copy-source", value);
            }
        }
        Ok(Some(resp))
    }

    /// Backend headers of the target bucket.
    pub async fn bucket_info(&mut self, backend: &dyn SwiftBackend) -> Result<HeaderMap, OssError> {
        let bucket = self.bucket_name().to_string();
        let resp = self
            .get_response(backend, Call::new().method(Method::HEAD).container(bucket))
            .await?;
        Ok(resp.backend_headers)
    }

    /// `multipart-manifest=delete` when the target object is a static
    /// large object, so deleting it also removes its segments.
    pub async fn multipart_manifest_delete_query(
        &mut self,
        backend: &dyn SwiftBackend,
    ) -> Result<Option<Vec<(String, Option<String>)>>, OssError> {
        if !self.config.gateway.allow_multipart_uploads {
            return Ok(None);
        }
        let resp = self
            .get_response(backend, Call::new().method(Method::HEAD).body(Bytes::new()))
            .await?;
        Ok(resp
            .is_slo
            .then(|| vec![("multipart-manifest".to_string(), Some("delete".to_string()))]))
    }
}

/// Bucket named by a virtual-hosted `Host`, if the host is under the
/// storage domain.
fn parse_host(headers: &HeaderMap, uri: &Uri, storage_domain: &str) -> Option<String> {
    if storage_domain.is_empty() {
        return None;
    }
    let domain = if storage_domain.starts_with('.') {
        storage_domain.to_string()
    } else {
        format!(".{storage_domain}")
    };

    let host = headers
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.host())?;
    let host = match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    };

    host.strip_suffix(domain.as_str())
        .filter(|bucket| !bucket.is_empty())
        .map(str::to_string)
}

/// Percent-decode the path.  It must be valid UTF-8 without NUL bytes.
fn decode_path(raw: &str) -> Result<String, OssError> {
    let invalid = || OssError::InvalidUri {
        uri: raw.to_string(),
    };
    let decoded = percent_decode_str(raw).decode_utf8().map_err(|_| invalid())?;
    if decoded.contains('\0') {
        return Err(invalid());
    }
    Ok(decoded.into_owned())
}

/// `/bucket/object...` into its parts; empty segments become `None`.
fn split_path(path: &str) -> (Option<String>, Option<String>) {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let (bucket, object) = match trimmed.split_once('/') {
        Some((bucket, object)) => (bucket, object),
        None => (trimmed, ""),
    };
    let some = |s: &str| (!s.is_empty()).then(|| s.to_string());
    (some(bucket), if bucket.is_empty() { None } else { some(object) })
}
