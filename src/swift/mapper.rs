//! Rewrites a normalized OSS request into the backend wire format.
//!
//! Path layout, header namespaces and query encoding differ between the
//! two protocols:
//!
//! | OSS                     | backend                        |
//! |-------------------------|--------------------------------|
//! | `/bucket/key`           | `/v1/<account>/bucket/key`     |
//! | `x-oss-meta-<name>`     | `x-object-meta-<name>`         |
//! | `x-oss-copy-source`     | `x-copy-from`                  |
//! | `x-oss-acl`             | `x-container-read` / `-write`  |
//! | `Authorization` + date  | `x-auth-token` (string-to-sign)|

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use bytes::Bytes;
use http::header::{HeaderName, CONTENT_LENGTH, HOST};
use http::{HeaderMap, HeaderValue, Method};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use super::backend::{AccessLog, BackendCall};
use crate::acl::CannedAcl;
use crate::errors::OssError;
use crate::request::OssRequest;

/// OSS user-metadata header prefix.
pub const OSS_META_PREFIX: &str = "x-oss-meta-";
/// Backend object user-metadata header prefix.
pub const OBJECT_META_PREFIX: &str = "x-object-meta-";
/// Backend header naming the copy source.
pub const COPY_FROM: &str = "x-copy-from";
/// Backend credential header.
pub const AUTH_TOKEN: &str = "x-auth-token";

/// Encode everything except unreserved characters and '/'.
const PATH_ENCODE_SET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Longest run of raw bytes packed into one encoded word.
const ENCODED_WORD_CHUNK: usize = 45;

// -- Call description ---------------------------------------------------------

/// Which backend resource a call addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Account,
    Container(String),
    Object(String, String),
}

impl Target {
    pub fn container(&self) -> Option<&str> {
        match self {
            Target::Account => None,
            Target::Container(c) | Target::Object(c, _) => Some(c),
        }
    }

    pub fn object(&self) -> Option<&str> {
        match self {
            Target::Object(_, o) => Some(o),
            _ => None,
        }
    }
}

/// A backend call as a handler describes it.  Unset fields default to
/// the inbound request's method, resource and body.
#[derive(Debug, Clone, Default)]
pub struct Call {
    pub method: Option<Method>,
    pub target: Option<Target>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub query: Option<Vec<(String, Option<String>)>>,
    pub canned_acl: Option<CannedAcl>,
    pub access_log: Option<AccessLog>,
}

impl Call {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn account(mut self) -> Self {
        self.target = Some(Target::Account);
        self
    }

    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.target = Some(Target::Container(container.into()));
        self
    }

    pub fn object(mut self, container: impl Into<String>, object: impl Into<String>) -> Self {
        self.target = Some(Target::Object(container.into(), object.into()));
        self
    }

    /// Add a header.  Names or values that are not valid HTTP are ignored.
    pub fn header(mut self, name: &str, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        self.query
            .get_or_insert_with(Vec::new)
            .push((key.into(), value));
        self
    }

    pub fn canned_acl(mut self, acl: CannedAcl) -> Self {
        self.canned_acl = Some(acl);
        self
    }

    pub fn access_log(mut self, access_log: AccessLog) -> Self {
        self.access_log = Some(access_log);
        self
    }
}

// -- Request translation ------------------------------------------------------

impl OssRequest {
    /// Resource the request itself addresses.
    pub fn default_target(&self) -> Target {
        match (&self.bucket, &self.object) {
            (None, _) => Target::Account,
            (Some(c), None) => Target::Container(c.clone()),
            (Some(c), Some(o)) => Target::Object(c.clone(), o.clone()),
        }
    }

    /// Build the wire-level call for `call` against `target`.
    pub fn to_backend_call(
        &self,
        method: &Method,
        target: &Target,
        call: &Call,
    ) -> Result<BackendCall, OssError> {
        let account = self.auth.account().to_string();
        let path = backend_path(
            &self.config.backend.api_version,
            &account,
            target.container(),
            target.object(),
        );

        let mut headers = translate_request_headers(&self.headers);

        let is_copy = headers.contains_key(COPY_FROM);
        let body = if is_copy {
            headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
            Bytes::new()
        } else {
            match &call.body {
                Some(body) => body.clone(),
                None => {
                    if let Some(etag) = self.validated.etag.as_deref() {
                        if let Ok(value) = HeaderValue::from_str(etag) {
                            headers.insert(http::header::ETAG, value);
                        }
                    }
                    self.body.clone()
                }
            }
        };

        set_header(&mut headers, AUTH_TOKEN, &self.token);
        if self.strip_authorization {
            headers.remove(http::header::AUTHORIZATION);
        } else {
            set_header(
                &mut headers,
                http::header::AUTHORIZATION.as_str(),
                &self.auth.authorization_value(),
            );
        }

        let mut query = call.query.clone();

        // The strict variant always says which ACL to write; otherwise a
        // client-supplied canned ACL rides along on every call.
        let acl = match call.canned_acl {
            Some(acl) => Some(acl),
            None if !self.is_strict_acl() => self.header_acl()?,
            None => None,
        };
        headers.remove("x-oss-acl");
        if let Some(acl) = acl {
            for (name, value) in acl.grant_headers()? {
                set_header(&mut headers, name, value);
            }
            if self.is_strict_acl() {
                query = None;
            }
        }

        for (name, value) in call.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }

        let access_log = call.access_log.unwrap_or(if self.config.gateway.force_swift_request_proxy_log {
            AccessLog::Force
        } else {
            AccessLog::Default
        });

        Ok(BackendCall {
            method: method.clone(),
            account,
            container: target.container().map(str::to_string),
            object: target.object().map(str::to_string),
            path,
            query: query.as_deref().map(build_query).unwrap_or_default(),
            headers,
            body,
            access_log,
            pre_authorized: self.pre_authorized,
        })
    }

    /// Canned ACL named by `x-oss-acl`, if any.
    pub fn header_acl(&self) -> Result<Option<CannedAcl>, OssError> {
        let Some(value) = self.headers.get("x-oss-acl") else {
            return Ok(None);
        };
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        CannedAcl::from_oss_name(&value)
            .map(Some)
            .ok_or_else(|| OssError::invalid_argument("x-oss-acl", value, "Invalid canned ACL"))
    }
}

/// Rename OSS headers into the backend namespace.  `Host` and
/// `Content-Length` are dropped; the transport recomputes them.
pub fn translate_request_headers(src: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(src.len());
    for (name, value) in src.iter() {
        let lower = name.as_str();
        if name == HOST || name == CONTENT_LENGTH {
            continue;
        }

        if let Some(meta) = lower.strip_prefix(OSS_META_PREFIX) {
            let value = if needs_encoding(value.as_bytes()) {
                let text = String::from_utf8_lossy(value.as_bytes());
                match HeaderValue::from_str(&encode_header_value(&text)) {
                    Ok(v) => v,
                    Err(_) => continue,
                }
            } else {
                value.clone()
            };
            if let Ok(name) = HeaderName::from_bytes(format!("{OBJECT_META_PREFIX}{meta}").as_bytes())
            {
                out.append(name, value);
            }
            continue;
        }

        if lower == "x-oss-copy-source" {
            out.insert(HeaderName::from_static(COPY_FROM), value.clone());
            continue;
        }

        out.append(name.clone(), value.clone());
    }
    out
}

fn set_header(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        headers.insert(name, value);
    }
}

// -- Paths and queries --------------------------------------------------------

/// `/<api-version>/<account>[/<container>[/<object>]]`.
pub fn backend_path(
    api_version: &str,
    account: &str,
    container: Option<&str>,
    object: Option<&str>,
) -> String {
    let mut path = format!("/{api_version}/{account}");
    if let Some(container) = container.filter(|c| !c.is_empty()) {
        path.push('/');
        path.push_str(container);
        if let Some(object) = object.filter(|o| !o.is_empty()) {
            path.push('/');
            path.push_str(object);
        }
    }
    path
}

/// Percent-encode a backend path for the wire.
pub fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, &PATH_ENCODE_SET).to_string()
}

/// Sorted `key=value` pairs joined with `&`; keys without a value stay
/// bare.
pub fn build_query(pairs: &[(String, Option<String>)]) -> String {
    let mut sorted: Vec<&(String, Option<String>)> = pairs.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    sorted
        .into_iter()
        .map(|(key, value)| {
            let key = utf8_percent_encode(key, &PATH_ENCODE_SET);
            match value {
                Some(value) => format!("{key}={}", utf8_percent_encode(value, &PATH_ENCODE_SET)),
                None => key.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

// -- RFC 2047 encoded words ---------------------------------------------------

/// Whether a header value has bytes outside printable ASCII.
pub fn needs_encoding(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .any(|&b| !(0x20..=0x7e).contains(&b) && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0b | 0x0c))
}

/// Wrap `value` in `=?UTF-8?B?...?=` words.  Long values are split on
/// character boundaries into several words separated by a space.
pub fn encode_header_value(value: &str) -> String {
    let mut words = Vec::new();
    let mut start = 0;
    while start < value.len() {
        let mut end = (start + ENCODED_WORD_CHUNK).min(value.len());
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        words.push(format!("=?UTF-8?B?{}?=", STANDARD.encode(&value.as_bytes()[start..end])));
        start = end;
    }
    words.join(" ")
}

/// Decode any encoded words in `value`.  Whitespace between two adjacent
/// encoded words is dropped; everything else is kept verbatim.
pub fn decode_header_value(value: &str) -> String {
    if !value.contains("=?") {
        return value.to_string();
    }

    let mut out: Vec<u8> = Vec::with_capacity(value.len());
    let mut prev_encoded = false;
    for (i, token) in value.split(' ').enumerate() {
        match decode_word(token) {
            Some(bytes) => {
                if i > 0 && !prev_encoded {
                    out.push(b' ');
                }
                out.extend_from_slice(&bytes);
                prev_encoded = true;
            }
            None => {
                if i > 0 {
                    out.push(b' ');
                }
                out.extend_from_slice(token.as_bytes());
                prev_encoded = false;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn decode_word(token: &str) -> Option<Vec<u8>> {
    let inner = token.strip_prefix("=?")?.strip_suffix("?=")?;
    let mut parts = inner.splitn(3, '?');
    let _charset = parts.next()?;
    let encoding = parts.next()?;
    let text = parts.next()?;

    match encoding {
        "B" | "b" => STANDARD
            .decode(text)
            .or_else(|_| STANDARD_NO_PAD.decode(text.trim_end_matches('=')))
            .ok(),
        "Q" | "q" => {
            let bytes = text.as_bytes();
            let mut out = Vec::with_capacity(bytes.len());
            let mut i = 0;
            while i < bytes.len() {
                match bytes[i] {
                    b'_' => out.push(b' '),
                    b'=' if i + 2 < bytes.len() => {
                        let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok()?;
                        out.push(u8::from_str_radix(hex, 16).ok()?);
                        i += 2;
                    }
                    b => out.push(b),
                }
                i += 1;
            }
            Some(out)
        }
        _ => None,
    }
}
