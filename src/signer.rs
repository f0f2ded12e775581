//! OSS string-to-sign construction.
//!
//! The gateway never verifies signatures itself.  It rebuilds the exact
//! canonical string the client signed and hands it downstream, encoded
//! as an opaque token, so the backend's own auth layer can check it:
//!
//! ```text
//! VERB + "\n" +
//! Content-MD5 + "\n" +
//! Content-Type + "\n" +
//! Date line +
//! CanonicalizedOSSHeaders +
//! CanonicalizedResource
//! ```
//!
//! Whitespace and ordering are reproduced byte-for-byte; any divergence
//! breaks every client's signature.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use http::HeaderMap;
use std::collections::BTreeMap;

use crate::auth::AuthMode;

/// Prefix shared by every protocol-namespaced header.
pub const OSS_HEADER_PREFIX: &str = "x-oss-";

/// Query parameters that take part in the canonical resource.  Any other
/// parameter is ignored for signing.
pub const SUB_RESOURCES: &[&str] = &[
    "acl",
    "cors",
    "delete",
    "lifecycle",
    "location",
    "logging",
    "notification",
    "objectMeta",
    "partNumber",
    "policy",
    "referer",
    "requestPayment",
    "response-cache-control",
    "response-content-disposition",
    "response-content-encoding",
    "response-content-language",
    "response-content-type",
    "response-expires",
    "restore",
    "tagging",
    "torrent",
    "uploadId",
    "uploads",
    "versionId",
    "versioning",
    "versions",
    "website",
];

/// Whether `name` is a signature-relevant sub-resource.
pub fn is_sub_resource(name: &str) -> bool {
    SUB_RESOURCES.contains(&name)
}

/// Normalized view of a request, as far as signing is concerned.
#[derive(Debug)]
pub struct SigningInput<'a> {
    /// HTTP method, upper-case.
    pub method: &'a str,
    /// Request headers (names are already lower-case in `HeaderMap`).
    pub headers: &'a HeaderMap,
    /// Which credential form the client used.
    pub mode: AuthMode,
    /// Decoded request path, bucket prefixed for virtual-hosted requests.
    pub resource: &'a str,
    /// Decoded query parameters, last value wins.
    pub params: &'a BTreeMap<String, String>,
    /// Whether the request carried a query string at all.
    pub has_query: bool,
}

/// Build the canonical string for `input`.
pub fn string_to_sign(input: &SigningInput<'_>) -> String {
    let mut buf = format!(
        "{}\n{}\n{}\n",
        input.method,
        header_str(input.headers, "content-md5"),
        header_str(input.headers, "content-type"),
    );

    let oss_headers = canonical_oss_headers(input.headers);

    match input.mode {
        AuthMode::Header => {
            // A namespaced date already signs the request time, so the
            // plain date slot stays empty.
            if oss_headers.contains_key("x-oss-date") {
                buf.push('\n');
            } else if input.headers.contains_key("date") {
                buf.push_str(&header_str(input.headers, "date"));
                buf.push('\n');
            }
        }
        AuthMode::Query => {
            buf.push_str(
                input
                    .params
                    .get("Expires")
                    .map(String::as_str)
                    .unwrap_or_default(),
            );
            buf.push('\n');
        }
    }

    for (name, value) in &oss_headers {
        buf.push_str(name);
        buf.push(':');
        buf.push_str(value);
        buf.push('\n');
    }

    buf.push_str(&canonical_resource(
        input.resource,
        input.params,
        input.has_query,
    ));
    buf
}

/// Encode a canonical string as the token forwarded to the backend.
///
/// The encoding is reversible and keyless: the token carries the signed
/// material, not a proof.
pub fn derive_token(string_to_sign: &str) -> String {
    URL_SAFE.encode(string_to_sign.as_bytes())
}

/// Decode a token back into the canonical string.
pub fn decode_token(token: &str) -> Option<String> {
    let bytes = URL_SAFE.decode(token.as_bytes()).ok()?;
    String::from_utf8(bytes).ok()
}

/// Lower-cased `x-oss-*` headers, sorted by name.  Repeated headers keep
/// their last value.
fn canonical_oss_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, value) in headers.iter() {
        let name = name.as_str().to_ascii_lowercase();
        if name.starts_with(OSS_HEADER_PREFIX) {
            out.insert(name, String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
    }
    out
}

/// Path plus the sorted sub-resource parameters.
fn canonical_resource(path: &str, params: &BTreeMap<String, String>, has_query: bool) -> String {
    if !has_query {
        return path.to_string();
    }

    let pairs: Vec<String> = params
        .iter()
        .filter(|(key, _)| is_sub_resource(key))
        .map(|(key, value)| {
            if value.is_empty() {
                key.clone()
            } else {
                format!("{key}={value}")
            }
        })
        .collect();

    if pairs.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{}", pairs.join("&"))
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get_all(name)
        .iter()
        .last()
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_sub_resources_sorted() {
        let mut sorted = SUB_RESOURCES.to_vec();
        sorted.sort();
        assert_eq!(sorted, SUB_RESOURCES);
    }

    #[test]
    fn test_header_mode_with_date() {
        let hdrs = headers(&[
            ("content-type", "text/plain"),
            ("content-md5", "eB5eJF1ptWaXm4bijSPyxw=="),
            ("date", "Wed, 28 Dec 2022 10:27:41 GMT"),
            ("x-oss-meta-Author", "alice"),
            ("x-oss-acl", "private"),
        ]);
        let p = BTreeMap::new();
        let input = SigningInput {
            method: "PUT",
            headers: &hdrs,
            mode: AuthMode::Header,
            resource: "/examplebucket/nelson",
            params: &p,
            has_query: false,
        };
        assert_eq!(
            string_to_sign(&input),
            "PUT\neB5eJF1ptWaXm4bijSPyxw==\ntext/plain\nWed, 28 Dec 2022 10:27:41 GMT\n\
             x-oss-acl:private\nx-oss-meta-author:alice\n/examplebucket/nelson"
        );
    }

    #[test]
    fn test_header_mode_oss_date_leaves_empty_line() {
        let hdrs = headers(&[
            ("date", "Wed, 28 Dec 2022 10:27:41 GMT"),
            ("x-oss-date", "Wed, 28 Dec 2022 10:27:41 GMT"),
        ]);
        let p = BTreeMap::new();
        let input = SigningInput {
            method: "GET",
            headers: &hdrs,
            mode: AuthMode::Header,
            resource: "/b/o",
            params: &p,
            has_query: false,
        };
        assert_eq!(
            string_to_sign(&input),
            "GET\n\n\n\nx-oss-date:Wed, 28 Dec 2022 10:27:41 GMT\n/b/o"
        );
    }

    #[test]
    fn test_query_mode_uses_expires() {
        let hdrs = HeaderMap::new();
        let p = params(&[
            ("OSSAccessKeyId", "ak"),
            ("Expires", "1141889120"),
            ("Signature", "sig"),
        ]);
        let input = SigningInput {
            method: "GET",
            headers: &hdrs,
            mode: AuthMode::Query,
            resource: "/b/o",
            params: &p,
            has_query: true,
        };
        assert_eq!(string_to_sign(&input), "GET\n\n\n1141889120\n/b/o");
    }

    #[test]
    fn test_resource_keeps_only_sub_resources_sorted() {
        let hdrs = headers(&[("date", "d")]);
        let p = params(&[
            ("uploadId", "0004B9"),
            ("partNumber", "3"),
            ("max-keys", "10"),
            ("acl", ""),
        ]);
        let input = SigningInput {
            method: "PUT",
            headers: &hdrs,
            mode: AuthMode::Header,
            resource: "/b/o",
            params: &p,
            has_query: true,
        };
        assert_eq!(
            string_to_sign(&input),
            "PUT\n\n\nd\n/b/o?acl&partNumber=3&uploadId=0004B9"
        );
    }

    #[test]
    fn test_resource_without_sub_resources() {
        let p = params(&[("prefix", "a")]);
        assert_eq!(canonical_resource("/b/", &p, true), "/b/");
        assert_eq!(canonical_resource("/b/", &p, false), "/b/");
    }

    #[test]
    fn test_deterministic() {
        let hdrs = headers(&[("date", "d"), ("x-oss-b", "2"), ("x-oss-a", "1")]);
        let p = params(&[("acl", "")]);
        let input = SigningInput {
            method: "GET",
            headers: &hdrs,
            mode: AuthMode::Header,
            resource: "/b",
            params: &p,
            has_query: true,
        };
        let first = string_to_sign(&input);
        for _ in 0..5 {
            assert_eq!(string_to_sign(&input), first);
        }
    }

    #[test]
    fn test_duplicate_oss_header_last_wins() {
        let hdrs = headers(&[("date", "d"), ("x-oss-meta-a", "1"), ("x-oss-meta-a", "2")]);
        let p = BTreeMap::new();
        let input = SigningInput {
            method: "GET",
            headers: &hdrs,
            mode: AuthMode::Header,
            resource: "/b",
            params: &p,
            has_query: false,
        };
        assert_eq!(string_to_sign(&input), "GET\n\n\nd\nx-oss-meta-a:2\n/b");
    }

    #[test]
    fn test_token_roundtrip() {
        let sts = "GET\n\n\nd\n/b?acl";
        let token = derive_token(sts);
        assert!(!token.contains('+') && !token.contains('/'));
        assert_eq!(decode_token(&token).as_deref(), Some(sts));
    }
}
