//! Construction-time request checks.
//!
//! Everything here runs before any backend call and fails with a named
//! protocol error, so clients can tell one cause from another.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime};
use http::{HeaderMap, Method};
use percent_encoding::percent_decode_str;
use std::collections::BTreeMap;
use std::time::UNIX_EPOCH;

use crate::auth::AuthMode;
use crate::errors::OssError;

/// Allowed distance between the request date and the server clock.
pub const MAX_CLOCK_SKEW_SECS: i64 = 300;

/// Largest value accepted for `Expires` and integer query parameters.
pub const MAX_32BIT_INT: i64 = 2_147_483_647;

/// `Timestamp` query parameter and `x-oss-date` ISO form.
const OSS_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Compact ISO 8601 form.
const OSS_DATE_FORMAT_COMPACT: &str = "%Y%m%dT%H%M%SZ";

const DATE_REQUIRED: &str = "OSS authentication requires a valid Date or x-oss-date header";

/// The only storage class the backend offers.
pub const STORAGE_CLASS: &str = "STANDARD";

/// Facts established while validating the request headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedHeaders {
    /// Declared body length.
    pub content_length: Option<u64>,
    /// Hex form of `Content-MD5`, forwarded as the expected ETag.
    pub etag: Option<String>,
    /// Request time in epoch seconds.
    pub timestamp: Option<i64>,
    /// `(bucket, object)` named by `x-oss-copy-source`.
    pub copy_source: Option<(String, String)>,
}

/// Run every header check in order.  `now` is the server clock in epoch
/// seconds.
pub fn validate_headers(
    method: &Method,
    headers: &HeaderMap,
    params: &BTreeMap<String, String>,
    mode: AuthMode,
    now: i64,
) -> Result<ValidatedHeaders, OssError> {
    let content_length = check_content_length(headers)?;
    let timestamp = check_dates(headers, params, mode, now)?;
    let etag = match header(headers, "content-md5") {
        Some(value) => Some(content_md5_to_etag(value)?),
        None => None,
    };

    if *method == Method::PUT
        && ["if-match", "if-none-match", "if-modified-since", "if-unmodified-since"]
            .iter()
            .any(|h| headers.contains_key(*h))
    {
        return Err(OssError::not_implemented(
            "Conditional object PUTs are not supported.",
        ));
    }

    let copy_source = match header(headers, "x-oss-copy-source") {
        Some(value) => Some(parse_copy_source(value).ok_or_else(|| {
            OssError::invalid_argument(
                "x-oss-copy-source",
                value,
                "Copy Source must mention the source bucket and key: sourcebucket/sourcekey",
            )
        })?),
        None => None,
    };

    if let Some(value) = header(headers, "x-oss-metadata-directive") {
        if value != "COPY" && value != "REPLACE" {
            return Err(OssError::invalid_argument(
                "x-oss-metadata-directive",
                value,
                "Unknown metadata directive.",
            ));
        }
    }

    if let Some(value) = header(headers, "x-oss-storage-class") {
        if value != STORAGE_CLASS {
            return Err(OssError::InvalidStorageClass);
        }
    }

    if headers.contains_key("x-oss-mfa") {
        return Err(OssError::not_implemented("MFA Delete is not supported."));
    }
    if headers.contains_key("x-oss-server-side-encryption") {
        return Err(OssError::not_implemented(
            "Server-side encryption is not supported.",
        ));
    }

    Ok(ValidatedHeaders {
        content_length,
        etag,
        timestamp,
        copy_source,
    })
}

fn check_content_length(headers: &HeaderMap) -> Result<Option<u64>, OssError> {
    let Some(raw) = headers.get(http::header::CONTENT_LENGTH) else {
        return Ok(None);
    };
    let text = String::from_utf8_lossy(raw.as_bytes()).into_owned();
    match text.trim().parse::<i64>() {
        Ok(n) if n >= 0 => Ok(Some(n as u64)),
        _ => Err(OssError::invalid_argument(
            "Content-Length",
            text,
            "Invalid Content-Length",
        )),
    }
}

/// Date checks.  Returns the request timestamp when one applies.
fn check_dates(
    headers: &HeaderMap,
    params: &BTreeMap<String, String>,
    mode: AuthMode,
    now: i64,
) -> Result<Option<i64>, OssError> {
    if mode == AuthMode::Query {
        check_expires(params, now)?;
        return match params.get("Timestamp") {
            Some(value) => parse_naive(value, OSS_DATE_FORMAT)
                .map(Some)
                .ok_or_else(|| OssError::AccessDenied {
                    message: DATE_REQUIRED.to_string(),
                }),
            None => Ok(None),
        };
    }

    let timestamp = request_timestamp(headers)?;
    if timestamp < 0 {
        return Err(OssError::access_denied());
    }
    if (timestamp - now).abs() > MAX_CLOCK_SKEW_SECS {
        return Err(OssError::RequestTimeTooSkewed);
    }
    Ok(Some(timestamp))
}

fn check_expires(params: &BTreeMap<String, String>, now: i64) -> Result<(), OssError> {
    let raw = params.get("Expires").map(String::as_str).unwrap_or_default();
    let expires: f64 = raw.trim().parse().map_err(|_| OssError::access_denied())?;
    if !expires.is_finite() {
        return Err(OssError::access_denied());
    }

    if (now as f64) > expires {
        return Err(OssError::AccessDenied {
            message: "Request has expired".to_string(),
        });
    }
    if expires >= 2f64.powi(31) {
        return Err(OssError::AccessDenied {
            message: format!("Invalid date (should be seconds since epoch): {raw}"),
        });
    }
    Ok(())
}

/// Timestamp of a header-signed request: `x-oss-date` wins over `Date`.
pub fn request_timestamp(headers: &HeaderMap) -> Result<i64, OssError> {
    let value = header(headers, "x-oss-date")
        .or_else(|| header(headers, "date"))
        .ok_or_else(|| OssError::AccessDenied {
            message: DATE_REQUIRED.to_string(),
        })?;
    parse_timestamp(value).ok_or_else(|| OssError::AccessDenied {
        message: DATE_REQUIRED.to_string(),
    })
}

/// Parse any of the date forms clients send, as epoch seconds.
pub fn parse_timestamp(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.timestamp());
    }
    if let Ok(t) = httpdate::parse_http_date(value) {
        return Some(match t.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(e) => -(e.duration().as_secs() as i64),
        });
    }
    parse_naive(value, OSS_DATE_FORMAT).or_else(|| parse_naive(value, OSS_DATE_FORMAT_COMPACT))
}

fn parse_naive(value: &str, format: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(value, format)
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

/// Check a `Content-MD5` value and return its hex digest.
pub fn content_md5_to_etag(value: &str) -> Result<String, OssError> {
    let invalid = || OssError::InvalidDigest {
        content_md5: value.to_string(),
    };

    let body = value.trim_end_matches('=');
    if body.is_empty()
        || value.len() - body.len() > 2
        || !body
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
    {
        return Err(invalid());
    }

    let digest = STANDARD.decode(value).map_err(|_| invalid())?;
    if digest.len() != 16 {
        return Err(invalid());
    }
    Ok(hex::encode(digest))
}

/// Split `[/]bucket/object` (percent-encoded) into its two parts.
pub fn parse_copy_source(value: &str) -> Option<(String, String)> {
    let decoded = percent_decode_str(value).decode_utf8().ok()?;
    let path = decoded.strip_prefix('/').unwrap_or(&decoded);
    let (bucket, object) = path.split_once('/')?;
    if bucket.is_empty() || object.is_empty() {
        return None;
    }
    Some((bucket.to_string(), object.to_string()))
}

/// Bucket naming policy.
///
/// Names are 3 to 63 characters.  With `dns_compliant` set they must also
/// be usable as a DNS label: lower-case letters, digits, `-` and `.`,
/// starting and ending alphanumeric, no empty or dash-adjacent labels,
/// and not shaped like an IPv4 address.
pub fn validate_bucket_name(name: &str, dns_compliant: bool) -> bool {
    if name.len() < 3 || name.len() > 63 {
        return false;
    }
    let bytes = name.as_bytes();
    let edge_ok = |b: u8| {
        if dns_compliant {
            b.is_ascii_lowercase() || b.is_ascii_digit()
        } else {
            b.is_ascii_alphanumeric()
        }
    };
    if !edge_ok(bytes[0]) || !edge_ok(bytes[bytes.len() - 1]) {
        return false;
    }

    if !dns_compliant {
        return bytes
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    }

    if !bytes
        .iter()
        .all(|&b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'.'))
    {
        return false;
    }
    if name.contains("..") || name.contains(".-") || name.contains("-.") {
        return false;
    }
    let labels: Vec<&str> = name.split('.').collect();
    let looks_like_ip =
        labels.len() == 4 && labels.iter().all(|l| l.bytes().all(|b| b.is_ascii_digit()));
    !looks_like_ip
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
