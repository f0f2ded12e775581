//! Operation routing.
//!
//! OSS selects operations by sub-resource query parameters as much as by
//! path, so `GET /bucket` may be a listing, `?acl`, `?location` and so
//! on.  [`route`] walks a fixed priority list; the first match wins.

use std::collections::BTreeMap;
use std::fmt;

use crate::errors::OssError;

/// Every operation family the gateway dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Service,
    Bucket,
    Object,
    Acl,
    Cors,
    MultiDelete,
    Location,
    LoggingStatus,
    Part,
    Upload,
    Uploads,
    Versioning,
    Lifecycle,
    Website,
    Referer,
    Unsupported,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Service => "Service",
            OperationKind::Bucket => "Bucket",
            OperationKind::Object => "Object",
            OperationKind::Acl => "Acl",
            OperationKind::Cors => "Cors",
            OperationKind::MultiDelete => "MultiObjectDelete",
            OperationKind::Location => "Location",
            OperationKind::LoggingStatus => "LoggingStatus",
            OperationKind::Part => "Part",
            OperationKind::Upload => "Upload",
            OperationKind::Uploads => "Uploads",
            OperationKind::Versioning => "Versioning",
            OperationKind::Lifecycle => "Lifecycle",
            OperationKind::Website => "Website",
            OperationKind::Referer => "Referer",
            OperationKind::Unsupported => "Unsupported",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-resources that only exist for multipart uploads.
pub const MULTIPART_PARAMS: &[&str] = &["partNumber", "uploadId", "uploads"];

/// Sub-resources recognized but not offered.
pub const UNSUPPORTED_PARAMS: &[&str] = &[
    "notification",
    "policy",
    "requestPayment",
    "torrent",
    "tagging",
    "restore",
];

/// Single-parameter routes in priority order.
const SUB_RESOURCE_ROUTES: &[(&str, OperationKind)] = &[
    ("acl", OperationKind::Acl),
    ("cors", OperationKind::Cors),
    ("delete", OperationKind::MultiDelete),
    ("location", OperationKind::Location),
    ("logging", OperationKind::LoggingStatus),
    ("partNumber", OperationKind::Part),
    ("uploadId", OperationKind::Upload),
    ("uploads", OperationKind::Uploads),
    ("versioning", OperationKind::Versioning),
    ("lifecycle", OperationKind::Lifecycle),
    ("website", OperationKind::Website),
    ("referer", OperationKind::Referer),
];

/// Pick the operation for a request.
///
/// With multipart uploads disabled, any multipart sub-resource fails
/// fast instead of falling through to another operation.
pub fn route(
    params: &BTreeMap<String, String>,
    has_bucket: bool,
    has_object: bool,
    allow_multipart: bool,
) -> Result<OperationKind, OssError> {
    if !has_bucket {
        return Ok(OperationKind::Service);
    }

    if !allow_multipart && MULTIPART_PARAMS.iter().any(|p| params.contains_key(*p)) {
        return Err(OssError::not_implemented("Multi-part feature isn't support"));
    }

    if let Some((_, kind)) = SUB_RESOURCE_ROUTES
        .iter()
        .find(|(param, _)| params.contains_key(*param))
    {
        return Ok(*kind);
    }

    if UNSUPPORTED_PARAMS.iter().any(|p| params.contains_key(*p)) {
        return Ok(OperationKind::Unsupported);
    }

    Ok(if has_object {
        OperationKind::Object
    } else {
        OperationKind::Bucket
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(keys: &[&str]) -> BTreeMap<String, String> {
        keys.iter().map(|k| (k.to_string(), String::new())).collect()
    }

    fn route_object(keys: &[&str]) -> OperationKind {
        route(&params(keys), true, true, true).unwrap()
    }

    #[test]
    fn test_service_wins_over_everything() {
        assert_eq!(
            route(&params(&["acl", "uploads"]), false, false, false).unwrap(),
            OperationKind::Service
        );
    }

    #[test]
    fn test_plain_shapes() {
        assert_eq!(route_object(&[]), OperationKind::Object);
        assert_eq!(route(&params(&[]), true, false, true).unwrap(), OperationKind::Bucket);
        assert_eq!(
            route(&params(&["prefix", "max-keys"]), true, false, true).unwrap(),
            OperationKind::Bucket
        );
    }

    #[test]
    fn test_adjacent_priority_pairs() {
        for pair in SUB_RESOURCE_ROUTES.windows(2) {
            let (higher, kind) = pair[0];
            let (lower, _) = pair[1];
            assert_eq!(route_object(&[higher, lower]), kind, "{higher} vs {lower}");
        }
        let (last, kind) = SUB_RESOURCE_ROUTES[SUB_RESOURCE_ROUTES.len() - 1];
        for unsupported in UNSUPPORTED_PARAMS {
            assert_eq!(route_object(&[last, unsupported]), kind);
        }
    }

    #[test]
    fn test_acl_beats_upload_id() {
        assert_eq!(route_object(&["acl", "uploadId"]), OperationKind::Acl);
    }

    #[test]
    fn test_unsupported_beats_object() {
        for p in UNSUPPORTED_PARAMS {
            assert_eq!(route_object(&[p]), OperationKind::Unsupported);
        }
    }

    #[test]
    fn test_multipart_disabled_fails_fast() {
        for p in MULTIPART_PARAMS {
            let err = route(&params(&["acl", p]), true, true, false).unwrap_err();
            assert_eq!(err.code(), "NotImplemented");
        }
        assert_eq!(
            route(&params(&["acl"]), true, true, false).unwrap(),
            OperationKind::Acl
        );
    }
}
