//! Bucket-level OSS handlers: HEAD, listing, create and delete.

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{Method, StatusCode};
use serde::Deserialize;

use super::iso8601_from_backend;
use crate::acl::{AclDescriptor, CannedAcl, CONTAINER_ACL_SYSMETA};
use crate::errors::OssError;
use crate::request::OssRequest;
use crate::response::GatewayResponse;
use crate::swift::backend::SwiftBackend;
use crate::swift::mapper::Call;
use crate::validate::STORAGE_CLASS;
use crate::xml::{self, ListingParams, ObjectEntry};

/// One entry of the backend container listing: an object, or a
/// delimiter roll-up when only `subdir` is set.
#[derive(Debug, Deserialize)]
struct ListingEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    subdir: Option<String>,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    bytes: u64,
    #[serde(default)]
    last_modified: String,
}

pub async fn handle(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    match req.method {
        Method::HEAD => head_bucket(req, backend).await,
        Method::GET => list_objects(req, backend).await,
        Method::PUT => create_bucket(req, backend).await,
        Method::DELETE => delete_bucket(req, backend).await,
        _ => Err(OssError::MethodNotAllowed),
    }
}

/// `HEAD /{bucket}`
async fn head_bucket(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    req.get_response(backend, Call::new()).await?;
    Ok(StatusCode::OK.into_response())
}

/// `GET /{bucket}`: ListBucketResult.
async fn list_objects(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    let limit = i64::from(req.config.gateway.max_bucket_listing);
    let max_keys = req.get_validated_param("max-keys", limit, limit)?;
    let prefix = req.params.get("prefix").cloned().unwrap_or_default();
    let delimiter = req.params.get("delimiter").cloned().unwrap_or_default();
    let marker = req.params.get("marker").cloned().unwrap_or_default();

    // One extra entry tells whether the listing is truncated.
    let mut call = Call::new()
        .method(Method::GET)
        .query("format", Some("json".to_string()))
        .query("limit", Some((max_keys + 1).to_string()));
    for (key, value) in [("prefix", &prefix), ("delimiter", &delimiter), ("marker", &marker)] {
        if !value.is_empty() {
            call = call.query(key, Some(value.clone()));
        }
    }
    let resp = req.get_response(backend, call).await?;

    let mut entries: Vec<ListingEntry> = if resp.body.is_empty() {
        Vec::new()
    } else {
        serde_json::from_slice(&resp.body)
            .map_err(|e| OssError::InternalError(anyhow::anyhow!("invalid container listing: {e}")))?
    };

    // `max-keys=0` asks for nothing, which is never a truncated answer.
    let is_truncated = max_keys > 0 && entries.len() as i64 > max_keys;
    entries.truncate(max_keys as usize);
    let next_marker = if is_truncated {
        entries
            .last()
            .and_then(|e| e.name.clone().or_else(|| e.subdir.clone()))
    } else {
        None
    };

    let dates: Vec<String> = entries
        .iter()
        .map(|e| iso8601_from_backend(&e.last_modified))
        .collect();
    let etags: Vec<String> = entries.iter().map(|e| format!("\"{}\"", e.hash)).collect();

    let mut objects = Vec::new();
    let mut common_prefixes = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        match (&entry.name, &entry.subdir) {
            (Some(name), _) => objects.push(ObjectEntry {
                key: name,
                last_modified: &dates[i],
                etag: &etags[i],
                size: entry.bytes,
                storage_class: STORAGE_CLASS,
            }),
            (None, Some(subdir)) => common_prefixes.push(subdir.as_str()),
            (None, None) => {}
        }
    }

    let bucket = req.bucket_name().to_string();
    let params = ListingParams {
        bucket: &bucket,
        prefix: &prefix,
        marker: &marker,
        delimiter: &delimiter,
        max_keys: max_keys as u32,
        is_truncated,
        next_marker: next_marker.as_deref(),
    };
    let owner = req.acl_user();
    let body = xml::render_list_objects_result(&params, &owner, &objects, &common_prefixes);
    Ok(GatewayResponse::xml(StatusCode::OK, body).into_response())
}

/// `PUT /{bucket}`
async fn create_bucket(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    let mut call = Call::new().method(Method::PUT).body(Bytes::new());
    if req.is_strict_acl() {
        let canned = req.header_acl()?.unwrap_or(CannedAcl::Private);
        let descriptor = AclDescriptor::from_canned(&req.acl_user(), canned);
        call = call
            .canned_acl(canned)
            .header(CONTAINER_ACL_SYSMETA, descriptor.to_json()?);
    }

    let resp = req.get_response(backend, call).await?;
    if resp.status == StatusCode::ACCEPTED {
        return Err(OssError::BucketAlreadyExists {
            bucket: req.bucket_name().to_string(),
        });
    }

    let mut out = GatewayResponse::new(StatusCode::OK);
    out.set_header("location", &format!("/{}", req.bucket_name()));
    Ok(out.into_response())
}

/// `DELETE /{bucket}`
async fn delete_bucket(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    req.get_response(backend, Call::new().body(Bytes::new())).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::request::tests::{config_with, signed_request, signed_request_with};
    use crate::swift::backend::{BackendResponse, BACKEND_REMOTE_USER};
    use crate::swift::mock::MockBackend;

    async fn body_string(resp: Response) -> String {
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    const LISTING: &str = r#"[
        {"name":"a.txt","hash":"0cc175b9c0f1b6a831c399e269772661","bytes":1,"last_modified":"2024-01-02T03:04:05.123456","content_type":"text/plain"},
        {"subdir":"photos/"},
        {"name":"b.txt","hash":"92eb5ffee6ae2fec3ad71c777531578f","bytes":1,"last_modified":"2024-01-02T03:04:06.000000"}
    ]"#;

    #[tokio::test]
    async fn test_list_objects() {
        let backend = MockBackend::new(|_| BackendResponse::new(StatusCode::OK).with_body(LISTING));
        let mut req = signed_request(Method::GET, "/mybucket?prefix=&delimiter=/&max-keys=5", &[]);
        let resp = handle(&mut req, &backend).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].path, "/v1/test:tester/mybucket");
        assert_eq!(calls[0].query, "delimiter=/&format=json&limit=6");

        let body = body_string(resp).await;
        assert!(body.contains("<Key>a.txt</Key>"));
        assert!(body.contains("<ETag>&quot;0cc175b9c0f1b6a831c399e269772661&quot;</ETag>"));
        assert!(body.contains("<LastModified>2024-01-02T03:04:05.123Z</LastModified>"));
        assert!(body.contains("<Prefix>photos/</Prefix>"));
        assert!(body.contains("<IsTruncated>false</IsTruncated>"));
        assert!(body.contains("<MaxKeys>5</MaxKeys>"));
    }

    #[tokio::test]
    async fn test_list_objects_truncated() {
        let backend = MockBackend::new(|_| BackendResponse::new(StatusCode::OK).with_body(LISTING));
        let mut req = signed_request(Method::GET, "/mybucket?max-keys=2", &[]);
        let body = body_string(handle(&mut req, &backend).await.unwrap()).await;
        assert!(body.contains("<IsTruncated>true</IsTruncated>"));
        assert!(body.contains("<NextMarker>photos/</NextMarker>"));
        assert!(!body.contains("b.txt"));
    }

    #[tokio::test]
    async fn test_list_objects_zero_max_keys() {
        let backend = MockBackend::new(|_| BackendResponse::new(StatusCode::OK).with_body(LISTING));
        let mut req = signed_request(Method::GET, "/mybucket?max-keys=0", &[]);
        let body = body_string(handle(&mut req, &backend).await.unwrap()).await;
        assert!(body.contains("<IsTruncated>false</IsTruncated>"));
        assert!(body.contains("<MaxKeys>0</MaxKeys>"));
        assert!(!body.contains("<Key>"));
        assert!(!body.contains("<NextMarker>"));
        assert!(!body.contains("<CommonPrefixes>"));
    }

    #[tokio::test]
    async fn test_list_objects_rejects_bad_max_keys() {
        let backend = MockBackend::always(StatusCode::OK);
        let mut req = signed_request(Method::GET, "/mybucket?max-keys=abc", &[]);
        let err = handle(&mut req, &backend).await.unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_bucket() {
        let backend = MockBackend::always(StatusCode::CREATED);
        let mut req = signed_request(Method::PUT, "/mybucket", &[("x-oss-acl", "public-read")]);
        let resp = handle(&mut req, &backend).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("location").unwrap(), "/mybucket");

        let calls = backend.calls();
        assert_eq!(calls[0].headers.get("x-container-read").unwrap(), ".r:*,.rlistings");
        assert!(calls[0].headers.get("x-oss-acl").is_none());
    }

    #[tokio::test]
    async fn test_create_existing_bucket() {
        let backend = MockBackend::always(StatusCode::ACCEPTED);
        let mut req = signed_request(Method::PUT, "/mybucket", &[]);
        let err = handle(&mut req, &backend).await.unwrap_err();
        assert_eq!(err.code(), "BucketAlreadyExists");
    }

    #[tokio::test]
    async fn test_create_bucket_strict_writes_sysmeta() {
        let config = config_with(GatewayConfig {
            oss_acl: true,
            ..Default::default()
        });
        let backend = MockBackend::new(|call| {
            if call.method == Method::HEAD {
                BackendResponse::new(StatusCode::NO_CONTENT).with_header(BACKEND_REMOTE_USER, "test:tester")
            } else {
                BackendResponse::new(StatusCode::CREATED)
            }
        });
        let mut req = signed_request_with(config, Method::PUT, "/mybucket?x=1", &[]).unwrap();
        req.authenticate(&backend).await.unwrap();
        handle(&mut req, &backend).await.unwrap();

        let put = backend.calls().pop().unwrap();
        assert_eq!(put.method, Method::PUT);
        assert_eq!(put.query, "");
        assert_eq!(put.headers.get("x-container-read").unwrap(), "");
        let json = put.headers.get(CONTAINER_ACL_SYSMETA).unwrap().to_str().unwrap();
        let descriptor: AclDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.owner, "test:tester");
        assert_eq!(descriptor.canned(), CannedAcl::Private);
    }

    #[tokio::test]
    async fn test_delete_and_head() {
        let backend = MockBackend::always(StatusCode::NO_CONTENT);
        let mut req = signed_request(Method::DELETE, "/mybucket", &[]);
        assert_eq!(handle(&mut req, &backend).await.unwrap().status(), StatusCode::NO_CONTENT);

        let mut req = signed_request(Method::HEAD, "/mybucket", &[]);
        assert_eq!(handle(&mut req, &backend).await.unwrap().status(), StatusCode::OK);

        let backend = MockBackend::always(StatusCode::CONFLICT);
        let mut req = signed_request(Method::DELETE, "/mybucket", &[]);
        assert_eq!(handle(&mut req, &backend).await.unwrap_err().code(), "BucketNotEmpty");

        let mut req = signed_request(Method::POST, "/mybucket", &[]);
        assert_eq!(handle(&mut req, &backend).await.unwrap_err().code(), "MethodNotAllowed");
    }
}
