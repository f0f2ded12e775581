//! Object-level OSS handlers.

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{Method, StatusCode};

use super::iso8601_from_http_date;
use crate::acl::{AclDescriptor, CannedAcl, OBJECT_ACL_SYSMETA};
use crate::errors::OssError;
use crate::request::OssRequest;
use crate::response::GatewayResponse;
use crate::swift::backend::SwiftBackend;
use crate::swift::mapper::Call;
use crate::xml;

/// Backend flag that drops the source metadata on copy.
const FRESH_METADATA: &str = "x-fresh-metadata";

pub async fn handle(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    match req.method {
        Method::GET | Method::HEAD => get_object(req, backend).await,
        Method::PUT => put_object(req, backend).await,
        Method::DELETE => delete_object(req, backend).await,
        _ => Err(OssError::MethodNotAllowed),
    }
}

/// `GET` / `HEAD /{bucket}/{key}`: the backend answer, translated.
async fn get_object(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    let resp = req.get_response(backend, Call::new()).await?;
    Ok(resp.into_response())
}

/// `PUT /{bucket}/{key}`, plain upload or server-side copy.
async fn put_object(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    let source = req.check_copy_source(backend).await?;

    let mut call = Call::new().method(Method::PUT);
    if source.is_some()
        && req
            .header("x-oss-metadata-directive")
            .is_some_and(|d| d.eq_ignore_ascii_case("REPLACE"))
    {
        call = call.header(FRESH_METADATA, "true");
    }
    if req.is_strict_acl() {
        let canned = req.header_acl()?.unwrap_or(CannedAcl::Private);
        let descriptor = AclDescriptor::from_canned(&req.acl_user(), canned);
        call = call.header(OBJECT_ACL_SYSMETA, descriptor.to_json()?);
    }
    let resp = req.get_response(backend, call).await?;

    let etag = resp.header("etag").unwrap_or_default().to_string();
    if source.is_some() {
        let last_modified = resp
            .header("last-modified")
            .and_then(iso8601_from_http_date)
            .unwrap_or_default();
        let body = xml::render_copy_object_result(&etag, &last_modified);
        return Ok(GatewayResponse::xml(StatusCode::OK, body).into_response());
    }

    let mut out = GatewayResponse::new(StatusCode::OK);
    if !etag.is_empty() {
        out.set_header("etag", &etag);
    }
    Ok(out.into_response())
}

/// `DELETE /{bucket}/{key}`.  Deleting a missing key succeeds.
async fn delete_object(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    let mut call = Call::new().method(Method::DELETE).body(Bytes::new());
    match req.multipart_manifest_delete_query(backend).await {
        Ok(Some(query)) => {
            for (key, value) in query {
                call = call.query(key, value);
            }
        }
        Ok(None) => {}
        Err(OssError::NoSuchKey { .. }) => return Ok(StatusCode::NO_CONTENT.into_response()),
        Err(err) => return Err(err),
    }

    match req.get_response(backend, call).await {
        Ok(_) | Err(OssError::NoSuchKey { .. }) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(err) => Err(err),
    }
}
