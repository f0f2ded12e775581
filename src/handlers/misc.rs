//! Small bucket sub-resource handlers and multi-object delete.

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{Method, StatusCode};
use tracing::debug;

use crate::errors::OssError;
use crate::request::OssRequest;
use crate::response::GatewayResponse;
use crate::swift::backend::SwiftBackend;
use crate::swift::mapper::Call;
use crate::xml::{self, DeleteErrorEntry};

/// HEAD the bucket so a missing one is reported before any document is
/// rendered.
async fn ensure_bucket(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<(), OssError> {
    let bucket = req.bucket_name().to_string();
    req.get_response(backend, Call::new().method(Method::HEAD).container(bucket).body(Bytes::new()))
        .await?;
    Ok(())
}

/// `GET /{bucket}?location`
pub async fn location(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    if req.method != Method::GET {
        return Err(OssError::MethodNotAllowed);
    }
    ensure_bucket(req, backend).await?;
    let body = xml::render_location_constraint(&req.config.server.region);
    Ok(GatewayResponse::xml(StatusCode::OK, body).into_response())
}

/// `GET /{bucket}?logging`.  Access logging is never enabled.
pub async fn logging_status(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    match req.method {
        Method::GET => {
            ensure_bucket(req, backend).await?;
            let body = xml::render_bucket_logging_status();
            Ok(GatewayResponse::xml(StatusCode::OK, body).into_response())
        }
        Method::PUT => Err(OssError::not_implemented("Bucket logging is not implemented")),
        _ => Err(OssError::MethodNotAllowed),
    }
}

/// `GET /{bucket}?versioning`.  Versioning is never enabled.
pub async fn versioning(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    match req.method {
        Method::GET => {
            ensure_bucket(req, backend).await?;
            let body = xml::render_versioning_configuration();
            Ok(GatewayResponse::xml(StatusCode::OK, body).into_response())
        }
        Method::PUT => Err(OssError::not_implemented("Bucket versioning is not implemented")),
        _ => Err(OssError::MethodNotAllowed),
    }
}

/// `POST /{bucket}?delete`: DeleteResult.
pub async fn multi_delete(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    if req.method != Method::POST {
        return Err(OssError::MethodNotAllowed);
    }

    let body = req.xml_body(req.config.gateway.max_multi_delete_body_size, true)?;
    let (keys, quiet) = xml::parse_delete_xml(&body)?;
    if keys.len() > req.config.gateway.max_multi_delete_objects {
        return Err(OssError::MalformedXml);
    }

    let bucket = req.bucket_name().to_string();
    let mut deleted: Vec<&str> = Vec::new();
    let mut failed: Vec<(&str, OssError)> = Vec::new();
    for key in &keys {
        let call = Call::new()
            .method(Method::DELETE)
            .object(bucket.clone(), key.clone())
            .body(Bytes::new());
        match req.get_response(backend, call).await {
            Ok(_) | Err(OssError::NoSuchKey { .. }) => deleted.push(key.as_str()),
            Err(err @ OssError::NoSuchBucket { .. }) => return Err(err),
            Err(err) => {
                debug!(key = %key, code = err.code(), "multi-delete entry failed");
                failed.push((key.as_str(), err));
            }
        }
    }

    let messages: Vec<String> = failed.iter().map(|(_, err)| err.to_string()).collect();
    let errors: Vec<DeleteErrorEntry<'_>> = failed
        .iter()
        .zip(&messages)
        .map(|((key, err), message)| DeleteErrorEntry {
            key,
            code: err.code(),
            message,
        })
        .collect();

    let body = xml::render_delete_result(&deleted, &errors, quiet);
    Ok(GatewayResponse::xml(StatusCode::OK, body).into_response())
}
