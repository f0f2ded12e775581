//! OSS operation handlers.
//!
//! [`dispatch`] routes a normalized request to the controller for its
//! [`OperationKind`].  Handlers stay thin: they chain backend calls
//! through [`OssRequest::get_response`] and render the OSS document.

use axum::response::Response;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::errors::OssError;
use crate::metrics::record_operation;
use crate::request::OssRequest;
use crate::router::{OperationKind, UNSUPPORTED_PARAMS};
use crate::swift::backend::SwiftBackend;

pub mod acl;
pub mod bucket;
pub mod misc;
pub mod object;
pub mod service;

/// Timestamp placeholder for containers the backend reports without one.
pub(crate) const DEFAULT_CREATION_DATE: &str = "2009-02-03T16:45:09.000Z";

/// Run the operation `req` selects.
pub async fn dispatch(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    let operation = req.operation()?;
    debug!(
        operation = %operation,
        method = %req.method,
        bucket = req.bucket.as_deref().unwrap_or(""),
        object = req.object.as_deref().unwrap_or(""),
        "dispatching OSS operation"
    );

    let result = run(operation, req, backend).await;

    let status = match &result {
        Ok(resp) => resp.status(),
        Err(err) => err.status_code(),
    };
    record_operation(operation.as_str(), status);
    result
}

async fn run(
    operation: OperationKind,
    req: &mut OssRequest,
    backend: &dyn SwiftBackend,
) -> Result<Response, OssError> {
    if req.is_strict_acl() {
        req.authenticate(backend).await?;
    }

    match operation {
        OperationKind::Service => service::handle(req, backend).await,
        OperationKind::Bucket => bucket::handle(req, backend).await,
        OperationKind::Object => object::handle(req, backend).await,
        OperationKind::Acl if req.is_strict_acl() => acl::handle_strict(req, backend).await,
        OperationKind::Acl => acl::handle(req, backend).await,
        OperationKind::MultiDelete => misc::multi_delete(req, backend).await,
        OperationKind::Location => misc::location(req, backend).await,
        OperationKind::LoggingStatus => misc::logging_status(req, backend).await,
        OperationKind::Versioning => misc::versioning(req, backend).await,
        OperationKind::Unsupported => {
            let name = UNSUPPORTED_PARAMS
                .iter()
                .find(|p| req.params.contains_key(**p))
                .copied()
                .unwrap_or("This sub-resource");
            Err(OssError::not_implemented(format!("{name} is not implemented")))
        }
        OperationKind::Cors
        | OperationKind::Part
        | OperationKind::Upload
        | OperationKind::Uploads
        | OperationKind::Lifecycle
        | OperationKind::Website
        | OperationKind::Referer => Err(OssError::not_implemented(format!(
            "{operation} is not implemented"
        ))),
    }
}

/// Backend listing timestamp (`2024-01-02T03:04:05.123456`) in OSS form
/// (`2024-01-02T03:04:05.123Z`).
pub(crate) fn iso8601_from_backend(value: &str) -> String {
    let trimmed = value.trim_end_matches('Z');
    match trimmed.split_once('.') {
        Some((seconds, fraction)) => {
            let millis: String = fraction.chars().chain("000".chars()).take(3).collect();
            format!("{seconds}.{millis}Z")
        }
        None => format!("{trimmed}.000Z"),
    }
}

/// `Last-Modified` header value in OSS listing form.
pub(crate) fn iso8601_from_http_date(value: &str) -> Option<String> {
    let time = httpdate::parse_http_date(value).ok()?;
    let time: DateTime<Utc> = time.into();
    Some(time.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
}
