//! OSS-protocol error types.
//!
//! Every variant maps to a well-known OSS error code.  The enum
//! implements [`axum::response::IntoResponse`] so the gateway can simply
//! return `Err(OssError::NoSuchBucket { .. })` and have the fault
//! document rendered for the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::xml::render_error;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// OSS error codes expressed as a Rust enum.
#[derive(Debug, Error)]
pub enum OssError {
    /// The request carries no OSS credentials at all.  Not a fault: the
    /// server hands such requests to the backend untouched.
    #[error("The request is not an OSS request")]
    NotOssRequest,

    /// The backend rejected the translated request as malformed.
    #[error("{message}")]
    MalformedRequest { message: String },

    /// The request is structurally invalid for this operation.
    #[error("{message}")]
    InvalidRequest { message: String },

    /// Access denied.
    #[error("{message}")]
    AccessDenied { message: String },

    /// The request signature does not match.
    #[error("The request signature we calculated does not match the signature you provided. Check your key and signing method.")]
    SignatureDoesNotMatch,

    /// The request time is too far from the server time.
    #[error("The difference between the request time and the current time is too large.")]
    RequestTimeTooSkewed,

    /// A request argument is invalid.
    #[error("{message}")]
    InvalidArgument {
        name: String,
        value: String,
        message: String,
    },

    /// The request URI could not be parsed.
    #[error("Couldn't parse the specified URI.")]
    InvalidUri { uri: String },

    /// An invalid bucket name was provided.
    #[error("The specified bucket is not valid.")]
    InvalidBucketName { name: String },

    /// The object name is not acceptable.
    #[error("The specified object is not valid.")]
    InvalidObjectName,

    /// The Content-MD5 header is not a valid digest.
    #[error("The Content-MD5 you specified is not valid.")]
    InvalidDigest { content_md5: String },

    /// The Content-MD5 header does not match the received body.
    #[error("The Content-MD5 you specified did not match what we received.")]
    BadDigest { content_md5: String },

    /// Content-Length header is required but missing.
    #[error("You must provide the Content-Length HTTP header.")]
    MissingContentLength,

    /// The entity is too large.
    #[error("Your proposed upload exceeds the maximum allowed object size.")]
    EntityTooLarge,

    /// Invalid range request.
    #[error("The requested range cannot be satisfied.")]
    InvalidRange,

    /// A conditional header did not hold.
    #[error("At least one of the preconditions you specified did not hold.")]
    PreconditionFailed,

    /// The client did not send the body fast enough.
    #[error("Your socket connection to the server was not read from or written to within the timeout period.")]
    RequestTimeout,

    /// The specified bucket does not exist.
    #[error("The specified bucket does not exist.")]
    NoSuchBucket { bucket: String },

    /// The specified key does not exist.
    #[error("The specified key does not exist.")]
    NoSuchKey { key: String },

    /// A bucket with the requested name already exists.
    #[error("The requested bucket name is not available. The bucket namespace is shared by all users of the system. Please select a different name and try again.")]
    BucketAlreadyExists { bucket: String },

    /// The bucket you tried to delete is not empty.
    #[error("The bucket you tried to delete is not empty.")]
    BucketNotEmpty { bucket: String },

    /// Only the standard storage class is supported.
    #[error("The storage class you specified is not valid.")]
    InvalidStorageClass,

    /// Feature not implemented.
    #[error("{message}")]
    NotImplemented { message: String },

    /// The ACL document could not be understood.
    #[error("The XML you provided was not well-formed or did not validate against our published schema.")]
    MalformedAcl,

    /// Malformed XML in request body.
    #[error("The XML you provided was not well-formed or did not validate against our published schema.")]
    MalformedXml,

    /// HTTP method not allowed for this resource.
    #[error("The specified method is not allowed against this resource.")]
    MethodNotAllowed,

    /// Catch-all for unexpected internal errors.
    #[error("We encountered an internal error. Please try again.")]
    InternalError(#[from] anyhow::Error),
}

impl OssError {
    /// Shorthand for [`OssError::AccessDenied`] with the default message.
    pub fn access_denied() -> Self {
        OssError::AccessDenied {
            message: "Access Denied".to_string(),
        }
    }

    /// Shorthand for [`OssError::InvalidArgument`].
    pub fn invalid_argument(
        name: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        OssError::InvalidArgument {
            name: name.into(),
            value: value.into(),
            message: message.into(),
        }
    }

    /// Shorthand for [`OssError::NotImplemented`].
    pub fn not_implemented(message: impl Into<String>) -> Self {
        OssError::NotImplemented {
            message: message.into(),
        }
    }

    /// Return the OSS XML error code string.
    pub fn code(&self) -> &'static str {
        match self {
            OssError::NotOssRequest => "InvalidRequest",
            OssError::MalformedRequest { .. } => "InvalidRequest",
            OssError::InvalidRequest { .. } => "InvalidRequest",
            OssError::AccessDenied { .. } => "AccessDenied",
            OssError::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            OssError::RequestTimeTooSkewed => "RequestTimeTooSkewed",
            OssError::InvalidArgument { .. } => "InvalidArgument",
            OssError::InvalidUri { .. } => "InvalidURI",
            OssError::InvalidBucketName { .. } => "InvalidBucketName",
            OssError::InvalidObjectName => "InvalidObjectName",
            OssError::InvalidDigest { .. } => "InvalidDigest",
            OssError::BadDigest { .. } => "BadDigest",
            OssError::MissingContentLength => "MissingContentLength",
            OssError::EntityTooLarge => "EntityTooLarge",
            OssError::InvalidRange => "InvalidRange",
            OssError::PreconditionFailed => "PreconditionFailed",
            OssError::RequestTimeout => "RequestTimeout",
            OssError::NoSuchBucket { .. } => "NoSuchBucket",
            OssError::NoSuchKey { .. } => "NoSuchKey",
            OssError::BucketAlreadyExists { .. } => "BucketAlreadyExists",
            OssError::BucketNotEmpty { .. } => "BucketNotEmpty",
            OssError::InvalidStorageClass => "InvalidStorageClass",
            OssError::NotImplemented { .. } => "NotImplemented",
            OssError::MalformedAcl => "MalformedACLError",
            OssError::MalformedXml => "MalformedXML",
            OssError::MethodNotAllowed => "MethodNotAllowed",
            OssError::InternalError(_) => "InternalError",
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            OssError::NotOssRequest => StatusCode::BAD_REQUEST,
            OssError::MalformedRequest { .. } => StatusCode::BAD_REQUEST,
            OssError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            OssError::AccessDenied { .. } => StatusCode::FORBIDDEN,
            OssError::SignatureDoesNotMatch => StatusCode::FORBIDDEN,
            OssError::RequestTimeTooSkewed => StatusCode::FORBIDDEN,
            OssError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            OssError::InvalidUri { .. } => StatusCode::BAD_REQUEST,
            OssError::InvalidBucketName { .. } => StatusCode::BAD_REQUEST,
            OssError::InvalidObjectName => StatusCode::BAD_REQUEST,
            OssError::InvalidDigest { .. } => StatusCode::BAD_REQUEST,
            OssError::BadDigest { .. } => StatusCode::BAD_REQUEST,
            OssError::MissingContentLength => StatusCode::LENGTH_REQUIRED,
            OssError::EntityTooLarge => StatusCode::BAD_REQUEST,
            OssError::InvalidRange => StatusCode::RANGE_NOT_SATISFIABLE,
            OssError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            OssError::RequestTimeout => StatusCode::BAD_REQUEST,
            OssError::NoSuchBucket { .. } => StatusCode::NOT_FOUND,
            OssError::NoSuchKey { .. } => StatusCode::NOT_FOUND,
            OssError::BucketAlreadyExists { .. } => StatusCode::CONFLICT,
            OssError::BucketNotEmpty { .. } => StatusCode::CONFLICT,
            OssError::InvalidStorageClass => StatusCode::BAD_REQUEST,
            OssError::NotImplemented { .. } => StatusCode::NOT_IMPLEMENTED,
            OssError::MalformedAcl => StatusCode::BAD_REQUEST,
            OssError::MalformedXml => StatusCode::BAD_REQUEST,
            OssError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            OssError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Extra elements rendered into the fault document after `<Message>`.
    pub fn details(&self) -> Vec<(&'static str, String)> {
        match self {
            OssError::InvalidArgument { name, value, .. } => vec![
                ("ArgumentName", name.clone()),
                ("ArgumentValue", value.clone()),
            ],
            OssError::InvalidUri { uri } => vec![("URI", uri.clone())],
            OssError::InvalidBucketName { name } => vec![("BucketName", name.clone())],
            OssError::InvalidDigest { content_md5 } | OssError::BadDigest { content_md5 } => {
                vec![("Content-MD5", content_md5.clone())]
            }
            OssError::NoSuchBucket { bucket }
            | OssError::BucketAlreadyExists { bucket }
            | OssError::BucketNotEmpty { bucket } => vec![("BucketName", bucket.clone())],
            OssError::NoSuchKey { key } => vec![("Key", key.clone())],
            _ => Vec::new(),
        }
    }
}

impl IntoResponse for OssError {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();
        let date = httpdate::fmt_http_date(std::time::SystemTime::now());

        if let OssError::InternalError(err) = &self {
            // The cause may name backend endpoints; it stays in the log.
            tracing::error!(request_id = %request_id, error = %err, "internal error");
        }

        let details = self.details();
        let body = render_error(self.code(), &self.to_string(), &details, &request_id);

        (
            status,
            [
                ("content-type", "application/xml".to_string()),
                ("x-oss-request-id", request_id),
                ("date", date),
                ("server", "OssBridge".to_string()),
            ],
            body,
        )
            .into_response()
    }
}
