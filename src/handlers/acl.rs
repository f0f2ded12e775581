//! `?acl` controllers.
//!
//! The generic controller reads and writes canned ACLs through the
//! backend container grants.  The strict controller keeps a full
//! descriptor in sysmeta and checks `READ_ACP` / `WRITE_ACP` itself.

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{Method, StatusCode};

use crate::acl::{AclDescriptor, CannedAcl, Permission, CONTAINER_ACL_SYSMETA, OBJECT_ACL_SYSMETA};
use crate::errors::OssError;
use crate::request::OssRequest;
use crate::response::GatewayResponse;
use crate::swift::backend::SwiftBackend;
use crate::swift::mapper::Call;
use crate::xml;

/// Grant reported for objects that follow their bucket's ACL.
const INHERITED_GRANT: &str = "default";

pub async fn handle(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    match (req.method.clone(), req.is_object_request()) {
        (Method::GET, false) => get_bucket_acl(req, backend).await,
        (Method::PUT, false) => put_bucket_acl(req, backend).await,
        (Method::GET, true) => get_object_acl(req, backend).await,
        (Method::PUT, true) => Err(OssError::not_implemented(
            "Object ACLs require the oss_acl gateway mode",
        )),
        _ => Err(OssError::MethodNotAllowed),
    }
}

/// Canned ACL a PUT asks for: `x-oss-acl`, else the policy document.
fn requested_acl(req: &OssRequest) -> Result<CannedAcl, OssError> {
    if let Some(acl) = req.header_acl()? {
        return Ok(acl);
    }
    let body = req.xml_body(req.config.gateway.max_acl_body_size, false)?;
    let grant = xml::parse_acl_grant(&body)?;
    CannedAcl::from_oss_name(&grant)
        .ok_or_else(|| OssError::invalid_argument("x-oss-acl", grant, "Invalid canned ACL"))
}

fn policy_response(owner: &str, acl: CannedAcl) -> Result<Response, OssError> {
    let grant = acl.oss_name().ok_or_else(|| {
        OssError::not_implemented("The ACL cannot be expressed as a canned ACL")
    })?;
    let body = xml::render_access_control_policy(owner, owner, grant);
    Ok(GatewayResponse::xml(StatusCode::OK, body).into_response())
}

// -- Generic controller -------------------------------------------------------

async fn get_bucket_acl(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    let bucket = req.bucket_name().to_string();
    let resp = req
        .get_response(backend, Call::new().method(Method::HEAD).container(bucket))
        .await?;
    let canned = CannedAcl::from_backend(resp.container_read.as_deref(), resp.container_write.as_deref());
    policy_response(&req.acl_user(), canned)
}

async fn put_bucket_acl(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    let acl = requested_acl(req)?;
    let bucket = req.bucket_name().to_string();
    let call = Call::new()
        .method(Method::POST)
        .container(bucket)
        .body(Bytes::new())
        .canned_acl(acl);
    req.get_response(backend, call).await?;
    Ok(StatusCode::OK.into_response())
}

async fn get_object_acl(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    req.get_response(backend, Call::new().method(Method::HEAD).body(Bytes::new()))
        .await?;
    let owner = req.acl_user();
    let body = xml::render_access_control_policy(&owner, &owner, INHERITED_GRANT);
    Ok(GatewayResponse::xml(StatusCode::OK, body).into_response())
}

// -- Strict controller --------------------------------------------------------

pub async fn handle_strict(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    match req.method {
        Method::GET => get_descriptor_acl(req, backend).await,
        Method::PUT => put_descriptor_acl(req, backend).await,
        _ => Err(OssError::MethodNotAllowed),
    }
}

/// Stored descriptor of the addressed bucket or object, after checking
/// that the caller holds `permission` on it.
async fn current_descriptor(
    req: &mut OssRequest,
    backend: &dyn SwiftBackend,
    permission: Permission,
) -> Result<AclDescriptor, OssError> {
    let call = Call::new().method(Method::HEAD).body(Bytes::new());
    let resp = req.get_response(backend, call).await?;
    let descriptor = if req.is_object_request() {
        resp.object_acl
    } else {
        resp.bucket_acl
    }
    .ok_or_else(|| OssError::InternalError(anyhow::anyhow!("ACL view missing from response")))?;

    if !descriptor.allows(&req.acl_user(), permission) {
        return Err(OssError::access_denied());
    }
    Ok(descriptor)
}

async fn get_descriptor_acl(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    let descriptor = current_descriptor(req, backend, Permission::ReadAcp).await?;
    policy_response(&descriptor.owner, descriptor.canned())
}

async fn put_descriptor_acl(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    let canned = requested_acl(req)?;
    let current = current_descriptor(req, backend, Permission::WriteAcp).await?;
    let updated = AclDescriptor::from_canned(&current.owner, canned);

    let call = if req.is_object_request() {
        Call::new()
            .method(Method::POST)
            .header(OBJECT_ACL_SYSMETA, updated.to_json()?)
    } else {
        Call::new()
            .method(Method::POST)
            .canned_acl(canned)
            .header(CONTAINER_ACL_SYSMETA, updated.to_json()?)
    };
    req.get_response(backend, call.body(Bytes::new())).await?;
    Ok(StatusCode::OK.into_response())
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

    #[tokio::test]
    async fn test_get_bucket_acl_from_grants() {
        let backend = MockBackend::new(|_| {
            BackendResponse::new(StatusCode::NO_CONTENT).with_header("x-container-read", ".rlistings,.r:*")
        });
        let mut req = signed_request(Method::GET, "/mybucket?acl", &[]);
        let body = body_string(handle(&mut req, &backend).await.unwrap()).await;
        assert!(body.contains("<Grant>public-read</Grant>"));
        assert_eq!(backend.call_lines(), vec!["HEAD /v1/test:tester/mybucket".to_string()]);
    }

    #[tokio::test]
    async fn test_get_bucket_acl_unrepresentable() {
        let backend = MockBackend::new(|_| {
            BackendResponse::new(StatusCode::NO_CONTENT).with_header("x-container-read", "AUTH_other")
        });
        let mut req = signed_request(Method::GET, "/mybucket?acl", &[]);
        let err = handle(&mut req, &backend).await.unwrap_err();
        assert_eq!(err.code(), "NotImplemented");
    }

    #[tokio::test]
    async fn test_put_bucket_acl_from_body() {
        let backend = MockBackend::always(StatusCode::NO_CONTENT);
        let mut req = signed_request(Method::PUT, "/mybucket?acl", &[]);
        req.body = Bytes::from_static(
            b"<AccessControlPolicy><AccessControlList><Grant>public-read-write</Grant></AccessControlList></AccessControlPolicy>",
        );
        let resp = handle(&mut req, &backend).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let post = &backend.calls()[0];
        assert_eq!(post.method, Method::POST);
        assert_eq!(post.query, "");
        assert_eq!(post.headers.get("x-container-read").unwrap(), ".r:*,.rlistings");
        assert_eq!(post.headers.get("x-container-write").unwrap(), ".r:*");
    }

    #[tokio::test]
    async fn test_put_bucket_acl_rejects_unknown_name() {
        let backend = MockBackend::always(StatusCode::NO_CONTENT);
        let mut req = signed_request(Method::PUT, "/mybucket?acl", &[("x-oss-acl", "authenticated-read")]);
        let err = handle(&mut req, &backend).await.unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_object_acl_generic() {
        let backend = MockBackend::always(StatusCode::OK);
        let mut req = signed_request(Method::PUT, "/mybucket/key?acl", &[("x-oss-acl", "private")]);
        assert_eq!(handle(&mut req, &backend).await.unwrap_err().code(), "NotImplemented");

        let backend = MockBackend::new(|call| {
            if call.object.is_none() {
                BackendResponse::new(StatusCode::NO_CONTENT)
            } else {
                BackendResponse::new(StatusCode::OK)
            }
        });
        let mut req = signed_request(Method::GET, "/mybucket/key?acl", &[]);
        let body = body_string(handle(&mut req, &backend).await.unwrap()).await;
        assert!(body.contains("<Grant>default</Grant>"));
    }

    fn strict_backend(bucket_acl: AclDescriptor) -> MockBackend {
        let json = bucket_acl.to_json().unwrap();
        MockBackend::new(move |call| match (&call.container, &call.method) {
            (None, _) => BackendResponse::new(StatusCode::NO_CONTENT).with_header(BACKEND_REMOTE_USER, "test:tester"),
            (Some(_), &Method::HEAD) => {
                BackendResponse::new(StatusCode::NO_CONTENT).with_header(CONTAINER_ACL_SYSMETA, &json)
            }
            _ => BackendResponse::new(StatusCode::NO_CONTENT),
        })
    }

    fn strict_request(method: Method, uri: &str) -> OssRequest {
        let config = config_with(GatewayConfig {
            oss_acl: true,
            ..Default::default()
        });
        signed_request_with(config, method, uri, &[]).unwrap()
    }

    #[tokio::test]
    async fn test_strict_get_reads_descriptor() {
        let backend = strict_backend(AclDescriptor::from_canned("test:tester", CannedAcl::PublicRead));
        let mut req = strict_request(Method::GET, "/mybucket?acl");
        req.authenticate(&backend).await.unwrap();
        let body = body_string(handle_strict(&mut req, &backend).await.unwrap()).await;
        assert!(body.contains("<Grant>public-read</Grant>"));
        assert!(body.contains("<ID>test:tester</ID>"));
    }

    #[tokio::test]
    async fn test_strict_denies_foreign_bucket() {
        let backend = strict_backend(AclDescriptor::from_canned("someone-else", CannedAcl::Private));
        let mut req = strict_request(Method::GET, "/mybucket?acl");
        req.authenticate(&backend).await.unwrap();
        let err = handle_strict(&mut req, &backend).await.unwrap_err();
        assert_eq!(err.code(), "AccessDenied");
    }

    #[tokio::test]
    async fn test_strict_put_writes_descriptor() {
        let backend = strict_backend(AclDescriptor::from_canned("test:tester", CannedAcl::Private));
        let mut req = strict_request(Method::PUT, "/mybucket?acl");
        req.headers
            .insert("x-oss-acl", http::HeaderValue::from_static("public-read"));
        req.authenticate(&backend).await.unwrap();
        handle_strict(&mut req, &backend).await.unwrap();

        let post = backend.calls().pop().unwrap();
        assert_eq!(post.method, Method::POST);
        assert_eq!(post.headers.get("x-container-read").unwrap(), ".r:*,.rlistings");
        let json = post.headers.get(CONTAINER_ACL_SYSMETA).unwrap().to_str().unwrap();
        let written: AclDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(written.owner, "test:tester");
        assert_eq!(written.canned(), CannedAcl::PublicRead);
    }
}
