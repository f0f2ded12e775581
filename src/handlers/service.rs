//! Service-level handler: `GET /` lists the caller's buckets.

use axum::response::{IntoResponse, Response};
use http::{Method, StatusCode};
use serde::Deserialize;

use super::{iso8601_from_backend, DEFAULT_CREATION_DATE};
use crate::errors::OssError;
use crate::request::OssRequest;
use crate::response::GatewayResponse;
use crate::swift::backend::SwiftBackend;
use crate::swift::mapper::Call;
use crate::xml;

/// One entry of the backend account listing.
#[derive(Debug, Deserialize)]
struct ContainerEntry {
    name: String,
    #[serde(default)]
    last_modified: Option<String>,
}

pub async fn handle(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    if req.method != Method::GET {
        return Err(OssError::MethodNotAllowed);
    }
    list_buckets(req, backend).await
}

/// `GET /`: ListAllMyBucketsResult.
async fn list_buckets(req: &mut OssRequest, backend: &dyn SwiftBackend) -> Result<Response, OssError> {
    let call = Call::new()
        .method(Method::GET)
        .account()
        .query("format", Some("json".to_string()));
    let resp = req.get_response(backend, call).await?;

    let containers: Vec<ContainerEntry> = if resp.body.is_empty() {
        Vec::new()
    } else {
        serde_json::from_slice(&resp.body)
            .map_err(|e| OssError::InternalError(anyhow::anyhow!("invalid account listing: {e}")))?
    };

    let dates: Vec<String> = containers
        .iter()
        .map(|c| {
            c.last_modified
                .as_deref()
                .map(iso8601_from_backend)
                .unwrap_or_else(|| DEFAULT_CREATION_DATE.to_string())
        })
        .collect();
    let buckets: Vec<(&str, &str)> = containers
        .iter()
        .zip(&dates)
        .map(|(c, date)| (c.name.as_str(), date.as_str()))
        .collect();

    let owner = req.acl_user();
    let body = xml::render_list_buckets_result(&owner, &owner, &buckets);
    Ok(GatewayResponse::xml(StatusCode::OK, body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::tests::signed_request;
    use crate::swift::backend::BackendResponse;
    use crate::swift::mock::MockBackend;

    #[tokio::test]
    async fn test_list_buckets() {
        let backend = MockBackend::new(|_| {
            BackendResponse::new(StatusCode::OK).with_body(
                r#"[{"name":"alpha","count":1,"bytes":3,"last_modified":"2024-01-02T03:04:05.123456"},{"name":"beta","count":0,"bytes":0}]"#,
            )
        });
        let mut req = signed_request(Method::GET, "/", &[]);
        let resp = handle(&mut req, &backend).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].path, "/v1/test:tester");
        assert_eq!(calls[0].query, "format=json");

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("<Name>alpha</Name>"));
        assert!(body.contains("<CreationDate>2024-01-02T03:04:05.123Z</CreationDate>"));
        assert!(body.contains(&format!("<CreationDate>{DEFAULT_CREATION_DATE}</CreationDate>")));
        assert!(body.contains("<ID>test:tester</ID>"));
    }

    #[tokio::test]
    async fn test_service_rejects_put() {
        let backend = MockBackend::always(StatusCode::OK);
        let mut req = signed_request(Method::PUT, "/", &[]);
        let err = handle(&mut req, &backend).await.unwrap_err();
        assert_eq!(err.code(), "MethodNotAllowed");
    }
}
