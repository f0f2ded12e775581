//! Axum router construction and request plumbing.
//!
//! OSS requests are not routed by path: the bucket and key may live in the
//! `Host` header, and the operation is chosen by sub-resource parameters.
//! [`gateway_middleware`] therefore intercepts every request, parses it
//! into an [`OssRequest`] and hands it to [`handlers::dispatch`].  Requests
//! without OSS credentials fall through to [`passthrough`], which forwards
//! them to the backend unchanged.

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::errors::{generate_request_id, OssError};
use crate::handlers;
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::request::OssRequest;
use crate::swift::backend::{AccessLog, BackendCall, SwiftBackend};
use crate::AppState;

/// Paths served by the gateway itself.
const INFRA_PATHS: &[&str] = &["/health", "/metrics"];

/// Response headers from the backend that must not be relayed.
const HOP_BY_HOP: &[&str] = &["connection", "keep-alive", "transfer-encoding", "upgrade"];

/// Build the axum [`Router`].
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check endpoint (not part of the OSS API).
        .route("/health", get(health_check))
        // Prometheus metrics endpoint.
        .route("/metrics", get(metrics_handler))
        // Everything that is not an OSS request goes to the backend as-is.
        .fallback(passthrough)
        .with_state(state.clone())
        // Layer ordering: inner layers run first, outer layers wrap them.
        .layer(middleware::from_fn_with_state(state, gateway_middleware))
        .layer(middleware::from_fn(common_headers_middleware))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        // Objects can be large; the body limit is the backend's business.
        .layer(DefaultBodyLimit::disable())
}

// -- Common headers middleware -----------------------------------------------

/// Adds the standard OSS response headers to every response:
/// - `x-oss-request-id`: 16-character uppercase hex string
/// - `Date`: RFC 7231 formatted timestamp
/// - `Server`: `OssBridge`
async fn common_headers_middleware(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    // Error responses already carry the id quoted in their body.
    if !headers.contains_key("x-oss-request-id") {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-oss-request-id", value);
        }
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert("date", value);
    }
    headers.insert("server", HeaderValue::from_static("OssBridge"));

    response
}

// -- Gateway middleware ------------------------------------------------------

/// Parse the request as OSS and run the matching operation.
async fn gateway_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if INFRA_PATHS.contains(&req.uri().path()) && req.method() == http::Method::GET {
        return next.run(req).await;
    }

    let (parts, body) = req.into_parts();
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(e) => {
            warn!("Failed to read request body: {}", e);
            return OssError::InternalError(anyhow::anyhow!("request body read failed: {e}")).into_response();
        }
    };

    let now = chrono::Utc::now().timestamp();
    let parsed = OssRequest::from_parts(
        parts.method.clone(),
        &parts.uri,
        parts.headers.clone(),
        body.clone(),
        state.config.clone(),
        now,
    );

    match parsed {
        Ok(mut oss) => handlers::dispatch(&mut oss, state.backend.as_ref())
            .await
            .into_response(),
        Err(OssError::NotOssRequest) => next.run(Request::from_parts(parts, Body::from(body))).await,
        Err(err) => {
            debug!(method = %parts.method, uri = %parts.uri, code = err.code(), "rejected request");
            err.into_response()
        }
    }
}

// -- Passthrough -------------------------------------------------------------

/// Forward a request that carries no OSS credentials to the backend.
async fn passthrough(State(state): State<Arc<AppState>>, req: Request<Body>) -> Result<Response, OssError> {
    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| OssError::InternalError(anyhow::anyhow!("request body read failed: {e}")))?;

    let path = percent_encoding::percent_decode_str(parts.uri.path())
        .decode_utf8_lossy()
        .into_owned();
    let mut segments = path.trim_start_matches('/').splitn(4, '/').skip(1);
    let account = segments.next().unwrap_or_default().to_string();

    let call = BackendCall {
        method: parts.method,
        account,
        container: None,
        object: None,
        path,
        query: parts.uri.query().unwrap_or_default().to_string(),
        headers: parts.headers,
        body,
        access_log: AccessLog::Default,
        pre_authorized: false,
    };
    debug!(method = %call.method, path = %call.path, "passthrough");

    let resp = state.backend.call(call).await.map_err(OssError::from)?;

    let mut out = Response::new(Body::from(resp.body));
    *out.status_mut() = resp.status;
    for (name, value) in resp.headers.iter() {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        out.headers_mut().append(name.clone(), value.clone());
    }
    Ok(out)
}

// -- Health check ------------------------------------------------------------

async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}
