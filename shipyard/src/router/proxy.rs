//! Host-based content proxy

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    response::Response,
};
use http::{header, HeaderMap, HeaderName};
use tracing::debug;

use crate::errors::PipelineError;
use crate::models::deployment::artifact_key;
use crate::router::RouterState;

/// Document served for the root path
pub const INDEX_DOCUMENT: &str = "index.html";

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Deployment id carried by the leftmost label of `host`
pub fn deployment_from_host(host: &str) -> Result<String, PipelineError> {
    let host = host.trim();
    let name = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    };
    let mut labels = name.split('.');
    match (labels.next(), labels.next()) {
        (Some(first), Some(rest)) if !first.is_empty() && !rest.is_empty() => {
            Ok(first.to_ascii_lowercase())
        }
        _ => Err(PipelineError::InvalidInput(format!(
            "host {:?} names no deployment",
            host
        ))),
    }
}

/// Content store key for a request path; the root path maps to the index
pub fn object_key(deployment_id: &str, path: &str) -> String {
    let relative = path.trim_start_matches('/');
    if relative.is_empty() {
        artifact_key(deployment_id, INDEX_DOCUMENT)
    } else {
        artifact_key(deployment_id, relative)
    }
}

/// Forward any request to the content store object its host and path name
pub async fn proxy_handler(
    State(state): State<Arc<RouterState>>,
    request: Request,
) -> Result<Response, PipelineError> {
    let (parts, body) = request.into_parts();

    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.host())
        .ok_or_else(|| PipelineError::InvalidInput("request has no host".to_string()))?;
    let deployment_id = deployment_from_host(host)?;

    let key = object_key(&deployment_id, parts.uri.path());
    let query = parts
        .uri
        .query()
        .map(|q| format!("?{q}"))
        .unwrap_or_default();
    let target = format!(
        "{}/{}{}",
        state.content_base.as_str().trim_end_matches('/'),
        key,
        query
    );
    debug!("{} {} -> {}", parts.method, parts.uri, target);

    let body = to_bytes(body, state.max_request_body)
        .await
        .map_err(|e| PipelineError::InvalidInput(format!("unreadable request body: {}", e)))?;

    let upstream = state
        .client
        .request(parts.method, &target)
        .headers(forwarded_headers(&parts.headers))
        .body(body)
        .send()
        .await?;

    let mut response = Response::builder().status(upstream.status());
    if let Some(headers) = response.headers_mut() {
        for (name, value) in upstream.headers() {
            if !is_hop_by_hop(name) {
                headers.append(name.clone(), value.clone());
            }
        }
    }
    response
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| PipelineError::ServerError(e.to_string()))
}

fn forwarded_headers(incoming: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in incoming {
        if name == header::HOST || name == header::CONTENT_LENGTH || is_hop_by_hop(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(name)
}
