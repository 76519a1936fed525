//! Content router: serves a deployment's files by host subdomain
//!
//! Stateless; every request resolves from its `Host` header alone.

pub mod proxy;

use std::sync::Arc;

use axum::Router;
use reqwest::redirect::Policy;
use tower_http::trace::TraceLayer;
use url::Url;

use crate::errors::PipelineError;

/// Largest request body forwarded to the content store
const MAX_REQUEST_BODY: usize = 10 * 1024 * 1024;

pub struct RouterState {
    pub client: reqwest::Client,
    /// Public base URL of the content store bucket
    pub content_base: Url,
    pub max_request_body: usize,
}

impl RouterState {
    pub fn new(content_base: Url) -> Result<Self, PipelineError> {
        // Redirects from the store are passed through, not followed
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()?;
        Ok(Self {
            client,
            content_base,
            max_request_body: MAX_REQUEST_BODY,
        })
    }
}

/// Every path and method belongs to the proxy
pub fn app(state: Arc<RouterState>) -> Router {
    Router::new()
        .fallback(proxy::proxy_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
