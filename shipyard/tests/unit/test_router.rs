//! Content router tests against a stand-in content store

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use http_body_util::BodyExt;
use shipyard::router::{self, RouterState};
use tokio::net::TcpListener;
use tower::ServiceExt;
use url::Url;

/// Public bucket holding one deployment
async fn fake_bucket(request: Request) -> Response {
    match request.uri().path() {
        "/deployments/site-a/index.html" => (
            [(header::CONTENT_TYPE, "text/html")],
            "<h1>site a</h1>",
        )
            .into_response(),
        "/deployments/site-a/app.js" => (
            [(header::CONTENT_TYPE, "text/javascript")],
            "console.log(1)",
        )
            .into_response(),
        _ => (StatusCode::NOT_FOUND, "NoSuchKey").into_response(),
    }
}

async fn start_bucket() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(fake_bucket);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn router_app() -> Router {
    let bucket = start_bucket().await;
    let base = Url::parse(&format!("http://{}", bucket)).unwrap();
    router::app(Arc::new(RouterState::new(base).unwrap()))
}

async fn get(app: &Router, host: &str, path: &str) -> (StatusCode, Option<String>, String) {
    let response = app
        .clone()
        .oneshot(
            axum::http::Request::get(path)
                .header(header::HOST, host)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, content_type, String::from_utf8_lossy(&bytes).to_string())
}

#[tokio::test]
async fn test_root_serves_index_document() {
    let app = router_app().await;

    let root = get(&app, "site-a.localhost:8000", "/").await;
    let index = get(&app, "site-a.localhost:8000", "/index.html").await;

    assert_eq!(root.0, StatusCode::OK);
    assert_eq!(root.1.as_deref(), Some("text/html"));
    assert_eq!(root.2, "<h1>site a</h1>");
    assert_eq!(root, index);
}

#[tokio::test]
async fn test_assets_keep_store_content_type() {
    let app = router_app().await;
    let (status, content_type, body) = get(&app, "site-a.localhost:8000", "/app.js?v=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("text/javascript"));
    assert_eq!(body, "console.log(1)");
}

#[tokio::test]
async fn test_store_errors_pass_through() {
    let app = router_app().await;

    let (status, _, body) = get(&app, "site-a.localhost:8000", "/missing.png").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "NoSuchKey");

    // Unknown deployments look the same as unknown files
    let (status, _, _) = get(&app, "nobody.localhost:8000", "/").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_host_without_subdomain_is_rejected() {
    let app = router_app().await;
    let (status, _, _) = get(&app, "localhost:8000", "/").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_subdomain_is_case_insensitive() {
    let app = router_app().await;
    let (status, _, body) = get(&app, "SITE-A.localhost:8000", "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "<h1>site a</h1>");
}
