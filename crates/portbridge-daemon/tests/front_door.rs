#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use tower::ServiceExt;

use portbridge_daemon::routes::{AppState, build_router};

fn app() -> axum::Router {
    build_router(AppState::new("http://localhost:3000"))
}

/// Send a request to the app and return (status, location header).
async fn send_request(method: Method, uri: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let resp = app().oneshot(request).await.unwrap();
    let status = resp.status();
    let location = resp
        .headers()
        .get("location")
        .map(|v| v.to_str().unwrap().to_string())
        .unwrap_or_default();
    (status, location)
}

#[tokio::test]
async fn root_redirects_to_target_root() {
    let (status, location) = send_request(Method::GET, "/").await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(location, "http://localhost:3000/");
}

#[tokio::test]
async fn path_is_appended_verbatim() {
    for path in ["reviews", "reviews/new", "css/style.css", "a%20b", "x/", "deep/er/path.js"] {
        let (status, location) = send_request(Method::GET, &format!("/{path}")).await;
        assert_eq!(status, StatusCode::FOUND, "path: {path}");
        assert_eq!(location, format!("http://localhost:3000/{path}"));
    }
}

#[tokio::test]
async fn query_string_is_dropped() {
    let (_, location) = send_request(Method::GET, "/search?q=phone").await;
    assert_eq!(location, "http://localhost:3000/search");
}

#[tokio::test]
async fn any_method_redirects() {
    for method in [Method::POST, Method::PUT, Method::DELETE, Method::PATCH, Method::HEAD] {
        let (status, location) = send_request(method.clone(), "/reviews/1").await;
        assert_eq!(status, StatusCode::FOUND, "method: {method}");
        assert_eq!(location, "http://localhost:3000/reviews/1");
    }
}

#[tokio::test]
async fn redirect_target_follows_state() {
    let app = build_router(AppState::new("http://10.0.0.5:8080"));
    let resp = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(
        resp.headers().get("location").unwrap(),
        "http://10.0.0.5:8080/health"
    );
}
