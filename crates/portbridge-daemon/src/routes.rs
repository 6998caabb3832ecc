//! Front door: every request is answered with a redirect to the child
//! application.

use axum::Router;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use tracing::debug;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Base URL of the child application, e.g. `http://localhost:3000`.
    pub target_base: String,
}

impl AppState {
    pub fn new(target_base: impl Into<String>) -> Self {
        Self {
            target_base: target_base.into(),
        }
    }
}

/// Build the front door router. All paths and methods hit [`redirect`].
pub fn build_router(state: AppState) -> Router {
    Router::new().fallback(redirect).with_state(state)
}

/// Redirect `uri` to the same path on the target.
///
/// The raw request path is appended as received; it is neither decoded nor
/// normalized. The query string is dropped.
pub async fn redirect(method: Method, uri: Uri, State(state): State<AppState>) -> Response {
    let location = target_url(&state.target_base, uri.path());
    debug!(%method, path = uri.path(), %location, "Redirecting");
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// Join `base` and a request `path`.
///
/// `/` maps to `base/`, `/a/b` maps to `base/a/b`.
pub fn target_url(base: &str, path: &str) -> String {
    let base = base.strip_suffix('/').unwrap_or(base);
    let path = path.strip_prefix('/').unwrap_or(path);
    format!("{base}/{path}")
}
