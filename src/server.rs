//! HTTP front-end (F) — a single catch-all route over every method and
//! path, handing each request straight to the pipeline.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::pipeline::{self, AppState};

pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(catch_all)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn catch_all(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let raw_query = uri.query().unwrap_or("").to_string();
    pipeline::handle(state, method, path, raw_query, headers, body).await
}
