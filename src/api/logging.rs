//! Request-logging middleware. Every request gets a generated id, a timing,
//! and a best-effort usage event; the response carries the id back in
//! `x-request-id` so clients can correlate with gateway logs.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use crate::AppState;

pub async fn request_logger(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let request_id = Uuid::new_v4();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let mut resp = next.run(req).await;

    let duration_ms = start.elapsed().as_millis().min(i32::MAX as u128) as i32;
    let status = resp.status().as_u16() as i16;
    state
        .usage
        .record_request(request_id, &path, &method, status, duration_ms, None);

    if let Ok(val) = HeaderValue::from_str(&request_id.to_string()) {
        resp.headers_mut().insert("x-request-id", val);
    }

    resp
}
