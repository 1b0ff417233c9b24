//! Per-request completion log.
//!
//! Successful health and readiness probes are skipped so probe traffic does
//! not drown the log.

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use rand::RngCore;
use tracing::info;

/// Request correlation id, stored in request extensions for handlers that
/// want to tag their own log lines.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

fn new_request_id() -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub async fn request_log(mut req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let client_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let req_id = new_request_id();
    req.extensions_mut().insert(RequestId(req_id.clone()));

    let response = next.run(req).await;
    let status = response.status();

    let probe = matches!(uri.path(), "/health" | "/ready");
    if probe && status == StatusCode::OK {
        return response;
    }

    info!(
        req_id = %req_id,
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        status = status.as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "completed"
    );
    response
}
