//! HTTP surface: status endpoints, manager introspection, the sync-child
//! trigger hook, and the dispatcher for ready plugin mounts.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{ConnectInfo, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get};
use gitmeta_core::{MountTable, SyncError, SyncManager};
use serde::Deserialize;
use serde_json::json;

use crate::config::AppEnv;
use crate::middleware::request_log;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SyncManager>,
    pub mounts: MountTable,
    pub app_name: String,
    pub env: AppEnv,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ping", get(ping))
        .route("/ready", get(ready))
        .route("/v1/metadata/plugins", get(list_plugins))
        .route(
            "/v1/metadata/repos/{group}/{local_name}/trigger",
            get(trigger),
        )
        .route("/v1/metadata/{group}/{name}", any(dispatch_root))
        .route("/v1/metadata/{group}/{name}/{*rest}", any(dispatch))
        .fallback(not_found)
        .layer(axum::middleware::from_fn(request_log))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "UP",
        "info": {
            "name": state.app_name,
            "version": env!("CARGO_PKG_VERSION"),
            "env": state.env.to_string(),
        },
    }))
}

async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "message": "pong" }))
}

/// 200 once at least one plugin serves data, 503 while everything is still
/// waiting for its first sync.
async fn ready(State(state): State<AppState>) -> Response {
    if state.manager.any_ready() {
        (StatusCode::OK, Json(json!({ "status": "ready" }))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "waiting for first sync" })),
        )
            .into_response()
    }
}

async fn list_plugins(State(state): State<AppState>) -> Response {
    Json(state.manager.plugin_infos()).into_response()
}

#[derive(Debug, Deserialize)]
struct TriggerQuery {
    #[serde(rename = "validateID", default)]
    validate_id: String,
}

/// Sync-child webhook. Loopback peers carrying the process nonce only.
async fn trigger(
    State(state): State<AppState>,
    Path((group, local_name)): Path<(String, String)>,
    Query(query): Query<TriggerQuery>,
    req: Request,
) -> Response {
    let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>().cloned()
    else {
        return (StatusCode::FORBIDDEN, "forbidden").into_response();
    };
    match state
        .manager
        .handle_trigger(addr.ip(), &query.validate_id, &group, &local_name)
    {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(SyncError::TriggerUnauthorized) => (StatusCode::FORBIDDEN, "forbidden").into_response(),
        Err(SyncError::RepoNotFound { .. }) => (StatusCode::NOT_FOUND, "not found").into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn dispatch_root(
    State(state): State<AppState>,
    Path((group, name)): Path<(String, String)>,
    req: Request,
) -> Response {
    state.mounts.dispatch(&group, &name, "", req).await
}

async fn dispatch(
    State(state): State<AppState>,
    Path((group, name, rest)): Path<(String, String, String)>,
    req: Request,
) -> Response {
    state.mounts.dispatch(&group, &name, &rest, req).await
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "not found").into_response()
}
