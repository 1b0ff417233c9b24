//! Dynamic plugin mounts.
//!
//! Axum routers are immutable once served, while plugin endpoints must only
//! become visible after the plugin's first successful sync. The bridge is a
//! shared table of per-plugin routers: the server installs one catch-all
//! dispatcher route, and requests for `(group, name)` pairs present in the
//! table are forwarded to the stored router with the mount prefix stripped.
//! Anything absent from the table is a plain 404, so unready plugins are
//! indistinguishable from unknown ones.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::extract::Request;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use parking_lot::RwLock;
use tower::ServiceExt;
use tracing::warn;

#[derive(Clone, Default)]
pub struct MountTable {
    routes: Arc<RwLock<HashMap<(String, String), Router>>>,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a plugin router under `(group, name)`.
    pub fn insert(&self, group: &str, name: &str, router: Router) {
        self.routes
            .write()
            .insert((group.to_string(), name.to_string()), router);
    }

    pub fn contains(&self, group: &str, name: &str) -> bool {
        self.routes
            .read()
            .contains_key(&(group.to_string(), name.to_string()))
    }

    fn get(&self, group: &str, name: &str) -> Option<Router> {
        self.routes
            .read()
            .get(&(group.to_string(), name.to_string()))
            .cloned()
    }

    /// Forward `req` to the router mounted at `(group, name)`, rewriting the
    /// URI to `rest` (plus the original query string) so plugin routes are
    /// written relative to their mount point.
    pub async fn dispatch(&self, group: &str, name: &str, rest: &str, req: Request) -> Response {
        let Some(router) = self.get(group, name) else {
            return (StatusCode::NOT_FOUND, "not found").into_response();
        };

        let mut target = format!("/{}", rest.trim_start_matches('/'));
        if let Some(query) = req.uri().query() {
            target.push('?');
            target.push_str(query);
        }
        let uri: Uri = match target.parse() {
            Ok(uri) => uri,
            Err(err) => {
                warn!(group, name, target, %err, "failed to rewrite dispatch uri");
                return (StatusCode::NOT_FOUND, "not found").into_response();
            }
        };

        let (mut parts, body) = req.into_parts();
        parts.uri = uri;
        let req = Request::from_parts(parts, body);

        match router.oneshot(req).await {
            Ok(response) => response,
            Err(infallible) => match infallible {},
        }
    }
}
