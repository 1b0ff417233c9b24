//! The concrete plugin set and its registration entry point.
//!
//! Each plugin declares the repos it watches in its meta, decodes watched
//! content in `load`, and publishes decoded bytes through a single-slot
//! read/write cell its handlers read. Loads and handlers run concurrently;
//! a handler either sees the previous snapshot or the new one, never a mix.

pub mod community;
pub mod helloworld;
pub mod mirrors;
pub mod opendesign;
pub mod playground_images;
pub mod playground_meta;
pub mod sigs;

use std::path::Path;

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use gitmeta_core::{PluginRegistry, Result, SyncError};
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tracing::warn;

/// Populate the registry with every known plugin. Called once during
/// startup, before the manager is constructed; the config's
/// `plugins.<name>.enabled` toggles decide which entries survive.
pub fn register_all(registry: &mut PluginRegistry) {
    registry.register("helloworld", helloworld::HelloWorldPlugin::new());
    registry.register("sigs", sigs::OpenEulerSigsPlugin::new());
    registry.register("community", community::OpenEulerCommunityPlugin::new());
    registry.register("mirrors", mirrors::OpenEulerMirrorsPlugin::new());
    registry.register("opendesign", opendesign::OpenDesignResourcesPlugin::new());
    registry.register(
        "playground-images",
        playground_images::PlaygroundImagesPlugin::new(),
    );
    registry.register(
        "playground-meta",
        playground_meta::PlaygroundMetaPlugin::new(),
    );
}

/// Convert a YAML document to compact JSON bytes.
pub(crate) fn yaml_to_json(bytes: &[u8]) -> Result<Vec<u8>> {
    let value: serde_json::Value = serde_yaml::from_slice(bytes)
        .map_err(|err| SyncError::PluginLoad(format!("invalid yaml: {err}")))?;
    serde_json::to_vec(&value)
        .map_err(|err| SyncError::PluginLoad(format!("failed to encode json: {err}")))
}

/// Raw pre-encoded JSON response.
pub(crate) fn json_bytes(bytes: Bytes) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], bytes).into_response()
}

/// Serve a file from a synced directory tree.
///
/// Plugin routes mount their static trees under a prefix (`/packages`,
/// `/courses`) while the files live at the root of the synced directory, so
/// the prefix is stripped before forwarding to `ServeDir`.
pub(crate) async fn serve_dir(dir: &Path, prefix: &str, req: Request) -> Response {
    let path = req
        .uri()
        .path()
        .strip_prefix(prefix)
        .filter(|rest| !rest.is_empty())
        .unwrap_or("/");
    let uri: Uri = match path.parse() {
        Ok(uri) => uri,
        Err(err) => {
            warn!(path, %err, "failed to rewrite static file uri");
            return (StatusCode::NOT_FOUND, "not found").into_response();
        }
    };
    let serve_req = match Request::builder().uri(uri).body(Body::empty()) {
        Ok(serve_req) => serve_req,
        Err(err) => {
            warn!(%err, "failed to build static file request");
            return (StatusCode::NOT_FOUND, "not found").into_response();
        }
    };

    match ServeDir::new(dir).oneshot(serve_req).await {
        Ok(response) => response.map(Body::new),
        Err(infallible) => match infallible {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_all_populates_every_plugin() {
        let mut registry = PluginRegistry::new();
        register_all(&mut registry);
        assert_eq!(
            registry.names(),
            vec![
                "community",
                "helloworld",
                "mirrors",
                "opendesign",
                "playground-images",
                "playground-meta",
                "sigs",
            ]
        );
    }

    #[test]
    fn yaml_to_json_converts_documents() {
        let json = yaml_to_json(b"sigs:\n  - name: A-Tune\n").unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["sigs"][0]["name"], "A-Tune");
    }

    #[test]
    fn yaml_to_json_rejects_garbage() {
        assert!(yaml_to_json(b"{not yaml: [").is_err());
    }
}
