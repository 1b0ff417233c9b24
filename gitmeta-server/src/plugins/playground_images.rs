use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use gitmeta_core::{GitRepo, Plugin, PluginFiles, PluginMeta, RepoSchema, Result, SyncError};
use parking_lot::RwLock;

use super::{json_bytes, yaml_to_json};

pub const PLAYGROUND_IMAGES_REPO: &str = "https://github.com/opensourceways/playground-images";

/// Serves the LXD image manifest of the playground deployment.
#[derive(Default)]
pub struct PlaygroundImagesPlugin {
    images: RwLock<Option<Bytes>>,
}

impl PlaygroundImagesPlugin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn read_images(State(plugin): State<Arc<Self>>) -> Response {
        match plugin.images.read().clone() {
            Some(bytes) => json_bytes(bytes),
            None => json_bytes(Bytes::new()),
        }
    }
}

#[async_trait]
impl Plugin for PlaygroundImagesPlugin {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: "playground-images".to_string(),
            description: "get all playground images information".to_string(),
            group: "infrastructure".to_string(),
            repos: vec![GitRepo {
                repo: PLAYGROUND_IMAGES_REPO.to_string(),
                branch: "main".to_string(),
                submodules: "recursive".to_string(),
                schema: RepoSchema::Https,
                watch_files: vec!["deploy/lxd-images.yaml".to_string()],
            }],
        }
    }

    async fn load(&self, files: PluginFiles) -> Result<()> {
        let Some(path) = files
            .get(PLAYGROUND_IMAGES_REPO)
            .and_then(|paths| paths.first())
        else {
            return Ok(());
        };
        let bytes = tokio::fs::read(path).await.map_err(|err| {
            SyncError::PluginLoad(format!("failed to read {}: {err}", path.display()))
        })?;
        let json = yaml_to_json(&bytes)?;
        *self.images.write() = Some(Bytes::from(json));
        Ok(())
    }

    fn register_endpoints(self: Arc<Self>) -> Router {
        Router::new()
            .route("/images", get(Self::read_images))
            .with_state(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use std::collections::HashMap;

    #[tokio::test]
    async fn loads_manifest_and_serves_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lxd-images.yaml");
        std::fs::write(&path, "images:\n  - name: openeuler-20.03\n").unwrap();

        let plugin = PlaygroundImagesPlugin::new();
        plugin
            .load(HashMap::from([(
                PLAYGROUND_IMAGES_REPO.to_string(),
                vec![path],
            )]))
            .await
            .unwrap();

        let server = TestServer::new(plugin.register_endpoints()).unwrap();
        let response = server.get("/images").await;
        response.assert_status(StatusCode::OK);
        assert_eq!(
            response.json::<serde_json::Value>()["images"][0]["name"],
            "openeuler-20.03"
        );
    }
}
