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

pub const COMMUNITY_REPO: &str = "https://gitee.com/openeuler/community.git";

/// Serves the SIG list of the openEuler community as JSON, converted from
/// `sig/sigs.yaml` in the community repo.
#[derive(Default)]
pub struct OpenEulerSigsPlugin {
    sigs: RwLock<Option<Bytes>>,
}

impl OpenEulerSigsPlugin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn read_all(State(plugin): State<Arc<Self>>) -> Response {
        match plugin.sigs.read().clone() {
            Some(bytes) => json_bytes(bytes),
            None => json_bytes(Bytes::from_static(b"[]")),
        }
    }
}

#[async_trait]
impl Plugin for OpenEulerSigsPlugin {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: "sigs".to_string(),
            description: "get all sigs information in openEuler community".to_string(),
            group: "openeuler".to_string(),
            repos: vec![GitRepo {
                repo: COMMUNITY_REPO.to_string(),
                branch: "master".to_string(),
                submodules: "recursive".to_string(),
                schema: RepoSchema::Https,
                watch_files: vec!["sig/sigs.yaml".to_string()],
            }],
        }
    }

    async fn load(&self, files: PluginFiles) -> Result<()> {
        let Some(path) = files.get(COMMUNITY_REPO).and_then(|paths| paths.first()) else {
            return Ok(());
        };
        let bytes = tokio::fs::read(path).await.map_err(|err| {
            SyncError::PluginLoad(format!("failed to read {}: {err}", path.display()))
        })?;
        let json = yaml_to_json(&bytes)?;
        *self.sigs.write() = Some(Bytes::from(json));
        Ok(())
    }

    fn register_endpoints(self: Arc<Self>) -> Router {
        // /sigs is the historical route; /all is the documented one. Both
        // serve the same payload.
        Router::new()
            .route("/all", get(Self::read_all))
            .route("/sigs", get(Self::read_all))
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
    async fn serves_empty_list_before_first_load() {
        let plugin = OpenEulerSigsPlugin::new();
        let server = TestServer::new(plugin.register_endpoints()).unwrap();
        let response = server.get("/all").await;
        response.assert_status(StatusCode::OK);
        assert_eq!(response.text(), "[]");
    }

    #[tokio::test]
    async fn historical_route_serves_the_same_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sigs.yaml");
        std::fs::write(&path, "sigs:\n  - name: A-Tune\n").unwrap();

        let plugin = OpenEulerSigsPlugin::new();
        plugin
            .load(HashMap::from([(COMMUNITY_REPO.to_string(), vec![path])]))
            .await
            .unwrap();

        let server = TestServer::new(plugin.register_endpoints()).unwrap();
        let all = server.get("/all").await;
        let sigs = server.get("/sigs").await;
        all.assert_status(StatusCode::OK);
        sigs.assert_status(StatusCode::OK);
        assert_eq!(all.text(), sigs.text());
    }

    #[tokio::test]
    async fn loads_yaml_and_serves_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sigs.yaml");
        std::fs::write(&path, "sigs:\n  - name: A-Tune\n    repositories:\n      - openeuler/A-Tune\n").unwrap();

        let plugin = OpenEulerSigsPlugin::new();
        let files = HashMap::from([(COMMUNITY_REPO.to_string(), vec![path])]);
        plugin.load(files).await.unwrap();

        let server = TestServer::new(plugin.register_endpoints()).unwrap();
        let response = server.get("/all").await;
        response.assert_status(StatusCode::OK);
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["sigs"][0]["name"], "A-Tune");
    }

    #[tokio::test]
    async fn load_without_matching_repo_is_a_no_op() {
        let plugin = OpenEulerSigsPlugin::new();
        let files = HashMap::from([("https://example.com/other".to_string(), vec![])]);
        plugin.load(files).await.unwrap();
        assert!(plugin.sigs.read().is_none());
    }

    #[tokio::test]
    async fn load_surfaces_unreadable_files() {
        let plugin = OpenEulerSigsPlugin::new();
        let files = HashMap::from([(
            COMMUNITY_REPO.to_string(),
            vec![std::path::PathBuf::from("/definitely/not/here.yaml")],
        )]);
        assert!(plugin.load(files).await.is_err());
    }
}
