use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use gitmeta_core::{GitRepo, Plugin, PluginFiles, PluginMeta, RepoSchema, Result, SyncError};
use parking_lot::RwLock;
use walkdir::WalkDir;

use super::{json_bytes, yaml_to_json};

pub const INFRASTRUCTURE_REPO: &str = "https://gitee.com/openeuler/infrastructure";

/// Serves every mirror site definition found under the infrastructure
/// repo's `mirrors` directory as one JSON array.
#[derive(Default)]
pub struct OpenEulerMirrorsPlugin {
    mirrors: RwLock<Option<Bytes>>,
}

impl OpenEulerMirrorsPlugin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn read_all(State(plugin): State<Arc<Self>>) -> Response {
        match plugin.mirrors.read().clone() {
            Some(bytes) => json_bytes(bytes),
            None => json_bytes(Bytes::from_static(b"[]")),
        }
    }

    /// Walk the mirrors directory and convert every YAML file. Runs on the
    /// blocking pool; mirror counts are small but the walk is synchronous.
    fn collect_mirrors(root: PathBuf) -> Result<Vec<Vec<u8>>> {
        let mut docs = Vec::new();
        for entry in WalkDir::new(&root) {
            let entry = entry.map_err(|err| {
                SyncError::PluginLoad(format!("failed to walk {}: {err}", root.display()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let is_yaml = path
                .extension()
                .map(|ext| ext == "yaml" || ext == "yml")
                .unwrap_or(false);
            if !is_yaml {
                continue;
            }
            let bytes = std::fs::read(path).map_err(|err| {
                SyncError::PluginLoad(format!("failed to read {}: {err}", path.display()))
            })?;
            docs.push(yaml_to_json(&bytes)?);
        }
        Ok(docs)
    }
}

#[async_trait]
impl Plugin for OpenEulerMirrorsPlugin {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: "mirrors".to_string(),
            description: "get all openeuler mirror information".to_string(),
            group: "openeuler".to_string(),
            repos: vec![GitRepo {
                repo: INFRASTRUCTURE_REPO.to_string(),
                branch: "master".to_string(),
                submodules: "recursive".to_string(),
                schema: RepoSchema::Https,
                watch_files: vec!["mirrors".to_string()],
            }],
        }
    }

    async fn load(&self, files: PluginFiles) -> Result<()> {
        let Some(root) = files
            .get(INFRASTRUCTURE_REPO)
            .and_then(|paths| paths.first())
        else {
            return Ok(());
        };

        let root = root.clone();
        let docs = tokio::task::spawn_blocking(move || Self::collect_mirrors(root))
            .await
            .map_err(|err| SyncError::PluginLoad(err.to_string()))??;

        let mut body = Vec::new();
        body.push(b'[');
        for (i, doc) in docs.iter().enumerate() {
            if i > 0 {
                body.push(b',');
            }
            body.extend_from_slice(doc);
        }
        body.push(b']');
        *self.mirrors.write() = Some(Bytes::from(body));
        Ok(())
    }

    fn register_endpoints(self: Arc<Self>) -> Router {
        Router::new().route("/all", get(Self::read_all)).with_state(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use std::collections::HashMap;
    use std::fs;

    #[tokio::test]
    async fn aggregates_yaml_files_into_an_array() {
        let dir = tempfile::tempdir().unwrap();
        let mirrors = dir.path().join("mirrors");
        fs::create_dir(&mirrors).unwrap();
        fs::write(mirrors.join("alpha.yaml"), "name: alpha\n").unwrap();
        fs::write(mirrors.join("beta.yml"), "name: beta\n").unwrap();
        fs::write(mirrors.join("notes.txt"), "ignored\n").unwrap();

        let plugin = OpenEulerMirrorsPlugin::new();
        plugin
            .load(HashMap::from([(
                INFRASTRUCTURE_REPO.to_string(),
                vec![mirrors],
            )]))
            .await
            .unwrap();

        let server = TestServer::new(plugin.register_endpoints()).unwrap();
        let response = server.get("/all").await;
        response.assert_status(StatusCode::OK);
        let body = response.json::<serde_json::Value>();
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["name"].as_str().unwrap())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"alpha"));
        assert!(names.contains(&"beta"));
    }

    #[tokio::test]
    async fn serves_empty_array_before_first_load() {
        let plugin = OpenEulerMirrorsPlugin::new();
        let server = TestServer::new(plugin.register_endpoints()).unwrap();
        let response = server.get("/all").await;
        response.assert_status(StatusCode::OK);
        assert_eq!(response.text(), "[]");
    }
}
