use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use gitmeta_core::{GitRepo, Plugin, PluginFiles, PluginMeta, RepoSchema, Result, SyncError};
use parking_lot::RwLock;

use super::serve_dir;

pub const OPENDESIGN_REPO: &str = "https://gitee.com/openeuler/opendesign-resources";

/// Serves the open design SIG's resource files straight from the synced
/// `packages` directory. The directory path is only known after the first
/// load, so the handler resolves it per request.
#[derive(Default)]
pub struct OpenDesignResourcesPlugin {
    packages: RwLock<Option<PathBuf>>,
}

impl OpenDesignResourcesPlugin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn serve_packages(State(plugin): State<Arc<Self>>, req: Request) -> Response {
        let Some(dir) = plugin.packages.read().clone() else {
            return (StatusCode::SERVICE_UNAVAILABLE, "packages not loaded yet").into_response();
        };
        serve_dir(&dir, "/packages", req).await
    }
}

#[async_trait]
impl Plugin for OpenDesignResourcesPlugin {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: "opendesign".to_string(),
            description: "get all resource for open design sig".to_string(),
            group: "openeuler".to_string(),
            repos: vec![GitRepo {
                repo: OPENDESIGN_REPO.to_string(),
                branch: "master".to_string(),
                submodules: "recursive".to_string(),
                schema: RepoSchema::Https,
                watch_files: vec!["packages".to_string()],
            }],
        }
    }

    async fn load(&self, files: PluginFiles) -> Result<()> {
        let Some(paths) = files.get(OPENDESIGN_REPO) else {
            return Ok(());
        };
        for path in paths {
            if path.file_name().map(|n| n == "packages").unwrap_or(false) {
                *self.packages.write() = Some(path.clone());
            } else {
                return Err(SyncError::PluginLoad(format!(
                    "unrecognized file {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    fn register_endpoints(self: Arc<Self>) -> Router {
        Router::new()
            .route("/packages/{*path}", get(Self::serve_packages))
            .with_state(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_test::TestServer;
    use std::collections::HashMap;
    use std::fs;

    #[tokio::test]
    async fn serves_files_from_the_packages_directory() {
        let dir = tempfile::tempdir().unwrap();
        let packages = dir.path().join("packages");
        fs::create_dir_all(packages.join("fonts")).unwrap();
        fs::write(packages.join("fonts").join("list.json"), b"[\"HarmonyOS\"]").unwrap();

        let plugin = OpenDesignResourcesPlugin::new();
        plugin
            .load(HashMap::from([(
                OPENDESIGN_REPO.to_string(),
                vec![packages],
            )]))
            .await
            .unwrap();

        let server = TestServer::new(plugin.register_endpoints()).unwrap();
        let response = server.get("/packages/fonts/list.json").await;
        response.assert_status(StatusCode::OK);
        assert_eq!(response.text(), "[\"HarmonyOS\"]");

        let response = server.get("/packages/missing.json").await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unavailable_before_first_load() {
        let plugin = OpenDesignResourcesPlugin::new();
        let server = TestServer::new(plugin.register_endpoints()).unwrap();
        let response = server.get("/packages/anything").await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn rejects_unrecognized_paths_in_load() {
        let dir = tempfile::tempdir().unwrap();
        let other = dir.path().join("other");
        fs::create_dir(&other).unwrap();

        let plugin = OpenDesignResourcesPlugin::new();
        let result = plugin
            .load(HashMap::from([(OPENDESIGN_REPO.to_string(), vec![other])]))
            .await;
        assert!(result.is_err());
    }
}
