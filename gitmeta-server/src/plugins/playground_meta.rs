use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use gitmeta_core::{GitRepo, Plugin, PluginFiles, PluginMeta, RepoSchema, Result, SyncError};
use parking_lot::RwLock;
use serde::Deserialize;
use walkdir::WalkDir;

use super::{json_bytes, serve_dir, yaml_to_json};

pub const PLAYGROUND_IMAGES_REPO: &str = "https://github.com/opensourceways/playground-images";
pub const PLAYGROUND_COURSES_REPO: &str = "https://github.com/opensourceways/playground-courses";

/// Combined playground metadata: the LXD image manifest, the course
/// environment templates, and the raw course tree itself. Both repos must
/// complete their first sync before the endpoints appear.
#[derive(Default)]
pub struct PlaygroundMetaPlugin {
    images: RwLock<Option<Bytes>>,
    templates: RwLock<Option<Arc<HashMap<PathBuf, Bytes>>>>,
    courses: RwLock<Option<PathBuf>>,
}

#[derive(Debug, Deserialize)]
struct TemplateQuery {
    #[serde(default)]
    file: String,
}

impl PlaygroundMetaPlugin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn read_images(State(plugin): State<Arc<Self>>) -> Response {
        match plugin.images.read().clone() {
            Some(bytes) => json_bytes(bytes),
            None => json_bytes(Bytes::new()),
        }
    }

    async fn read_templates(
        State(plugin): State<Arc<Self>>,
        Query(query): Query<TemplateQuery>,
    ) -> Response {
        let Some(templates) = plugin.templates.read().clone() else {
            return (StatusCode::SERVICE_UNAVAILABLE, "templates not loaded yet").into_response();
        };
        if query.file.is_empty() {
            return (StatusCode::NOT_FOUND, "please specify 'file' parameter").into_response();
        }
        let found = templates
            .iter()
            .find(|(path, _)| path.to_string_lossy().contains(&query.file))
            .map(|(_, bytes)| bytes.clone());
        match found {
            Some(bytes) => json_bytes(bytes),
            None => (
                StatusCode::NOT_FOUND,
                format!("{} not found", query.file),
            )
                .into_response(),
        }
    }

    async fn serve_courses(State(plugin): State<Arc<Self>>, req: Request) -> Response {
        let Some(dir) = plugin.courses.read().clone() else {
            return (StatusCode::SERVICE_UNAVAILABLE, "courses not loaded yet").into_response();
        };
        serve_dir(&dir, "/courses", req).await
    }

    /// Collect every `.tmpl` file under the environments directory.
    fn collect_templates(root: PathBuf) -> Result<HashMap<PathBuf, Bytes>> {
        let mut templates = HashMap::new();
        for entry in WalkDir::new(&root) {
            let entry = entry.map_err(|err| {
                SyncError::PluginLoad(format!("failed to walk {}: {err}", root.display()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().map(|ext| ext == "tmpl").unwrap_or(false) {
                let bytes = std::fs::read(path).map_err(|err| {
                    SyncError::PluginLoad(format!("failed to read {}: {err}", path.display()))
                })?;
                templates.insert(path.to_path_buf(), Bytes::from(bytes));
            }
        }
        Ok(templates)
    }
}

#[async_trait]
impl Plugin for PlaygroundMetaPlugin {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: "playground-meta".to_string(),
            description: "get all playground meta information".to_string(),
            group: "infrastructure".to_string(),
            repos: vec![
                GitRepo {
                    repo: PLAYGROUND_IMAGES_REPO.to_string(),
                    branch: "main".to_string(),
                    submodules: "recursive".to_string(),
                    schema: RepoSchema::Https,
                    watch_files: vec!["deploy/lxd-images.yaml".to_string()],
                },
                GitRepo {
                    repo: PLAYGROUND_COURSES_REPO.to_string(),
                    branch: "main".to_string(),
                    submodules: "recursive".to_string(),
                    schema: RepoSchema::Https,
                    watch_files: vec!["environments".to_string(), "courses".to_string()],
                },
            ],
        }
    }

    async fn load(&self, files: PluginFiles) -> Result<()> {
        if let Some(path) = files
            .get(PLAYGROUND_IMAGES_REPO)
            .and_then(|paths| paths.first())
        {
            let bytes = tokio::fs::read(path).await.map_err(|err| {
                SyncError::PluginLoad(format!("failed to read {}: {err}", path.display()))
            })?;
            let json = yaml_to_json(&bytes)?;
            *self.images.write() = Some(Bytes::from(json));
        }

        if let Some(paths) = files.get(PLAYGROUND_COURSES_REPO) {
            for path in paths {
                let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
                match name.as_deref() {
                    Some("environments") => {
                        let root = path.clone();
                        let templates =
                            tokio::task::spawn_blocking(move || Self::collect_templates(root))
                                .await
                                .map_err(|err| SyncError::PluginLoad(err.to_string()))??;
                        *self.templates.write() = Some(Arc::new(templates));
                    }
                    Some("courses") => {
                        *self.courses.write() = Some(path.clone());
                    }
                    _ => {
                        return Err(SyncError::PluginLoad(format!(
                            "unrecognized file {}",
                            path.display()
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn register_endpoints(self: Arc<Self>) -> Router {
        Router::new()
            .route("/images", get(Self::read_images))
            .route("/templates", get(Self::read_templates))
            .route("/courses/{*path}", get(Self::serve_courses))
            .with_state(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_test::TestServer;
    use std::fs;

    fn courses_fixture() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let environments = dir.path().join("environments");
        fs::create_dir_all(environments.join("lxd")).unwrap();
        fs::write(
            environments.join("lxd").join("container.tmpl"),
            b"{\"kind\": \"lxd\"}",
        )
        .unwrap();
        fs::write(environments.join("readme.md"), b"ignored").unwrap();

        let courses = dir.path().join("courses");
        fs::create_dir_all(courses.join("rust-basics")).unwrap();
        fs::write(
            courses.join("rust-basics").join("intro.md"),
            b"# Introduction",
        )
        .unwrap();
        (dir, environments, courses)
    }

    #[tokio::test]
    async fn templates_require_both_load_and_file_parameter() {
        let plugin = PlaygroundMetaPlugin::new();
        let server = TestServer::new(plugin.clone().register_endpoints()).unwrap();

        let response = server.get("/templates").await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);

        let (_dir, environments, _courses) = courses_fixture();
        plugin
            .load(HashMap::from([(
                PLAYGROUND_COURSES_REPO.to_string(),
                vec![environments],
            )]))
            .await
            .unwrap();

        let response = server.get("/templates").await;
        response.assert_status(StatusCode::NOT_FOUND);

        let response = server.get("/templates?file=container").await;
        response.assert_status(StatusCode::OK);
        assert_eq!(response.json::<serde_json::Value>()["kind"], "lxd");

        let response = server.get("/templates?file=absent").await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn serves_raw_course_files_after_load() {
        let plugin = PlaygroundMetaPlugin::new();
        let server = TestServer::new(plugin.clone().register_endpoints()).unwrap();

        let response = server.get("/courses/rust-basics/intro.md").await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);

        let (_dir, environments, courses) = courses_fixture();
        plugin
            .load(HashMap::from([(
                PLAYGROUND_COURSES_REPO.to_string(),
                vec![environments, courses],
            )]))
            .await
            .unwrap();

        let response = server.get("/courses/rust-basics/intro.md").await;
        response.assert_status(StatusCode::OK);
        assert_eq!(response.text(), "# Introduction");

        let response = server.get("/courses/missing.md").await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rejects_unrecognized_paths_in_load() {
        let dir = tempfile::tempdir().unwrap();
        let other = dir.path().join("other");
        fs::create_dir(&other).unwrap();

        let plugin = PlaygroundMetaPlugin::new();
        let result = plugin
            .load(HashMap::from([(
                PLAYGROUND_COURSES_REPO.to_string(),
                vec![other],
            )]))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn images_load_independently_of_templates() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("lxd-images.yaml");
        fs::write(&manifest, "images: []\n").unwrap();

        let plugin = PlaygroundMetaPlugin::new();
        plugin
            .load(HashMap::from([(
                PLAYGROUND_IMAGES_REPO.to_string(),
                vec![manifest],
            )]))
            .await
            .unwrap();

        let server = TestServer::new(plugin.register_endpoints()).unwrap();
        let response = server.get("/images").await;
        response.assert_status(StatusCode::OK);
        assert!(response.json::<serde_json::Value>()["images"].is_array());
    }
}
