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

// Deliberately spelled without `.git`: the repo is shared with the sigs
// plugin and merges into the same runner through URL equivalence.
pub const COMMUNITY_REPO: &str = "https://gitee.com/openeuler/community";

/// Community-level view of the openEuler community repo.
#[derive(Default)]
pub struct OpenEulerCommunityPlugin {
    sigs: RwLock<Option<Bytes>>,
}

impl OpenEulerCommunityPlugin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn read_sigs(State(plugin): State<Arc<Self>>) -> Response {
        match plugin.sigs.read().clone() {
            Some(bytes) => json_bytes(bytes),
            None => json_bytes(Bytes::from_static(b"[]")),
        }
    }
}

#[async_trait]
impl Plugin for OpenEulerCommunityPlugin {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: "community".to_string(),
            description: "get openEuler community information".to_string(),
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
        Router::new()
            .route("/sigs", get(Self::read_sigs))
            .with_state(self)
    }
}
