use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use gitmeta_core::{GitRepo, Plugin, PluginFiles, PluginMeta, RepoSchema, Result};

const SAMPLE_REPO: &str = "https://github.com/TommyLike/SampleApp";

/// Minimal demonstration plugin: watches one file, serves nothing.
pub struct HelloWorldPlugin;

impl HelloWorldPlugin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Plugin for HelloWorldPlugin {
    fn meta(&self) -> PluginMeta {
        PluginMeta {
            name: "helloworld".to_string(),
            description: "used for demonstration".to_string(),
            group: "sample".to_string(),
            repos: vec![GitRepo {
                repo: SAMPLE_REPO.to_string(),
                branch: "master".to_string(),
                submodules: "recursive".to_string(),
                schema: RepoSchema::Https,
                watch_files: vec!["README.md".to_string()],
            }],
        }
    }

    async fn load(&self, _files: PluginFiles) -> Result<()> {
        Ok(())
    }

    fn register_endpoints(self: Arc<Self>) -> Router {
        Router::new()
    }
}
