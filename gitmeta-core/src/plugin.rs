use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;

use crate::error::Result;
use crate::meta::PluginMeta;

/// Coalesced change set handed to [`Plugin::load`]: absolute changed paths
/// keyed by the repo URL the plugin declared in its meta.
pub type PluginFiles = HashMap<String, Vec<PathBuf>>;

/// A metadata plugin.
///
/// Implementations decode watched file content in [`load`](Plugin::load) and
/// serve it from the router returned by
/// [`register_endpoints`](Plugin::register_endpoints). The two run
/// concurrently: handlers may execute while a load is in flight, so decoded
/// content must be published atomically (a single-slot read/write cell over
/// immutable bytes is the canonical shape).
#[async_trait]
pub trait Plugin: Send + Sync {
    fn meta(&self) -> PluginMeta;

    /// Refresh decoded content from the given changed files. Errors are
    /// logged by the caller and never abort the container loop.
    async fn load(&self, files: PluginFiles) -> Result<()>;

    /// Build the plugin's sub-router. It is mounted under
    /// `/v1/metadata/<group>/<name>` once every repo of the plugin has
    /// completed its first successful sync.
    fn register_endpoints(self: Arc<Self>) -> Router;
}
