//! Per-plugin mailbox and batching buffer.
//!
//! Decouples event arrival from plugin refresh: bursty change events (a sync
//! touching fifty files) coalesce in the pending map until the next flush
//! tick hands one snapshot to the plugin's load hook.

use std::collections::HashMap;
use std::mem;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::meta::{GitEvent, PluginMeta, repos_equivalent};
use crate::plugin::{Plugin, PluginFiles};

pub const INBOX_CAPACITY: usize = 50;
pub const FLUSH_CAPACITY: usize = 10;

pub struct PluginContainer {
    plugin: Arc<dyn Plugin>,
    meta: PluginMeta,
    inbox_tx: mpsc::Sender<GitEvent>,
    flush_tx: mpsc::Sender<()>,
    inbox_rx: StdMutex<Option<mpsc::Receiver<GitEvent>>>,
    flush_rx: StdMutex<Option<mpsc::Receiver<()>>>,
    pending: Mutex<HashMap<String, Vec<PathBuf>>>,
    shutdown: CancellationToken,
}

impl PluginContainer {
    pub fn new(plugin: Arc<dyn Plugin>) -> Self {
        let meta = plugin.meta();
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (flush_tx, flush_rx) = mpsc::channel(FLUSH_CAPACITY);
        Self {
            plugin,
            meta,
            inbox_tx,
            flush_tx,
            inbox_rx: StdMutex::new(Some(inbox_rx)),
            flush_rx: StdMutex::new(Some(flush_rx)),
            pending: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn group(&self) -> &str {
        &self.meta.group
    }

    /// Non-blocking delivery of a change event. Returns false when the inbox
    /// is full; the caller logs and drops rather than stalling its loop.
    pub fn offer(&self, event: GitEvent) -> bool {
        self.inbox_tx.try_send(event).is_ok()
    }

    /// Non-blocking flush signal.
    pub fn tick(&self) -> bool {
        self.flush_tx.try_send(()).is_ok()
    }

    pub fn close(&self) {
        self.shutdown.cancel();
    }

    fn add_pending(&self, repo: String, files: Vec<PathBuf>) {
        self.pending.lock().entry(repo).or_default().extend(files);
    }

    fn take_pending(&self) -> PluginFiles {
        mem::take(&mut *self.pending.lock())
    }

    /// Filter an inbound event down to the files this plugin watches.
    ///
    /// The repo is looked up by URL, falling back to URL equivalence so a
    /// plugin that spells the shared repo without `.git` still receives
    /// events from the merged runner. Paths match on a plain suffix against
    /// the watch list; overlapping suffixes can produce false positives,
    /// which is accepted.
    fn matched_files(&self, event: &GitEvent) -> Option<(String, Vec<PathBuf>)> {
        if event.group != self.meta.group {
            return None;
        }
        let repo = self.meta.repos.iter().find(|r| {
            r.repo == event.repo || repos_equivalent(&r.repo, &event.repo).unwrap_or(false)
        })?;
        let files: Vec<PathBuf> = event
            .files
            .iter()
            .filter(|path| {
                let text = path.to_string_lossy();
                repo.watch_files.iter().any(|watch| text.ends_with(watch.as_str()))
            })
            .cloned()
            .collect();
        if files.is_empty() {
            return None;
        }
        Some((repo.repo.clone(), files))
    }

    /// Container loop. Started on its own task once the plugin is ready;
    /// exits when either channel closes or the container is closed.
    pub async fn run(&self) {
        let Some(mut inbox) = self.inbox_rx.lock().ok().and_then(|mut rx| rx.take()) else {
            warn!(plugin = %self.meta.name, "container loop already started");
            return;
        };
        let Some(mut ticks) = self.flush_rx.lock().ok().and_then(|mut rx| rx.take()) else {
            warn!(plugin = %self.meta.name, "container loop already started");
            return;
        };

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!(plugin = %self.meta.name, "container closed, quitting");
                    break;
                }
                event = inbox.recv() => {
                    let Some(event) = event else {
                        info!(plugin = %self.meta.name, "event channel closed, quitting");
                        break;
                    };
                    if let Some((repo, files)) = self.matched_files(&event) {
                        debug!(
                            plugin = %self.meta.name,
                            repo,
                            changes = files.len(),
                            "buffered file changes"
                        );
                        self.add_pending(repo, files);
                    }
                }
                tick = ticks.recv() => {
                    if tick.is_none() {
                        info!(plugin = %self.meta.name, "flush channel closed, quitting");
                        break;
                    }
                    self.flush().await;
                }
            }
        }
    }

    async fn flush(&self) {
        let snapshot = self.take_pending();
        if snapshot.is_empty() {
            return;
        }
        match self.plugin.load(snapshot).await {
            Ok(()) => info!(plugin = %self.meta.name, "plugin load triggered"),
            Err(err) => error!(plugin = %self.meta.name, %err, "plugin load failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::meta::{GitRepo, RepoSchema};
    use async_trait::async_trait;
    use axum::Router;
    use std::time::Duration;

    const REPO: &str = "https://gitee.com/openeuler/community.git";

    struct RecordingPlugin {
        loads: Mutex<Vec<PluginFiles>>,
    }

    impl RecordingPlugin {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                loads: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Plugin for RecordingPlugin {
        fn meta(&self) -> PluginMeta {
            PluginMeta {
                name: "recorder".to_string(),
                description: "test plugin".to_string(),
                group: "openeuler".to_string(),
                repos: vec![GitRepo {
                    repo: REPO.to_string(),
                    branch: "master".to_string(),
                    submodules: String::new(),
                    schema: RepoSchema::Https,
                    watch_files: vec!["sig/sigs.yaml".to_string()],
                }],
            }
        }

        async fn load(&self, files: PluginFiles) -> Result<()> {
            self.loads.lock().push(files);
            Ok(())
        }

        fn register_endpoints(self: Arc<Self>) -> Router {
            Router::new()
        }
    }

    fn watched_event() -> GitEvent {
        GitEvent {
            group: "openeuler".to_string(),
            repo: REPO.to_string(),
            files: vec![
                PathBuf::from("/srv/openeuler/community/community/sig/sigs.yaml"),
                PathBuf::from("/srv/openeuler/community/community/README.md"),
            ],
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn coalesces_repeated_events_into_one_load() {
        let plugin = RecordingPlugin::new();
        let container = Arc::new(PluginContainer::new(plugin.clone()));
        let looped = container.clone();
        let handle = tokio::spawn(async move { looped.run().await });

        for _ in 0..5 {
            assert!(container.offer(watched_event()));
        }
        settle().await;
        assert!(container.tick());
        settle().await;

        let loads = plugin.loads.lock();
        assert_eq!(loads.len(), 1);
        let files = loads[0].get(REPO).unwrap();
        assert!(files.iter().all(|p| p.ends_with("sig/sigs.yaml")));
        assert!(!files.is_empty());
        drop(loads);

        container.close();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn filters_out_unwatched_paths_and_foreign_groups() {
        let plugin = RecordingPlugin::new();
        let container = Arc::new(PluginContainer::new(plugin.clone()));
        let looped = container.clone();
        let handle = tokio::spawn(async move { looped.run().await });

        let mut foreign = watched_event();
        foreign.group = "infrastructure".to_string();
        assert!(container.offer(foreign));

        let unwatched = GitEvent {
            group: "openeuler".to_string(),
            repo: REPO.to_string(),
            files: vec![PathBuf::from("/srv/openeuler/community/community/README.md")],
        };
        assert!(container.offer(unwatched));

        settle().await;
        assert!(container.tick());
        settle().await;

        assert!(plugin.loads.lock().is_empty());

        container.close();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn empty_flush_is_a_no_op() {
        let plugin = RecordingPlugin::new();
        let container = Arc::new(PluginContainer::new(plugin.clone()));
        let looped = container.clone();
        let handle = tokio::spawn(async move { looped.run().await });

        assert!(container.tick());
        settle().await;
        assert!(plugin.loads.lock().is_empty());

        container.close();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn matches_events_from_equivalent_repo_urls() {
        let plugin = RecordingPlugin::new();
        let container = PluginContainer::new(plugin.clone());

        let mut event = watched_event();
        event.repo = "https://gitee.com/openeuler/community".to_string();
        let (repo, files) = container.matched_files(&event).unwrap();
        // Pending entries stay keyed by the plugin's own spelling.
        assert_eq!(repo, REPO);
        assert_eq!(files.len(), 1);
    }
}
