//! Owns the runner and container sets, routes change events, and tracks
//! per-repo and per-plugin readiness.
//!
//! All readiness mutation happens on the manager's single event-loop task;
//! every other access path is read-only. Runners talk to the manager only
//! through the event channel.

use std::collections::{HashMap, HashSet};
use std::env;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::container::PluginContainer;
use crate::error::{Result, SyncError};
use crate::meta::{self, GitEvent, GitRepo, PluginMeta};
use crate::mount::MountTable;
use crate::plugin::Plugin;
use crate::registry::PluginRegistry;
use crate::runner::GitSyncRunner;

/// Size of the runner → manager event channel.
pub const EVENT_CHANNEL_SIZE: usize = 100;

/// Sync and notify intervals are capped here, seconds.
pub const MAX_INTERVAL_SECS: u64 = 60;

const GIT_SYNC_BINARY: &str = "git-sync";

/// The `[manager]` section of the configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    #[serde(default = "default_interval")]
    pub sync_interval: u64,
    #[serde(default = "default_interval")]
    pub notify_interval: u64,
    pub base_folder: PathBuf,
    #[serde(default)]
    pub git_sync_path: Option<PathBuf>,
}

fn default_interval() -> u64 {
    MAX_INTERVAL_SECS
}

/// Introspection row returned by `GET /v1/metadata/plugins`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub group: String,
    pub name: String,
    pub ready: bool,
    pub description: String,
}

struct RepoEntry {
    meta: GitRepo,
    ready: AtomicBool,
}

struct PluginSlot {
    plugin: Arc<dyn Plugin>,
    meta: PluginMeta,
    container: Arc<PluginContainer>,
    ready: AtomicBool,
}

pub struct SyncManager {
    sync_interval: u64,
    notify_interval: u64,
    base_folder: PathBuf,
    validate_id: String,
    event_tx: mpsc::Sender<GitEvent>,
    event_rx: StdMutex<Option<mpsc::Receiver<GitEvent>>>,
    runners: HashMap<(String, String), Arc<GitSyncRunner>>,
    repo_states: HashMap<(String, String), RepoEntry>,
    plugins: Vec<PluginSlot>,
    mounts: MountTable,
    shutdown: CancellationToken,
}

impl SyncManager {
    /// Build the manager from configuration and the startup-time registry.
    ///
    /// Plugins absent from `enabled` are dropped. Equivalent repos
    /// registered by different plugins merge into one shared state and one
    /// runner; a repo whose local name collides with a *non*-equivalent URL
    /// is logged and skipped. Zero resulting runners is a configuration
    /// error.
    pub fn new(
        config: ManagerConfig,
        registry: &PluginRegistry,
        enabled: &HashSet<String>,
        mounts: MountTable,
        http_port: u16,
    ) -> Result<Self> {
        // Zero would stall the ticker, so clamp both ends.
        let sync_interval = config.sync_interval.clamp(1, MAX_INTERVAL_SECS);
        let notify_interval = config.notify_interval.clamp(1, MAX_INTERVAL_SECS);

        if !config.base_folder.is_dir() {
            return Err(SyncError::ConfigInvalid(format!(
                "sync base folder {} does not exist",
                config.base_folder.display()
            )));
        }
        let git_sync_path = resolve_git_sync(config.git_sync_path)?;

        let mut id_bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut id_bytes);
        let validate_id = hex::encode(id_bytes);

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

        let mut selected: Vec<Arc<dyn Plugin>> = Vec::new();
        for name in registry.names() {
            if !enabled.contains(&name) {
                info!(plugin = %name, "plugin disabled, skipping");
                continue;
            }
            if let Some(plugin) = registry.get(&name) {
                selected.push(plugin.clone());
            }
        }

        // Merge repos across plugins: one state per (group, local name).
        let mut repo_states: HashMap<(String, String), RepoEntry> = HashMap::new();
        for plugin in &selected {
            let meta = plugin.meta();
            for repo in &meta.repos {
                let local = match meta::local_name(&repo.repo) {
                    Ok(local) => local,
                    Err(err) => {
                        error!(repo = %repo.repo, %err, "failed to resolve local name, repo skipped");
                        continue;
                    }
                };
                let key = (meta.group.clone(), local);
                match repo_states.get_mut(&key) {
                    Some(entry) => {
                        match meta::repos_equivalent(&entry.meta.repo, &repo.repo) {
                            Ok(true) => {
                                for watch in &repo.watch_files {
                                    if !entry.meta.watch_files.contains(watch) {
                                        entry.meta.watch_files.push(watch.clone());
                                    }
                                }
                            }
                            Ok(false) => {
                                error!(
                                    existing = %entry.meta.repo,
                                    conflicting = %repo.repo,
                                    "repo skipped: same local name but remote url differs"
                                );
                            }
                            Err(err) => {
                                error!(
                                    existing = %entry.meta.repo,
                                    conflicting = %repo.repo,
                                    %err,
                                    "failed to compare repo urls, repo skipped"
                                );
                            }
                        }
                    }
                    None => {
                        repo_states.insert(
                            key,
                            RepoEntry {
                                meta: repo.clone(),
                                ready: AtomicBool::new(false),
                            },
                        );
                    }
                }
            }
        }

        let mut runners = HashMap::new();
        for ((group, local), entry) in &repo_states {
            let dir = config.base_folder.join(group).join(local);
            std::fs::create_dir_all(&dir).map_err(|err| {
                SyncError::ConfigInvalid(format!(
                    "failed to create sync folder {}: {err}",
                    dir.display()
                ))
            })?;
            let trigger_url = format!(
                "http://127.0.0.1:{http_port}/v1/metadata/repos/{group}/{local}/trigger?validateID={validate_id}"
            );
            let runner = GitSyncRunner::new(
                group,
                &dir,
                entry.meta.clone(),
                event_tx.clone(),
                sync_interval,
                trigger_url,
                &git_sync_path,
            )?;
            runners.insert((group.clone(), local.clone()), Arc::new(runner));
        }
        if runners.is_empty() {
            return Err(SyncError::ConfigInvalid(
                "no repositories to sync, check enabled plugins".to_string(),
            ));
        }

        let plugins = selected
            .into_iter()
            .map(|plugin| {
                let meta = plugin.meta();
                let container = Arc::new(PluginContainer::new(plugin.clone()));
                PluginSlot {
                    plugin,
                    meta,
                    container,
                    ready: AtomicBool::new(false),
                }
            })
            .collect();

        info!(
            sync_interval,
            notify_interval,
            base_folder = %config.base_folder.display(),
            runner_count = runners.len(),
            "sync manager initialized"
        );

        Ok(Self {
            sync_interval,
            notify_interval,
            base_folder: config.base_folder,
            validate_id,
            event_tx,
            event_rx: StdMutex::new(Some(event_rx)),
            runners,
            repo_states,
            plugins,
            mounts,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn base_folder(&self) -> &Path {
        &self.base_folder
    }

    pub fn sync_interval(&self) -> u64 {
        self.sync_interval
    }

    pub fn validate_id(&self) -> &str {
        &self.validate_id
    }

    /// True once at least one plugin serves traffic.
    pub fn any_ready(&self) -> bool {
        self.plugins
            .iter()
            .any(|slot| slot.ready.load(Ordering::SeqCst))
    }

    pub fn plugin_infos(&self) -> Vec<PluginInfo> {
        let mut infos: Vec<PluginInfo> = self
            .plugins
            .iter()
            .map(|slot| PluginInfo {
                group: slot.meta.group.clone(),
                name: slot.meta.name.clone(),
                ready: slot.ready.load(Ordering::SeqCst),
                description: slot.meta.description.clone(),
            })
            .collect();
        infos.sort_by(|a, b| (&a.group, &a.name).cmp(&(&b.group, &b.name)));
        infos
    }

    /// Spawn all runner tasks and the event loop.
    pub fn start(self: &Arc<Self>) {
        for runner in self.runners.values() {
            let runner = runner.clone();
            tokio::spawn(async move { runner.start().await });
        }
        let manager = self.clone();
        tokio::spawn(async move { manager.event_loop().await });
    }

    async fn event_loop(&self) {
        let taken = self.event_rx.lock().ok().and_then(|mut rx| rx.take());
        let Some(mut events) = taken else {
            warn!("manager event loop already started");
            return;
        };

        let period = Duration::from_secs(self.notify_interval);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("sync manager closed, event loop exiting");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        info!("event channel closed, event loop exiting");
                        break;
                    };
                    self.handle_event(event);
                }
                _ = ticker.tick() => {
                    for slot in &self.plugins {
                        if !slot.container.tick() {
                            warn!(plugin = %slot.meta.name, "flush channel full, tick dropped");
                        }
                    }
                }
            }
        }
    }

    /// Process one change event: mark repo readiness, re-evaluate plugin
    /// readiness in the event's group, then fan out to every container.
    /// Only ever called from the event-loop task.
    fn handle_event(&self, event: GitEvent) {
        let local = match meta::local_name(&event.repo) {
            Ok(local) => local,
            Err(err) => {
                warn!(repo = %event.repo, %err, "event with unresolvable repo url dropped");
                return;
            }
        };
        let key = (event.group.clone(), local);
        let Some(entry) = self.repo_states.get(&key) else {
            warn!(group = %event.group, repo = %event.repo, "event for unknown repo dropped");
            return;
        };
        if !entry.ready.swap(true, Ordering::SeqCst) {
            info!(group = %event.group, repo = %event.repo, "repo completed first sync");
        }

        for slot in &self.plugins {
            if slot.meta.group == event.group
                && !slot.ready.load(Ordering::SeqCst)
                && self.plugin_repos_ready(&slot.meta)
            {
                self.mark_plugin_ready(slot);
            }
        }

        for slot in &self.plugins {
            if !slot.container.offer(event.clone()) {
                warn!(plugin = %slot.meta.name, "container inbox full, event dropped");
            }
        }
    }

    fn plugin_repos_ready(&self, meta: &PluginMeta) -> bool {
        meta.repos.iter().all(|repo| {
            let Ok(local) = meta::local_name(&repo.repo) else {
                return false;
            };
            self.repo_states
                .get(&(meta.group.clone(), local))
                .map(|entry| entry.ready.load(Ordering::SeqCst))
                .unwrap_or(false)
        })
    }

    /// First-ready transition: publish the plugin's endpoints and start its
    /// container loop. Runs exactly once per plugin.
    fn mark_plugin_ready(&self, slot: &PluginSlot) {
        if slot.ready.swap(true, Ordering::SeqCst) {
            return;
        }
        let router = slot.plugin.clone().register_endpoints();
        self.mounts.insert(&slot.meta.group, &slot.meta.name, router);

        let container = slot.container.clone();
        tokio::spawn(async move { container.run().await });

        info!(
            group = %slot.meta.group,
            plugin = %slot.meta.name,
            "plugin ready, endpoints registered"
        );
    }

    /// Validate and apply a sync-child trigger callback.
    ///
    /// Only the loopback peer carrying the process nonce is accepted;
    /// anything else is unauthorized with no side effect.
    pub fn handle_trigger(
        &self,
        peer: IpAddr,
        validate_id: &str,
        group: &str,
        local_name: &str,
    ) -> Result<()> {
        if !peer.is_loopback() || validate_id != self.validate_id {
            return Err(SyncError::TriggerUnauthorized);
        }
        let key = (group.to_string(), local_name.to_string());
        let Some(runner) = self.runners.get(&key) else {
            return Err(SyncError::RepoNotFound {
                group: group.to_string(),
                local_name: local_name.to_string(),
            });
        };
        runner.repo_updated();
        Ok(())
    }

    /// Stop runners, containers, and the event loop. Callers give the
    /// process a short grace period afterwards instead of joining tasks.
    pub fn close(&self) {
        self.shutdown.cancel();
        for runner in self.runners.values() {
            runner.close();
        }
        for slot in &self.plugins {
            slot.container.close();
        }
        info!("sync manager closed");
    }
}

fn resolve_git_sync(configured: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path);
        }
        return Err(SyncError::ConfigInvalid(format!(
            "git-sync binary {} not found",
            path.display()
        )));
    }
    let path_var = env::var_os("PATH").unwrap_or_default();
    for dir in env::split_paths(&path_var) {
        let candidate = dir.join(GIT_SYNC_BINARY);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(SyncError::ConfigInvalid(
        "git-sync binary not found in PATH, set manager.git_sync_path".to_string(),
    ))
}
