//! Per-repository supervisor of the external `git-sync` child process.
//!
//! Each runner performs a one-shot clone, then keeps a daemon-mode child
//! alive until closed. After every successful pull the child calls back on
//! the loopback trigger endpoint, which re-digests the watched paths and
//! emits a change event for the subset whose digest moved.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::digest::{self, DIR_DIGEST_TIMEOUT, ZERO_DIGEST};
use crate::error::{Result, SyncError};
use crate::meta::{self, GitEvent, GitRepo};

/// Deadline for the initial one-shot clone.
pub const CLONE_TIMEOUT: Duration = Duration::from_secs(300);

/// Upper bound of the randomized restart delay after a daemon exit.
const MAX_RETRY_DELAY_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Init,
    Cloning,
    CloningFailed,
    Watching,
    Closing,
    Done,
}

pub struct GitSyncRunner {
    group: String,
    local_parent: PathBuf,
    repo: GitRepo,
    local_name: String,
    event_tx: mpsc::Sender<GitEvent>,
    sync_interval: u64,
    trigger_url: String,
    git_sync_path: PathBuf,
    update_tx: mpsc::Sender<()>,
    update_rx: StdMutex<Option<mpsc::Receiver<()>>>,
    shutdown: CancellationToken,
    digests: Mutex<HashMap<PathBuf, String>>,
    state: Mutex<RunnerState>,
}

impl GitSyncRunner {
    /// `local_parent` is the sync root for this repo; it must already exist
    /// (the manager creates it), the runner never does.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        group: &str,
        local_parent: &Path,
        repo: GitRepo,
        event_tx: mpsc::Sender<GitEvent>,
        sync_interval: u64,
        trigger_url: String,
        git_sync_path: &Path,
    ) -> Result<Self> {
        if !local_parent.is_dir() {
            return Err(SyncError::ConfigInvalid(format!(
                "parent folder {} does not exist",
                local_parent.display()
            )));
        }
        let local_name = meta::local_name(&repo.repo)?;

        // Watched paths live inside the working copy the sync child
        // materializes at <local_parent>/<local_name>. Seeding with the zero
        // digest guarantees the first successful scan always emits.
        let mut digests = HashMap::new();
        for watch in &repo.watch_files {
            digests.insert(
                local_parent.join(&local_name).join(watch),
                ZERO_DIGEST.to_string(),
            );
        }

        let (update_tx, update_rx) = mpsc::channel(1);
        Ok(Self {
            group: group.to_string(),
            local_parent: local_parent.to_path_buf(),
            repo,
            local_name,
            event_tx,
            sync_interval,
            trigger_url,
            git_sync_path: git_sync_path.to_path_buf(),
            update_tx,
            update_rx: StdMutex::new(Some(update_rx)),
            shutdown: CancellationToken::new(),
            digests: Mutex::new(digests),
            state: Mutex::new(RunnerState::Init),
        })
    }

    pub fn repo(&self) -> &GitRepo {
        &self.repo
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn state(&self) -> RunnerState {
        *self.state.lock()
    }

    fn set_state(&self, state: RunnerState) {
        *self.state.lock() = state;
    }

    /// Out-of-band signal that a sync cycle completed and digests should be
    /// recomputed. Collapses into an already-pending signal.
    pub fn repo_updated(&self) {
        if self.update_tx.try_send(()).is_err() {
            debug!(repo = %self.repo.repo, "update signal already pending");
        }
    }

    /// Idempotent termination signal.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "--repo".to_string(),
            self.repo.repo.clone(),
            "--root".to_string(),
            self.local_parent.display().to_string(),
            "--branch".to_string(),
            self.repo.branch.clone(),
        ];
        if !self.repo.submodules.is_empty() {
            args.push("--submodules".to_string());
            args.push(self.repo.submodules.clone());
        }
        args
    }

    async fn run_one_shot(&self) -> Result<()> {
        self.set_state(RunnerState::Cloning);
        info!(repo = %self.repo.repo, root = %self.local_parent.display(), "starting initial clone");

        let mut cmd = Command::new(&self.git_sync_path);
        cmd.args(self.base_args())
            .arg("--one-time")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(CLONE_TIMEOUT, cmd.output())
            .await
            .map_err(|_| {
                SyncError::SyncFailed(format!(
                    "initial clone of {} exceeded {}s",
                    self.repo.repo,
                    CLONE_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|err| SyncError::SyncFailed(format!("failed to spawn sync child: {err}")))?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(SyncError::SyncFailed(format!(
                "clone of {} exited with {}: {}",
                self.repo.repo,
                output.status,
                combined.trim()
            )));
        }
        Ok(())
    }

    fn spawn_daemon(&self) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.git_sync_path);
        cmd.args(self.base_args())
            .arg("--wait")
            .arg(self.sync_interval.to_string())
            .arg("-webhook-url")
            .arg(&self.trigger_url)
            .arg("-webhook-method")
            .arg("GET")
            .arg("--webhook-timeout")
            .arg("2s")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        if let Some(stdout) = child.stdout.take() {
            self.stream_child_output(stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            self.stream_child_output(stderr);
        }
        Ok(child)
    }

    fn stream_child_output<R>(&self, pipe: R)
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let repo = self.repo.repo.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(pipe).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(repo = %repo, "git-sync: {line}");
            }
        });
    }

    /// Re-digest every watched path and emit one event with the changed
    /// subset. Digest failures and timeouts leave the previous digest in
    /// place so the next cycle can catch up.
    async fn scan_and_emit(&self) {
        let paths: Vec<PathBuf> = self.digests.lock().keys().cloned().collect();
        let mut changed = Vec::new();

        for path in paths {
            let result = timeout(DIR_DIGEST_TIMEOUT, digest::path_digest(&path, &self.shutdown)).await;
            let next = match result {
                Ok(Ok(digest)) => digest,
                Ok(Err(err)) => {
                    warn!(path = %path.display(), %err, "digest failed, skipping path this cycle");
                    continue;
                }
                Err(_) => {
                    warn!(path = %path.display(), "digest timed out, skipping path this cycle");
                    continue;
                }
            };
            // Empty means unknown; never overwrite a known digest with it.
            if next.is_empty() {
                continue;
            }

            let mut digests = self.digests.lock();
            if digests.get(&path).map(|prev| prev != &next).unwrap_or(true) {
                digests.insert(path.clone(), next);
                changed.push(path);
            }
        }

        if changed.is_empty() {
            return;
        }
        let event = GitEvent {
            group: self.group.clone(),
            repo: self.repo.repo.clone(),
            files: changed,
        };
        if self.event_tx.send(event).await.is_err() {
            warn!(repo = %self.repo.repo, "event channel closed, dropping change event");
        }
    }

    /// Blocking supervision loop; run it on its own task. A failed initial
    /// clone is terminal: the runner parks until closed and its repo never
    /// becomes ready.
    pub async fn start(&self) {
        let taken = self.update_rx.lock().ok().and_then(|mut rx| rx.take());
        let Some(mut update_rx) = taken else {
            warn!(repo = %self.repo.repo, "runner already started");
            return;
        };

        if let Err(err) = self.run_one_shot().await {
            error!(repo = %self.repo.repo, %err, "initial clone failed, runner parked");
            self.set_state(RunnerState::CloningFailed);
            self.shutdown.cancelled().await;
            self.set_state(RunnerState::Done);
            return;
        }

        info!(repo = %self.repo.repo, "initial clone complete, watching");
        self.set_state(RunnerState::Watching);
        self.scan_and_emit().await;

        while !self.shutdown.is_cancelled() {
            let mut child = match self.spawn_daemon() {
                Ok(child) => child,
                Err(err) => {
                    error!(repo = %self.repo.repo, %err, "failed to start sync daemon");
                    if !self.retry_delay().await {
                        break;
                    }
                    continue;
                }
            };

            let restart = loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        self.set_state(RunnerState::Closing);
                        if let Err(err) = child.start_kill() {
                            debug!(repo = %self.repo.repo, %err, "sync daemon already gone");
                        }
                        let _ = child.wait().await;
                        break false;
                    }
                    status = child.wait() => {
                        match status {
                            Ok(status) => {
                                warn!(repo = %self.repo.repo, %status, "sync daemon exited, restarting");
                            }
                            Err(err) => {
                                error!(repo = %self.repo.repo, %err, "failed to reap sync daemon");
                            }
                        }
                        break true;
                    }
                    _ = update_rx.recv() => {
                        self.scan_and_emit().await;
                    }
                }
            };

            if !restart || !self.retry_delay().await {
                break;
            }
        }

        self.set_state(RunnerState::Done);
        info!(repo = %self.repo.repo, "runner stopped");
    }

    /// Randomized 0–5 s backoff before a daemon restart. Returns false when
    /// the runner was closed while waiting.
    async fn retry_delay(&self) -> bool {
        let secs = rand::rng().random_range(0..=MAX_RETRY_DELAY_SECS);
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(Duration::from_secs(secs)) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::RepoSchema;
    use std::fs;

    const REPO: &str = "https://gitee.com/openeuler/community.git";

    fn repo_meta() -> GitRepo {
        GitRepo {
            repo: REPO.to_string(),
            branch: "master".to_string(),
            submodules: "recursive".to_string(),
            schema: RepoSchema::Https,
            watch_files: vec!["sig/sigs.yaml".to_string()],
        }
    }

    fn make_runner(
        parent: &Path,
    ) -> (GitSyncRunner, mpsc::Receiver<GitEvent>) {
        let (tx, rx) = mpsc::channel(100);
        let runner = GitSyncRunner::new(
            "openeuler",
            parent,
            repo_meta(),
            tx,
            30,
            "http://127.0.0.1:9500/v1/metadata/repos/openeuler/community/trigger?validateID=x"
                .to_string(),
            Path::new("/usr/local/bin/git-sync"),
        )
        .unwrap();
        (runner, rx)
    }

    #[test]
    fn new_requires_existing_parent_folder() {
        let (tx, _rx) = mpsc::channel(1);
        let missing = Path::new("/definitely/not/here");
        let result = GitSyncRunner::new(
            "openeuler",
            missing,
            repo_meta(),
            tx,
            30,
            String::new(),
            Path::new("git-sync"),
        );
        assert!(matches!(result, Err(SyncError::ConfigInvalid(_))));
    }

    #[test]
    fn base_args_include_submodule_mode_when_set() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, _rx) = make_runner(dir.path());
        let args = runner.base_args();
        assert_eq!(args[0..2], ["--repo".to_string(), REPO.to_string()]);
        assert!(args.contains(&"--submodules".to_string()));
        assert!(args.contains(&"recursive".to_string()));

        let (tx, _rx) = mpsc::channel(1);
        let mut plain = repo_meta();
        plain.submodules = String::new();
        let runner = GitSyncRunner::new(
            "openeuler",
            dir.path(),
            plain,
            tx,
            30,
            String::new(),
            Path::new("git-sync"),
        )
        .unwrap();
        assert!(!runner.base_args().contains(&"--submodules".to_string()));
    }

    #[tokio::test]
    async fn first_scan_always_emits_for_existing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let checkout = dir.path().join("community").join("sig");
        fs::create_dir_all(&checkout).unwrap();
        fs::write(checkout.join("sigs.yaml"), b"sigs: []").unwrap();

        let (runner, mut rx) = make_runner(dir.path());
        runner.scan_and_emit().await;

        let event = rx.try_recv().unwrap();
        assert_eq!(event.group, "openeuler");
        assert_eq!(event.repo, REPO);
        assert_eq!(event.files.len(), 1);
        assert!(event.files[0].ends_with("community/sig/sigs.yaml"));
    }

    #[tokio::test]
    async fn unchanged_content_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let checkout = dir.path().join("community").join("sig");
        fs::create_dir_all(&checkout).unwrap();
        fs::write(checkout.join("sigs.yaml"), b"sigs: []").unwrap();

        let (runner, mut rx) = make_runner(dir.path());
        runner.scan_and_emit().await;
        rx.try_recv().unwrap();

        runner.scan_and_emit().await;
        assert!(rx.try_recv().is_err());

        fs::write(checkout.join("sigs.yaml"), b"sigs: [a]").unwrap();
        runner.scan_and_emit().await;
        let event = rx.try_recv().unwrap();
        assert_eq!(event.files.len(), 1);
    }

    #[tokio::test]
    async fn missing_watch_path_keeps_zero_digest() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, mut rx) = make_runner(dir.path());

        runner.scan_and_emit().await;
        assert!(rx.try_recv().is_err());

        // Once the file appears the pending zero digest still fires.
        let checkout = dir.path().join("community").join("sig");
        fs::create_dir_all(&checkout).unwrap();
        fs::write(checkout.join("sigs.yaml"), b"sigs: []").unwrap();
        runner.scan_and_emit().await;
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, _rx) = make_runner(dir.path());
        runner.close();
        runner.close();
        assert_eq!(runner.state(), RunnerState::Init);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_initial_clone_parks_the_runner() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(10);
        let runner = std::sync::Arc::new(
            GitSyncRunner::new(
                "openeuler",
                dir.path(),
                repo_meta(),
                tx,
                30,
                String::new(),
                Path::new("/bin/false"),
            )
            .unwrap(),
        );

        let handle = tokio::spawn({
            let runner = runner.clone();
            async move { runner.start().await }
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(runner.state(), RunnerState::CloningFailed);
        assert!(rx.try_recv().is_err());

        runner.close();
        handle.await.unwrap();
        assert_eq!(runner.state(), RunnerState::Done);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_clone_emits_initial_event() {
        let dir = tempfile::tempdir().unwrap();
        let checkout = dir.path().join("community").join("sig");
        fs::create_dir_all(&checkout).unwrap();
        fs::write(checkout.join("sigs.yaml"), b"sigs: []").unwrap();

        let (tx, mut rx) = mpsc::channel(10);
        let runner = std::sync::Arc::new(
            GitSyncRunner::new(
                "openeuler",
                dir.path(),
                repo_meta(),
                tx,
                30,
                String::new(),
                Path::new("/bin/true"),
            )
            .unwrap(),
        );

        let handle = tokio::spawn({
            let runner = runner.clone();
            async move { runner.start().await }
        });

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.group, "openeuler");
        assert_eq!(event.files.len(), 1);

        runner.close();
        handle.await.unwrap();
        assert_eq!(runner.state(), RunnerState::Done);
    }
}
