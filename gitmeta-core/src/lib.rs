//! # gitmeta-core
//!
//! The synchronization and dispatch engine behind the gitmeta metadata
//! service.
//!
//! ## Overview
//!
//! The engine mirrors a set of remote Git repositories to local disk by
//! supervising one external `git-sync` child process per repository, detects
//! content changes through SHA-256 digest comparison, and routes change
//! events to interested plugins through per-plugin mailboxes with debounced
//! flushing.
//!
//! ## Architecture
//!
//! - [`runner::GitSyncRunner`] — one per repository; drives the sync child
//!   and re-digests watched paths after every successful pull
//! - [`digest`] — bounded parallel SHA-256 over files and directories
//! - [`container::PluginContainer`] — per-plugin mailbox and batching buffer
//! - [`manager::SyncManager`] — owns the runner and container sets, routes
//!   events, and tracks readiness
//! - [`registry::PluginRegistry`] — startup-time plugin registration
//! - [`mount::MountTable`] — routers for ready plugins, consulted by the
//!   HTTP dispatcher

pub mod container;
pub mod digest;
pub mod error;
pub mod manager;
pub mod meta;
pub mod mount;
pub mod plugin;
pub mod registry;
pub mod runner;

pub use container::PluginContainer;
pub use error::{Result, SyncError};
pub use manager::{ManagerConfig, PluginInfo, SyncManager};
pub use meta::{GitEvent, GitRepo, PluginMeta, RepoSchema, local_name, repos_equivalent};
pub use mount::MountTable;
pub use plugin::{Plugin, PluginFiles};
pub use registry::PluginRegistry;
pub use runner::{GitSyncRunner, RunnerState};
