//! Repository and plugin descriptors plus the URL helpers the manager uses
//! to key its on-disk layout.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, SyncError};

/// Transport schema of a watched repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoSchema {
    Https,
    Ssh,
}

/// A remote Git repository plus the relative paths to watch inside it.
///
/// Immutable once registered. Two values are *equivalent* when their URLs
/// share host and final path segment (see [`repos_equivalent`]); equivalent
/// repos registered by different plugins share one runner and merge their
/// watch lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitRepo {
    /// Git repo to watch
    pub repo: String,
    /// Git branch
    pub branch: String,
    /// Submodule checkout mode; empty means no submodule handling
    #[serde(default)]
    pub submodules: String,
    /// Transport schema, https or ssh
    pub schema: RepoSchema,
    /// Paths to watch, relative to the working copy root
    pub watch_files: Vec<String>,
}

/// Identity and repository set of a plugin. `group` and `name` together form
/// the routing key: endpoints mount under `/v1/metadata/<group>/<name>/…`.
#[derive(Debug, Clone)]
pub struct PluginMeta {
    pub name: String,
    pub description: String,
    pub group: String,
    pub repos: Vec<GitRepo>,
}

/// A change notification emitted by a runner after a sync cycle.
///
/// `files` holds the absolute paths whose digest changed in that cycle.
#[derive(Debug, Clone)]
pub struct GitEvent {
    pub group: String,
    pub repo: String,
    pub files: Vec<PathBuf>,
}

fn final_path_segment(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last)
}

/// Local directory name for a repo: the final URL path segment with a
/// trailing `.git` stripped. Disambiguates the on-disk layout under
/// `<base_folder>/<group>/`.
pub fn local_name(repo_url: &str) -> Result<String> {
    let parsed = Url::parse(repo_url).map_err(|err| SyncError::InvalidRepoUrl {
        url: repo_url.to_string(),
        reason: err.to_string(),
    })?;
    let name = final_path_segment(parsed.path());
    if name.is_empty() {
        return Err(SyncError::InvalidRepoUrl {
            url: repo_url.to_string(),
            reason: "url has no path segment".to_string(),
        });
    }
    Ok(name.to_string())
}

/// Whether two repo URLs address the same repository: same host and same
/// final path segment after stripping trailing `/` and `.git`. The scheme is
/// deliberately ignored so https and ssh remotes of one repo merge.
pub fn repos_equivalent(base: &str, other: &str) -> Result<bool> {
    let parse = |raw: &str| {
        Url::parse(raw).map_err(|err| SyncError::InvalidRepoUrl {
            url: raw.to_string(),
            reason: err.to_string(),
        })
    };
    let base = parse(base)?;
    let other = parse(other)?;
    if base.host_str() != other.host_str() {
        return Ok(false);
    }
    Ok(final_path_segment(base.path()) == final_path_segment(other.path()))
}
