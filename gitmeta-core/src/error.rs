use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("invalid repo url {url}: {reason}")]
    InvalidRepoUrl { url: String, reason: String },

    #[error("sync failed: {0}")]
    SyncFailed(String),

    #[error("digest failed: {0}")]
    DigestFailed(#[from] std::io::Error),

    #[error("plugin load failed: {0}")]
    PluginLoad(String),

    #[error("trigger not authorized")]
    TriggerUnauthorized,

    #[error("repo {group}/{local_name} not found")]
    RepoNotFound { group: String, local_name: String },
}

pub type Result<T> = std::result::Result<T, SyncError>;
