//! SHA-256 digests over watched files and directories.
//!
//! Directory digests are computed from the sorted per-file digests so the
//! result is invariant to filesystem enumeration order. Large trees are
//! capped at [`MAX_DIR_FILES`] files.

use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use walkdir::WalkDir;

/// Initial digest of every watched path. Guarantees the first successful
/// digest comparison always produces a change event.
pub const ZERO_DIGEST: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Directory digests consider at most this many regular files.
pub const MAX_DIR_FILES: usize = 100;

/// Hard deadline a caller should apply around one directory digest.
pub const DIR_DIGEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

const RESULT_CHANNEL_SIZE: usize = 20;
const READ_BUF_SIZE: usize = 64 * 1024;

/// Streamed SHA-256 of a single file, hex encoded.
pub async fn file_digest(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Digest of a directory tree.
///
/// Walks the tree, hashes up to [`MAX_DIR_FILES`] regular files in parallel,
/// sorts the per-file digests lexicographically and hashes their
/// concatenation. Non-regular entries are skipped; unreadable files are
/// logged and dropped from the set without failing the whole directory.
///
/// Cancelling `cancel` lets already-launched workers finish their current
/// file, then the collector stops and an error is returned; the caller must
/// treat that as "unknown" and keep its previous digest.
pub async fn dir_digest(path: &Path, cancel: &CancellationToken) -> io::Result<String> {
    let files = collect_regular_files(path.to_path_buf()).await?;

    let (tx, mut rx) = mpsc::channel::<String>(RESULT_CHANNEL_SIZE);
    let expected = files.len();
    for file in files {
        let tx = tx.clone();
        tokio::spawn(async move {
            match file_digest(&file).await {
                Ok(digest) => {
                    let _ = tx.send(digest).await;
                }
                Err(err) => {
                    warn!(path = %file.display(), %err, "skipping unreadable file in directory digest");
                }
            }
        });
    }
    drop(tx);

    let mut digests = Vec::with_capacity(expected);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "directory digest cancelled"));
            }
            next = rx.recv() => match next {
                Some(digest) => digests.push(digest),
                None => break,
            },
        }
    }

    digests.sort();
    let mut hasher = Sha256::new();
    for digest in &digests {
        hasher.update(digest.as_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Digest a watched path, dispatching on what is on disk right now.
pub async fn path_digest(path: &Path, cancel: &CancellationToken) -> io::Result<String> {
    let meta = tokio::fs::metadata(path).await?;
    if meta.is_dir() {
        dir_digest(path, cancel).await
    } else {
        file_digest(path).await
    }
}

async fn collect_regular_files(root: PathBuf) -> io::Result<Vec<PathBuf>> {
    tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        for entry in WalkDir::new(&root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(root = %root.display(), %err, "skipping unreadable entry in directory walk");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if files.len() == MAX_DIR_FILES {
                warn!(
                    root = %root.display(),
                    cap = MAX_DIR_FILES,
                    "directory exceeds file cap, digest covers the first entries only"
                );
                break;
            }
            files.push(entry.into_path());
        }
        Ok(files)
    })
    .await
    .map_err(|err| io::Error::other(err.to_string()))?
}
