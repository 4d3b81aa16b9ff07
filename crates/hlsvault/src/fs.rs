//! Filesystem helpers shared across modules.
//!
//! Single-file state (mappings, playlists, the rewritten journal) goes through
//! [`write_atomic`]; ledgers and journals grow through [`append_line`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::DownloadError;

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all(path: &Path) -> Result<(), DownloadError> {
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

/// Ensure the parent directory of a file path exists.
pub async fn ensure_parent_dir(path: &Path) -> Result<(), DownloadError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    ensure_dir_all(parent).await
}

/// Sibling path used while a file is being written.
pub fn temp_path_for(path: &Path, tag: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("file"));
    name.push(format!(".{tag}.tmp"));
    path.with_file_name(name)
}

/// Write `contents` to `path` through a temp file and a rename, so a crash
/// never leaves a half-written file behind.
pub async fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> Result<(), DownloadError> {
    ensure_parent_dir(path).await?;
    let temp_path = temp_path_for(path, "write");

    let result = async {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(contents.as_ref()).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    Ok(())
}

/// Append one line to `path`, writing `header` first when the file is new
/// or empty.
pub async fn append_line(
    path: &Path,
    header: Option<&str>,
    line: &str,
) -> Result<(), DownloadError> {
    ensure_parent_dir(path).await?;

    let is_empty = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len() == 0,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => return Err(e.into()),
    };

    let mut payload = String::with_capacity(line.len() + 64);
    if is_empty && let Some(header) = header {
        payload.push_str(header);
        payload.push('\n');
    }
    payload.push_str(line);
    payload.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(payload.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Remove a file, treating "already gone" as success.
pub async fn remove_if_exists(path: &Path) -> Result<(), DownloadError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
