//! Atomic file writes.
//!
//! Content goes to a uniquely named temp file in the target's directory, is
//! flushed and synced, then renamed over the target. Readers never observe a
//! partial file; on failure the temp file is removed and the target is left
//! as it was.

use crate::error::{Error, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Write bytes to `path` atomically.
pub async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    write_atomic_with(path, data, |_| Ok(())).await
}

/// Serialize `value` as pretty JSON and write it atomically.
pub async fn write_json_atomic(path: &Path, value: &Value) -> Result<()> {
    let serialized = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &serialized).await
}

/// `before_rename` runs after the temp file is synced and before it replaces
/// the target; an error from it aborts the write.
pub(crate) async fn write_atomic_with<F>(path: &Path, data: &[u8], before_rename: F) -> Result<()>
where
    F: FnOnce(&Path) -> std::io::Result<()>,
{
    let temp_path = temp_path_for(path)?;

    let result = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        before_rename(&temp_path)?;
        fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = result {
        if let Err(cleanup) = fs::remove_file(&temp_path).await {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove temp file {}: {}", temp_path.display(), cleanup);
            }
        }
        return Err(Error::io_with_path(e, path));
    }

    debug!("Atomically wrote {}", path.display());
    Ok(())
}

fn temp_path_for(path: &Path) -> Result<PathBuf> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::InvalidPath(format!("{} has no parent", path.display())))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::InvalidPath(format!("{} has no file name", path.display())))?;
    Ok(parent.join(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        Uuid::new_v4().simple()
    )))
}
