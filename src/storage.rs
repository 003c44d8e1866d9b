use crate::error::{RecordError, RecordResult};
use crate::probe::probe_last_timestamp;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};

pub const EXTENSION: &str = "flv";

/// One container file under the recordings root
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileInfo {
    /// Relative to the root, '/'-separated
    pub path: String,
    pub size: u64,
    /// Last tag timestamp in milliseconds
    pub duration: u32,
}

/// Absolute path of the container for `stream_id`: `root/<stream_id>.flv`.
///
/// Stream ids are '/'-separated relative paths; anything that could escape
/// the root is rejected.
pub fn recording_path(root: &Path, stream_id: &str) -> RecordResult<PathBuf> {
    let relative = Path::new(stream_id);
    if stream_id.is_empty() || stream_id.ends_with('/') {
        return Err(RecordError::InvalidStreamPath(stream_id.to_string()));
    }
    if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(RecordError::InvalidStreamPath(stream_id.to_string()));
    }
    let root = if root.is_absolute() { root.to_path_buf() } else { std::env::current_dir()?.join(root) };
    Ok(root.join(format!("{}.{}", stream_id, EXTENSION)))
}

/// Walk `root` recursively and describe every container file found.
pub async fn list_recordings(root: &Path) -> RecordResult<Vec<FileInfo>> {
    let mut out = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(ent) = entries.next_entry().await? {
            let p = ent.path();
            let meta = ent.metadata().await?;
            if meta.is_dir() {
                pending.push(p);
                continue;
            }
            if p.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let mut file = tokio::fs::File::open(&p).await?.into_std().await;
            let duration = probe_last_timestamp(&mut file);
            let rel = p.strip_prefix(root).unwrap_or(&p);
            let rel = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
            out.push(FileInfo { path: rel, size: meta.len(), duration });
        }
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

/// Remove the container for `stream_id`.
pub async fn delete_recording(root: &Path, stream_id: &str) -> RecordResult<PathBuf> {
    let path = recording_path(root, stream_id)?;
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {
            tracing::info!("deleted {}", path.display());
            Ok(path)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RecordError::NotFound(path)),
        Err(e) => Err(e.into()),
    }
}
