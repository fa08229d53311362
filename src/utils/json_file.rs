//! Whole-file JSON persistence used by every store.
//!
//! Stores are small JSON documents rewritten in full on each mutation. Writes
//! go through a sibling temp file followed by a rename so readers (and a
//! crash mid-write) never observe a truncated document.
use std::{
    io,
    path::{Path, PathBuf},
};

use serde::{Serialize, de::DeserializeOwned};

/// Outcome of loading a JSON array store.
#[derive(Debug)]
pub enum LoadOutcome<T> {
    /// The file existed and parsed.
    Loaded(Vec<T>),
    /// The file was absent; an empty array was written in its place.
    Created,
    /// The file could not be read or parsed; the store starts empty.
    Degraded(String),
}

impl<T> LoadOutcome<T> {
    pub fn into_records(self) -> Vec<T> {
        match self {
            LoadOutcome::Loaded(records) => records,
            LoadOutcome::Created | LoadOutcome::Degraded(_) => Vec::new(),
        }
    }
}

/// Load a JSON array, creating the file when missing and degrading to empty
/// on any read or parse failure.
pub async fn load_json_array<T: DeserializeOwned>(path: &Path) -> LoadOutcome<T> {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<Vec<T>>(&bytes) {
            Ok(records) => LoadOutcome::Loaded(records),
            Err(e) => LoadOutcome::Degraded(format!("parse error: {e}")),
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if let Err(e) = write_atomic(path, b"[]").await {
                return LoadOutcome::Degraded(format!("could not create empty store: {e}"));
            }
            LoadOutcome::Created
        }
        Err(e) => LoadOutcome::Degraded(format!("read error: {e}")),
    }
}

/// Serialize `value` as two-space indented JSON and replace `path` with it.
pub async fn write_json_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    write_atomic(path, &bytes).await
}

/// Replace `path` with `content`, creating parent directories as needed.
pub async fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = temp_path(path);
    tokio::fs::write(&tmp, content).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// `true` when `path` exists; lookup errors count as absent.
pub async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

fn temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    path.with_file_name(format!(".{file_name}.tmp"))
}
