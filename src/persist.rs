use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read a JSON document, returning None when the file does not exist yet.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write a JSON document atomically: serialize the full new state to a
/// sibling staging file, then rename it over the target. A crash mid-write
/// leaves the previous version intact, never a torn file.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }
    let staging = staging_path(path);
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(&staging, &bytes).await?;
    fs::rename(&staging, path).await?;
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let got: Option<Vec<u32>> = read_json(&dir.path().join("absent.json")).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn write_replaces_and_cleans_staging() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        write_json(&path, &vec![1u32, 2, 3]).await.unwrap();
        write_json(&path, &vec![4u32]).await.unwrap();

        let got: Option<Vec<u32>> = read_json(&path).await.unwrap();
        assert_eq!(got, Some(vec![4]));
        assert!(!staging_path(&path).exists());
    }

    #[tokio::test]
    async fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/nested/doc.json");
        write_json(&path, &42u32).await.unwrap();
        let got: Option<u32> = read_json(&path).await.unwrap();
        assert_eq!(got, Some(42));
    }
}
