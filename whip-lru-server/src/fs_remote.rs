//! A filesystem-backed `RemoteProvider` (spec.md §4.6 treats the upstream
//! as an opaque, abstract interface built from the `[AssetsRead]` /
//! `[AssetsWrite]` INI sections; this is the reference implementation a
//! standalone deployment wires up when it has no other upstream).
//!
//! Grounded in the teacher's `library::Library` path layout (one file per
//! asset, named by UUID, under a root directory) rather than inventing a
//! new storage convention.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use whip_lru_proto::{Asset, AssetId, StorageCodec};
use whip_lru_store::{RemoteError, RemoteProvider};

/// Stores one file per asset, named `<hyphenated-uuid>.bin`, under `root`.
/// `[AssetsRead]`/`[AssetsWrite]` both carry a `Path` key pointing at this
/// directory; a real deployment typically points both at the same
/// location, but the constructor accepts them independently since
/// spec.md keeps the two sections distinct.
pub struct FilesystemRemoteProvider {
    read_root: PathBuf,
    write_root: PathBuf,
}

impl FilesystemRemoteProvider {
    pub fn new(assets_read: &HashMap<String, String>, assets_write: &HashMap<String, String>) -> Self {
        let read_root = assets_read
            .get("Path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./whip-lru-data/remote"));
        let write_root = assets_write
            .get("Path")
            .map(PathBuf::from)
            .unwrap_or_else(|| read_root.clone());
        FilesystemRemoteProvider { read_root, write_root }
    }

    fn read_path(&self, id: &AssetId) -> PathBuf {
        self.read_root.join(format!("{}.bin", id.to_hyphenated()))
    }

    fn write_path(&self, id: &AssetId) -> PathBuf {
        self.write_root.join(format!("{}.bin", id.to_hyphenated()))
    }
}

fn io_to_remote(err: std::io::Error) -> RemoteError {
    RemoteError::Transient(err.to_string())
}

#[async_trait]
impl RemoteProvider for FilesystemRemoteProvider {
    async fn get(&self, id: &AssetId) -> Result<Asset, RemoteError> {
        let path = self.read_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(RemoteError::NotFound),
            Err(e) => return Err(io_to_remote(e)),
        };
        StorageCodec::decode(&bytes).map_err(|e| RemoteError::Transient(e.to_string()))
    }

    async fn put(&self, asset: &Asset) -> Result<(), RemoteError> {
        let path = self.write_path(&asset.id);
        if tokio::fs::metadata(&path).await.is_ok() {
            return Err(RemoteError::Duplicate);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_to_remote)?;
        }
        let bytes = StorageCodec::encode(asset).map_err(|e| RemoteError::Transient(e.to_string()))?;
        tokio::fs::write(&path, bytes).await.map_err(io_to_remote)
    }

    async fn purge(&self, id: &AssetId) -> Result<(), RemoteError> {
        match tokio::fs::remove_file(self.write_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RemoteError::NotFound),
            Err(e) => Err(io_to_remote(e)),
        }
    }

    async fn test(&self, id: &AssetId) -> Result<bool, RemoteError> {
        Ok(tokio::fs::metadata(self.read_path(id)).await.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &std::path::Path) -> (HashMap<String, String>, HashMap<String, String>) {
        let mut map = HashMap::new();
        map.insert("Path".to_string(), root.to_string_lossy().into_owned());
        (map.clone(), map)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let (read, write) = config(dir.path());
        let provider = FilesystemRemoteProvider::new(&read, &write);

        let asset = Asset::new(
            uuid::Uuid::new_v4(),
            1,
            false,
            false,
            0,
            "n".into(),
            "d".into(),
            vec![1, 2, 3],
        );
        provider.put(&asset).await.unwrap();
        assert_eq!(provider.get(&asset.id).await.unwrap(), asset);
    }

    #[tokio::test]
    async fn duplicate_put_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (read, write) = config(dir.path());
        let provider = FilesystemRemoteProvider::new(&read, &write);

        let asset = Asset::new(uuid::Uuid::new_v4(), 1, false, false, 0, "n".into(), "d".into(), vec![1]);
        provider.put(&asset).await.unwrap();
        assert_eq!(provider.put(&asset).await, Err(RemoteError::Duplicate));
    }

    #[tokio::test]
    async fn purge_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (read, write) = config(dir.path());
        let provider = FilesystemRemoteProvider::new(&read, &write);
        assert_eq!(provider.purge(&uuid::Uuid::new_v4()).await, Err(RemoteError::NotFound));
    }

    #[tokio::test]
    async fn test_reports_presence() {
        let dir = tempfile::tempdir().unwrap();
        let (read, write) = config(dir.path());
        let provider = FilesystemRemoteProvider::new(&read, &write);
        let asset = Asset::new(uuid::Uuid::new_v4(), 1, false, false, 0, "n".into(), "d".into(), vec![1]);
        assert_eq!(provider.test(&asset.id).await, Ok(false));
        provider.put(&asset).await.unwrap();
        assert_eq!(provider.test(&asset.id).await, Ok(true));
    }
}
