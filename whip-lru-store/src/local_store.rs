//! On-disk asset storage backed by LMDB (spec.md §4.4).
//!
//! Grounded on `pantsbuild-pants`'s `sharded_lmdb`/`engine/fs/store` crates,
//! which use `lmdb-rkv` the same way: one environment, one named database,
//! keys are a short fixed-width encoding of the thing being stored.

use lmdb::{Cursor, Database, DatabaseFlags, Environment, RwTransaction, Transaction, WriteFlags};
use std::path::Path;
use thiserror::Error;
use whip_lru_proto::{AssetId, StorageCodec};

const DB_NAME: &str = "assets";

#[derive(Debug, Error)]
pub enum LocalStoreError {
    #[error("asset already present")]
    KeyExists,
    #[error("asset not present")]
    NotFound,
    #[error("local store is full")]
    MapFull,
    #[error("storage codec error: {0}")]
    Codec(#[from] whip_lru_proto::CodecError),
    #[error("lmdb error: {0}")]
    Lmdb(#[from] lmdb::Error),
}

fn key_of(id: &AssetId) -> String {
    id.to_simple().to_string()
}

/// Wraps a single LMDB environment/database pair. All keys are the
/// lowercase 32-hex form of the asset id; values are `StorageCodec`-encoded
/// assets.
pub struct LocalStore {
    env: Environment,
    db: Database,
}

/// LMDB needs room for its own meta pages regardless of how small the
/// configured disk budget is; below this the environment can't open.
const MIN_MAP_SIZE_BYTES: usize = 1024 * 1024;

impl LocalStore {
    /// `map_size_bytes` is `Cache.DatabaseMaxSizeBytes` (spec.md §6) — the
    /// same value `StorageManager` treats as the local cache's disk
    /// budget, clamped up to a floor LMDB can actually work with.
    pub fn open(path: &Path, map_size_bytes: usize) -> Result<Self, LocalStoreError> {
        let map_size_bytes = map_size_bytes.max(MIN_MAP_SIZE_BYTES);
        std::fs::create_dir_all(path).ok();
        let env = Environment::new()
            .set_map_size(map_size_bytes)
            .set_max_dbs(1)
            .open(path)?;
        let db = env.create_db(Some(DB_NAME), DatabaseFlags::empty())?;
        Ok(LocalStore { env, db })
    }

    pub fn put(&self, id: &AssetId, encoded: &[u8]) -> Result<(), LocalStoreError> {
        let mut txn = self.env.begin_rw_txn()?;
        let result = txn.put(self.db, &key_of(id), &encoded, WriteFlags::NO_OVERWRITE);
        match result {
            Ok(()) => {
                txn.commit()?;
                Ok(())
            }
            Err(lmdb::Error::KeyExist) => Err(LocalStoreError::KeyExists),
            Err(lmdb::Error::MapFull) => Err(LocalStoreError::MapFull),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get(&self, id: &AssetId) -> Result<Vec<u8>, LocalStoreError> {
        let txn = self.env.begin_ro_txn()?;
        match txn.get(self.db, &key_of(id)) {
            Ok(bytes) => Ok(bytes.to_vec()),
            Err(lmdb::Error::NotFound) => Err(LocalStoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    pub fn contains(&self, id: &AssetId) -> Result<bool, LocalStoreError> {
        match self.get(id) {
            Ok(_) => Ok(true),
            Err(LocalStoreError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn delete(&self, id: &AssetId) -> Result<(), LocalStoreError> {
        let mut txn = self.env.begin_rw_txn()?;
        match txn.del(self.db, &key_of(id), None) {
            Ok(()) => {
                txn.commit()?;
                Ok(())
            }
            Err(lmdb::Error::NotFound) => Err(LocalStoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes every id in `ids` as a single write transaction. Missing
    /// ids are skipped rather than treated as an error, since callers use
    /// this for batch eviction/purge where some ids may already be gone.
    pub fn delete_many(&self, ids: &[AssetId]) -> Result<(), LocalStoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut txn = self.env.begin_rw_txn()?;
        for id in ids {
            match txn.del(self.db, &key_of(id), None) {
                Ok(()) | Err(lmdb::Error::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Every `(id, size)` currently stored, read straight off a cursor over
    /// the whole database. Used at startup to rebuild the `LruIndex`.
    pub fn scan_ids_and_sizes(&self) -> Result<Vec<(AssetId, u64)>, LocalStoreError> {
        let txn = self.env.begin_ro_txn()?;
        let mut cursor = txn.open_ro_cursor(self.db)?;
        let mut out = Vec::new();
        for (key, value) in cursor.iter_start() {
            let hex = std::str::from_utf8(key).map_err(|_| {
                LocalStoreError::Codec(whip_lru_proto::CodecError::Malformed(
                    "non-utf8 lmdb key".into(),
                ))
            })?;
            let id = uuid::Uuid::parse_str(hex).map_err(|_| {
                LocalStoreError::Codec(whip_lru_proto::CodecError::Malformed(
                    "non-hex lmdb key".into(),
                ))
            })?;
            out.push((id, value.len() as u64));
        }
        Ok(out)
    }

    pub fn get_asset(&self, id: &AssetId) -> Result<whip_lru_proto::Asset, LocalStoreError> {
        let bytes = self.get(id)?;
        Ok(StorageCodec::decode(&bytes)?)
    }

    pub fn put_asset(&self, asset: &whip_lru_proto::Asset) -> Result<u64, LocalStoreError> {
        let encoded = StorageCodec::encode(asset)?;
        self.put(&asset.id, &encoded)?;
        Ok(encoded.len() as u64)
    }

    #[allow(dead_code)]
    fn with_rw<F>(&self, f: F) -> Result<(), LocalStoreError>
    where
        F: FnOnce(&mut RwTransaction) -> Result<(), lmdb::Error>,
    {
        let mut txn = self.env.begin_rw_txn()?;
        f(&mut txn)?;
        txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whip_lru_proto::Asset;

    fn sample_asset(id: AssetId) -> Asset {
        Asset::new(id, 1, true, false, 1_700_000_000, "n".into(), "d".into(), vec![1, 2, 3])
    }

    #[test]
    fn put_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path(), 10 * 1024 * 1024).unwrap();
        let asset = sample_asset(uuid::Uuid::new_v4());

        assert!(!store.contains(&asset.id).unwrap());
        store.put_asset(&asset).unwrap();
        assert!(store.contains(&asset.id).unwrap());

        let fetched = store.get_asset(&asset.id).unwrap();
        assert_eq!(fetched, asset);

        store.delete(&asset.id).unwrap();
        assert!(!store.contains(&asset.id).unwrap());
    }

    #[test]
    fn duplicate_put_is_key_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path(), 10 * 1024 * 1024).unwrap();
        let asset = sample_asset(uuid::Uuid::new_v4());

        store.put_asset(&asset).unwrap();
        let err = store.put_asset(&asset).unwrap_err();
        assert!(matches!(err, LocalStoreError::KeyExists));
    }

    #[test]
    fn delete_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path(), 10 * 1024 * 1024).unwrap();
        let err = store.delete(&uuid::Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, LocalStoreError::NotFound));
    }

    #[test]
    fn delete_many_removes_all_in_one_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path(), 10 * 1024 * 1024).unwrap();
        let a = sample_asset(uuid::Uuid::new_v4());
        let b = sample_asset(uuid::Uuid::new_v4());
        let c = sample_asset(uuid::Uuid::new_v4());
        store.put_asset(&a).unwrap();
        store.put_asset(&b).unwrap();

        // c was never stored; delete_many should skip it rather than error.
        store.delete_many(&[a.id, b.id, c.id]).unwrap();

        assert!(!store.contains(&a.id).unwrap());
        assert!(!store.contains(&b.id).unwrap());
    }

    #[test]
    fn scan_recovers_stored_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path(), 10 * 1024 * 1024).unwrap();
        let a = sample_asset(uuid::Uuid::new_v4());
        let b = sample_asset(uuid::Uuid::new_v4());
        store.put_asset(&a).unwrap();
        store.put_asset(&b).unwrap();

        let mut ids: Vec<_> = store
            .scan_ids_and_sizes()
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(ids, expected);
    }
}
