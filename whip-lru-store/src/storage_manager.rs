//! Composition root of the store: wires `LocalStore`, `LruIndex`,
//! `WriteJournal`, and a `RemoteProvider` into the single surface the
//! server talks to (spec.md §4.7).

use crate::local_store::{LocalStore, LocalStoreError};
use crate::lru_index::LruIndex;
use crate::remote_provider::{with_retry, RemoteError, RemoteProvider};
use crate::write_journal::{JournalError, WriteJournal};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use whip_lru_proto::{Asset, AssetId};

/// Eviction headroom factor from spec.md §4.7: when a local-store write
/// hits `MapFull`, free at least this many times the incoming asset's size
/// before retrying, so the next few PUTs don't immediately re-trigger
/// eviction.
const EVICTION_HEADROOM_FACTOR: u64 = 3;

/// Default caller timeout for `WriteJournal::reserve` (spec.md §5): a PUT
/// blocks up to this long waiting for a journal slot to free up before it
/// fails as `StorageFull`.
const JOURNAL_RESERVE_TIMEOUT: Duration = Duration::from_secs(60);
const JOURNAL_RESERVE_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("asset not found")]
    NotFound,
    #[error("asset already present")]
    Duplicate,
    #[error("local store is full even after eviction")]
    StorageFull,
    #[error("local store error: {0}")]
    Local(#[from] LocalStoreError),
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
    #[error("remote provider error: {0}")]
    Remote(#[from] RemoteError),
}

pub struct StorageManager<R: RemoteProvider> {
    local: LocalStore,
    lru: Mutex<LruIndex>,
    journal: Mutex<WriteJournal>,
    remote: Arc<R>,
}

impl<R: RemoteProvider + 'static> StorageManager<R> {
    /// Opens (or creates) the local store and journal under `data_dir`,
    /// rebuilds the LRU index from what's on disk, and kicks off
    /// background recovery of anything left pending by an unclean
    /// shutdown (spec.md §4.7 "Recovery on startup").
    pub async fn open(
        data_dir: &Path,
        max_local_bytes: u64,
        journal_capacity: u32,
        remote: Arc<R>,
    ) -> Result<Arc<Self>, StorageError> {
        let local = LocalStore::open(&data_dir.join("assets"), max_local_bytes as usize)?;
        let mut lru = LruIndex::new();
        for (id, size) in local.scan_ids_and_sizes()? {
            // LMDB never hands back the same key twice, so this can't fail.
            let _ = lru.insert(id, size);
        }

        let mut journal = WriteJournal::open_or_create(&data_dir.join("journal.bin"), journal_capacity)?;
        let pending = journal.recover_with_slots()?;

        let manager = Arc::new(StorageManager {
            local,
            lru: Mutex::new(lru),
            journal: Mutex::new(journal),
            remote,
        });

        for (slot, id) in pending {
            manager.clone().spawn_recovery_put(slot, id);
        }

        Ok(manager)
    }

    fn spawn_recovery_put(self: Arc<Self>, slot: u32, id: AssetId) {
        match self.local.get_asset(&id) {
            Ok(asset) => {
                tokio::spawn(async move {
                    self.finish_remote_put(slot, &asset).await;
                });
            }
            Err(_) => {
                log::warn!("pending journal entry for {} has no local copy, dropping", id);
                let mut journal = self.journal.lock();
                let _ = journal.release(slot);
            }
        }
    }

    async fn finish_remote_put(&self, slot: u32, asset: &Asset) {
        let result = with_retry(|| async { self.remote.put(asset).await }).await;
        match result {
            Ok(()) | Err(RemoteError::Duplicate) => {
                let mut journal = self.journal.lock();
                let _ = journal.release(slot);
            }
            Err(err) => {
                log::warn!(
                    "remote PUT for {} exhausted its retry budget, journal slot {} stays occupied: {}",
                    asset.id,
                    slot,
                    err
                );
            }
        }
    }

    /// `GetAsset(id, cache_result)` (spec.md §4.7). Serves from the local
    /// cache when present; otherwise falls back to the remote provider
    /// and, if `cache_result` is set, best-effort caches the result
    /// locally (a caching failure never fails the read).
    pub async fn get_asset(&self, id: &AssetId, cache_result: bool) -> Result<Asset, StorageError> {
        if self.lru.lock().contains(id) {
            self.lru.lock().touch(id).ok();
            return Ok(self.local.get_asset(id)?);
        }

        let asset = with_retry(|| async { self.remote.get(id).await }).await?;
        if cache_result {
            if let Err(err) = self.store_local(&asset) {
                log::warn!("best-effort local cache of {} failed: {}", asset.id, err);
            }
        }
        Ok(asset)
    }

    /// Claims a journal slot for `id`, blocking (polling) up to
    /// `JOURNAL_RESERVE_TIMEOUT` while the journal is full (spec.md §4.5,
    /// §5) instead of failing the PUT the instant every slot is occupied —
    /// in-flight remote writes are expected to free one up shortly.
    async fn reserve_journal_slot(&self, id: &AssetId) -> Result<u32, StorageError> {
        let deadline = tokio::time::Instant::now() + JOURNAL_RESERVE_TIMEOUT;
        loop {
            match self.journal.lock().reserve(id) {
                Ok(slot) => return Ok(slot),
                Err(JournalError::Full(capacity)) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(JournalError::Full(capacity).into());
                    }
                    tokio::time::sleep(JOURNAL_RESERVE_POLL_INTERVAL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// `StoreAsset(asset)` (spec.md §4.7). Acknowledges as soon as the
    /// asset is durably local; the remote write is enqueued as a
    /// background task and does not block the caller.
    pub async fn store_asset(self: &Arc<Self>, asset: Asset) -> Result<(), StorageError> {
        if self.lru.lock().contains(&asset.id) {
            return Err(StorageError::Duplicate);
        }

        let slot = self.reserve_journal_slot(&asset.id).await?;

        if let Err(err) = self.store_local(&asset) {
            let mut journal = self.journal.lock();
            let _ = journal.release(slot);
            return Err(err);
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.finish_remote_put(slot, &asset).await;
        });

        Ok(())
    }

    /// `StoreLocal(asset)` (spec.md §4.7). Writes through to `LocalStore`,
    /// reconciling a `KeyExists` as already-stored and evicting with the
    /// 3x headroom factor on `MapFull` before a single retry.
    pub fn store_local(&self, asset: &Asset) -> Result<(), StorageError> {
        match self.local.put_asset(asset) {
            Ok(size) => {
                let mut lru = self.lru.lock();
                if !lru.contains(&asset.id) {
                    lru.insert(asset.id, size).ok();
                }
                Ok(())
            }
            Err(LocalStoreError::KeyExists) => {
                let mut lru = self.lru.lock();
                if !lru.contains(&asset.id) {
                    let size = self.local.get(&asset.id)?.len() as u64;
                    lru.insert(asset.id, size).ok();
                }
                Ok(())
            }
            Err(LocalStoreError::MapFull) => {
                let need = (asset.data.len() as u64).saturating_mul(EVICTION_HEADROOM_FACTOR);
                let evicted: Vec<AssetId> = self
                    .lru
                    .lock()
                    .evict_to_free(need)
                    .into_iter()
                    .map(|(id, _)| id)
                    .collect();
                self.local.delete_many(&evicted)?;
                match self.local.put_asset(asset) {
                    Ok(size) => {
                        self.lru.lock().insert(asset.id, size).ok();
                        Ok(())
                    }
                    Err(LocalStoreError::MapFull) => Err(StorageError::StorageFull),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `CheckAsset(id)` (spec.md §4.7): local presence short-circuits
    /// `Found`; otherwise asks the remote provider.
    pub async fn check_asset(&self, id: &AssetId) -> Result<bool, StorageError> {
        if self.lru.lock().contains(id) {
            return Ok(true);
        }
        Ok(with_retry(|| async { self.remote.test(id).await }).await?)
    }

    /// `PurgeAsset(id)` (spec.md §4.7): removes from both the local cache
    /// and the remote provider. `Done` if either layer had it.
    pub async fn purge_asset(&self, id: &AssetId) -> Result<(), StorageError> {
        let had_local = self.lru.lock().contains(id);
        if had_local {
            self.lru.lock().remove(id).ok();
            match self.local.delete(id) {
                Ok(()) | Err(LocalStoreError::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }

        match with_retry(|| async { self.remote.purge(id).await }).await {
            Ok(()) => Ok(()),
            Err(RemoteError::NotFound) if had_local => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// `PurgeAllLocalAssets()` (spec.md §4.7): removes every cached asset
    /// whose `local` flag is set, as a single batched LMDB transaction.
    /// Does not touch the remote provider.
    pub fn purge_all_local_assets(&self) -> Result<(), StorageError> {
        let ids = self.lru.lock().ids_lru_order();
        let to_purge: Vec<AssetId> = ids
            .into_iter()
            .filter(|id| matches!(self.local.get_asset(id), Ok(asset) if asset.local))
            .collect();

        {
            let mut lru = self.lru.lock();
            for id in &to_purge {
                lru.remove(id).ok();
            }
        }
        self.local.delete_many(&to_purge)?;
        Ok(())
    }

    /// `LocallyKnownIds(prefix_3hex)` (spec.md §4.7).
    pub fn locally_known_ids(&self, hex_prefix: &str) -> Vec<AssetId> {
        self.lru.lock().items_with_prefix(hex_prefix)
    }

    pub fn local_bytes_used(&self) -> u64 {
        self.lru.lock().total_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_provider::MockRemoteProvider;

    fn sample(id: AssetId, size: usize) -> Asset {
        Asset::new(id, 1, false, false, 0, "n".into(), "d".into(), vec![7u8; size])
    }

    fn local_sample(id: AssetId, size: usize) -> Asset {
        Asset::new(id, 1, true, false, 0, "n".into(), "d".into(), vec![7u8; size])
    }

    async fn manager(max_bytes: u64) -> (tempfile::TempDir, Arc<StorageManager<MockRemoteProvider>>) {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(MockRemoteProvider::new());
        let manager = StorageManager::open(dir.path(), max_bytes, 16, remote)
            .await
            .unwrap();
        (dir, manager)
    }

    #[tokio::test]
    async fn store_then_get_serves_from_local_cache() {
        let (_dir, manager) = manager(1024).await;
        let asset = sample(uuid::Uuid::new_v4(), 16);

        manager.store_asset(asset.clone()).await.unwrap();
        assert!(manager.check_asset(&asset.id).await.unwrap());

        let fetched = manager.get_asset(&asset.id, true).await.unwrap();
        assert_eq!(fetched, asset);
    }

    #[tokio::test]
    async fn duplicate_store_is_rejected() {
        let (_dir, manager) = manager(1024).await;
        let asset = sample(uuid::Uuid::new_v4(), 16);
        manager.store_asset(asset.clone()).await.unwrap();
        let err = manager.store_asset(asset).await.unwrap_err();
        assert!(matches!(err, StorageError::Duplicate));
    }

    #[tokio::test]
    async fn get_miss_falls_back_to_remote_and_backfills() {
        let (_dir, manager) = manager(1024).await;
        let asset = sample(uuid::Uuid::new_v4(), 16);
        manager.remote.seed(asset.clone());

        assert!(!manager.check_asset(&asset.id).await.unwrap());
        let fetched = manager.get_asset(&asset.id, true).await.unwrap();
        assert_eq!(fetched, asset);
        assert!(manager.check_asset(&asset.id).await.unwrap());
    }

    #[tokio::test]
    async fn get_dontcache_does_not_populate_local() {
        let (_dir, manager) = manager(1024).await;
        let asset = sample(uuid::Uuid::new_v4(), 16);
        manager.remote.seed(asset.clone());

        let fetched = manager.get_asset(&asset.id, false).await.unwrap();
        assert_eq!(fetched, asset);
        assert_eq!(manager.local_bytes_used(), 0);
    }

    #[tokio::test]
    async fn purge_removes_locally_and_remotely() {
        let (_dir, manager) = manager(1024).await;
        let asset = sample(uuid::Uuid::new_v4(), 16);
        manager.store_asset(asset.clone()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        manager.purge_asset(&asset.id).await.unwrap();
        assert!(!manager.check_asset(&asset.id).await.unwrap());
    }

    #[tokio::test]
    async fn purge_all_local_clears_only_local_flagged_assets() {
        let (_dir, manager) = manager(1024).await;
        let local_asset = local_sample(uuid::Uuid::new_v4(), 16);
        let remote_backed = sample(uuid::Uuid::new_v4(), 16);
        manager.store_local(&local_asset).unwrap();
        manager.store_local(&remote_backed).unwrap();

        manager.purge_all_local_assets().unwrap();

        let remaining = manager.locally_known_ids("");
        assert_eq!(remaining, vec![remote_backed.id]);
    }

    #[tokio::test]
    async fn eviction_makes_room_for_new_assets() {
        // LMDB needs real room to work with, so this exercises the actual
        // MapFull -> evict -> retry path with a budget LMDB can open, not
        // a synthetic toy number.
        let budget = 1024 * 1024;
        let (_dir, manager) = manager(budget).await;
        let a = sample(uuid::Uuid::new_v4(), 600 * 1024);
        let b = sample(uuid::Uuid::new_v4(), 600 * 1024);

        manager.store_local(&a).unwrap();
        manager.store_local(&b).unwrap();

        assert!(manager.local_bytes_used() <= budget);
        assert!(!manager.check_asset(&a.id).await.unwrap());
        assert!(manager.check_asset(&b.id).await.unwrap());
    }

    #[tokio::test]
    async fn store_asset_waits_for_a_freed_journal_slot_instead_of_failing_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(MockRemoteProvider::new());
        let manager = StorageManager::open(dir.path(), 1024 * 1024, 1, remote)
            .await
            .unwrap();

        // Capacity 1: occupy the only slot directly so the manager's own
        // reservation has to wait for it to free up.
        let occupied_slot = manager.journal.lock().reserve(&uuid::Uuid::new_v4()).unwrap();

        let waiting = {
            let manager = Arc::clone(&manager);
            let asset = sample(uuid::Uuid::new_v4(), 8);
            tokio::spawn(async move { manager.store_asset(asset).await })
        };

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!waiting.is_finished(), "store_asset returned before a slot freed up");

        manager.journal.lock().release(occupied_slot).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .expect("store_asset did not notice the freed slot in time");
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn prefix_lookup_finds_stored_ids() {
        let (_dir, manager) = manager(1024).await;
        let id = uuid::Uuid::parse_str("7a8f1234000000000000000000000000").unwrap();
        let asset = sample(id, 8);
        manager.store_local(&asset).unwrap();

        assert_eq!(manager.locally_known_ids("7a8"), vec![id]);
    }
}
