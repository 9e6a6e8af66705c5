//! The `RemoteProvider` seam (spec.md §4.6): whatever sits behind the local
//! cache, reachable only through this trait.
//!
//! Grounded on the `Clock`-as-trait-seam pattern in `transdb`'s
//! `trandb-server/src/lib.rs`, which keeps the thing that talks to the
//! outside world behind a small async trait so tests can swap in an
//! in-memory double instead of touching the network.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use whip_lru_core::backoff::Backoff;
use whip_lru_proto::{Asset, AssetId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("asset not found upstream")]
    NotFound,
    #[error("asset already present upstream")]
    Duplicate,
    /// Worth retrying with backoff: timeouts, connection resets, 5xx-style
    /// failures from whatever the remote provider wraps.
    #[error("transient remote failure: {0}")]
    Transient(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

/// The upstream, authoritative asset store. `StorageManager` depends only
/// on this capability set (spec.md §4.6); nothing in the core data path
/// knows what's behind it.
#[async_trait]
pub trait RemoteProvider: Send + Sync {
    async fn get(&self, id: &AssetId) -> Result<Asset, RemoteError>;
    async fn put(&self, asset: &Asset) -> Result<(), RemoteError>;
    async fn purge(&self, id: &AssetId) -> Result<(), RemoteError>;
    /// Existence check, independent of fetching the asset's bytes.
    async fn test(&self, id: &AssetId) -> Result<bool, RemoteError>;
}

/// Retries a fallible remote call with the standard backoff schedule
/// (spec.md §4.6: 100ms base, 30s cap, 8 attempts), giving up immediately
/// on a non-transient error.
pub async fn with_retry<F, Fut, T>(mut call: F) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, RemoteError>>,
{
    let mut backoff = Backoff::remote_provider_default();
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => match backoff.next_delay() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return Err(err),
            },
            Err(err) => return Err(err),
        }
    }
}

/// An in-memory `RemoteProvider` for tests: stores assets in a map guarded
/// by a mutex, with a knob to simulate transient failures.
#[derive(Default)]
pub struct MockRemoteProvider {
    assets: parking_lot::Mutex<HashMap<AssetId, Asset>>,
    fail_next_n_calls: parking_lot::Mutex<u32>,
}

impl MockRemoteProvider {
    pub fn new() -> Self {
        MockRemoteProvider::default()
    }

    pub fn seed(&self, asset: Asset) {
        self.assets.lock().insert(asset.id, asset);
    }

    pub fn fail_next_n_calls(&self, n: u32) {
        *self.fail_next_n_calls.lock() = n;
    }

    fn maybe_fail(&self) -> Result<(), RemoteError> {
        let mut remaining = self.fail_next_n_calls.lock();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(RemoteError::Transient("mock induced failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteProvider for MockRemoteProvider {
    async fn get(&self, id: &AssetId) -> Result<Asset, RemoteError> {
        self.maybe_fail()?;
        self.assets.lock().get(id).cloned().ok_or(RemoteError::NotFound)
    }

    async fn put(&self, asset: &Asset) -> Result<(), RemoteError> {
        self.maybe_fail()?;
        let mut assets = self.assets.lock();
        if assets.contains_key(&asset.id) {
            return Err(RemoteError::Duplicate);
        }
        assets.insert(asset.id, asset.clone());
        Ok(())
    }

    async fn purge(&self, id: &AssetId) -> Result<(), RemoteError> {
        self.maybe_fail()?;
        match self.assets.lock().remove(id) {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound),
        }
    }

    async fn test(&self, id: &AssetId) -> Result<bool, RemoteError> {
        self.maybe_fail()?;
        Ok(self.assets.lock().contains_key(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: AssetId) -> Asset {
        Asset::new(id, 1, false, false, 0, "n".into(), "d".into(), vec![9, 9])
    }

    #[tokio::test]
    async fn get_put_purge_round_trip() {
        let provider = MockRemoteProvider::new();
        let asset = sample(uuid::Uuid::new_v4());

        provider.put(&asset).await.unwrap();
        assert_eq!(provider.get(&asset.id).await.unwrap(), asset);

        provider.purge(&asset.id).await.unwrap();
        assert_eq!(provider.get(&asset.id).await, Err(RemoteError::NotFound));
    }

    #[tokio::test]
    async fn duplicate_put_is_rejected() {
        let provider = MockRemoteProvider::new();
        let asset = sample(uuid::Uuid::new_v4());
        provider.put(&asset).await.unwrap();
        assert_eq!(provider.put(&asset).await, Err(RemoteError::Duplicate));
    }

    #[tokio::test]
    async fn test_reports_existence_without_fetching() {
        let provider = MockRemoteProvider::new();
        let asset = sample(uuid::Uuid::new_v4());
        assert_eq!(provider.test(&asset.id).await, Ok(false));
        provider.put(&asset).await.unwrap();
        assert_eq!(provider.test(&asset.id).await, Ok(true));
    }

    #[tokio::test]
    async fn with_retry_recovers_from_transient_failures() {
        let provider = MockRemoteProvider::new();
        let asset = sample(uuid::Uuid::new_v4());
        provider.seed(asset.clone());
        provider.fail_next_n_calls(2);

        let fetched = with_retry(|| async { provider.get(&asset.id).await }).await;
        assert!(fetched.is_ok());
    }

    #[tokio::test]
    async fn with_retry_gives_up_on_non_transient_errors() {
        let provider = MockRemoteProvider::new();
        let result = with_retry(|| async { provider.get(&uuid::Uuid::new_v4()).await }).await;
        assert_eq!(result, Err(RemoteError::NotFound));
    }
}
