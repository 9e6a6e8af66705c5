//! Ordered set of asset ids with size bookkeeping and LRU touch/evict
//! (spec.md §3 `LruEntry`, §4.3 `LruIndex`).
//!
//! Grounded on the IndexMap-backed LRU cache used by `velesdb`'s
//! `cache::lru` module (insertion order doubles as recency order, so
//! touching a key is a remove-then-reinsert at the back) plus a secondary
//! `BTreeMap` keyed by the lowercase hex id for the prefix lookups spec.md
//! requires, which `IndexMap` alone can't provide in sorted order.

use indexmap::IndexMap;
use std::collections::BTreeMap;
use thiserror::Error;
use whip_lru_proto::AssetId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LruIndexError {
    #[error("asset already present in index")]
    Duplicate,
    #[error("asset not present in index")]
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LruEntry {
    pub id: AssetId,
    pub size: u64,
}

/// `entries` preserves LRU order: front = least-recently-used, back =
/// most-recently-used. `by_hex` mirrors the same key set, ordered by the
/// lowercase 32-hex id, to answer prefix queries.
#[derive(Default)]
pub struct LruIndex {
    entries: IndexMap<AssetId, u64>,
    by_hex: BTreeMap<String, AssetId>,
    total_bytes: u64,
}

fn hex_of(id: &AssetId) -> String {
    id.to_simple().to_string()
}

impl LruIndex {
    pub fn new() -> Self {
        LruIndex::default()
    }

    pub fn insert(&mut self, id: AssetId, size: u64) -> Result<(), LruIndexError> {
        if self.entries.contains_key(&id) {
            return Err(LruIndexError::Duplicate);
        }
        self.entries.insert(id, size);
        self.by_hex.insert(hex_of(&id), id);
        self.total_bytes += size;
        Ok(())
    }

    pub fn contains(&self, id: &AssetId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn touch(&mut self, id: &AssetId) -> Result<(), LruIndexError> {
        let size = self
            .entries
            .shift_remove(id)
            .ok_or(LruIndexError::NotFound)?;
        self.entries.insert(*id, size);
        Ok(())
    }

    /// All ids whose lowercase 32-hex form starts with `hex_prefix`. Order
    /// is unspecified (spec.md §4.3), so callers must not rely on it.
    pub fn items_with_prefix(&self, hex_prefix: &str) -> Vec<AssetId> {
        self.by_hex
            .range(hex_prefix.to_string()..)
            .take_while(|(hex, _)| hex.starts_with(hex_prefix))
            .map(|(_, id)| *id)
            .collect()
    }

    pub fn remove(&mut self, id: &AssetId) -> Result<u64, LruIndexError> {
        let size = self
            .entries
            .shift_remove(id)
            .ok_or(LruIndexError::NotFound)?;
        self.by_hex.remove(&hex_of(id));
        self.total_bytes -= size;
        Ok(size)
    }

    /// Removes entries from the LRU end until cumulative removed size is
    /// at least `bytes_needed`, or the index is empty. Returns removed
    /// `(id, size)` pairs in removal order (oldest first).
    pub fn evict_to_free(&mut self, bytes_needed: u64) -> Vec<(AssetId, u64)> {
        let mut freed = 0u64;
        let mut removed = Vec::new();

        while freed < bytes_needed {
            let (id, size) = match self.entries.get_index(0) {
                Some((id, size)) => (*id, *size),
                None => break,
            };
            self.entries.shift_remove_index(0);
            self.by_hex.remove(&hex_of(&id));
            self.total_bytes -= size;
            freed += size;
            removed.push((id, size));
        }

        removed
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids in LRU order (oldest first), for eviction-order assertions in
    /// tests and for startup diagnostics.
    pub fn ids_lru_order(&self) -> Vec<AssetId> {
        self.entries.keys().copied().collect()
    }
}
