//! Local asset storage: an LRU-bounded LMDB cache backed by a
//! write-ahead journal and a pluggable remote provider.

mod local_store;
mod lru_index;
mod remote_provider;
mod storage_manager;
mod write_journal;

pub use local_store::{LocalStore, LocalStoreError};
pub use lru_index::{LruEntry, LruIndex, LruIndexError};
pub use remote_provider::{with_retry, MockRemoteProvider, RemoteError, RemoteProvider};
pub use storage_manager::{StorageError, StorageManager};
pub use write_journal::{JournalError, WriteJournal};
