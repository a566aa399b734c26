use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use alloy_primitives::{Address, Bytes, B256};
use delegate::delegate;
use lru::LruCache;
use parking_lot::Mutex;

use crate::{
    constants::DEFAULT_CACHE_CAPACITY,
    kv::{account_key, storage_key, StateSnapshot, Table},
    state::recovery::{read_code, resolve_account, RecoveryLookup},
    Account, PlainStateReader, RecoveryMetrics, StateError, StateReader, StoreError,
};

/// A read-through view over one snapshot of the backing store.
pub trait CacheView {
    /// Snapshot the view reads through to.
    type Snapshot: StateSnapshot;

    /// Plain-state lookup by raw key.
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError>;

    /// Code lookup by hash.
    fn get_code(&self, code_hash: B256) -> Result<Option<Bytes>, StoreError>;

    /// The snapshot behind the view.
    fn snapshot(&self) -> &Self::Snapshot;
}

/// Sizing of a [`ReadThroughCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of plain-state entries kept
    pub capacity: usize,
    /// Maximum number of code blobs kept
    pub code_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: DEFAULT_CACHE_CAPACITY, code_capacity: DEFAULT_CACHE_CAPACITY / 16 }
    }
}

impl CacheConfig {
    /// Sets the plain-state capacity.
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the code capacity.
    pub const fn with_code_capacity(mut self, code_capacity: usize) -> Self {
        self.code_capacity = code_capacity;
        self
    }
}

/// Bounded LRU cache in front of a single [`StateSnapshot`].
///
/// The cache owns its snapshot, so it can never serve entries read from a different version of
/// the store. Absent keys are cached too. Build a new cache for every block.
pub struct ReadThroughCache<S> {
    snapshot: S,
    entries: Mutex<LruCache<Vec<u8>, Option<Bytes>>>,
    code: Mutex<LruCache<B256, Option<Bytes>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<S> core::fmt::Debug for ReadThroughCache<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReadThroughCache")
            .field("entries", &self.entries.lock().len())
            .field("code", &self.code.lock().len())
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<S: StateSnapshot> ReadThroughCache<S> {
    /// Creates an empty cache over `snapshot`. Zero capacities are raised to one.
    pub fn new(snapshot: S, config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        let code_capacity = NonZeroUsize::new(config.code_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            snapshot,
            entries: Mutex::new(LruCache::new(capacity)),
            code: Mutex::new(LruCache::new(code_capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Number of lookups served from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of lookups that went to the snapshot.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Number of plain-state entries currently cached.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no plain-state entry is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases the snapshot.
    pub fn into_snapshot(self) -> S {
        self.snapshot
    }
}

impl<S: StateSnapshot> CacheView for ReadThroughCache<S> {
    type Snapshot = S;

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        let cached = self.entries.lock().get(key).cloned();
        if let Some(value) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = self.snapshot.get(Table::PlainState, key)?;
        self.entries.lock().put(key.to_vec(), value.clone());
        Ok(value)
    }

    fn get_code(&self, code_hash: B256) -> Result<Option<Bytes>, StoreError> {
        let cached = self.code.lock().get(&code_hash).cloned();
        if let Some(code) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(code);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let code = self.snapshot.get(Table::Code, code_hash.as_slice())?;
        self.code.lock().put(code_hash, code.clone());
        Ok(code)
    }

    fn snapshot(&self) -> &S {
        &self.snapshot
    }
}

/// [`StateReader`] that serves accounts, storage and code from a [`CacheView`].
///
/// Tables the view does not cache are read straight from its snapshot. Code-hash recovery
/// follows the same rule as [`PlainStateReader`].
pub struct CachedStateReader<'a, C: CacheView> {
    cache: &'a C,
    plain: PlainStateReader<&'a C::Snapshot>,
}

impl<C: CacheView> core::fmt::Debug for CachedStateReader<'_, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CachedStateReader").finish_non_exhaustive()
    }
}

impl<'a, C: CacheView> CachedStateReader<'a, C> {
    /// Creates a reader over `cache` that reports recoveries to `metrics`.
    pub fn new(cache: &'a C, metrics: Arc<RecoveryMetrics>) -> Self {
        Self { cache, plain: PlainStateReader::new(cache.snapshot(), metrics) }
    }
}

impl<C: CacheView> RecoveryLookup for CachedStateReader<'_, C> {
    fn code_by_hash(&self, code_hash: B256) -> Result<Option<Bytes>, StateError> {
        Ok(self.cache.get_code(code_hash)?)
    }

    delegate! {
        to self.plain {
            fn code_pointer(
                &self,
                address: Address,
                incarnation: u64,
            ) -> Result<Option<Bytes>, StateError>;
            fn latest_code(&self, address: Address) -> Result<Option<Bytes>, StateError>;
        }
    }
}

impl<C: CacheView> StateReader for CachedStateReader<'_, C> {
    fn read_account_data(&self, address: Address) -> Result<Option<Account>, StateError> {
        let Some(raw) = self.cache.get(&account_key(address))? else {
            return Ok(None);
        };
        resolve_account(self, address, &raw, self.plain.metrics()).map(Some)
    }

    fn read_account_storage(
        &self,
        address: Address,
        incarnation: u64,
        slot: B256,
    ) -> Result<Option<Bytes>, StateError> {
        Ok(self.cache.get(&storage_key(address, incarnation, slot))?)
    }

    fn read_account_code(
        &self,
        address: Address,
        _incarnation: u64,
        code_hash: B256,
    ) -> Result<Option<Bytes>, StateError> {
        read_code(self, address, code_hash)
    }

    delegate! {
        to self.plain {
            fn read_account_incarnation(&self, address: Address) -> Result<u64, StateError>;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        encode_account,
        kv::{MemorySnapshot, MemoryStore, StateDatabase},
    };
    use alloy_primitives::{address, U256};
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug)]
    struct CountingSnapshot {
        inner: MemorySnapshot,
        gets: AtomicUsize,
    }

    impl StateSnapshot for CountingSnapshot {
        fn get(&self, table: Table, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
            self.gets.fetch_add(1, Ordering::Relaxed);
            self.inner.get(table, key)
        }
    }

    #[test]
    fn test_hit_does_not_touch_store() {
        let address = address!("0x00000000000000000000000000000000000000bb");
        let store = MemoryStore::new();
        let account = Account { nonce: 3, balance: U256::from(7), ..Default::default() };
        store.put(Table::PlainState, account_key(address), encode_account(&account));

        let snapshot = CountingSnapshot { inner: store.snapshot(), gets: AtomicUsize::new(0) };
        let cache = ReadThroughCache::new(snapshot, CacheConfig::default());
        let reader = CachedStateReader::new(&cache, Arc::default());

        assert_eq!(reader.read_account_data(address).unwrap(), Some(account));
        assert_eq!(reader.read_account_data(address).unwrap(), Some(account));
        assert_eq!(cache.snapshot().gets.load(Ordering::Relaxed), 1);
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
    }

    #[test]
    fn test_absent_keys_are_cached() {
        let store = MemoryStore::new();
        let snapshot = CountingSnapshot { inner: store.snapshot(), gets: AtomicUsize::new(0) };
        let cache = ReadThroughCache::new(snapshot, CacheConfig::default());
        let key = account_key(address!("0x00000000000000000000000000000000000000cc"));
        assert_eq!(cache.get(&key).unwrap(), None);
        assert_eq!(cache.get(&key).unwrap(), None);
        assert_eq!(cache.snapshot().gets.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_capacity_bounds_entries() {
        let store = MemoryStore::new();
        let cache =
            ReadThroughCache::new(store.snapshot(), CacheConfig::default().with_capacity(2));
        for byte in 0u8..5 {
            cache.get(&[byte]).unwrap();
        }
        assert_eq!(cache.len(), 2);

        let zero = ReadThroughCache::new(store.snapshot(), CacheConfig::default().with_capacity(0));
        zero.get(&[1]).unwrap();
        assert_eq!(zero.len(), 1);
    }
}
