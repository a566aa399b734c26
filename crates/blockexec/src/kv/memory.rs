use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use alloy_primitives::{Address, Bytes};
use parking_lot::RwLock;
use tracing::trace;

use crate::{
    kv::{StateDatabase, StateSnapshot, Table},
    StoreError,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    tables: BTreeMap<Table, BTreeMap<Vec<u8>, Bytes>>,
    /// `None` when the backend has no secondary code store.
    latest_code: Option<HashMap<Address, Bytes>>,
}

/// In-memory plain-state store.
///
/// Snapshots share the table maps through an [`Arc`]. A commit clones the maps only if a
/// snapshot still holds them, so a snapshot is never affected by later writes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Arc<Tables>>,
}

impl MemoryStore {
    /// Creates an empty store without a secondary code store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store that also maintains the latest code of every account.
    pub fn with_latest_code() -> Self {
        let tables = Tables { latest_code: Some(HashMap::new()), ..Default::default() };
        Self { inner: RwLock::new(Arc::new(tables)) }
    }

    /// Whether the store maintains a secondary code store.
    pub fn has_latest_code(&self) -> bool {
        self.inner.read().latest_code.is_some()
    }

    /// Applies `batch` atomically.
    pub fn commit(&self, batch: WriteBatch) {
        let mut guard = self.inner.write();
        let tables = Arc::make_mut(&mut guard);
        trace!(target: "blockexec::kv", ops = batch.ops.len(), "committing write batch");
        for op in batch.ops {
            match op {
                WriteOp::Put { table, key, value } => {
                    tables.tables.entry(table).or_default().insert(key, value);
                }
                WriteOp::Delete { table, key } => {
                    if let Some(entries) = tables.tables.get_mut(&table) {
                        entries.remove(&key);
                    }
                }
                WriteOp::PutLatestCode { address, code } => {
                    if let Some(latest) = tables.latest_code.as_mut() {
                        latest.insert(address, code);
                    }
                }
                WriteOp::DeleteLatestCode { address } => {
                    if let Some(latest) = tables.latest_code.as_mut() {
                        latest.remove(&address);
                    }
                }
            }
        }
    }

    /// Writes a single entry.
    pub fn put(&self, table: Table, key: impl Into<Vec<u8>>, value: impl Into<Bytes>) {
        let mut batch = WriteBatch::default();
        batch.put(table, key, value);
        self.commit(batch);
    }
}

impl StateDatabase for MemoryStore {
    type Snapshot = MemorySnapshot;

    fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot { tables: Arc::clone(&self.inner.read()) }
    }
}

/// Frozen view of a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemorySnapshot {
    tables: Arc<Tables>,
}

impl MemorySnapshot {
    /// Iterates over the entries of `table` in key order.
    pub fn iter(&self, table: Table) -> impl Iterator<Item = (&[u8], &Bytes)> + '_ {
        self.tables
            .tables
            .get(&table)
            .into_iter()
            .flat_map(|entries| entries.iter().map(|(key, value)| (key.as_slice(), value)))
    }

    /// Number of entries in `table`.
    pub fn len(&self, table: Table) -> usize {
        self.tables.tables.get(&table).map_or(0, BTreeMap::len)
    }

    /// Whether `table` has no entries.
    pub fn is_empty(&self, table: Table) -> bool {
        self.len(table) == 0
    }
}

impl StateSnapshot for MemorySnapshot {
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        Ok(self.tables.tables.get(&table).and_then(|entries| entries.get(key)).cloned())
    }

    fn latest_code(&self, address: Address) -> Result<Option<Bytes>, StoreError> {
        Ok(self.tables.latest_code.as_ref().and_then(|latest| latest.get(&address)).cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WriteOp {
    Put { table: Table, key: Vec<u8>, value: Bytes },
    Delete { table: Table, key: Vec<u8> },
    PutLatestCode { address: Address, code: Bytes },
    DeleteLatestCode { address: Address },
}

/// An ordered list of writes applied atomically by [`MemoryStore::commit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Queues an insert or overwrite.
    pub fn put(&mut self, table: Table, key: impl Into<Vec<u8>>, value: impl Into<Bytes>) {
        self.ops.push(WriteOp::Put { table, key: key.into(), value: value.into() });
    }

    /// Queues a deletion.
    pub fn delete(&mut self, table: Table, key: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Delete { table, key: key.into() });
    }

    /// Queues an update of the secondary code store. Ignored by stores that do not keep one.
    pub fn put_latest_code(&mut self, address: Address, code: Bytes) {
        self.ops.push(WriteOp::PutLatestCode { address, code });
    }

    /// Queues a removal from the secondary code store.
    pub fn delete_latest_code(&mut self, address: Address) {
        self.ops.push(WriteOp::DeleteLatestCode { address });
    }

    /// Number of queued writes.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
