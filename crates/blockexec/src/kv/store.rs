use alloy_primitives::{Address, Bytes};
use auto_impl::auto_impl;

use crate::{kv::Table, StoreError};

/// A consistent, read-only view of the backing store.
///
/// Every lookup made through one snapshot observes the same version of the data, no matter what
/// is written to the store in the meantime.
#[auto_impl(&, Box, Arc)]
pub trait StateSnapshot {
    /// Exact-key lookup in `table`.
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Bytes>, StoreError>;

    /// Latest code of `address` from the secondary code store, if the backend keeps one.
    fn latest_code(&self, _address: Address) -> Result<Option<Bytes>, StoreError> {
        Ok(None)
    }
}

/// A store able to hand out isolated snapshots.
pub trait StateDatabase {
    /// Snapshot type.
    type Snapshot: StateSnapshot;

    /// Takes a snapshot of the current contents.
    fn snapshot(&self) -> Self::Snapshot;
}
