use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256};
use auto_impl::auto_impl;

use crate::{
    kv::{account_key, storage_key, storage_prefix, StateSnapshot, Table},
    state::recovery::{read_code, resolve_account, RecoveryLookup},
    Account, DecodeError, RecoveryMetrics, StateError,
};

/// Read access to account state at a fixed point in history.
#[auto_impl(&, Box, Arc)]
pub trait StateReader {
    /// Reads the account at `address`, or `None` if it does not exist.
    fn read_account_data(&self, address: Address) -> Result<Option<Account>, StateError>;

    /// Reads `slot` from the storage namespace of `address` at `incarnation`.
    fn read_account_storage(
        &self,
        address: Address,
        incarnation: u64,
        slot: B256,
    ) -> Result<Option<Bytes>, StateError>;

    /// Reads the code stored under `code_hash`. Returns `None` for the empty code hash without
    /// touching the store.
    fn read_account_code(
        &self,
        address: Address,
        incarnation: u64,
        code_hash: B256,
    ) -> Result<Option<Bytes>, StateError>;

    /// Size of the code stored under `code_hash`, 0 if there is none.
    fn read_account_code_size(
        &self,
        address: Address,
        incarnation: u64,
        code_hash: B256,
    ) -> Result<usize, StateError> {
        Ok(self.read_account_code(address, incarnation, code_hash)?.map_or(0, |code| code.len()))
    }

    /// Last incarnation recorded for `address`, 0 if none.
    fn read_account_incarnation(&self, address: Address) -> Result<u64, StateError>;
}

/// Resolves accounts out of the plain-state tables of one snapshot.
///
/// Reading never writes. Two reads of the same account against the same snapshot return the
/// same result.
#[derive(Debug)]
pub struct PlainStateReader<S> {
    snapshot: S,
    metrics: Arc<RecoveryMetrics>,
}

impl<S: StateSnapshot> PlainStateReader<S> {
    /// Creates a reader over `snapshot` that reports recoveries to `metrics`.
    pub const fn new(snapshot: S, metrics: Arc<RecoveryMetrics>) -> Self {
        Self { snapshot, metrics }
    }

    /// The underlying snapshot.
    pub const fn snapshot(&self) -> &S {
        &self.snapshot
    }

    /// Recovery counters of this reader.
    pub fn metrics(&self) -> &RecoveryMetrics {
        &self.metrics
    }
}

impl<S: StateSnapshot> RecoveryLookup for PlainStateReader<S> {
    fn code_pointer(
        &self,
        address: Address,
        incarnation: u64,
    ) -> Result<Option<Bytes>, StateError> {
        Ok(self.snapshot.get(Table::PlainContractCode, &storage_prefix(address, incarnation))?)
    }

    fn code_by_hash(&self, code_hash: B256) -> Result<Option<Bytes>, StateError> {
        Ok(self.snapshot.get(Table::Code, code_hash.as_slice())?)
    }

    fn latest_code(&self, address: Address) -> Result<Option<Bytes>, StateError> {
        Ok(self.snapshot.latest_code(address)?)
    }
}

impl<S: StateSnapshot> StateReader for PlainStateReader<S> {
    fn read_account_data(&self, address: Address) -> Result<Option<Account>, StateError> {
        let Some(raw) = self.snapshot.get(Table::PlainState, &account_key(address))? else {
            return Ok(None);
        };
        resolve_account(self, address, &raw, &self.metrics).map(Some)
    }

    fn read_account_storage(
        &self,
        address: Address,
        incarnation: u64,
        slot: B256,
    ) -> Result<Option<Bytes>, StateError> {
        Ok(self.snapshot.get(Table::PlainState, &storage_key(address, incarnation, slot))?)
    }

    fn read_account_code(
        &self,
        address: Address,
        _incarnation: u64,
        code_hash: B256,
    ) -> Result<Option<Bytes>, StateError> {
        read_code(self, address, code_hash)
    }

    fn read_account_incarnation(&self, address: Address) -> Result<u64, StateError> {
        self.snapshot
            .get(Table::IncarnationMap, &account_key(address))?
            .map_or(Ok(0), |raw| decode_incarnation(address, &raw))
    }
}

pub(crate) fn decode_incarnation(address: Address, raw: &[u8]) -> Result<u64, StateError> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| StateError::decode(address, DecodeError::InvalidIncarnation(raw.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{MemoryStore, StateDatabase};
    use alloy_primitives::address;
    use alloy_trie::KECCAK_EMPTY;

    #[test]
    fn test_missing_account_and_default_incarnation() {
        let store = MemoryStore::new();
        let reader = PlainStateReader::new(store.snapshot(), Arc::default());
        let address = address!("0x00000000000000000000000000000000000000aa");
        assert_eq!(reader.read_account_data(address).unwrap(), None);
        assert_eq!(reader.read_account_incarnation(address).unwrap(), 0);
    }

    #[test]
    fn test_empty_code_hash_is_never_looked_up() {
        let store = MemoryStore::new();
        // poison the code table under both empty-hash spellings
        store.put(Table::Code, KECCAK_EMPTY.to_vec(), vec![0xfeu8]);
        store.put(Table::Code, B256::ZERO.to_vec(), vec![0xfeu8]);
        let reader = PlainStateReader::new(store.snapshot(), Arc::default());
        let address = address!("0x00000000000000000000000000000000000000aa");
        assert_eq!(reader.read_account_code(address, 0, KECCAK_EMPTY).unwrap(), None);
        assert_eq!(reader.read_account_code(address, 0, B256::ZERO).unwrap(), None);
        assert_eq!(reader.read_account_code_size(address, 0, KECCAK_EMPTY).unwrap(), 0);
    }

    #[test]
    fn test_incarnation_map_entry() {
        let store = MemoryStore::new();
        let address = address!("0x00000000000000000000000000000000000000aa");
        store.put(Table::IncarnationMap, account_key(address), 3u64.to_be_bytes().to_vec());
        let reader = PlainStateReader::new(store.snapshot(), Arc::default());
        assert_eq!(reader.read_account_incarnation(address).unwrap(), 3);

        store.put(Table::IncarnationMap, account_key(address), vec![1u8, 2]);
        let reader = PlainStateReader::new(store.snapshot(), Arc::default());
        assert!(matches!(
            reader.read_account_incarnation(address),
            Err(StateError::Decode { source: DecodeError::InvalidIncarnation(2), .. })
        ));
    }
}
