use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes, B256, U256};
use auto_impl::auto_impl;
use tracing::debug;

use crate::{
    encode_account, encode_storage_value,
    kv::{
        account_change_key, account_key, storage_change_key, storage_key, storage_prefix, Table,
        WriteBatch,
    },
    Account, StateError,
};

/// Sink for the state changes produced by an [`IntraBlockState`](crate::IntraBlockState).
#[auto_impl(&mut, Box)]
pub trait StateWriter {
    /// Records the new value of an account. `original` is its value before the block.
    fn update_account_data(
        &mut self,
        address: Address,
        original: Option<&Account>,
        account: &Account,
    ) -> Result<(), StateError>;

    /// Records the code installed at `address`.
    fn update_account_code(
        &mut self,
        address: Address,
        incarnation: u64,
        code_hash: B256,
        code: &Bytes,
    ) -> Result<(), StateError>;

    /// Records the removal of an account.
    fn delete_account(&mut self, address: Address, original: &Account) -> Result<(), StateError>;

    /// Records a storage write. `original` is the slot value before the block.
    fn write_account_storage(
        &mut self,
        address: Address,
        incarnation: u64,
        slot: B256,
        original: U256,
        value: U256,
    ) -> Result<(), StateError>;

    /// Records that a contract was created at `address` under a fresh incarnation.
    fn create_contract(&mut self, address: Address) -> Result<(), StateError>;
}

/// A [`StateWriter`] that can also persist per-block change sets.
pub trait WriterWithChangeSets: StateWriter {
    /// Writes the pre-block values of everything recorded so far.
    fn write_change_sets(&mut self) -> Result<(), StateError>;
}

/// Discards every change.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWriter;

impl StateWriter for NoopWriter {
    fn update_account_data(
        &mut self,
        _address: Address,
        _original: Option<&Account>,
        _account: &Account,
    ) -> Result<(), StateError> {
        Ok(())
    }

    fn update_account_code(
        &mut self,
        _address: Address,
        _incarnation: u64,
        _code_hash: B256,
        _code: &Bytes,
    ) -> Result<(), StateError> {
        Ok(())
    }

    fn delete_account(&mut self, _address: Address, _original: &Account) -> Result<(), StateError> {
        Ok(())
    }

    fn write_account_storage(
        &mut self,
        _address: Address,
        _incarnation: u64,
        _slot: B256,
        _original: U256,
        _value: U256,
    ) -> Result<(), StateError> {
        Ok(())
    }

    fn create_contract(&mut self, _address: Address) -> Result<(), StateError> {
        Ok(())
    }
}

impl WriterWithChangeSets for NoopWriter {
    fn write_change_sets(&mut self) -> Result<(), StateError> {
        Ok(())
    }
}

/// Translates state changes into plain-state writes for one block.
///
/// Change sets keep the first original value reported for each account and slot.
#[derive(Debug, Default)]
pub struct PlainStateWriter {
    block_number: u64,
    batch: WriteBatch,
    account_changes: BTreeMap<Address, Option<Account>>,
    storage_changes: BTreeMap<(Address, u64, B256), U256>,
}

impl PlainStateWriter {
    /// Creates a writer for block `block_number`.
    pub fn new(block_number: u64) -> Self {
        Self { block_number, ..Default::default() }
    }

    /// Block the writer records changes for.
    pub const fn block_number(&self) -> u64 {
        self.block_number
    }

    /// Writes queued so far.
    pub const fn batch(&self) -> &WriteBatch {
        &self.batch
    }

    /// Consumes the writer, returning its writes.
    pub fn finish(self) -> WriteBatch {
        self.batch
    }
}

impl StateWriter for PlainStateWriter {
    fn update_account_data(
        &mut self,
        address: Address,
        original: Option<&Account>,
        account: &Account,
    ) -> Result<(), StateError> {
        self.account_changes.entry(address).or_insert(original.copied());
        self.batch.put(Table::PlainState, account_key(address), encode_account(account));
        Ok(())
    }

    fn update_account_code(
        &mut self,
        address: Address,
        incarnation: u64,
        code_hash: B256,
        code: &Bytes,
    ) -> Result<(), StateError> {
        self.batch.put(Table::Code, code_hash.to_vec(), code.clone());
        self.batch.put(
            Table::PlainContractCode,
            storage_prefix(address, incarnation),
            code_hash.to_vec(),
        );
        self.batch.put_latest_code(address, code.clone());
        Ok(())
    }

    fn delete_account(&mut self, address: Address, original: &Account) -> Result<(), StateError> {
        self.account_changes.entry(address).or_insert(Some(*original));
        self.batch.delete(Table::PlainState, account_key(address));
        if original.incarnation > 0 {
            self.batch.put(
                Table::IncarnationMap,
                account_key(address),
                original.incarnation.to_be_bytes().to_vec(),
            );
        }
        self.batch.delete_latest_code(address);
        Ok(())
    }

    fn write_account_storage(
        &mut self,
        address: Address,
        incarnation: u64,
        slot: B256,
        original: U256,
        value: U256,
    ) -> Result<(), StateError> {
        self.storage_changes.entry((address, incarnation, slot)).or_insert(original);
        let key = storage_key(address, incarnation, slot);
        if value.is_zero() {
            self.batch.delete(Table::PlainState, key);
        } else {
            self.batch.put(Table::PlainState, key, encode_storage_value(value));
        }
        Ok(())
    }

    fn create_contract(&mut self, _address: Address) -> Result<(), StateError> {
        Ok(())
    }
}

impl WriterWithChangeSets for PlainStateWriter {
    fn write_change_sets(&mut self) -> Result<(), StateError> {
        debug!(
            target: "blockexec::state",
            block = self.block_number,
            accounts = self.account_changes.len(),
            slots = self.storage_changes.len(),
            "writing change sets"
        );
        for (address, original) in core::mem::take(&mut self.account_changes) {
            let value = original.as_ref().map(encode_account).unwrap_or_default();
            self.batch.put(
                Table::AccountChangeSet,
                account_change_key(self.block_number, address),
                value,
            );
        }
        for ((address, incarnation, slot), original) in core::mem::take(&mut self.storage_changes) {
            self.batch.put(
                Table::StorageChangeSet,
                storage_change_key(self.block_number, address, incarnation, slot),
                encode_storage_value(original),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{MemoryStore, StateDatabase, StateSnapshot};
    use alloy_primitives::{address, b256};

    const ALICE: Address = address!("0x00000000000000000000000000000000000a11ce");
    const SLOT: B256 = b256!("0x0000000000000000000000000000000000000000000000000000000000000007");

    #[test]
    fn test_change_sets_keep_first_original() {
        let mut writer = PlainStateWriter::new(9);
        let before = Account { nonce: 1, ..Default::default() };
        let middle = Account { nonce: 2, ..Default::default() };
        let after = Account { nonce: 3, ..Default::default() };
        writer.update_account_data(ALICE, Some(&before), &middle).unwrap();
        writer.update_account_data(ALICE, Some(&middle), &after).unwrap();
        writer.write_account_storage(ALICE, 1, SLOT, U256::from(5), U256::from(6)).unwrap();
        writer.write_account_storage(ALICE, 1, SLOT, U256::from(6), U256::ZERO).unwrap();
        writer.write_change_sets().unwrap();

        let store = MemoryStore::new();
        store.commit(writer.finish());
        let snapshot = store.snapshot();
        assert_eq!(
            snapshot.get(Table::AccountChangeSet, &account_change_key(9, ALICE)).unwrap(),
            Some(encode_account(&before))
        );
        assert_eq!(
            snapshot.get(Table::StorageChangeSet, &storage_change_key(9, ALICE, 1, SLOT)).unwrap(),
            Some(encode_storage_value(U256::from(5)))
        );
        assert_eq!(
            snapshot.get(Table::PlainState, &account_key(ALICE)).unwrap(),
            Some(encode_account(&after))
        );
        assert_eq!(snapshot.get(Table::PlainState, &storage_key(ALICE, 1, SLOT)).unwrap(), None);
    }

    #[test]
    fn test_deleting_a_contract_records_its_incarnation() {
        let mut writer = PlainStateWriter::new(1);
        let contract = Account { incarnation: 4, ..Default::default() };
        writer.delete_account(ALICE, &contract).unwrap();
        let store = MemoryStore::new();
        store.put(Table::PlainState, account_key(ALICE), encode_account(&contract));
        store.commit(writer.finish());
        let snapshot = store.snapshot();
        assert_eq!(snapshot.get(Table::PlainState, &account_key(ALICE)).unwrap(), None);
        assert_eq!(
            snapshot.get(Table::IncarnationMap, &account_key(ALICE)).unwrap(),
            Some(Bytes::from(4u64.to_be_bytes().to_vec()))
        );
    }
}
