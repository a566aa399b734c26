use std::collections::{btree_map::Entry, BTreeMap, BTreeSet, HashMap};

use alloy_primitives::{keccak256, Address, Bytes, Log, B256, U256};
use alloy_trie::KECCAK_EMPTY;
use tracing::trace;

use crate::{
    decode_storage_value,
    state::journal::{Journal, JournalEntry},
    Account, Rules, StateError, StateReader, StateWriter,
};

/// Cached account plus its pending changes.
#[derive(Debug, Clone, Default)]
pub(crate) struct StateObject {
    /// Account as read from the reader, `None` if it did not exist
    original: Option<Account>,
    data: Account,
    code: Option<Bytes>,
    code_dirty: bool,
    /// Committed slot values, as read at `data.incarnation`
    origin_storage: HashMap<B256, U256>,
    dirty_storage: HashMap<B256, U256>,
    /// Created in this block under a fresh incarnation
    created: bool,
    self_destructed: bool,
    /// Absent from state: never existed, or destroyed
    deleted: bool,
    /// Touched by the current transaction
    touched: bool,
}

impl StateObject {
    fn loaded(original: Option<Account>) -> Self {
        Self {
            data: original.unwrap_or_default(),
            deleted: original.is_none(),
            original,
            ..Default::default()
        }
    }

    /// Turns the object into an absent account. The incarnation survives so that a later
    /// re-creation can move past it.
    fn mark_deleted(&mut self) {
        self.data = Account { incarnation: self.data.incarnation, ..Default::default() };
        self.code = None;
        self.code_dirty = false;
        self.origin_storage.clear();
        self.dirty_storage.clear();
        self.created = false;
        self.self_destructed = false;
        self.deleted = true;
    }
}

/// Execution context of the transaction currently applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxContext {
    /// Transaction hash
    pub tx_hash: B256,
    /// Hash of the containing block
    pub block_hash: B256,
    /// Position of the transaction in the block
    pub tx_index: usize,
}

/// Mutable state overlay for one block.
///
/// Reads go through a [`StateReader`] and are cached. Writes are recorded in a journal so that
/// [`snapshot`](Self::snapshot) / [`revert_to_snapshot`](Self::revert_to_snapshot) can undo them
/// within a transaction. [`finalize_tx`](Self::finalize_tx) closes a transaction and
/// [`commit_block`](Self::commit_block) hands the net changes of the block to a
/// [`StateWriter`].
#[derive(Debug)]
pub struct IntraBlockState<R> {
    reader: R,
    objects: BTreeMap<Address, StateObject>,
    journal: Journal,
    refund: u64,
    logs: Vec<(usize, Log)>,
    tx: TxContext,
}

impl<R: StateReader> IntraBlockState<R> {
    /// Creates an empty overlay on top of `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            objects: BTreeMap::new(),
            journal: Journal::default(),
            refund: 0,
            logs: Vec::new(),
            tx: TxContext::default(),
        }
    }

    /// The reader behind the overlay.
    pub const fn reader(&self) -> &R {
        &self.reader
    }

    /// Binds the transaction that subsequent changes and logs belong to.
    pub fn set_tx_context(&mut self, tx_hash: B256, block_hash: B256, tx_index: usize) {
        self.tx = TxContext { tx_hash, block_hash, tx_index };
    }

    /// The bound transaction context.
    pub const fn tx_context(&self) -> &TxContext {
        &self.tx
    }

    fn object(&mut self, address: Address) -> Result<&mut StateObject, StateError> {
        match self.objects.entry(address) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let account = self.reader.read_account_data(address)?;
                Ok(entry.insert(StateObject::loaded(account)))
            }
        }
    }

    /// Loads `address` for writing, bringing an absent account into existence and marking it
    /// touched.
    fn object_for_write(&mut self, address: Address) -> Result<&mut StateObject, StateError> {
        let object = self.object(address)?;
        if object.deleted {
            let prev = Some(Box::new(object.clone()));
            let original = object.original;
            *object = StateObject { original, ..Default::default() };
            self.journal.push(JournalEntry::ObjectReplaced { address, prev });
        }
        let object = self.object(address)?;
        if !object.touched {
            object.touched = true;
            self.journal.push(JournalEntry::Touch { address, prev: false });
        }
        self.object(address)
    }

    /// Whether the account exists.
    pub fn exist(&mut self, address: Address) -> Result<bool, StateError> {
        Ok(!self.object(address)?.deleted)
    }

    /// Whether the account is absent or empty in the EIP-161 sense.
    pub fn empty(&mut self, address: Address) -> Result<bool, StateError> {
        let object = self.object(address)?;
        Ok(object.deleted || object.data.is_empty())
    }

    /// Account as currently seen by execution, `None` if absent.
    pub fn account(&mut self, address: Address) -> Result<Option<Account>, StateError> {
        let object = self.object(address)?;
        Ok((!object.deleted).then_some(object.data))
    }

    /// Balance of `address`.
    pub fn get_balance(&mut self, address: Address) -> Result<U256, StateError> {
        Ok(self.object(address)?.data.balance)
    }

    /// Nonce of `address`.
    pub fn get_nonce(&mut self, address: Address) -> Result<u64, StateError> {
        Ok(self.object(address)?.data.nonce)
    }

    /// Current incarnation of `address`.
    pub fn get_incarnation(&mut self, address: Address) -> Result<u64, StateError> {
        Ok(self.object(address)?.data.incarnation)
    }

    /// Code hash of `address`, [`KECCAK_EMPTY`] when it has none.
    pub fn get_code_hash(&mut self, address: Address) -> Result<B256, StateError> {
        let object = self.object(address)?;
        Ok(if object.deleted { KECCAK_EMPTY } else { object.data.code_hash })
    }

    /// Code of `address`.
    pub fn get_code(&mut self, address: Address) -> Result<Option<Bytes>, StateError> {
        let object = self.object(address)?;
        if object.deleted || object.data.has_empty_code_hash() {
            return Ok(None);
        }
        if let Some(code) = &object.code {
            return Ok(Some(code.clone()));
        }
        let (incarnation, code_hash) = (object.data.incarnation, object.data.code_hash);
        let code = self
            .reader
            .read_account_code(address, incarnation, code_hash)?
            .ok_or(StateError::MissingCode { address, code_hash })?;
        self.object(address)?.code = Some(code.clone());
        Ok(Some(code))
    }

    /// Code size of `address`.
    pub fn get_code_size(&mut self, address: Address) -> Result<usize, StateError> {
        Ok(self.get_code(address)?.map_or(0, |code| code.len()))
    }

    /// Current value of `slot`, including changes made in this block.
    pub fn get_state(&mut self, address: Address, slot: B256) -> Result<U256, StateError> {
        let object = self.object(address)?;
        if object.deleted {
            return Ok(U256::ZERO);
        }
        if let Some(value) = object.dirty_storage.get(&slot) {
            return Ok(*value);
        }
        self.get_committed_state(address, slot)
    }

    /// Value of `slot` before the block.
    pub fn get_committed_state(
        &mut self,
        address: Address,
        slot: B256,
    ) -> Result<U256, StateError> {
        let object = self.object(address)?;
        if object.deleted {
            return Ok(U256::ZERO);
        }
        if let Some(value) = object.origin_storage.get(&slot) {
            return Ok(*value);
        }
        let incarnation = object.data.incarnation;
        let value = match self.reader.read_account_storage(address, incarnation, slot)? {
            Some(raw) => decode_storage_value(&raw)
                .map_err(|source| StateError::StorageDecode { address, slot, source })?,
            None => U256::ZERO,
        };
        self.object(address)?.origin_storage.insert(slot, value);
        Ok(value)
    }

    /// Credits `amount` to `address`, creating the account if needed.
    pub fn add_balance(&mut self, address: Address, amount: U256) -> Result<(), StateError> {
        let object = self.object_for_write(address)?;
        let prev = object.data.balance;
        object.data.balance =
            prev.checked_add(amount).ok_or(StateError::BalanceOverflow(address))?;
        self.journal.push(JournalEntry::BalanceChange { address, prev });
        Ok(())
    }

    /// Debits `amount` from `address`.
    pub fn sub_balance(&mut self, address: Address, amount: U256) -> Result<(), StateError> {
        let object = self.object_for_write(address)?;
        let prev = object.data.balance;
        object.data.balance =
            prev.checked_sub(amount).ok_or(StateError::BalanceUnderflow(address))?;
        self.journal.push(JournalEntry::BalanceChange { address, prev });
        Ok(())
    }

    /// Overwrites the balance of `address`.
    pub fn set_balance(&mut self, address: Address, balance: U256) -> Result<(), StateError> {
        let object = self.object_for_write(address)?;
        let prev = core::mem::replace(&mut object.data.balance, balance);
        self.journal.push(JournalEntry::BalanceChange { address, prev });
        Ok(())
    }

    /// Overwrites the nonce of `address`.
    pub fn set_nonce(&mut self, address: Address, nonce: u64) -> Result<(), StateError> {
        let object = self.object_for_write(address)?;
        let prev = core::mem::replace(&mut object.data.nonce, nonce);
        self.journal.push(JournalEntry::NonceChange { address, prev });
        Ok(())
    }

    /// Installs `code` at `address`. Empty code clears the code hash.
    pub fn set_code(&mut self, address: Address, code: Bytes) -> Result<(), StateError> {
        let code_hash = if code.is_empty() { KECCAK_EMPTY } else { keccak256(&code) };
        let object = self.object_for_write(address)?;
        let entry = JournalEntry::CodeChange {
            address,
            prev_hash: object.data.code_hash,
            prev_code: object.code.take(),
            prev_dirty: object.code_dirty,
        };
        object.data.code_hash = code_hash;
        object.code = Some(code);
        object.code_dirty = true;
        self.journal.push(entry);
        Ok(())
    }

    /// Writes `value` into `slot` of `address`.
    pub fn set_state(
        &mut self,
        address: Address,
        slot: B256,
        value: U256,
    ) -> Result<(), StateError> {
        self.object_for_write(address)?;
        // the committed value must be known for change sets
        self.get_committed_state(address, slot)?;
        let object = self.object(address)?;
        let prev = object.dirty_storage.insert(slot, value);
        self.journal.push(JournalEntry::StorageChange { address, slot, prev });
        Ok(())
    }

    /// Starts a new account at `address` with empty code and storage, keeping its balance.
    ///
    /// With `contract_creation` the account moves to a fresh incarnation, which makes any
    /// storage written under earlier incarnations unreachable.
    pub fn create_account(
        &mut self,
        address: Address,
        contract_creation: bool,
    ) -> Result<(), StateError> {
        let recorded = self.reader.read_account_incarnation(address)?;
        let prev = self.object(address)?.clone();
        let prev_incarnation = prev
            .data
            .incarnation
            .max(prev.original.map_or(0, |account| account.incarnation))
            .max(recorded);
        let balance =
            if prev.deleted || prev.self_destructed { U256::ZERO } else { prev.data.balance };
        let incarnation = if contract_creation {
            prev_incarnation + 1
        } else if prev.deleted {
            0
        } else {
            prev.data.incarnation
        };

        let object = StateObject {
            original: prev.original,
            data: Account { balance, incarnation, ..Default::default() },
            created: contract_creation,
            touched: true,
            ..Default::default()
        };
        trace!(target: "blockexec::state", %address, incarnation, "created account");
        self.objects.insert(address, object);
        self.journal.push(JournalEntry::ObjectReplaced { address, prev: Some(Box::new(prev)) });
        Ok(())
    }

    /// Marks `address` for destruction at the end of the transaction and zeroes its balance.
    /// Returns `false` if the account does not exist.
    pub fn self_destruct(&mut self, address: Address) -> Result<bool, StateError> {
        let object = self.object(address)?;
        if object.deleted {
            return Ok(false);
        }
        let entry = JournalEntry::SelfDestruct {
            address,
            prev: object.self_destructed,
            prev_balance: object.data.balance,
        };
        object.self_destructed = true;
        object.data.balance = U256::ZERO;
        self.journal.push(entry);
        Ok(true)
    }

    /// Whether `address` self-destructed in the current transaction.
    pub fn has_self_destructed(&mut self, address: Address) -> Result<bool, StateError> {
        Ok(self.object(address)?.self_destructed)
    }

    /// Adds to the refund counter.
    pub fn add_refund(&mut self, gas: u64) {
        self.journal.push(JournalEntry::RefundChange { prev: self.refund });
        self.refund = self.refund.saturating_add(gas);
    }

    /// Subtracts from the refund counter, saturating at zero.
    pub fn sub_refund(&mut self, gas: u64) {
        self.journal.push(JournalEntry::RefundChange { prev: self.refund });
        self.refund = self.refund.saturating_sub(gas);
    }

    /// Current refund counter.
    pub const fn get_refund(&self) -> u64 {
        self.refund
    }

    /// Records a log under the bound transaction.
    pub fn add_log(&mut self, log: Log) {
        self.logs.push((self.tx.tx_index, log));
        self.journal.push(JournalEntry::LogAdded);
    }

    /// All logs of the block, in emission order.
    pub fn logs(&self) -> impl Iterator<Item = &Log> + '_ {
        self.logs.iter().map(|(_, log)| log)
    }

    /// Logs emitted under transaction `tx_index`.
    pub fn tx_logs(&self, tx_index: usize) -> Vec<Log> {
        self.logs
            .iter()
            .filter(|(index, _)| *index == tx_index)
            .map(|(_, log)| log.clone())
            .collect()
    }

    /// Number of logs emitted so far.
    pub fn log_count(&self) -> usize {
        self.logs.len()
    }

    /// Logs emitted since the block had `start` logs.
    pub fn logs_from(&self, start: usize) -> Vec<Log> {
        self.logs.iter().skip(start).map(|(_, log)| log.clone()).collect()
    }

    /// Identifier of the current journal position.
    pub fn snapshot(&self) -> usize {
        self.journal.len()
    }

    /// Undoes every change made after `snapshot` was taken.
    pub fn revert_to_snapshot(&mut self, snapshot: usize) {
        for entry in self.journal.unwind_to(snapshot) {
            match entry {
                JournalEntry::ObjectReplaced { address, prev } => match prev {
                    Some(prev) => {
                        self.objects.insert(address, *prev);
                    }
                    None => {
                        self.objects.remove(&address);
                    }
                },
                JournalEntry::BalanceChange { address, prev } => {
                    if let Some(object) = self.objects.get_mut(&address) {
                        object.data.balance = prev;
                    }
                }
                JournalEntry::NonceChange { address, prev } => {
                    if let Some(object) = self.objects.get_mut(&address) {
                        object.data.nonce = prev;
                    }
                }
                JournalEntry::StorageChange { address, slot, prev } => {
                    if let Some(object) = self.objects.get_mut(&address) {
                        match prev {
                            Some(value) => object.dirty_storage.insert(slot, value),
                            None => object.dirty_storage.remove(&slot),
                        };
                    }
                }
                JournalEntry::CodeChange { address, prev_hash, prev_code, prev_dirty } => {
                    if let Some(object) = self.objects.get_mut(&address) {
                        object.data.code_hash = prev_hash;
                        object.code = prev_code;
                        object.code_dirty = prev_dirty;
                    }
                }
                JournalEntry::SelfDestruct { address, prev, prev_balance } => {
                    if let Some(object) = self.objects.get_mut(&address) {
                        object.self_destructed = prev;
                        object.data.balance = prev_balance;
                    }
                }
                JournalEntry::Touch { address, prev } => {
                    if let Some(object) = self.objects.get_mut(&address) {
                        object.touched = prev;
                    }
                }
                JournalEntry::RefundChange { prev } => self.refund = prev,
                JournalEntry::LogAdded => {
                    self.logs.pop();
                }
            }
        }
    }

    /// Closes the current transaction.
    ///
    /// Self-destructed accounts, and from Spurious Dragon touched empty accounts, become absent.
    /// Every other account changed by the transaction is reported to `writer`. The journal and
    /// the refund counter are reset.
    pub fn finalize_tx<W: StateWriter>(
        &mut self,
        rules: &Rules,
        writer: &mut W,
    ) -> Result<(), StateError> {
        let dirty: BTreeSet<Address> =
            self.journal.entries().iter().filter_map(JournalEntry::address).copied().collect();
        for address in dirty {
            let Some(object) = self.objects.get_mut(&address) else { continue };
            let remove_empty = rules.is_spurious_dragon &&
                object.touched &&
                !object.deleted &&
                object.data.is_empty();
            if object.self_destructed || remove_empty {
                writer.delete_account(address, &object.data)?;
                object.mark_deleted();
            } else if !object.deleted {
                writer.update_account_data(address, object.original.as_ref(), &object.data)?;
            }
            object.touched = false;
        }
        self.journal.clear();
        self.refund = 0;
        Ok(())
    }

    /// Hands the net changes of the block to `writer`.
    ///
    /// Afterwards the overlay treats the written values as committed, so committing twice writes
    /// nothing the second time.
    pub fn commit_block<W: StateWriter>(&mut self, writer: &mut W) -> Result<(), StateError> {
        for (address, object) in &mut self.objects {
            let address = *address;
            if object.deleted {
                if let Some(original) = object.original.take() {
                    let incarnation = original.incarnation.max(object.data.incarnation);
                    writer.delete_account(address, &Account { incarnation, ..original })?;
                }
                continue;
            }

            if object.created {
                writer.create_contract(address)?;
            }
            if object.code_dirty {
                if let Some(code) = &object.code {
                    writer.update_account_code(
                        address,
                        object.data.incarnation,
                        object.data.code_hash,
                        code,
                    )?;
                }
            }

            let mut slots: Vec<(B256, U256)> = object.dirty_storage.drain().collect();
            slots.sort_unstable_by_key(|(slot, _)| *slot);
            for (slot, value) in slots {
                let original = object.origin_storage.get(&slot).copied().unwrap_or_default();
                if original != value {
                    writer.write_account_storage(
                        address,
                        object.data.incarnation,
                        slot,
                        original,
                        value,
                    )?;
                }
                object.origin_storage.insert(slot, value);
            }

            if object.original.as_ref() != Some(&object.data) {
                writer.update_account_data(address, object.original.as_ref(), &object.data)?;
            }
            object.original = Some(object.data);
            object.code_dirty = false;
            object.created = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        encode_account,
        encode_storage_value,
        kv::{account_key, storage_key, MemorySnapshot, MemoryStore, StateDatabase, Table},
        NoopWriter, PlainStateReader,
    };
    use alloy_primitives::{address, b256, bytes};
    use std::sync::Arc;

    const ALICE: Address = address!("0x00000000000000000000000000000000000a11ce");
    const CONTRACT: Address = address!("0x00000000000000000000000000000000c0ffee00");
    const SLOT: B256 = b256!("0x0000000000000000000000000000000000000000000000000000000000000001");

    fn state_with(store: &MemoryStore) -> IntraBlockState<PlainStateReader<MemorySnapshot>> {
        IntraBlockState::new(PlainStateReader::new(store.snapshot(), Arc::default()))
    }

    #[test]
    fn test_revert_restores_balances_logs_and_refund() {
        let store = MemoryStore::new();
        let funded = Account { balance: U256::from(100), ..Default::default() };
        store.put(Table::PlainState, account_key(ALICE), encode_account(&funded));
        let mut state = state_with(&store);

        let snapshot = state.snapshot();
        state.sub_balance(ALICE, U256::from(40)).unwrap();
        state.add_balance(CONTRACT, U256::from(40)).unwrap();
        state.add_refund(10);
        state.add_log(Log::new_unchecked(CONTRACT, vec![], bytes!("01")));
        assert_eq!(state.get_balance(ALICE).unwrap(), U256::from(60));
        assert!(state.exist(CONTRACT).unwrap());

        state.revert_to_snapshot(snapshot);
        assert_eq!(state.get_balance(ALICE).unwrap(), U256::from(100));
        assert!(!state.exist(CONTRACT).unwrap());
        assert_eq!(state.get_refund(), 0);
        assert_eq!(state.log_count(), 0);
    }

    #[test]
    fn test_underflow_is_an_error() {
        let store = MemoryStore::new();
        let mut state = state_with(&store);
        assert_eq!(
            state.sub_balance(ALICE, U256::from(1)),
            Err(StateError::BalanceUnderflow(ALICE))
        );
    }

    #[test]
    fn test_recreated_contract_does_not_see_old_storage() {
        let store = MemoryStore::new();
        let contract = Account { incarnation: 1, nonce: 1, ..Default::default() };
        store.put(Table::PlainState, account_key(CONTRACT), encode_account(&contract));
        store.put(
            Table::PlainState,
            storage_key(CONTRACT, 1, SLOT),
            encode_storage_value(U256::from(42)),
        );
        let mut state = state_with(&store);
        let rules = Rules::default();

        assert_eq!(state.get_state(CONTRACT, SLOT).unwrap(), U256::from(42));
        assert!(state.self_destruct(CONTRACT).unwrap());
        state.finalize_tx(&rules, &mut NoopWriter).unwrap();
        assert!(!state.exist(CONTRACT).unwrap());

        state.create_account(CONTRACT, true).unwrap();
        assert_eq!(state.get_incarnation(CONTRACT).unwrap(), 2);
        assert_eq!(state.get_state(CONTRACT, SLOT).unwrap(), U256::ZERO);
    }

    #[test]
    fn test_touched_empty_account_is_removed_after_spurious_dragon() {
        let store = MemoryStore::new();
        let mut state = state_with(&store);
        state.add_balance(ALICE, U256::ZERO).unwrap();
        assert!(state.exist(ALICE).unwrap());

        let rules = Rules { is_spurious_dragon: true, ..Default::default() };
        state.finalize_tx(&rules, &mut NoopWriter).unwrap();
        assert!(!state.exist(ALICE).unwrap());
    }
}
