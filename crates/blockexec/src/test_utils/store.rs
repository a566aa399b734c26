use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_trie::KECCAK_EMPTY;

use crate::{
    encode_account, encode_storage_value,
    kv::{account_key, storage_key, storage_prefix, MemoryStore, Table, WriteBatch},
    Account, FIELD_CODE_HASH,
};

/// Encodes `account` as a record that announces a code hash but stores an empty one, the shape
/// of delegated accounts whose hash was lost.
pub fn encode_account_with_lost_code_hash(account: &Account) -> Bytes {
    let mut enc = encode_account(&Account { code_hash: KECCAK_EMPTY, ..*account }).to_vec();
    enc[0] |= FIELD_CODE_HASH;
    enc.push(0);
    enc.into()
}

/// Populates a [`MemoryStore`] for tests.
#[derive(Debug, Default)]
pub struct StoreBuilder {
    store: MemoryStore,
}

impl StoreBuilder {
    /// Starts from an empty store without a latest-code store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an empty store that keeps the latest code of every account.
    pub fn with_latest_code() -> Self {
        Self { store: MemoryStore::with_latest_code() }
    }

    /// Writes the record of `address`.
    pub fn set_account(&mut self, address: Address, account: Account) {
        self.store.put(Table::PlainState, account_key(address), encode_account(&account));
    }

    /// Writes the record of `address`.
    pub fn account(mut self, address: Address, account: Account) -> Self {
        self.set_account(address, account);
        self
    }

    /// Writes an externally-owned account holding `balance`.
    pub fn account_balance(self, address: Address, balance: U256) -> Self {
        self.account(address, Account { balance, ..Default::default() })
    }

    /// Writes `code` into the code table and points the code-pointer entry of `address` at
    /// `incarnation` to it. Returns the code hash.
    pub fn set_code(&mut self, address: Address, incarnation: u64, code: Bytes) -> B256 {
        let code_hash = keccak256(&code);
        self.store.put(Table::Code, code_hash.to_vec(), code);
        self.store.put(
            Table::PlainContractCode,
            storage_prefix(address, incarnation),
            code_hash.to_vec(),
        );
        code_hash
    }

    /// Writes a contract at incarnation 1 with `code`.
    pub fn contract(mut self, address: Address, code: Bytes) -> Self {
        let code_hash = self.set_code(address, 1, code);
        self.account(address, Account { incarnation: 1, code_hash, ..Default::default() })
    }

    /// Writes a storage slot.
    pub fn storage(self, address: Address, incarnation: u64, slot: B256, value: U256) -> Self {
        self.store.put(
            Table::PlainState,
            storage_key(address, incarnation, slot),
            encode_storage_value(value),
        );
        self
    }

    /// Writes an arbitrary entry.
    pub fn raw(self, table: Table, key: impl Into<Vec<u8>>, value: impl Into<Bytes>) -> Self {
        self.store.put(table, key, value);
        self
    }

    /// Writes the latest code of `address`. Ignored without a latest-code store.
    pub fn latest_code(self, address: Address, code: Bytes) -> Self {
        let mut batch = WriteBatch::default();
        batch.put_latest_code(address, code);
        self.store.commit(batch);
        self
    }

    /// Finishes the store.
    pub fn build(self) -> MemoryStore {
        self.store
    }
}
