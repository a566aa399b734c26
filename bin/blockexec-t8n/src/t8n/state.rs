use std::sync::Arc;

use alloy_primitives::{keccak256, Address, B256};
use alloy_trie::KECCAK_EMPTY;
use blockexec::{
    constants::DEFAULT_INCARNATION,
    decode_storage_value, encode_account, encode_storage_value,
    kv::{
        account_key, storage_key, storage_prefix, MemoryStore, StateDatabase, Table, WriteBatch,
        ACCOUNT_KEY_LEN, STORAGE_KEY_LEN,
    },
    Account, PlainStateReader, StateError, StateReader,
};

use crate::t8n::{AllocAccount, StateAlloc};

/// Loads `alloc` into a fresh store that also keeps the latest code of every account.
///
/// Accounts with code or storage are placed at the default incarnation.
pub fn store_from_alloc(alloc: &StateAlloc) -> MemoryStore {
    let mut batch = WriteBatch::default();
    for (address, info) in alloc {
        let address = *address;
        let is_contract = !info.code.is_empty() || !info.storage.is_empty();
        let incarnation = if is_contract { DEFAULT_INCARNATION } else { 0 };

        let code_hash = if info.code.is_empty() {
            KECCAK_EMPTY
        } else {
            let code_hash = keccak256(&info.code);
            batch.put(Table::Code, code_hash.to_vec(), info.code.clone());
            batch.put(
                Table::PlainContractCode,
                storage_prefix(address, incarnation),
                code_hash.to_vec(),
            );
            batch.put_latest_code(address, info.code.clone());
            code_hash
        };

        let account = Account { nonce: info.nonce, balance: info.balance, incarnation, code_hash };
        batch.put(Table::PlainState, account_key(address), encode_account(&account));
        for (slot, value) in info.storage.iter().filter(|(_, value)| !value.is_zero()) {
            batch.put(
                Table::PlainState,
                storage_key(address, incarnation, *slot),
                encode_storage_value(*value),
            );
        }
    }

    let store = MemoryStore::with_latest_code();
    store.commit(batch);
    store
}

/// Reads every account of `store` back into an allocation.
///
/// Storage written under an incarnation other than the account's current one is skipped.
pub fn alloc_from_store(store: &MemoryStore) -> Result<StateAlloc, StateError> {
    let snapshot = store.snapshot();
    let reader = PlainStateReader::new(snapshot.clone(), Arc::default());
    let mut alloc = StateAlloc::new();
    let mut current: Option<(Address, u64)> = None;

    // keys are ordered, so an account record comes right before its storage
    for (key, value) in snapshot.iter(Table::PlainState) {
        match key.len() {
            ACCOUNT_KEY_LEN => {
                let address = Address::from_slice(key);
                current = None;
                let Some(account) = reader.read_account_data(address)? else { continue };
                let code = reader
                    .read_account_code(address, account.incarnation, account.code_hash)?
                    .unwrap_or_default();
                alloc.insert(
                    address,
                    AllocAccount {
                        balance: account.balance,
                        nonce: account.nonce,
                        code,
                        storage: Default::default(),
                    },
                );
                current = Some((address, account.incarnation));
            }
            STORAGE_KEY_LEN => {
                let address = Address::from_slice(&key[..ACCOUNT_KEY_LEN]);
                let mut incarnation = [0u8; 8];
                incarnation.copy_from_slice(&key[ACCOUNT_KEY_LEN..ACCOUNT_KEY_LEN + 8]);
                if current != Some((address, u64::from_be_bytes(incarnation))) {
                    continue;
                }
                let value =
                    decode_storage_value(value).map_err(|err| StateError::decode(address, err))?;
                if let Some(account) = alloc.get_mut(&address) {
                    account.storage.insert(B256::from_slice(&key[ACCOUNT_KEY_LEN + 8..]), value);
                }
            }
            _ => {}
        }
    }
    Ok(alloc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, bytes, U256};

    #[test]
    fn test_alloc_survives_the_store() {
        let contract = address!("0x000000000000000000000000000000000000c0de");
        let eoa = address!("0x00000000000000000000000000000000000000aa");
        let mut alloc = StateAlloc::new();
        alloc.insert(eoa, AllocAccount { balance: U256::from(9), nonce: 3, ..Default::default() });
        alloc.insert(
            contract,
            AllocAccount {
                code: bytes!("6001600055"),
                storage: [(B256::with_last_byte(1), U256::from(2))].into(),
                ..Default::default()
            },
        );

        let store = store_from_alloc(&alloc);
        assert_eq!(alloc_from_store(&store).unwrap(), alloc);
    }

    #[test]
    fn test_zero_slots_are_not_stored() {
        let contract = address!("0x000000000000000000000000000000000000c0de");
        let mut alloc = StateAlloc::new();
        alloc.insert(
            contract,
            AllocAccount {
                storage: [(B256::with_last_byte(1), U256::ZERO)].into(),
                ..Default::default()
            },
        );

        let post = alloc_from_store(&store_from_alloc(&alloc)).unwrap();
        assert!(post[&contract].storage.is_empty());
    }
}
