use alloy_primitives::{Address, B256};

/// Tables of the plain-state layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    /// `address` → account record, and `address ‖ incarnation ‖ slot` → storage value
    PlainState,
    /// `address ‖ incarnation` → code hash. Secondary index, may be stale.
    PlainContractCode,
    /// `code_hash` → bytecode
    Code,
    /// `address` → last incarnation of a deleted contract
    IncarnationMap,
    /// `block ‖ address` → account record before the block
    AccountChangeSet,
    /// `block ‖ address ‖ incarnation ‖ slot` → storage value before the block
    StorageChangeSet,
}

/// Length of an account key in [`Table::PlainState`].
pub const ACCOUNT_KEY_LEN: usize = 20;
/// Length of a storage key in [`Table::PlainState`].
pub const STORAGE_KEY_LEN: usize = 20 + 8 + 32;

/// Key of the account record of `address`.
pub fn account_key(address: Address) -> Vec<u8> {
    address.to_vec()
}

/// Key of `slot` in the storage namespace of `address` at `incarnation`.
pub fn storage_key(address: Address, incarnation: u64, slot: B256) -> Vec<u8> {
    let mut key = storage_prefix(address, incarnation);
    key.extend_from_slice(slot.as_slice());
    key
}

/// Prefix of the storage namespace of `address` at `incarnation`. Also the key of its entry in
/// [`Table::PlainContractCode`].
pub fn storage_prefix(address: Address, incarnation: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(STORAGE_KEY_LEN);
    key.extend_from_slice(address.as_slice());
    key.extend_from_slice(&incarnation.to_be_bytes());
    key
}

/// Key of an account change-set entry.
pub fn account_change_key(block_number: u64, address: Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + 20);
    key.extend_from_slice(&block_number.to_be_bytes());
    key.extend_from_slice(address.as_slice());
    key
}

/// Key of a storage change-set entry.
pub fn storage_change_key(
    block_number: u64,
    address: Address,
    incarnation: u64,
    slot: B256,
) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + STORAGE_KEY_LEN);
    key.extend_from_slice(&block_number.to_be_bytes());
    key.extend_from_slice(&storage_key(address, incarnation, slot));
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, b256};

    #[test]
    fn test_storage_key_layout() {
        let address = address!("0x1111111111111111111111111111111111111111");
        let slot = b256!("0x00000000000000000000000000000000000000000000000000000000000000ff");
        let key = storage_key(address, 0x0102, slot);
        assert_eq!(key.len(), STORAGE_KEY_LEN);
        assert_eq!(&key[..20], address.as_slice());
        assert_eq!(&key[20..28], &[0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(&key[28..], slot.as_slice());
        // different incarnations never share a key
        assert_ne!(key, storage_key(address, 0x0103, slot));
    }
}
