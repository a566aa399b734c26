//! Account model and its plain-state encoding.
//!
//! An [`Account`] is the decoded form of a plain-state account record. The record encoding lives
//! in [`codec`] and the EIP-7702 delegation designator helpers in [`delegation`].

mod codec;
mod delegation;

pub use codec::*;
pub use delegation::*;

use alloy_primitives::{B256, U256};
use alloy_trie::KECCAK_EMPTY;

/// Decoded account record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Number of transactions sent from the account, or contracts created by it
    pub nonce: u64,
    /// Balance in wei
    pub balance: U256,
    /// Storage namespace version, bumped when a contract is recreated at the same address
    pub incarnation: u64,
    /// Hash of the account code, [`KECCAK_EMPTY`] for code-less accounts
    pub code_hash: B256,
}

impl Default for Account {
    fn default() -> Self {
        Self { nonce: 0, balance: U256::ZERO, incarnation: 0, code_hash: KECCAK_EMPTY }
    }
}

impl Account {
    /// Whether the account has no code.
    pub fn has_empty_code_hash(&self) -> bool {
        is_empty_code_hash(&self.code_hash)
    }

    /// Whether the account is empty in the EIP-161 sense.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.has_empty_code_hash()
    }
}

/// Whether `code_hash` denotes "no code". The zero hash is treated the same as the hash of empty
/// bytecode.
pub fn is_empty_code_hash(code_hash: &B256) -> bool {
    *code_hash == KECCAK_EMPTY || code_hash.is_zero()
}
