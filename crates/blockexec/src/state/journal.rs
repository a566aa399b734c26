use alloy_primitives::{Address, Bytes, B256, U256};

use crate::state::intra_block::StateObject;

/// A reversible change to the intra-block state.
#[derive(Debug, Clone)]
pub(crate) enum JournalEntry {
    /// The object at `address` was replaced. `prev` is `None` if it was not loaded before.
    ObjectReplaced { address: Address, prev: Option<Box<StateObject>> },
    BalanceChange { address: Address, prev: U256 },
    NonceChange { address: Address, prev: u64 },
    StorageChange { address: Address, slot: B256, prev: Option<U256> },
    CodeChange { address: Address, prev_hash: B256, prev_code: Option<Bytes>, prev_dirty: bool },
    SelfDestruct { address: Address, prev: bool, prev_balance: U256 },
    Touch { address: Address, prev: bool },
    RefundChange { prev: u64 },
    LogAdded,
}

impl JournalEntry {
    /// Account the entry modifies, if any.
    pub(crate) const fn address(&self) -> Option<&Address> {
        match self {
            Self::ObjectReplaced { address, .. } |
            Self::BalanceChange { address, .. } |
            Self::NonceChange { address, .. } |
            Self::StorageChange { address, .. } |
            Self::CodeChange { address, .. } |
            Self::SelfDestruct { address, .. } |
            Self::Touch { address, .. } => Some(address),
            Self::RefundChange { .. } | Self::LogAdded => None,
        }
    }
}

/// Ordered list of changes made by the current transaction.
#[derive(Debug, Clone, Default)]
pub(crate) struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    pub(crate) fn push(&mut self, entry: JournalEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Removes and returns the entries recorded after `len`, newest first.
    pub(crate) fn unwind_to(&mut self, len: usize) -> impl Iterator<Item = JournalEntry> + '_ {
        let start = len.min(self.entries.len());
        self.entries.drain(start..).rev()
    }

    pub(crate) fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
