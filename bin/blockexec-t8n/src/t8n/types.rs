use std::collections::BTreeMap;

use alloy_consensus::TxEnvelope;
use alloy_eips::eip4895::Withdrawal;
use alloy_primitives::{Address, Bloom, Bytes, B256, U256};
use blockexec::{EphemeralExecResult, StateSyncEvent};
use serde::{Deserialize, Serialize};

/// Prestate account allocation (address -> account)
pub type StateAlloc = BTreeMap<Address, AllocAccount>;

/// One account of an allocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocAccount {
    /// Balance in wei
    #[serde(default)]
    pub balance: U256,
    /// Account nonce
    #[serde(default, with = "alloy_serde::quantity")]
    pub nonce: u64,
    /// Contract code
    #[serde(default, skip_serializing_if = "<[u8]>::is_empty")]
    pub code: Bytes,
    /// Storage slots
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub storage: BTreeMap<B256, U256>,
}

/// Block environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Env {
    /// Fee recipient
    pub current_coinbase: Address,
    /// Block gas limit
    #[serde(with = "alloy_serde::quantity")]
    pub current_gas_limit: u64,
    /// Block number
    #[serde(with = "alloy_serde::quantity")]
    pub current_number: u64,
    /// Block timestamp
    #[serde(with = "alloy_serde::quantity")]
    pub current_timestamp: u64,
    /// Difficulty, before the merge
    #[serde(default)]
    pub current_difficulty: Option<U256>,
    /// Randomness beacon, after the merge
    #[serde(default)]
    pub current_random: Option<B256>,
    /// Base fee, from London
    #[serde(default, with = "alloy_serde::quantity::opt")]
    pub current_base_fee: Option<u64>,
    /// Excess blob gas, from Cancun
    #[serde(default, with = "alloy_serde::quantity::opt")]
    pub current_excess_blob_gas: Option<u64>,
    /// Parent block hash
    #[serde(default)]
    pub parent_hash: B256,
    /// Parent beacon block root, from Cancun
    #[serde(default)]
    pub parent_beacon_block_root: Option<B256>,
    /// Withdrawals, from Shanghai
    #[serde(default)]
    pub withdrawals: Option<Vec<Withdrawal>>,
    /// Commitments the header declares, checked with `--strict`
    #[serde(default, flatten)]
    pub expected: ExpectedCommitments,
}

/// Header commitments a block is verified against
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedCommitments {
    /// Gas used
    #[serde(default, with = "alloy_serde::quantity::opt", skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
    /// Blob gas used
    #[serde(default, with = "alloy_serde::quantity::opt", skip_serializing_if = "Option::is_none")]
    pub blob_gas_used: Option<u64>,
    /// Receipts root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipts_root: Option<B256>,
    /// Logs bloom
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs_bloom: Option<Bloom>,
}

/// A signed transaction and, optionally, its sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Signed transaction
    pub tx: TxEnvelope,
    /// Sender. Recovered from the signature when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Address>,
}

/// A state-sync event committed on sprint-start blocks of state-sync chains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Event id on the parent chain
    #[serde(with = "alloy_serde::quantity")]
    pub id: u64,
    /// Emission time on the parent chain
    #[serde(with = "alloy_serde::quantity")]
    pub time: u64,
    /// Event record
    pub data: Bytes,
}

impl From<SyncEvent> for StateSyncEvent {
    fn from(event: SyncEvent) -> Self {
        Self { id: event.id, time: event.time, record: event.data }
    }
}

/// Input data for a state transition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionInputs {
    /// Pre-state allocation
    pub alloc: StateAlloc,
    /// Block environment
    pub env: Env,
    /// Transactions to execute
    pub txs: Vec<Transaction>,
    /// State-sync events to commit
    pub events: Vec<SyncEvent>,
}

/// Combined stdin input format
#[derive(Debug, Deserialize)]
pub struct StdinInput {
    /// Pre-state allocation
    pub alloc: StateAlloc,
    /// Block environment
    pub env: Env,
    /// Transactions to execute
    pub txs: Vec<Transaction>,
    /// State-sync events to commit
    #[serde(default)]
    pub events: Vec<SyncEvent>,
}

impl From<StdinInput> for TransitionInputs {
    fn from(input: StdinInput) -> Self {
        Self { alloc: input.alloc, env: input.env, txs: input.txs, events: input.events }
    }
}

/// T8N tool output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct T8nOutput {
    /// Post-state allocation
    pub alloc: StateAlloc,
    /// Execution result
    pub result: EphemeralExecResult,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::bytes;

    #[test]
    fn test_alloc_account_omits_empty_code_and_storage() {
        let eoa = AllocAccount { balance: U256::from(1), nonce: 2, ..Default::default() };
        let json = serde_json::to_value(&eoa).unwrap();
        assert_eq!(json, serde_json::json!({ "balance": "0x1", "nonce": "0x2" }));

        let contract = AllocAccount { code: bytes!("6001"), ..Default::default() };
        let json = serde_json::to_value(&contract).unwrap();
        assert_eq!(json["code"], "0x6001");
        assert!(json.get("storage").is_none());
    }
}
