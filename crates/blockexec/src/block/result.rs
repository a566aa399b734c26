use alloy_consensus::ReceiptEnvelope;
use alloy_primitives::{keccak256, Bloom, Bytes, Log, B256, U256};
use serde::{Deserialize, Serialize};

/// Prefix of the preimage of a state-sync receipt's transaction hash.
const STATE_SYNC_RECEIPT_PREFIX: &[u8] = b"matic-bor-receipt-";

/// A transaction left out of the block in stateless mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedTx {
    /// Position of the transaction in the block
    pub index: usize,
    /// Why it was rejected
    pub error: String,
}

/// Synthetic receipt carrying the logs emitted while committing state-sync events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSyncReceipt {
    /// Derived transaction hash, see [`StateSyncReceipt::derive_tx_hash`]
    pub transaction_hash: B256,
    /// Hash of the block
    pub block_hash: B256,
    /// Number of the block
    #[serde(with = "alloy_serde::quantity")]
    pub block_number: u64,
    /// Index after the last real transaction receipt
    #[serde(with = "alloy_serde::quantity")]
    pub transaction_index: u64,
    /// Always successful
    pub status: bool,
    /// Logs, in emission order
    pub logs: Vec<Log>,
}

impl StateSyncReceipt {
    /// Builds the receipt of block `block_number` that follows `receipt_count` transaction
    /// receipts.
    pub fn new(block_hash: B256, block_number: u64, receipt_count: usize, logs: Vec<Log>) -> Self {
        Self {
            transaction_hash: Self::derive_tx_hash(block_number, block_hash),
            block_hash,
            block_number,
            transaction_index: receipt_count as u64,
            status: true,
            logs,
        }
    }

    /// `keccak256("matic-bor-receipt-" ‖ block_number_be8 ‖ block_hash)`.
    pub fn derive_tx_hash(block_number: u64, block_hash: B256) -> B256 {
        let mut preimage = Vec::with_capacity(STATE_SYNC_RECEIPT_PREFIX.len() + 8 + 32);
        preimage.extend_from_slice(STATE_SYNC_RECEIPT_PREFIX);
        preimage.extend_from_slice(&block_number.to_be_bytes());
        preimage.extend_from_slice(block_hash.as_slice());
        keccak256(preimage)
    }
}

/// Everything the caller learns from executing a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralExecResult {
    /// Always zero. The state trie is not computed here.
    pub state_root: B256,
    /// Root of the included transactions
    pub tx_root: B256,
    /// Root of the receipts
    pub receipts_root: B256,
    /// Hash of all logs of the block
    pub logs_hash: B256,
    /// Bloom of the receipts
    pub logs_bloom: Bloom,
    /// Receipts of the included transactions
    pub receipts: Vec<ReceiptEnvelope>,
    /// Transactions rejected in stateless mode
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedTx>,
    /// Header difficulty
    #[serde(rename = "currentDifficulty")]
    pub difficulty: U256,
    /// Gas used by transactions and metered system calls
    #[serde(with = "alloy_serde::quantity")]
    pub gas_used: u64,
    /// Blob gas used by transactions
    #[serde(with = "alloy_serde::quantity")]
    pub blob_gas_used: u64,
    /// EIP-7685 requests collected while finalizing
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requests: Vec<Bytes>,
    /// Receipt of the state-sync events, on state-sync chains
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_sync_receipt: Option<StateSyncReceipt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_sync_tx_hash_depends_on_block() {
        let hash = B256::repeat_byte(7);
        let receipt = StateSyncReceipt::new(hash, 16, 2, vec![]);
        assert_eq!(receipt.transaction_index, 2);
        assert_eq!(receipt.transaction_hash, StateSyncReceipt::derive_tx_hash(16, hash));
        assert_ne!(receipt.transaction_hash, StateSyncReceipt::derive_tx_hash(17, hash));

        let mut preimage = b"matic-bor-receipt-".to_vec();
        preimage.extend_from_slice(&16u64.to_be_bytes());
        preimage.extend_from_slice(hash.as_slice());
        assert_eq!(receipt.transaction_hash, keccak256(preimage));
    }

    #[test]
    fn test_result_json_layout() {
        let result = EphemeralExecResult {
            state_root: B256::ZERO,
            tx_root: B256::ZERO,
            receipts_root: B256::ZERO,
            logs_hash: B256::ZERO,
            logs_bloom: Bloom::ZERO,
            receipts: vec![],
            rejected: vec![RejectedTx { index: 1, error: "nonce too low".into() }],
            difficulty: U256::from(2),
            gas_used: 42_000,
            blob_gas_used: 0,
            requests: vec![],
            state_sync_receipt: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["gasUsed"], "0xa410");
        assert_eq!(json["currentDifficulty"], "0x2");
        assert_eq!(json["rejected"][0]["index"], 1);
        assert!(json.get("requests").is_none());
        assert!(json.get("stateSyncReceipt").is_none());

        let back: EphemeralExecResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
