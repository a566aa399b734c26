use alloy_consensus::{transaction::Recovered, ReceiptEnvelope, TxEnvelope};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{keccak256, Bloom, Log, B256};
use alloy_trie::root::ordered_trie_root_with_encoder;

/// Root of the ordered trie over the EIP-2718 encodings of `transactions`.
pub fn transactions_root(transactions: &[Recovered<TxEnvelope>]) -> B256 {
    ordered_trie_root_with_encoder(transactions, |tx, buf| tx.inner().encode_2718(buf))
}

/// Root of the ordered trie over the EIP-2718 encodings of `receipts`.
pub fn receipts_root(receipts: &[ReceiptEnvelope]) -> B256 {
    ordered_trie_root_with_encoder(receipts, |receipt, buf| receipt.encode_2718(buf))
}

/// Union of the receipt blooms.
pub fn logs_bloom_of(receipts: &[ReceiptEnvelope]) -> Bloom {
    let mut bloom = Bloom::ZERO;
    for receipt in receipts {
        bloom.accrue_bloom(receipt.logs_bloom());
    }
    bloom
}

/// Keccak hash of the RLP list of `logs`.
pub fn logs_hash(logs: &[Log]) -> B256 {
    let mut out = Vec::new();
    alloy_rlp::encode_list::<_, Log>(logs, &mut out);
    keccak256(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_consensus::{Eip658Value, Receipt, ReceiptWithBloom};
    use alloy_primitives::{logs_bloom, Address, Bytes};
    use alloy_trie::EMPTY_ROOT_HASH;

    fn receipt(logs: Vec<Log>) -> ReceiptEnvelope {
        let bloom = logs_bloom(logs.iter());
        ReceiptEnvelope::Eip1559(ReceiptWithBloom {
            receipt: Receipt {
                status: Eip658Value::Eip658(true),
                cumulative_gas_used: 21_000,
                logs,
            },
            logs_bloom: bloom,
        })
    }

    #[test]
    fn test_empty_roots() {
        assert_eq!(transactions_root(&[]), EMPTY_ROOT_HASH);
        assert_eq!(receipts_root(&[]), EMPTY_ROOT_HASH);
        assert_eq!(logs_bloom_of(&[]), Bloom::ZERO);
        // rlp of an empty list is 0xc0
        assert_eq!(logs_hash(&[]), keccak256([0xc0]));
    }

    #[test]
    fn test_logs_hash_covers_every_log() {
        let first = Log::new_unchecked(Address::repeat_byte(1), vec![], Bytes::from_static(&[1]));
        let second = Log::new_unchecked(Address::repeat_byte(2), vec![], Bytes::new());
        let logs = vec![first.clone(), second];

        assert_eq!(logs_hash(&logs), keccak256(alloy_rlp::encode(&logs)));
        assert_ne!(logs_hash(&logs), logs_hash(&[first]));
    }

    #[test]
    fn test_bloom_is_union_of_receipts() {
        let log =
            Log::new_unchecked(Address::repeat_byte(1), vec![B256::repeat_byte(2)], Bytes::new());
        let receipts = [receipt(vec![]), receipt(vec![log.clone()])];
        let bloom = logs_bloom_of(&receipts);
        assert_ne!(bloom, Bloom::ZERO);
        assert_eq!(bloom, logs_bloom([&log]));
    }
}
