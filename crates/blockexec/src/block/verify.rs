use alloy_consensus::{transaction::Recovered, Header, ReceiptEnvelope, TxEnvelope};
use alloy_primitives::{Bloom, B256};
use tracing::warn;

/// A computed block commitment that disagrees with the header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitmentMismatch {
    /// Receipts root.
    #[error(
        "mismatched receipts root for block {block}: computed={computed} != expected={expected}"
    )]
    ReceiptsRoot {
        /// Block number
        block: u64,
        /// Header value
        expected: B256,
        /// Computed value
        computed: B256,
    },
    /// Gas used.
    #[error("gas used by execution for block {block}: computed={computed} != expected={expected}")]
    GasUsed {
        /// Block number
        block: u64,
        /// Header value
        expected: u64,
        /// Computed value
        computed: u64,
    },
    /// Blob gas used.
    #[error(
        "blob gas used by execution for block {block}: computed={computed} != expected={expected}"
    )]
    BlobGasUsed {
        /// Block number
        block: u64,
        /// Header value
        expected: u64,
        /// Computed value
        computed: u64,
    },
    /// Logs bloom.
    #[error("bloom computed by execution for block {block}: {computed} != {expected}")]
    LogsBloom {
        /// Block number
        block: u64,
        /// Header value
        expected: Box<Bloom>,
        /// Computed value
        computed: Box<Bloom>,
    },
}

/// Checks the receipts root. On mismatch every receipt is dumped at `warn` level.
pub fn verify_receipts_root(
    header: &Header,
    computed: B256,
    receipts: &[ReceiptEnvelope],
    transactions: &[Recovered<TxEnvelope>],
    gas_used: u64,
) -> Result<(), CommitmentMismatch> {
    if computed == header.receipts_root {
        return Ok(());
    }
    warn!(
        target: "blockexec::verify",
        block = header.number,
        %computed,
        expected = %header.receipts_root,
        gas_used,
        header_gas_used = header.gas_used,
        receipts = receipts.len(),
        transactions = transactions.len(),
        "receipts root mismatch"
    );
    log_receipts(receipts, transactions);
    Err(CommitmentMismatch::ReceiptsRoot {
        block: header.number,
        expected: header.receipts_root,
        computed,
    })
}

/// Checks the gas used.
pub fn verify_gas_used(header: &Header, computed: u64) -> Result<(), CommitmentMismatch> {
    if computed != header.gas_used {
        return Err(CommitmentMismatch::GasUsed {
            block: header.number,
            expected: header.gas_used,
            computed,
        });
    }
    Ok(())
}

/// Checks the blob gas used, if the header declares it.
pub fn verify_blob_gas_used(header: &Header, computed: u64) -> Result<(), CommitmentMismatch> {
    match header.blob_gas_used {
        Some(expected) if expected != computed => {
            Err(CommitmentMismatch::BlobGasUsed { block: header.number, expected, computed })
        }
        _ => Ok(()),
    }
}

/// Checks the logs bloom.
pub fn verify_logs_bloom(header: &Header, computed: Bloom) -> Result<(), CommitmentMismatch> {
    if computed != header.logs_bloom {
        return Err(CommitmentMismatch::LogsBloom {
            block: header.number,
            expected: Box::new(header.logs_bloom),
            computed: Box::new(computed),
        });
    }
    Ok(())
}

fn log_receipts(receipts: &[ReceiptEnvelope], transactions: &[Recovered<TxEnvelope>]) {
    // receipts are not kept in no-receipts mode
    if receipts.len() != transactions.len() {
        warn!(
            target: "blockexec::verify",
            receipts = receipts.len(),
            transactions = transactions.len(),
            "receipts and transactions differ in length"
        );
        return;
    }
    for (index, (receipt, tx)) in receipts.iter().zip(transactions).enumerate() {
        warn!(
            target: "blockexec::verify",
            index,
            tx_hash = %tx.tx_hash(),
            tx_type = receipt.tx_type() as u8,
            success = receipt.status(),
            cumulative_gas_used = receipt.cumulative_gas_used(),
            logs = receipt.logs().len(),
            "receipt"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_gas_checked_only_when_declared() {
        let header = Header::default();
        assert_eq!(verify_blob_gas_used(&header, 131_072), Ok(()));

        let header = Header { number: 9, blob_gas_used: Some(0), ..Default::default() };
        assert_eq!(
            verify_blob_gas_used(&header, 131_072),
            Err(CommitmentMismatch::BlobGasUsed { block: 9, expected: 0, computed: 131_072 })
        );
    }

    #[test]
    fn test_gas_used_mismatch_message() {
        let header = Header { number: 3, gas_used: 21_000, ..Default::default() };
        let err = verify_gas_used(&header, 42_000).unwrap_err();
        assert_eq!(
            err.to_string(),
            "gas used by execution for block 3: computed=42000 != expected=21000"
        );
    }
}
