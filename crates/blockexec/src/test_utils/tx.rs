use alloy_consensus::{
    transaction::Recovered, Block, BlockBody, Header, SignableTransaction, TxEip1559, TxEnvelope,
    TxLegacy,
};
use alloy_eips::eip4895::Withdrawals;
use alloy_primitives::{address, Address, Bytes, Signature, TxKind, B256, U256};
use alloy_trie::EMPTY_ROOT_HASH;

use crate::ChainConfig;

/// Default sender of test transactions.
pub const CALLER: Address = address!("0x2000000000000000000000000000000000000002");
/// Default recipient of test transactions.
pub const RECIPIENT: Address = address!("0x1000000000000000000000000000000000000001");
/// Beneficiary of test blocks.
pub const COINBASE: Address = address!("0x3000000000000000000000000000000000000003");
/// Base fee of test blocks from London.
pub const BASE_FEE: u64 = 7;
/// Gas limit of test blocks.
pub const BLOCK_GAS_LIMIT: u64 = 30_000_000;

/// A signed legacy transaction.
pub fn legacy_tx(nonce: u64, to: Address, value: U256, gas_limit: u64) -> TxEnvelope {
    let tx = TxLegacy {
        chain_id: Some(1),
        nonce,
        gas_price: 10,
        gas_limit,
        to: TxKind::Call(to),
        value,
        input: Bytes::new(),
    };
    tx.into_signed(Signature::test_signature()).into()
}

/// A signed 21 000-gas legacy transfer.
pub fn transfer_tx(nonce: u64, to: Address, value: U256) -> TxEnvelope {
    legacy_tx(nonce, to, value, 21_000)
}

/// A signed EIP-1559 transaction.
pub fn eip1559_tx(nonce: u64, to: TxKind, input: Bytes, gas_limit: u64) -> TxEnvelope {
    let tx = TxEip1559 {
        chain_id: 1,
        nonce,
        gas_limit,
        max_fee_per_gas: 10,
        max_priority_fee_per_gas: 2,
        to,
        value: U256::ZERO,
        access_list: Default::default(),
        input,
    };
    tx.into_signed(Signature::test_signature()).into()
}

/// `tx` recovered with [`CALLER`] as the sender.
pub fn recovered(tx: TxEnvelope) -> Recovered<TxEnvelope> {
    Recovered::new_unchecked(tx, CALLER)
}

/// Header of block `number` at `timestamp` carrying the optional fields active under `config`.
pub fn test_header(config: &ChainConfig, number: u64, timestamp: u64) -> Header {
    let rules = config.rules(number, timestamp);
    Header {
        number,
        timestamp,
        parent_hash: B256::repeat_byte(0x0a),
        beneficiary: COINBASE,
        gas_limit: BLOCK_GAS_LIMIT,
        base_fee_per_gas: rules.is_london.then_some(BASE_FEE),
        withdrawals_root: rules.is_shanghai.then_some(EMPTY_ROOT_HASH),
        blob_gas_used: rules.is_cancun.then_some(0),
        excess_blob_gas: rules.is_cancun.then_some(0),
        parent_beacon_block_root: rules
            .is_cancun
            .then(|| if number == 0 { B256::ZERO } else { B256::repeat_byte(0xbe) }),
        ..Default::default()
    }
}

/// Block made of `header` and `transactions`, with an empty withdrawal list from Shanghai.
pub fn test_block(
    config: &ChainConfig,
    header: Header,
    transactions: Vec<TxEnvelope>,
) -> Block<TxEnvelope> {
    let shanghai = config.rules(header.number, header.timestamp).is_shanghai;
    Block {
        header,
        body: BlockBody {
            transactions,
            ommers: vec![],
            withdrawals: shanghai.then(Withdrawals::default),
        },
    }
}
