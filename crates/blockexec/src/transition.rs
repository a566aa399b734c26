//! Application of a single transaction to the block overlay.
//!
//! [`apply_transaction`] validates the transaction against the current state, buys its gas,
//! applies EIP-7702 authorizations, runs the message through the [`Evm`], settles refunds and
//! fees and builds the typed receipt. Any state change made by a transaction that ends in an
//! error is left in the overlay for the caller to revert.

use alloy_consensus::{
    transaction::Recovered, Eip658Value, Receipt, ReceiptEnvelope, ReceiptWithBloom, Transaction,
    TxEnvelope,
};
use alloy_eips::{eip2930::AccessList, eip7702::SignedAuthorization};
use alloy_primitives::{logs_bloom, Address, Bytes, B256, U256};
use tracing::trace;

use crate::{
    constants::{berlin, frontier, istanbul, london, prague, shanghai},
    delegation_code, is_delegation, BlockEnv, CallMessage, CallStatus, Evm, EvmError, GasPool,
    GasPoolError, IntraBlockState, NoopWriter, Rules, StateError, StateReader, Tracer,
};

/// Why a transaction could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    /// The transaction nonce is below the sender nonce.
    #[error("nonce too low: address {address}, tx={tx} < state={state}")]
    NonceTooLow {
        /// Sender
        address: Address,
        /// Transaction nonce
        tx: u64,
        /// Sender nonce
        state: u64,
    },
    /// The transaction nonce is above the sender nonce.
    #[error("nonce too high: address {address}, tx={tx} > state={state}")]
    NonceTooHigh {
        /// Sender
        address: Address,
        /// Transaction nonce
        tx: u64,
        /// Sender nonce
        state: u64,
    },
    /// The sender nonce cannot be incremented.
    #[error("nonce has max value: address {0}")]
    NonceMax(Address),
    /// The sender has code that is not a delegation (EIP-3607).
    #[error("sender not an eoa: address {address}, code hash {code_hash}")]
    SenderNotEoa {
        /// Sender
        address: Address,
        /// Code hash of the sender
        code_hash: B256,
    },
    /// The transaction type is not active yet.
    #[error("transaction type {0} not supported")]
    TxTypeNotSupported(u8),
    /// A set-code transaction without authorizations.
    #[error("empty authorization list")]
    EmptyAuthorizationList,
    /// The fee cap is below the block base fee.
    #[error("max fee per gas less than block base fee: max_fee={max_fee} < base_fee={base_fee}")]
    FeeCapTooLow {
        /// Maximum fee per gas
        max_fee: u128,
        /// Block base fee
        base_fee: u64,
    },
    /// The priority fee exceeds the fee cap.
    #[error("max priority fee per gas higher than max fee per gas: tip={tip} > max_fee={max_fee}")]
    TipAboveFeeCap {
        /// Maximum priority fee per gas
        tip: u128,
        /// Maximum fee per gas
        max_fee: u128,
    },
    /// The blob fee cap is below the blob base fee.
    #[error(
        "max fee per blob gas less than blob base fee: max_fee={max_fee} < base_fee={base_fee}"
    )]
    BlobFeeCapTooLow {
        /// Maximum fee per blob gas
        max_fee: u128,
        /// Block blob base fee
        base_fee: u128,
    },
    /// The sender cannot pay for gas and value.
    #[error(
        "insufficient funds for gas * price + value: address {address}, have={have} < want={want}"
    )]
    InsufficientFunds {
        /// Sender
        address: Address,
        /// Sender balance
        have: U256,
        /// Required balance
        want: U256,
    },
    /// The gas limit does not cover the intrinsic gas.
    #[error("intrinsic gas too low: have={have} < want={want}")]
    IntrinsicGasTooLow {
        /// Gas limit
        have: u64,
        /// Intrinsic gas
        want: u64,
    },
    /// The gas limit does not cover the calldata floor (EIP-7623).
    #[error("gas limit below calldata floor: have={have} < want={want}")]
    FloorGasTooLow {
        /// Gas limit
        have: u64,
        /// Floor gas
        want: u64,
    },
    /// The initcode exceeds the size limit (EIP-3860).
    #[error("max initcode size exceeded: size={size} > limit={limit}")]
    InitCodeTooLarge {
        /// Initcode size
        size: usize,
        /// Maximum initcode size
        limit: usize,
    },
    /// The block gas pool cannot cover the transaction.
    #[error(transparent)]
    GasPool(#[from] GasPoolError),
    /// State access failed.
    #[error(transparent)]
    State(#[from] StateError),
    /// The VM failed.
    #[error(transparent)]
    Evm(#[from] EvmError),
}

impl TransactionError {
    /// Whether the error must abort the block even when failing transactions are tolerated.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::State(_) | Self::Evm(_))
    }
}

/// Result of an applied transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOutcome {
    /// Transaction hash
    pub tx_hash: B256,
    /// Gas charged to the transaction, after refunds and the calldata floor
    pub gas_used: u64,
    /// Blob gas used by the transaction
    pub blob_gas_used: u64,
    /// How the VM call ended
    pub status: CallStatus,
    /// Return or revert data
    pub output: Bytes,
    /// Typed receipt
    pub receipt: ReceiptEnvelope,
}

/// Gas charged before execution: base cost, calldata, access list, authorizations and initcode.
pub fn intrinsic_gas(
    input: &[u8],
    is_create: bool,
    access_list: Option<&AccessList>,
    authorization_count: usize,
    rules: &Rules,
) -> u64 {
    let mut gas = if is_create && rules.is_homestead {
        frontier::TX_GAS_CONTRACT_CREATION
    } else {
        frontier::TX_GAS
    };

    let zero_bytes = input.iter().filter(|byte| **byte == 0).count() as u64;
    let non_zero_bytes = input.len() as u64 - zero_bytes;
    let non_zero_gas = if rules.is_istanbul {
        istanbul::TX_DATA_NON_ZERO_GAS
    } else {
        frontier::TX_DATA_NON_ZERO_GAS
    };
    gas = gas
        .saturating_add(zero_bytes.saturating_mul(frontier::TX_DATA_ZERO_GAS))
        .saturating_add(non_zero_bytes.saturating_mul(non_zero_gas));

    if let Some(access_list) = access_list {
        let storage_keys: usize = access_list.iter().map(|item| item.storage_keys.len()).sum();
        gas = gas
            .saturating_add(
                (access_list.len() as u64).saturating_mul(berlin::TX_ACCESS_LIST_ADDRESS_GAS),
            )
            .saturating_add(
                (storage_keys as u64).saturating_mul(berlin::TX_ACCESS_LIST_STORAGE_KEY_GAS),
            );
    }

    gas = gas.saturating_add(
        (authorization_count as u64).saturating_mul(prague::PER_EMPTY_ACCOUNT_COST),
    );

    if is_create && rules.is_shanghai {
        let words = (input.len() as u64).div_ceil(32);
        gas = gas.saturating_add(words.saturating_mul(shanghai::INIT_CODE_WORD_GAS));
    }
    gas
}

/// Minimum gas a transaction is charged for its calldata (EIP-7623).
pub fn floor_data_gas(input: &[u8]) -> u64 {
    let zero_bytes = input.iter().filter(|byte| **byte == 0).count() as u64;
    let non_zero_bytes = input.len() as u64 - zero_bytes;
    let tokens =
        zero_bytes.saturating_add(non_zero_bytes.saturating_mul(prague::NON_ZERO_BYTE_TOKENS));
    frontier::TX_GAS.saturating_add(tokens.saturating_mul(prague::TOTAL_COST_FLOOR_PER_TOKEN))
}

/// Applies `tx` to `state`.
///
/// `cumulative_gas_used` is the gas used by the preceding transactions of the block and ends up
/// in the receipt. On success the transaction is finalized in the overlay and its unused gas is
/// back in `pool`.
pub fn apply_transaction<E: Evm, R: StateReader>(
    evm: &E,
    env: &BlockEnv,
    state: &mut IntraBlockState<R>,
    pool: &mut GasPool,
    tx: &Recovered<TxEnvelope>,
    cumulative_gas_used: u64,
    mut tracer: Option<&mut dyn Tracer>,
) -> Result<TransactionOutcome, TransactionError> {
    let rules = &env.rules;
    let sender = tx.signer();
    let tx_hash = *tx.tx_hash();
    let gas_limit = tx.gas_limit();

    check_tx_type(tx, rules)?;

    let nonce = state.get_nonce(sender)?;
    match tx.nonce() {
        tx_nonce if tx_nonce < nonce => {
            return Err(TransactionError::NonceTooLow {
                address: sender,
                tx: tx_nonce,
                state: nonce,
            })
        }
        tx_nonce if tx_nonce > nonce => {
            return Err(TransactionError::NonceTooHigh {
                address: sender,
                tx: tx_nonce,
                state: nonce,
            })
        }
        _ if nonce == u64::MAX => return Err(TransactionError::NonceMax(sender)),
        _ => {}
    }

    let code_hash = state.get_code_hash(sender)?;
    if let Some(code) = state.get_code(sender)? {
        if !is_delegation(&code) {
            return Err(TransactionError::SenderNotEoa { address: sender, code_hash });
        }
    }

    check_fee_caps(tx, env)?;

    let authorizations = tx.authorization_list().unwrap_or_default();
    let intrinsic = intrinsic_gas(
        tx.input(),
        tx.is_create(),
        tx.access_list(),
        authorizations.len(),
        rules,
    );
    if gas_limit < intrinsic {
        return Err(TransactionError::IntrinsicGasTooLow { have: gas_limit, want: intrinsic });
    }
    let floor = rules.is_prague.then(|| floor_data_gas(tx.input()));
    if let Some(floor) = floor.filter(|floor| gas_limit < *floor) {
        return Err(TransactionError::FloorGasTooLow { have: gas_limit, want: floor });
    }
    if tx.is_create() && rules.is_shanghai && tx.input().len() > shanghai::MAX_INIT_CODE_SIZE {
        return Err(TransactionError::InitCodeTooLarge {
            size: tx.input().len(),
            limit: shanghai::MAX_INIT_CODE_SIZE,
        });
    }

    let blob_gas_used = tx.blob_gas_used().unwrap_or_default();
    pool.sub_gas(gas_limit)?;
    pool.sub_blob_gas(blob_gas_used)?;

    // buy gas
    let gas_price = U256::from(tx.effective_gas_price(env.base_fee));
    let blob_price = U256::from(env.blob_base_fee.unwrap_or_default());
    let blob_fee = U256::from(blob_gas_used) * blob_price;
    let want = U256::from(blob_gas_used)
        .checked_mul(U256::from(tx.max_fee_per_blob_gas().unwrap_or_default()))
        .and_then(|max_blob_fee| {
            U256::from(gas_limit)
                .checked_mul(U256::from(tx.max_fee_per_gas()))?
                .checked_add(tx.value())?
                .checked_add(max_blob_fee)
        });
    let balance = state.get_balance(sender)?;
    match want {
        Some(want) if balance >= want => {}
        // an overflowing cost is more than any balance
        _ => {
            return Err(TransactionError::InsufficientFunds {
                address: sender,
                have: balance,
                want: want.unwrap_or(U256::MAX),
            })
        }
    }
    state.sub_balance(sender, U256::from(gas_limit) * gas_price + blob_fee)?;
    state.set_nonce(sender, nonce + 1)?;

    if !authorizations.is_empty() {
        apply_authorizations(state, env, authorizations)?;
    }

    let msg = CallMessage {
        caller: sender,
        nonce,
        to: tx.to(),
        value: tx.value(),
        gas_limit: gas_limit - intrinsic,
        input: tx.input().clone(),
        is_free: false,
    };
    let log_start = state.log_count();
    let snapshot = state.snapshot();
    if let Some(tracer) = tracer.as_mut() {
        tracer.on_tx_start(tx_hash, &msg);
    }
    let outcome =
        evm.call(env, state, &msg, tracer.as_mut().map(|tracer| &mut **tracer as &mut dyn Tracer))?;
    if !outcome.is_success() {
        state.revert_to_snapshot(snapshot);
    }

    let mut gas_used = gas_limit - outcome.gas_left.min(msg.gas_limit);
    let refund_quotient =
        if rules.is_london { london::MAX_REFUND_QUOTIENT } else { frontier::MAX_REFUND_QUOTIENT };
    gas_used -= state.get_refund().min(gas_used / refund_quotient);
    if let Some(floor) = floor {
        gas_used = gas_used.max(floor);
    }
    let gas_left = gas_limit - gas_used;

    state.add_balance(sender, U256::from(gas_left) * gas_price)?;
    pool.add_gas(gas_left)?;

    let tip = match env.base_fee {
        Some(base_fee) => gas_price.saturating_sub(U256::from(base_fee)),
        None => gas_price,
    };
    state.add_balance(env.coinbase, U256::from(gas_used) * tip)?;

    state.finalize_tx(rules, &mut NoopWriter)?;

    let logs = state.logs_from(log_start);
    let status = if rules.is_byzantium {
        Eip658Value::Eip658(outcome.is_success())
    } else {
        Eip658Value::PostState(B256::ZERO)
    };
    let receipt = Receipt { status, cumulative_gas_used: cumulative_gas_used + gas_used, logs };
    let receipt = typed_receipt(
        tx,
        ReceiptWithBloom { logs_bloom: logs_bloom(receipt.logs.iter()), receipt },
    );

    if let Some(tracer) = tracer {
        tracer.on_tx_end(gas_used, None);
    }
    trace!(
        target: "blockexec::transition",
        %tx_hash,
        %sender,
        gas_used,
        status = %outcome.status,
        "applied transaction"
    );

    Ok(TransactionOutcome {
        tx_hash,
        gas_used,
        blob_gas_used,
        status: outcome.status,
        output: outcome.output,
        receipt,
    })
}

fn check_tx_type(tx: &TxEnvelope, rules: &Rules) -> Result<(), TransactionError> {
    let supported = match tx {
        TxEnvelope::Legacy(_) => true,
        TxEnvelope::Eip2930(_) => rules.is_berlin,
        TxEnvelope::Eip1559(_) => rules.is_london,
        TxEnvelope::Eip4844(_) => rules.is_cancun,
        TxEnvelope::Eip7702(signed) => {
            if rules.is_prague && signed.tx().authorization_list.is_empty() {
                return Err(TransactionError::EmptyAuthorizationList);
            }
            rules.is_prague
        }
    };
    if !supported {
        return Err(TransactionError::TxTypeNotSupported(tx.tx_type() as u8));
    }
    Ok(())
}

fn check_fee_caps(tx: &TxEnvelope, env: &BlockEnv) -> Result<(), TransactionError> {
    if let Some(base_fee) = env.base_fee {
        let max_fee = tx.max_fee_per_gas();
        if max_fee < base_fee as u128 {
            return Err(TransactionError::FeeCapTooLow { max_fee, base_fee });
        }
        if let Some(tip) = tx.max_priority_fee_per_gas() {
            if tip > max_fee {
                return Err(TransactionError::TipAboveFeeCap { tip, max_fee });
            }
        }
    }
    if let (Some(max_fee), Some(base_fee)) = (tx.max_fee_per_blob_gas(), env.blob_base_fee) {
        if max_fee < base_fee {
            return Err(TransactionError::BlobFeeCapTooLow { max_fee, base_fee });
        }
    }
    Ok(())
}

/// Installs the delegations of a set-code transaction. Invalid authorizations are skipped.
fn apply_authorizations<R: StateReader>(
    state: &mut IntraBlockState<R>,
    env: &BlockEnv,
    authorizations: &[SignedAuthorization],
) -> Result<(), StateError> {
    for signed in authorizations {
        let authorization = signed.inner();
        let chain_id = authorization.chain_id;
        if !chain_id.is_zero() && chain_id != U256::from(env.chain_id) {
            continue;
        }
        if authorization.nonce == u64::MAX {
            continue;
        }
        let Ok(authority) = signed.recover_authority() else { continue };

        if let Some(code) = state.get_code(authority)? {
            if !is_delegation(&code) {
                continue;
            }
        }
        if state.get_nonce(authority)? != authorization.nonce {
            continue;
        }

        if state.exist(authority)? {
            state.add_refund(prague::PER_EMPTY_ACCOUNT_COST - prague::PER_AUTH_BASE_COST);
        }
        let code = if authorization.address.is_zero() {
            Bytes::new()
        } else {
            delegation_code(authorization.address)
        };
        state.set_code(authority, code)?;
        state.set_nonce(authority, authorization.nonce + 1)?;
        trace!(
            target: "blockexec::transition",
            %authority,
            delegate = %authorization.address,
            "applied authorization"
        );
    }
    Ok(())
}

fn typed_receipt(tx: &TxEnvelope, receipt: ReceiptWithBloom<Receipt>) -> ReceiptEnvelope {
    match tx {
        TxEnvelope::Legacy(_) => ReceiptEnvelope::Legacy(receipt),
        TxEnvelope::Eip2930(_) => ReceiptEnvelope::Eip2930(receipt),
        TxEnvelope::Eip1559(_) => ReceiptEnvelope::Eip1559(receipt),
        TxEnvelope::Eip4844(_) => ReceiptEnvelope::Eip4844(receipt),
        TxEnvelope::Eip7702(_) => ReceiptEnvelope::Eip7702(receipt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_eips::eip2930::AccessListItem;
    use rstest::rstest;

    fn rules_at(fork: alloy_hardforks::EthereumHardfork) -> Rules {
        crate::ChainConfig::with_fork_at_genesis(fork).rules(0, 0)
    }

    #[rstest]
    #[case::frontier_call(alloy_hardforks::EthereumHardfork::Frontier, false, 21_000 + 4 + 68)]
    #[case::istanbul_call(alloy_hardforks::EthereumHardfork::Istanbul, false, 21_000 + 4 + 16)]
    #[case::homestead_create(alloy_hardforks::EthereumHardfork::Homestead, true, 53_000 + 4 + 68)]
    #[case::shanghai_create(
        alloy_hardforks::EthereumHardfork::Shanghai,
        true,
        53_000 + 4 + 16 + 2
    )]
    fn test_intrinsic_gas_by_era(
        #[case] fork: alloy_hardforks::EthereumHardfork,
        #[case] is_create: bool,
        #[case] expected: u64,
    ) {
        let input = [0u8, 1];
        assert_eq!(intrinsic_gas(&input, is_create, None, 0, &rules_at(fork)), expected);
    }

    #[test]
    fn test_access_list_and_authorizations() {
        let access_list = AccessList(vec![AccessListItem {
            address: Address::ZERO,
            storage_keys: vec![B256::ZERO, B256::with_last_byte(1)],
        }]);
        let rules = rules_at(alloy_hardforks::EthereumHardfork::Prague);
        assert_eq!(
            intrinsic_gas(&[], false, Some(&access_list), 2, &rules),
            21_000 + 2_400 + 2 * 1_900 + 2 * 25_000
        );
    }

    #[test]
    fn test_floor_data_gas() {
        assert_eq!(floor_data_gas(&[]), 21_000);
        assert_eq!(floor_data_gas(&[0, 0xff]), 21_000 + (1 + 4) * 10);
    }
}
