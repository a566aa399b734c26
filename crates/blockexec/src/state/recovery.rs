//! Code-hash recovery for delegated accounts.
//!
//! Some account records lost their code hash: the field-set announces one but the stored value
//! is empty. For EIP-7702 delegated accounts the hash can still be found, first through the
//! legacy code-pointer table and then through the latest-code store. A candidate hash is
//! accepted only when the code it designates is a well-formed delegation, which keeps stale
//! pointers from turning a plain externally-owned account into a contract.

use alloy_primitives::{keccak256, Address, Bytes, B256};
use tracing::{debug, trace};

use crate::{
    constants::DEFAULT_INCARNATION, decode_account, has_code_hash_in_storage, is_delegation,
    is_empty_code_hash, Account, RecoveryMetrics, StateError,
};

/// Lookups needed by [`recover_code_hash`].
pub(crate) trait RecoveryLookup {
    /// Raw code-pointer entry of `address` at `incarnation`.
    fn code_pointer(&self, address: Address, incarnation: u64)
        -> Result<Option<Bytes>, StateError>;

    /// Code blob stored under `code_hash`.
    fn code_by_hash(&self, code_hash: B256) -> Result<Option<Bytes>, StateError>;

    /// Latest code of `address`, if a latest-code store exists.
    fn latest_code(&self, address: Address) -> Result<Option<Bytes>, StateError>;
}

/// Reads the code stored under `code_hash`.
///
/// Falls back to the latest code of `address` when the code table lacks the blob, which is the
/// case for hashes recovered from the latest-code store.
pub(crate) fn read_code<L: RecoveryLookup>(
    lookup: &L,
    address: Address,
    code_hash: B256,
) -> Result<Option<Bytes>, StateError> {
    if is_empty_code_hash(&code_hash) {
        return Ok(None);
    }
    if let Some(code) = lookup.code_by_hash(code_hash)? {
        return Ok(Some(code));
    }
    Ok(lookup.latest_code(address)?.filter(|code| keccak256(code) == code_hash))
}

/// Decodes the raw record of `address` and restores a lost delegation code hash.
pub(crate) fn resolve_account<L: RecoveryLookup>(
    lookup: &L,
    address: Address,
    raw: &[u8],
    metrics: &RecoveryMetrics,
) -> Result<Account, StateError> {
    let mut account = decode_account(raw).map_err(|err| StateError::decode(address, err))?;
    if account.has_empty_code_hash() && has_code_hash_in_storage(raw) {
        if let Some(code_hash) = recover_code_hash(lookup, address, account.incarnation, metrics)? {
            account.code_hash = code_hash;
        }
    }
    Ok(account)
}

/// Looks for the code hash of a delegated account whose record lost it.
///
/// The code-pointer table is probed at `incarnation`, or at [`DEFAULT_INCARNATION`] when the
/// account never had one. The latest-code store is consulted only if the pointer does not lead to
/// a delegation. Returns `None` when neither source yields one.
pub(crate) fn recover_code_hash<L: RecoveryLookup>(
    lookup: &L,
    address: Address,
    incarnation: u64,
    metrics: &RecoveryMetrics,
) -> Result<Option<B256>, StateError> {
    metrics.record_candidate();
    let probe_incarnation = if incarnation == 0 { DEFAULT_INCARNATION } else { incarnation };

    let pointer = lookup
        .code_pointer(address, probe_incarnation)?
        .filter(|raw| raw.len() == 32)
        .map(|raw| B256::from_slice(&raw))
        .filter(|hash| !is_empty_code_hash(hash));
    if let Some(code_hash) = pointer {
        match lookup.code_by_hash(code_hash)? {
            Some(code) if is_delegation(&code) => {
                metrics.record_pointer_hit();
                debug!(
                    target: "blockexec::state",
                    %address,
                    %code_hash,
                    "recovered delegation code hash from code pointer"
                );
                return Ok(Some(code_hash));
            }
            Some(_) => {
                metrics.record_rejected_blob();
                trace!(
                    target: "blockexec::state",
                    %address,
                    %code_hash,
                    "code pointer does not lead to a delegation"
                );
            }
            None => {}
        }
    }

    if let Some(code) = lookup.latest_code(address)? {
        if is_delegation(&code) {
            let code_hash = keccak256(&code);
            metrics.record_latest_code_hit();
            debug!(
                target: "blockexec::state",
                %address,
                %code_hash,
                "recovered delegation code hash from latest code"
            );
            return Ok(Some(code_hash));
        }
        if !code.is_empty() {
            metrics.record_rejected_blob();
        }
    }

    metrics.record_miss();
    Ok(None)
}
