//! Consensus-engine hooks around transaction execution.
//!
//! An engine runs protocol logic before the first transaction of a block
//! ([`ConsensusEngine::initialize`]) and after the last one ([`ConsensusEngine::finalize`]). It
//! reaches state only through an [`EngineHost`], which is how its system calls end up in the block
//! overlay.

mod beacon;
mod state_sync;

pub use beacon::*;
pub use state_sync::*;

use alloy_consensus::{transaction::Recovered, Header, ReceiptEnvelope, TxEnvelope};
use alloy_eips::eip4895::Withdrawal;
use alloy_primitives::{Bytes, B256};
use auto_impl::auto_impl;

use crate::{
    block::{logs_bloom_of, receipts_root, transactions_root},
    ChainConfig, EngineHost, StateError, SystemCallError,
};

/// Failure of a consensus engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsensusError {
    /// A system call failed.
    #[error(transparent)]
    SystemCall(#[from] SystemCallError),
    /// State access failed.
    #[error(transparent)]
    State(#[from] StateError),
    /// A Cancun header lacks the parent beacon block root.
    #[error("missing parent beacon block root")]
    MissingParentBeaconBlockRoot,
    /// The genesis block declares a non-zero parent beacon block root.
    #[error("parent beacon block root of genesis must be zero, got {0}")]
    GenesisParentBeaconBlockRootNotZero(B256),
    /// State-sync events could not be fetched.
    #[error("state-sync events for block {block}: {message}")]
    EventSource {
        /// Block the events were fetched for
        block: u64,
        /// Failure reported by the source
        message: String,
    },
}

/// What [`ConsensusEngine::finalize`] produced besides state changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeOutcome {
    /// EIP-7685 requests, each prefixed with its request type
    pub requests: Vec<Bytes>,
}

/// Header and requests produced by [`ConsensusEngine::finalize_and_assemble`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledBlock {
    /// Header with the computed commitments filled in
    pub header: Header,
    /// EIP-7685 requests
    pub requests: Vec<Bytes>,
}

/// Protocol logic that surrounds the transactions of a block.
#[auto_impl(&, Box, Arc)]
pub trait ConsensusEngine {
    /// Runs before the first transaction.
    fn initialize(
        &self,
        config: &ChainConfig,
        header: &Header,
        host: &mut dyn EngineHost,
    ) -> Result<(), ConsensusError>;

    /// Runs after the last transaction.
    fn finalize(
        &self,
        config: &ChainConfig,
        header: &Header,
        withdrawals: &[Withdrawal],
        host: &mut dyn EngineHost,
    ) -> Result<FinalizeOutcome, ConsensusError>;

    /// Runs [`finalize`](Self::finalize) and returns `header` with the transaction root, the
    /// receipts root, the logs bloom and the gas used recomputed.
    ///
    /// `gas_used` is the gas of the transactions. Metered system-call gas is added on top.
    #[allow(clippy::too_many_arguments)]
    fn finalize_and_assemble(
        &self,
        config: &ChainConfig,
        header: &Header,
        withdrawals: &[Withdrawal],
        host: &mut dyn EngineHost,
        transactions: &[Recovered<TxEnvelope>],
        receipts: &[ReceiptEnvelope],
        gas_used: u64,
    ) -> Result<AssembledBlock, ConsensusError> {
        let outcome = self.finalize(config, header, withdrawals, host)?;
        let mut header = header.clone();
        header.transactions_root = transactions_root(transactions);
        header.receipts_root = receipts_root(receipts);
        header.logs_bloom = logs_bloom_of(receipts);
        header.gas_used = gas_used + host.metered_gas();
        Ok(AssembledBlock { header, requests: outcome.requests })
    }
}
