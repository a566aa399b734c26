use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use alloy_consensus::{transaction::Recovered, Block, TxEnvelope};
use alloy_primitives::{Address, Bloom, Log, B256, U256};
use tracing::{debug, trace};

use super::{
    logs_bloom_of, logs_hash, receipts_root, transactions_root, verify_blob_gas_used,
    verify_gas_used, verify_logs_bloom, verify_receipts_root, CommitmentMismatch,
    EphemeralExecResult, RejectedTx, StateSyncReceipt,
};
use crate::{
    apply_transaction, BlockEnv, ChainConfig, ConsensusEngine, ConsensusError, Evm, GasPool,
    IntraBlockState, NoopWriter, StateError, StateReader, SyscallErrorPolicy, SystemCaller,
    Tracer, TracerError, TracerFactory, TransactionError, VmConfig, WriterWithChangeSets,
};

/// Failure that aborts a block.
#[derive(Debug, thiserror::Error)]
pub enum BlockExecutionError {
    /// The consensus engine failed before the transactions.
    #[error("block initialization: {0}")]
    Initialize(#[source] ConsensusError),
    /// A transaction could not be applied.
    #[error("could not apply tx {index} from block {block_number} [{tx_hash}]: {source}")]
    Transaction {
        /// Position in the block
        index: usize,
        /// Block number
        block_number: u64,
        /// Transaction hash
        tx_hash: B256,
        /// Cause
        #[source]
        source: TransactionError,
    },
    /// The consensus engine failed after the transactions.
    #[error("block finalization: {0}")]
    Finalize(#[source] ConsensusError),
    /// A computed commitment disagrees with the header.
    #[error(transparent)]
    Mismatch(#[from] CommitmentMismatch),
    /// Handing the overlay to the writer failed.
    #[error("commit: {0}")]
    Commit(#[source] StateError),
    /// A tracer could not be created or flushed.
    #[error("could not obtain tracer: {0}")]
    Tracer(#[from] TracerError),
    /// The caller cancelled execution.
    #[error("block {block} interrupted before tx {index}")]
    Interrupted {
        /// Block number
        block: u64,
        /// Next transaction that would have run
        index: usize,
    },
    /// The sender list does not match the transaction list.
    #[error("got {senders} senders for {transactions} transactions")]
    SenderCountMismatch {
        /// Number of transactions in the block
        transactions: usize,
        /// Number of senders supplied
        senders: usize,
    },
}

/// Steps of [`BlockExecutor::execute`], in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum ExecutionPhase {
    /// Consensus hooks before the transactions.
    #[display("initialize")]
    Initialize,
    /// The transaction loop.
    #[display("apply-transactions")]
    ApplyTransactions,
    /// Consensus hooks after the transactions.
    #[display("finalize")]
    Finalize,
    /// Roots, bloom and logs hash.
    #[display("compute-commitments")]
    ComputeCommitments,
    /// Comparison with the header.
    #[display("verify")]
    VerifyAgainstHeader,
    /// Hand-off to the writer.
    #[display("commit")]
    CommitOverlay,
    /// Assembly of the result.
    #[display("build-result")]
    BuildResult,
}

/// Lets the caller stop a block between transactions.
pub trait Interrupt {
    /// Whether execution should stop.
    fn is_interrupted(&self) -> bool;
}

/// Shared cancellation switch.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Creates a flag that is not set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag. Every clone observes it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

impl Interrupt for CancellationFlag {
    fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Executes blocks against a state reader and proves them against their headers.
pub struct BlockExecutor<'a, E, C> {
    config: &'a ChainConfig,
    vm_config: VmConfig,
    evm: E,
    engine: C,
    tracer_factory: Option<&'a dyn TracerFactory>,
    interrupt: Option<&'a dyn Interrupt>,
}

impl<E, C> core::fmt::Debug for BlockExecutor<'_, E, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockExecutor")
            .field("config", &self.config)
            .field("vm_config", &self.vm_config)
            .field("tracer_factory", &self.tracer_factory.is_some())
            .field("interrupt", &self.interrupt.is_some())
            .finish_non_exhaustive()
    }
}

impl<'a, E: Evm, C: ConsensusEngine> BlockExecutor<'a, E, C> {
    /// Creates an executor for blocks of `config`.
    pub fn new(config: &'a ChainConfig, evm: E, engine: C) -> Self {
        Self {
            config,
            vm_config: VmConfig::default(),
            evm,
            engine,
            tracer_factory: None,
            interrupt: None,
        }
    }

    /// Sets the execution flags.
    pub const fn with_vm_config(mut self, vm_config: VmConfig) -> Self {
        self.vm_config = vm_config;
        self
    }

    /// Sets where per-transaction tracers come from when [`VmConfig::debug`] is set.
    pub fn with_tracer_factory(mut self, factory: &'a dyn TracerFactory) -> Self {
        self.tracer_factory = Some(factory);
        self
    }

    /// Sets the cancellation check run before every transaction.
    pub fn with_interrupt(mut self, interrupt: &'a dyn Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// Execution flags in use.
    pub const fn vm_config(&self) -> &VmConfig {
        &self.vm_config
    }

    /// Error policy of system calls on this chain.
    pub const fn syscall_policy(&self) -> SyscallErrorPolicy {
        if self.config.consensus.is_state_sync() {
            SyscallErrorPolicy::Swallow
        } else {
            SyscallErrorPolicy::Propagate
        }
    }

    /// Builds the environment the VM sees for `block`.
    pub fn block_env(&self, block: &Block<TxEnvelope>) -> BlockEnv {
        let header = &block.header;
        // after the merge the difficulty field is zero and mix hash carries the randomness
        let difficulty = if header.difficulty.is_zero() {
            U256::from_be_bytes(header.mix_hash.0)
        } else {
            header.difficulty
        };
        BlockEnv {
            number: header.number,
            timestamp: header.timestamp,
            coinbase: header.beneficiary,
            base_fee: header.base_fee_per_gas,
            difficulty,
            gas_limit: header.gas_limit,
            chain_id: self.config.chain_id,
            blob_base_fee: header
                .excess_blob_gas
                .and_then(|excess| self.config.blob_base_fee(excess, header.timestamp)),
            rules: self.config.rules(header.number, header.timestamp),
        }
    }

    /// Executes `block`, whose transactions were signed by `senders`, on top of `reader`.
    ///
    /// Unless [`VmConfig::read_only`] is set the net state changes and the change sets of the
    /// block go to `writer`. In stateless mode failing transactions are rejected instead of
    /// failing the block. Nothing is checked against the header in stateless or read-only mode.
    pub fn execute<R, W>(
        &self,
        block: &Block<TxEnvelope>,
        senders: &[Address],
        reader: R,
        writer: &mut W,
    ) -> Result<EphemeralExecResult, BlockExecutionError>
    where
        R: StateReader,
        W: WriterWithChangeSets,
    {
        let header = &block.header;
        let number = header.number;
        let transactions = &block.body.transactions;
        if transactions.len() != senders.len() {
            return Err(BlockExecutionError::SenderCountMismatch {
                transactions: transactions.len(),
                senders: senders.len(),
            });
        }

        let block_hash = header.hash_slow();
        let env = self.block_env(block);
        let rules = env.rules;
        let policy = self.syscall_policy();
        let vm_config = self.vm_config;
        debug!(
            target: "blockexec::block",
            number,
            %block_hash,
            txs = transactions.len(),
            stateless = vm_config.stateless_exec,
            "executing block"
        );

        let mut state = IntraBlockState::new(reader);
        let mut pool = GasPool::new();
        pool.set_gas(header.gas_limit);
        pool.set_blob_gas(self.config.max_blob_gas_per_block(header.timestamp));

        enter(number, ExecutionPhase::Initialize);
        let mut host = SystemCaller::new(&self.evm, &env, &mut state).with_policy(policy);
        self.engine
            .initialize(self.config, header, &mut host)
            .map_err(BlockExecutionError::Initialize)?;
        state
            .finalize_tx(&rules, &mut NoopWriter)
            .map_err(|err| BlockExecutionError::Initialize(err.into()))?;

        enter(number, ExecutionPhase::ApplyTransactions);
        let mut included = Vec::with_capacity(transactions.len());
        let mut receipts = Vec::with_capacity(transactions.len());
        let mut rejected = Vec::new();
        let mut gas_used = 0u64;
        let mut blob_gas_used = 0u64;
        let mut tx_log_count = state.log_count();
        for (index, (tx, sender)) in transactions.iter().zip(senders).enumerate() {
            if self.interrupt.is_some_and(|interrupt| interrupt.is_interrupted()) {
                return Err(BlockExecutionError::Interrupted { block: number, index });
            }

            let tx = Recovered::new_unchecked(tx.clone(), *sender);
            let tx_hash = *tx.tx_hash();
            state.set_tx_context(tx_hash, block_hash, index);

            let mut tracer = match self.tracer_factory {
                Some(factory) if vm_config.debug => Some(factory.get_tracer(index, tx_hash)?),
                _ => None,
            };
            let snapshot = state.snapshot();
            let (pool_gas, pool_blob_gas) = (pool.gas(), pool.blob_gas());

            let result = apply_transaction(
                &self.evm,
                &env,
                &mut state,
                &mut pool,
                &tx,
                gas_used,
                tracer.as_mut().map(|tracer| &mut **tracer as &mut dyn Tracer),
            );
            if let Some(tracer) = tracer.as_mut() {
                if let Err(err) = &result {
                    tracer.on_tx_end(0, Some(&err.to_string()));
                }
                tracer.flush()?;
            }

            match result {
                Ok(outcome) => {
                    gas_used += outcome.gas_used;
                    blob_gas_used += outcome.blob_gas_used;
                    tx_log_count = state.log_count();
                    included.push(tx);
                    if !vm_config.no_receipts {
                        receipts.push(outcome.receipt);
                    }
                }
                Err(source) if !vm_config.stateless_exec || source.is_fatal() => {
                    return Err(BlockExecutionError::Transaction {
                        index,
                        block_number: number,
                        tx_hash,
                        source,
                    });
                }
                Err(err) => {
                    state.revert_to_snapshot(snapshot);
                    pool.set_gas(pool_gas);
                    pool.set_blob_gas(pool_blob_gas);
                    debug!(
                        target: "blockexec::block",
                        index,
                        %tx_hash,
                        %err,
                        "rejected transaction"
                    );
                    rejected.push(RejectedTx { index, error: err.to_string() });
                }
            }
        }

        let mut requests = Vec::new();
        if !vm_config.read_only {
            enter(number, ExecutionPhase::Finalize);
            let withdrawals =
                block.body.withdrawals.as_ref().map(|w| w.as_slice()).unwrap_or_default();
            let mut host = SystemCaller::new(&self.evm, &env, &mut state)
                .with_policy(policy)
                .with_metering(rules.is_prague);
            let outcome = self
                .engine
                .finalize(self.config, header, withdrawals, &mut host)
                .map_err(BlockExecutionError::Finalize)?;
            let syscall_gas = host.gas_used();
            if syscall_gas > 0 {
                trace!(target: "blockexec::block", number, syscall_gas, "metered system calls");
            }
            gas_used += syscall_gas;
            requests = outcome.requests;
            state
                .finalize_tx(&rules, &mut NoopWriter)
                .map_err(|err| BlockExecutionError::Finalize(err.into()))?;
        }

        enter(number, ExecutionPhase::ComputeCommitments);
        let receipts_root = receipts_root(&receipts);
        let tx_root = transactions_root(&included);
        let logs_bloom = if vm_config.no_receipts { Bloom::ZERO } else { logs_bloom_of(&receipts) };
        let block_logs: Vec<Log> = state.logs().cloned().collect();
        let logs_hash = logs_hash(&block_logs);

        if !(vm_config.stateless_exec || vm_config.read_only) {
            enter(number, ExecutionPhase::VerifyAgainstHeader);
            if rules.is_byzantium && !vm_config.no_receipts {
                verify_receipts_root(header, receipts_root, &receipts, &included, gas_used)?;
            }
            verify_gas_used(header, gas_used)?;
            verify_blob_gas_used(header, blob_gas_used)?;
            if !vm_config.no_receipts {
                verify_logs_bloom(header, logs_bloom)?;
            }
        }

        if !vm_config.read_only {
            enter(number, ExecutionPhase::CommitOverlay);
            state.commit_block(writer).map_err(BlockExecutionError::Commit)?;
            writer.write_change_sets().map_err(BlockExecutionError::Commit)?;
        }

        enter(number, ExecutionPhase::BuildResult);
        let state_sync_receipt = self
            .config
            .consensus
            .is_state_sync()
            .then(|| state.logs_from(tx_log_count))
            .filter(|logs| !logs.is_empty())
            .map(|logs| StateSyncReceipt::new(block_hash, number, receipts.len(), logs));

        debug!(
            target: "blockexec::block",
            number,
            gas_used,
            included = included.len(),
            rejected = rejected.len(),
            "executed block"
        );
        Ok(EphemeralExecResult {
            state_root: B256::ZERO,
            tx_root,
            receipts_root,
            logs_hash,
            logs_bloom,
            receipts,
            rejected,
            difficulty: header.difficulty,
            gas_used,
            blob_gas_used,
            requests,
            state_sync_receipt,
        })
    }
}

fn enter(number: u64, phase: ExecutionPhase) {
    trace!(target: "blockexec::block", number, %phase, "entering phase");
}
