use std::{path::PathBuf, sync::Arc};

use alloy_consensus::{transaction::SignerRecoverable, Block, BlockBody, Header, TxEnvelope};
use alloy_eips::eip4895::Withdrawals;
use alloy_hardforks::EthereumHardfork;
use alloy_trie::EMPTY_ROOT_HASH;
use blockexec::{
    kv::StateDatabase, test_utils::TransferVm, BeaconConsensus, BlockExecutor, CacheConfig,
    CachedStateReader, ChainConfig, ConsensusConfig, ConsensusEngine, FileTracerFactory,
    PlainStateWriter, ReadThroughCache, RecoveryMetrics, StateSyncConsensus, StateSyncEvent,
    VmConfig,
};
use clap::Parser;
use tracing::{debug, info};

use crate::{
    common::LogArgs,
    t8n::{
        alloc_from_store, load_from_stdin, load_json, store_from_alloc, write_json, Env, Result,
        SyncEvent, T8nError, T8nOutput, TransitionInputs, STDIN,
    },
};

/// Executes a full state transition
#[derive(Parser, Debug)]
pub struct Cmd {
    /// Write a JSON-lines trace of every transaction to trace-<txIndex>-<txHash>.jsonl under
    /// the output directory
    #[arg(long)]
    pub trace: bool,

    /// Specifies where output files are placed. Will be created if it does not exist.
    #[arg(long = "output.basedir")]
    pub output_basedir: Option<PathBuf>,

    /// Determines where to put the `alloc` of the post-state.
    /// `stdout` - into the stdout output
    /// `stderr` - into the stderr output
    /// <file> - into the file <file>
    #[arg(long = "output.alloc", default_value = "alloc.json")]
    pub output_alloc: String,

    /// Determines where to put the `result` (roots, receipts, gas used) of the block.
    /// `stdout` - into the stdout output
    /// `stderr` - into the stderr output
    /// <file> - into the file <file>
    #[arg(long = "output.result", default_value = "result.json")]
    pub output_result: String,

    /// File name of where to find the prestate alloc to use.
    #[arg(long = "input.alloc", default_value = STDIN)]
    pub input_alloc: String,

    /// File name of where to find the prestate env to use.
    #[arg(long = "input.env", default_value = STDIN)]
    pub input_env: String,

    /// File name of where to find the transactions to apply.
    #[arg(long = "input.txs", default_value = STDIN)]
    pub input_txs: String,

    /// File name of the state-sync events to commit, on state-sync chains.
    #[arg(long = "input.events")]
    pub input_events: Option<String>,

    /// Chain configuration in genesis-file layout. Overrides `--state.fork` and
    /// `--state.chainid`.
    #[arg(long = "input.chain")]
    pub input_chain: Option<String>,

    /// Name of the ruleset to use. The fork and every fork before it are active from genesis.
    #[arg(long = "state.fork", default_value = "prague")]
    pub fork: String,

    /// `ChainID` to use
    #[arg(long = "state.chainid", default_value = "1")]
    pub chain_id: u64,

    /// Fail on the first invalid transaction and verify the commitments given in the env
    /// instead of rejecting transactions.
    #[arg(long)]
    pub strict: bool,

    /// Leave receipts out of the result.
    #[arg(long = "no-receipts")]
    pub no_receipts: bool,

    /// Entries of the read-through state cache.
    #[arg(long = "cache.capacity", default_value_t = CacheConfig::default().capacity)]
    pub cache_capacity: usize,

    /// Logging
    #[command(flatten)]
    pub log: LogArgs,
}

impl Cmd {
    /// Loads the inputs, executes the block and writes the outputs.
    pub fn run(&self) -> Result<()> {
        let inputs = self.load_inputs()?;
        let output = self.transition(inputs)?;
        self.output_results(&output)
    }

    fn load_inputs(&self) -> Result<TransitionInputs> {
        let inputs = [&self.input_alloc, &self.input_env, &self.input_txs];
        if inputs.into_iter().any(|input| input == STDIN) {
            return load_from_stdin();
        }
        let events: Vec<SyncEvent> = match &self.input_events {
            Some(path) => load_json(path)?,
            None => Vec::new(),
        };
        Ok(TransitionInputs {
            alloc: load_json(&self.input_alloc)?,
            env: load_json(&self.input_env)?,
            txs: load_json(&self.input_txs)?,
            events,
        })
    }

    /// Chain configuration of the run.
    pub fn chain_config(&self) -> Result<ChainConfig> {
        if let Some(path) = &self.input_chain {
            return load_json(path);
        }
        let fork: EthereumHardfork =
            self.fork.parse().map_err(|_| T8nError::InvalidFork(self.fork.clone()))?;
        Ok(ChainConfig::with_fork_at_genesis(fork).with_chain_id(self.chain_id))
    }

    /// Executes the block described by `inputs` on top of its allocation.
    pub fn transition(&self, inputs: TransitionInputs) -> Result<T8nOutput> {
        let config = self.chain_config()?;
        let TransitionInputs { alloc, env, txs, events } = inputs;

        let mut senders = Vec::with_capacity(txs.len());
        let mut transactions = Vec::with_capacity(txs.len());
        for (index, tx) in txs.into_iter().enumerate() {
            let sender = match tx.sender {
                Some(sender) => sender,
                None => tx.tx.recover_signer().map_err(|err| T8nError::InvalidTransaction {
                    index,
                    reason: err.to_string(),
                })?,
            };
            senders.push(sender);
            transactions.push(tx.tx);
        }
        let block = build_block(&config, &env, transactions);

        let store = store_from_alloc(&alloc);
        let metrics = Arc::new(RecoveryMetrics::new());
        let cache = ReadThroughCache::new(
            store.snapshot(),
            CacheConfig { capacity: self.cache_capacity, ..Default::default() },
        );
        let reader = CachedStateReader::new(&cache, Arc::clone(&metrics));

        let vm_config = VmConfig::default()
            .with_stateless_exec(!self.strict)
            .with_no_receipts(self.no_receipts)
            .with_debug(self.trace);
        let trace_dir = self.output_basedir.clone().unwrap_or_default();
        if self.trace && !trace_dir.as_os_str().is_empty() {
            std::fs::create_dir_all(&trace_dir).map_err(|e| T8nError::OutputWrite {
                file: trace_dir.display().to_string(),
                source: e,
            })?;
        }
        let factory = FileTracerFactory::new(trace_dir);
        let engine = consensus_engine(&config, events);
        let mut executor = BlockExecutor::new(&config, TransferVm::new(), engine)
            .with_vm_config(vm_config);
        if self.trace {
            executor = executor.with_tracer_factory(&factory);
        }

        let mut writer = PlainStateWriter::new(block.header.number);
        let result = executor.execute(&block, &senders, reader, &mut writer)?;
        store.commit(writer.finish());
        debug!(
            target: "blockexec_t8n",
            cache_hits = cache.hits(),
            cache_misses = cache.misses(),
            recovery = ?metrics.stats(),
            "state access"
        );
        info!(
            target: "blockexec_t8n",
            number = block.header.number,
            gas_used = result.gas_used,
            rejected = result.rejected.len(),
            "executed block"
        );

        Ok(T8nOutput { alloc: alloc_from_store(&store)?, result })
    }

    fn output_results(&self, output: &T8nOutput) -> Result<()> {
        let basedir = self.output_basedir.as_deref();
        write_json(&output.result, &self.output_result, basedir)?;
        write_json(&output.alloc, &self.output_alloc, basedir)?;
        if self.output_result != "stdout" && self.output_alloc != "stdout" {
            write_json(output, "stdout", None)?;
        }
        Ok(())
    }
}

/// Header and body of the block described by `env`.
pub fn build_block(
    config: &ChainConfig,
    env: &Env,
    transactions: Vec<TxEnvelope>,
) -> Block<TxEnvelope> {
    let rules = config.rules(env.current_number, env.current_timestamp);
    let expected = &env.expected;
    let header = Header {
        parent_hash: env.parent_hash,
        beneficiary: env.current_coinbase,
        number: env.current_number,
        timestamp: env.current_timestamp,
        gas_limit: env.current_gas_limit,
        difficulty: env.current_difficulty.unwrap_or_default(),
        mix_hash: env.current_random.unwrap_or_default(),
        base_fee_per_gas: env.current_base_fee,
        excess_blob_gas: env.current_excess_blob_gas.or(rules.is_cancun.then_some(0)),
        blob_gas_used: expected.blob_gas_used.or(rules.is_cancun.then_some(0)),
        parent_beacon_block_root: env.parent_beacon_block_root,
        withdrawals_root: rules.is_shanghai.then_some(EMPTY_ROOT_HASH),
        gas_used: expected.gas_used.unwrap_or_default(),
        receipts_root: expected.receipts_root.unwrap_or(EMPTY_ROOT_HASH),
        logs_bloom: expected.logs_bloom.unwrap_or_default(),
        ..Default::default()
    };
    let withdrawals = env
        .withdrawals
        .clone()
        .map(Withdrawals::new)
        .or_else(|| rules.is_shanghai.then(Withdrawals::default));
    Block { header, body: BlockBody { transactions, ommers: vec![], withdrawals } }
}

fn consensus_engine(config: &ChainConfig, events: Vec<SyncEvent>) -> Box<dyn ConsensusEngine> {
    match config.consensus {
        ConsensusConfig::Beacon => Box::new(BeaconConsensus::new()),
        ConsensusConfig::StateSync { .. } => {
            let events: Vec<StateSyncEvent> = events.into_iter().map(Into::into).collect();
            Box::new(StateSyncConsensus::new(move |_block: u64| events.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::t8n::Transaction;
    use alloy_primitives::{address, B256, U256};
    use blockexec::{
        test_utils::{transfer_tx, CALLER, COINBASE, RECIPIENT},
        EphemeralExecResult,
    };
    use std::path::Path;

    const ALLOC: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/alloc.json");
    const ENV: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/env.json");

    fn write_txs(dir: &Path, nonces: &[u64]) -> String {
        let txs: Vec<Transaction> = nonces
            .iter()
            .map(|nonce| Transaction {
                tx: transfer_tx(*nonce, RECIPIENT, U256::from(1_000)),
                sender: Some(CALLER),
            })
            .collect();
        let path = dir.join("txs.json");
        std::fs::write(&path, serde_json::to_string(&txs).unwrap()).unwrap();
        path.display().to_string()
    }

    fn cmd(txs: &str, extra: &[&str]) -> Cmd {
        let args = ["t8n", "--input.alloc", ALLOC, "--input.env", ENV, "--input.txs", txs];
        let fork = ["--state.fork", "shanghai"];
        Cmd::parse_from(args.into_iter().chain(extra.iter().copied()).chain(fork))
    }

    #[test]
    fn test_transition_rejects_and_keeps_going() {
        let dir = tempfile::tempdir().unwrap();
        let txs = write_txs(dir.path(), &[0, 5, 1]);
        let cmd = cmd(&txs, &[]);

        let output = cmd.transition(cmd.load_inputs().unwrap()).unwrap();

        assert_eq!(output.result.gas_used, 42_000);
        assert_eq!(output.result.receipts.len(), 2);
        assert_eq!(output.result.rejected.len(), 1);
        assert_eq!(output.result.rejected[0].index, 1);

        let alloc = &output.alloc;
        assert_eq!(alloc[&RECIPIENT].balance, U256::from(2_000));
        assert_eq!(alloc[&COINBASE].balance, U256::from(3 * 42_000));
        assert_eq!(alloc[&CALLER].nonce, 2);
        let contract = &alloc[&address!("0x000000000000000000000000000000000000c0de")];
        assert_eq!(contract.storage[&B256::with_last_byte(1)], U256::from(2));
    }

    #[test]
    fn test_strict_transition_fails_on_invalid_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let txs = write_txs(dir.path(), &[0, 5]);
        let cmd = cmd(&txs, &["--strict"]);

        let err = cmd.transition(cmd.load_inputs().unwrap()).unwrap_err();
        assert!(matches!(err, T8nError::Execution(_)), "{err}");
    }

    #[test]
    fn test_unknown_fork_is_rejected() {
        let cmd = Cmd::parse_from(["t8n", "--state.fork", "nofork"]);
        assert!(matches!(cmd.chain_config(), Err(T8nError::InvalidFork(fork)) if fork == "nofork"));
    }

    #[test]
    fn test_outputs_land_under_basedir() {
        let dir = tempfile::tempdir().unwrap();
        let txs = write_txs(dir.path(), &[0]);
        let out = dir.path().join("out");
        let out_arg = out.display().to_string();
        let cmd = cmd(&txs, &["--output.basedir", &out_arg]);

        cmd.run().unwrap();

        let result_path = out.join("result.json").display().to_string();
        let result: EphemeralExecResult = load_json(&result_path).unwrap();
        assert_eq!(result.gas_used, 21_000);
        assert!(out.join("alloc.json").exists());
    }
}
