use alloy_consensus::Header;
use alloy_eips::eip4895::Withdrawal;
use alloy_primitives::{Bytes, U256};
use alloy_sol_types::SolCall;
use tracing::debug;

use super::{ConsensusEngine, ConsensusError, FinalizeOutcome};
use crate::{ChainConfig, ConsensusConfig, EngineHost};
use abi::commitStateCall;

mod abi {
    alloy_sol_types::sol! {
        /// Entry point of the state-sync receiver contract.
        function commitState(uint256 syncTime, bytes recordBytes) external returns (bool success);
    }
}

/// A state-sync event imported from the parent chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSyncEvent {
    /// Event id on the parent chain
    pub id: u64,
    /// Time the event was emitted on the parent chain
    pub time: u64,
    /// ABI-encoded event record handed to the receiver
    pub record: Bytes,
}

/// Supplies the state-sync events to commit in a block.
///
/// Implemented for closures `Fn(u64) -> Vec<StateSyncEvent>`.
pub trait StateSyncEventSource {
    /// Events to commit in block `block_number`, in commit order.
    fn events(&self, block_number: u64) -> Result<Vec<StateSyncEvent>, ConsensusError>;
}

impl<F> StateSyncEventSource for F
where
    F: Fn(u64) -> Vec<StateSyncEvent>,
{
    fn events(&self, block_number: u64) -> Result<Vec<StateSyncEvent>, ConsensusError> {
        Ok(self(block_number))
    }
}

/// Engine of a side chain that imports state-sync events from its parent chain.
///
/// On the first block of every sprint, each pending event is committed through the receiver
/// contract named in [`ConsensusConfig::StateSync`]. Other blocks have no consensus work.
#[derive(Debug, Clone)]
pub struct StateSyncConsensus<S> {
    source: S,
}

impl<S: StateSyncEventSource> StateSyncConsensus<S> {
    /// Creates an engine committing the events of `source`.
    pub const fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: StateSyncEventSource> ConsensusEngine for StateSyncConsensus<S> {
    fn initialize(
        &self,
        _config: &ChainConfig,
        _header: &Header,
        _host: &mut dyn EngineHost,
    ) -> Result<(), ConsensusError> {
        Ok(())
    }

    fn finalize(
        &self,
        config: &ChainConfig,
        header: &Header,
        _withdrawals: &[Withdrawal],
        host: &mut dyn EngineHost,
    ) -> Result<FinalizeOutcome, ConsensusError> {
        let ConsensusConfig::StateSync { receiver, sprint } = config.consensus else {
            return Ok(FinalizeOutcome::default());
        };
        if header.number == 0 || sprint == 0 || header.number % sprint != 0 {
            return Ok(FinalizeOutcome::default());
        }

        let events = self.source.events(header.number)?;
        for event in &events {
            let call = commitStateCall {
                syncTime: U256::from(event.time),
                recordBytes: event.record.clone(),
            };
            host.system_call(receiver, call.abi_encode().into())?;
        }
        debug!(
            target: "blockexec::consensus",
            block = header.number,
            events = events.len(),
            "committed state-sync events"
        );
        Ok(FinalizeOutcome::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StateError, SystemCallError, SystemCallOutput};
    use alloy_primitives::{Address, B256};

    #[derive(Default)]
    struct RecordingHost {
        calls: Vec<(Address, Bytes)>,
    }

    impl EngineHost for RecordingHost {
        fn system_call(
            &mut self,
            contract: Address,
            data: Bytes,
        ) -> Result<SystemCallOutput, SystemCallError> {
            self.calls.push((contract, data));
            Ok(SystemCallOutput::default())
        }

        fn system_call_const(
            &mut self,
            contract: Address,
            data: Bytes,
        ) -> Result<SystemCallOutput, SystemCallError> {
            self.system_call(contract, data)
        }

        fn increase_balance(&mut self, _: Address, _: U256) -> Result<(), StateError> {
            Ok(())
        }

        fn metered_gas(&self) -> u64 {
            0
        }
    }

    fn events(_block: u64) -> Vec<StateSyncEvent> {
        vec![
            StateSyncEvent { id: 1, time: 100, record: Bytes::from_static(b"one") },
            StateSyncEvent { id: 2, time: 101, record: Bytes::from_static(b"two") },
        ]
    }

    fn config() -> ChainConfig {
        ChainConfig::all_active().with_consensus(ConsensusConfig::StateSync {
            receiver: Address::repeat_byte(0x10),
            sprint: 16,
        })
    }

    #[test]
    fn test_commits_events_on_sprint_start() {
        let engine = StateSyncConsensus::new(events);
        let mut host = RecordingHost::default();
        let header = Header { number: 32, parent_hash: B256::ZERO, ..Default::default() };
        engine.finalize(&config(), &header, &[], &mut host).unwrap();

        assert_eq!(host.calls.len(), 2);
        assert!(host.calls.iter().all(|(to, _)| *to == Address::repeat_byte(0x10)));
        let decoded = commitStateCall::abi_decode(&host.calls[1].1).unwrap();
        assert_eq!(decoded.syncTime, U256::from(101));
        assert_eq!(decoded.recordBytes, Bytes::from_static(b"two"));
    }

    #[test]
    fn test_skips_blocks_inside_sprint() {
        let engine = StateSyncConsensus::new(events);
        let mut host = RecordingHost::default();
        let header = Header { number: 33, ..Default::default() };
        engine.finalize(&config(), &header, &[], &mut host).unwrap();
        assert!(host.calls.is_empty());
    }
}
