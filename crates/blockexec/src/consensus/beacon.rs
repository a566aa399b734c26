use alloy_consensus::Header;
use alloy_eips::{
    eip2935::HISTORY_STORAGE_ADDRESS,
    eip4788::BEACON_ROOTS_ADDRESS,
    eip4895::Withdrawal,
    eip7002::{WITHDRAWAL_REQUEST_PREDEPLOY_ADDRESS, WITHDRAWAL_REQUEST_TYPE},
    eip7251::{CONSOLIDATION_REQUEST_PREDEPLOY_ADDRESS, CONSOLIDATION_REQUEST_TYPE},
};
use alloy_primitives::Bytes;
use tracing::trace;

use super::{ConsensusEngine, ConsensusError, FinalizeOutcome};
use crate::{ChainConfig, EngineHost};

/// Proof-of-stake engine of a chain driven by a beacon node.
///
/// Before the transactions it stores the parent beacon block root (EIP-4788, from Cancun) and
/// the parent hash (EIP-2935, from Prague). After them it credits withdrawals and, from Prague,
/// dequeues the EIP-7002 withdrawal and EIP-7251 consolidation requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BeaconConsensus;

impl BeaconConsensus {
    /// Creates the engine.
    pub const fn new() -> Self {
        Self
    }
}

impl ConsensusEngine for BeaconConsensus {
    fn initialize(
        &self,
        config: &ChainConfig,
        header: &Header,
        host: &mut dyn EngineHost,
    ) -> Result<(), ConsensusError> {
        let rules = config.rules(header.number, header.timestamp);

        if rules.is_cancun {
            let root = header
                .parent_beacon_block_root
                .ok_or(ConsensusError::MissingParentBeaconBlockRoot)?;
            if header.number == 0 {
                if !root.is_zero() {
                    return Err(ConsensusError::GenesisParentBeaconBlockRootNotZero(root));
                }
            } else {
                host.system_call(BEACON_ROOTS_ADDRESS, root.0.into())?;
                trace!(target: "blockexec::consensus", %root, "stored parent beacon block root");
            }
        }

        // the history contract has nothing to store for genesis
        if rules.is_prague && header.number != 0 {
            host.system_call(HISTORY_STORAGE_ADDRESS, header.parent_hash.0.into())?;
        }
        Ok(())
    }

    fn finalize(
        &self,
        config: &ChainConfig,
        header: &Header,
        withdrawals: &[Withdrawal],
        host: &mut dyn EngineHost,
    ) -> Result<FinalizeOutcome, ConsensusError> {
        for withdrawal in withdrawals {
            host.increase_balance(withdrawal.address, withdrawal.amount_wei())?;
        }

        let mut outcome = FinalizeOutcome::default();
        if config.rules(header.number, header.timestamp).is_prague {
            let withdrawals =
                host.system_call(WITHDRAWAL_REQUEST_PREDEPLOY_ADDRESS, Bytes::new())?;
            push_request(&mut outcome.requests, WITHDRAWAL_REQUEST_TYPE, &withdrawals.output);

            let consolidations =
                host.system_call(CONSOLIDATION_REQUEST_PREDEPLOY_ADDRESS, Bytes::new())?;
            push_request(&mut outcome.requests, CONSOLIDATION_REQUEST_TYPE, &consolidations.output);
        }
        Ok(outcome)
    }
}

/// Appends `data` prefixed with `request_type`. Empty request data is left out (EIP-7685).
fn push_request(requests: &mut Vec<Bytes>, request_type: u8, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    let mut request = Vec::with_capacity(data.len() + 1);
    request.push(request_type);
    request.extend_from_slice(data);
    requests.push(request.into());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StateError, SystemCallError, SystemCallOutput};
    use alloy_primitives::{address, Address, B256, U256};

    #[derive(Default)]
    struct RecordingHost {
        calls: Vec<(Address, Bytes)>,
        credits: Vec<(Address, U256)>,
        output: Bytes,
    }

    impl EngineHost for RecordingHost {
        fn system_call(
            &mut self,
            contract: Address,
            data: Bytes,
        ) -> Result<SystemCallOutput, SystemCallError> {
            self.calls.push((contract, data));
            Ok(SystemCallOutput { output: self.output.clone(), gas_used: 0 })
        }

        fn system_call_const(
            &mut self,
            contract: Address,
            data: Bytes,
        ) -> Result<SystemCallOutput, SystemCallError> {
            self.system_call(contract, data)
        }

        fn increase_balance(&mut self, address: Address, amount: U256) -> Result<(), StateError> {
            self.credits.push((address, amount));
            Ok(())
        }

        fn metered_gas(&self) -> u64 {
            0
        }
    }

    fn header(number: u64, parent_beacon_block_root: Option<B256>) -> Header {
        Header {
            number,
            parent_hash: B256::repeat_byte(0x11),
            parent_beacon_block_root,
            ..Default::default()
        }
    }

    #[test]
    fn test_initialize_stores_roots() {
        let config = ChainConfig::all_active();
        let mut host = RecordingHost::default();
        let root = B256::repeat_byte(0x22);
        BeaconConsensus.initialize(&config, &header(5, Some(root)), &mut host).unwrap();

        assert_eq!(host.calls.len(), 2);
        assert_eq!(host.calls[0], (BEACON_ROOTS_ADDRESS, Bytes::from(root.0)));
        assert_eq!(host.calls[1], (HISTORY_STORAGE_ADDRESS, Bytes::from([0x11; 32])));
    }

    #[test]
    fn test_initialize_requires_beacon_root() {
        let config = ChainConfig::all_active();
        let mut host = RecordingHost::default();
        assert_eq!(
            BeaconConsensus.initialize(&config, &header(5, None), &mut host),
            Err(ConsensusError::MissingParentBeaconBlockRoot)
        );
    }

    #[test]
    fn test_initialize_skips_genesis() {
        let config = ChainConfig::all_active();
        let mut host = RecordingHost::default();
        BeaconConsensus.initialize(&config, &header(0, Some(B256::ZERO)), &mut host).unwrap();
        assert!(host.calls.is_empty());

        let root = B256::repeat_byte(1);
        assert_eq!(
            BeaconConsensus.initialize(&config, &header(0, Some(root)), &mut host),
            Err(ConsensusError::GenesisParentBeaconBlockRootNotZero(root))
        );
    }

    #[test]
    fn test_finalize_credits_withdrawals_and_collects_requests() {
        let config = ChainConfig::all_active();
        let mut host = RecordingHost { output: Bytes::from_static(&[0xaa]), ..Default::default() };
        let recipient = address!("0x00000000000000000000000000000000000000aa");
        let withdrawals =
            [Withdrawal { index: 0, validator_index: 1, address: recipient, amount: 2 }];

        let outcome =
            BeaconConsensus.finalize(&config, &header(5, None), &withdrawals, &mut host).unwrap();
        assert_eq!(host.credits, vec![(recipient, U256::from(2_000_000_000u64))]);
        assert_eq!(
            outcome.requests,
            vec![Bytes::from_static(&[0x01, 0xaa]), Bytes::from_static(&[0x02, 0xaa])]
        );
    }

    #[test]
    fn test_finalize_before_prague_has_no_requests() {
        let config = ChainConfig::with_fork_at_genesis(alloy_hardforks::EthereumHardfork::Cancun);
        let mut host = RecordingHost::default();
        let outcome = BeaconConsensus.finalize(&config, &header(5, None), &[], &mut host).unwrap();
        assert!(outcome.requests.is_empty());
        assert!(host.calls.is_empty());
    }

    #[test]
    fn test_finalize_and_assemble_fills_commitments() {
        let config = ChainConfig::all_active();
        let mut host = RecordingHost::default();
        let parent = header(5, None);

        let assembled = BeaconConsensus
            .finalize_and_assemble(&config, &parent, &[], &mut host, &[], &[], 42)
            .unwrap();
        assert_eq!(assembled.header.gas_used, 42);
        assert_eq!(assembled.header.transactions_root, alloy_trie::EMPTY_ROOT_HASH);
        assert_eq!(assembled.header.receipts_root, alloy_trie::EMPTY_ROOT_HASH);
        assert_eq!(assembled.header.parent_hash, parent.parent_hash);
        assert!(assembled.requests.is_empty());
        assert_eq!(host.calls.len(), 2);
    }
}
