//! Chain and execution configuration.

use alloy_eips::eip4844::{fake_exponential, BLOB_TX_MIN_BLOB_GASPRICE, DATA_GAS_PER_BLOB};
use alloy_hardforks::{EthereumHardfork, ForkCondition};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::constants::{cancun, prague};

/// Blob parameters of one fork.
///
/// Parameters read from a chain config are validated, see [`BlobParams::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawBlobParams")]
pub struct BlobParams {
    /// Target number of blobs per block
    pub target: u64,
    /// Maximum number of blobs per block
    pub max: u64,
    /// Denominator of the blob base fee exponent
    pub base_fee_update_fraction: u64,
}

impl BlobParams {
    /// Cancun defaults (EIP-4844).
    pub const fn cancun() -> Self {
        Self {
            target: cancun::TARGET_BLOBS_PER_BLOCK,
            max: cancun::MAX_BLOBS_PER_BLOCK,
            base_fee_update_fraction: cancun::BLOB_BASE_FEE_UPDATE_FRACTION,
        }
    }

    /// Prague defaults (EIP-7691).
    pub const fn prague() -> Self {
        Self {
            target: prague::TARGET_BLOBS_PER_BLOCK,
            max: prague::MAX_BLOBS_PER_BLOCK,
            base_fee_update_fraction: prague::BLOB_BASE_FEE_UPDATE_FRACTION,
        }
    }

    /// Maximum blob gas a block may use.
    pub const fn max_blob_gas_per_block(&self) -> u64 {
        self.max.saturating_mul(DATA_GAS_PER_BLOB)
    }

    /// Checks that the parameters describe a usable blob market.
    pub const fn validate(&self) -> Result<(), BlobParamsError> {
        if self.base_fee_update_fraction == 0 {
            return Err(BlobParamsError::ZeroUpdateFraction);
        }
        if self.max.checked_mul(DATA_GAS_PER_BLOB).is_none() {
            return Err(BlobParamsError::MaxBlobsTooLarge(self.max));
        }
        if self.target > self.max {
            return Err(BlobParamsError::TargetAboveMax { target: self.target, max: self.max });
        }
        Ok(())
    }
}

/// Invalid blob parameters in a chain config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BlobParamsError {
    /// The blob base fee exponent would divide by zero.
    #[error("blob base fee update fraction must not be zero")]
    ZeroUpdateFraction,
    /// The blob gas limit does not fit in a `u64`.
    #[error("max blobs per block {0} overflows the blob gas limit")]
    MaxBlobsTooLarge(u64),
    /// More target than maximum blobs.
    #[error("target blobs per block {target} exceeds max {max}")]
    TargetAboveMax {
        /// Target blobs per block
        target: u64,
        /// Maximum blobs per block
        max: u64,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlobParams {
    target: u64,
    max: u64,
    base_fee_update_fraction: u64,
}

impl TryFrom<RawBlobParams> for BlobParams {
    type Error = BlobParamsError;

    fn try_from(raw: RawBlobParams) -> Result<Self, Self::Error> {
        let params = Self {
            target: raw.target,
            max: raw.max,
            base_fee_update_fraction: raw.base_fee_update_fraction,
        };
        params.validate()?;
        Ok(params)
    }
}

/// Per-fork blob parameters. Missing entries fall back to the fork defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobSchedule {
    /// Parameters from Cancun
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancun: Option<BlobParams>,
    /// Parameters from Prague
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prague: Option<BlobParams>,
    /// Parameters from Osaka
    #[serde(skip_serializing_if = "Option::is_none")]
    pub osaka: Option<BlobParams>,
}

/// Consensus flavor of a chain.
///
/// It decides how system-call failures are handled and whether blocks carry a synthetic
/// state-sync receipt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "engine", rename_all = "camelCase")]
pub enum ConsensusConfig {
    /// Proof-of-stake chain driven by a beacon node.
    #[default]
    Beacon,
    /// Side chain that imports state-sync events from a parent chain.
    StateSync {
        /// Contract that receives the events
        receiver: Address,
        /// Events are committed on the first block of every sprint
        sprint: u64,
    },
}

impl ConsensusConfig {
    /// Whether this is a state-sync chain.
    pub const fn is_state_sync(&self) -> bool {
        matches!(self, Self::StateSync { .. })
    }
}

/// Fork schedule and chain parameters, in genesis-file layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChainConfig {
    /// EIP-155 chain id
    pub chain_id: u64,
    /// Homestead activation block
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homestead_block: Option<u64>,
    /// Spurious Dragon (EIP-158) activation block
    #[serde(alias = "eip158Block", skip_serializing_if = "Option::is_none")]
    pub spurious_dragon_block: Option<u64>,
    /// Byzantium activation block
    #[serde(skip_serializing_if = "Option::is_none")]
    pub byzantium_block: Option<u64>,
    /// Istanbul activation block
    #[serde(skip_serializing_if = "Option::is_none")]
    pub istanbul_block: Option<u64>,
    /// Berlin activation block
    #[serde(skip_serializing_if = "Option::is_none")]
    pub berlin_block: Option<u64>,
    /// London activation block
    #[serde(skip_serializing_if = "Option::is_none")]
    pub london_block: Option<u64>,
    /// Shanghai activation timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shanghai_time: Option<u64>,
    /// Cancun activation timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancun_time: Option<u64>,
    /// Prague activation timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prague_time: Option<u64>,
    /// Osaka activation timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub osaka_time: Option<u64>,
    /// Blob parameters per fork
    pub blob_schedule: BlobSchedule,
    /// Consensus flavor
    pub consensus: ConsensusConfig,
}

impl ChainConfig {
    /// Mainnet fork schedule.
    pub fn mainnet_like() -> Self {
        Self {
            chain_id: 1,
            homestead_block: Some(1_150_000),
            spurious_dragon_block: Some(2_675_000),
            byzantium_block: Some(4_370_000),
            istanbul_block: Some(9_069_000),
            berlin_block: Some(12_244_000),
            london_block: Some(12_965_000),
            shanghai_time: Some(1_681_338_455),
            cancun_time: Some(1_710_338_135),
            prague_time: Some(1_746_612_311),
            ..Default::default()
        }
    }

    /// Every fork up to Prague active from genesis.
    pub fn all_active() -> Self {
        Self {
            chain_id: 1,
            homestead_block: Some(0),
            spurious_dragon_block: Some(0),
            byzantium_block: Some(0),
            istanbul_block: Some(0),
            berlin_block: Some(0),
            london_block: Some(0),
            shanghai_time: Some(0),
            cancun_time: Some(0),
            prague_time: Some(0),
            ..Default::default()
        }
    }

    /// Activates `fork` and every fork before it from genesis, leaving later forks inactive.
    pub fn with_fork_at_genesis(fork: EthereumHardfork) -> Self {
        let rank = fork_rank(fork);
        let at = |other: EthereumHardfork| (fork_rank(other) <= rank).then_some(0);
        Self {
            chain_id: 1,
            homestead_block: at(EthereumHardfork::Homestead),
            spurious_dragon_block: at(EthereumHardfork::SpuriousDragon),
            byzantium_block: at(EthereumHardfork::Byzantium),
            istanbul_block: at(EthereumHardfork::Istanbul),
            berlin_block: at(EthereumHardfork::Berlin),
            london_block: at(EthereumHardfork::London),
            shanghai_time: at(EthereumHardfork::Shanghai),
            cancun_time: at(EthereumHardfork::Cancun),
            prague_time: at(EthereumHardfork::Prague),
            osaka_time: at(EthereumHardfork::Osaka),
            ..Default::default()
        }
    }

    /// Sets the consensus flavor.
    pub const fn with_consensus(mut self, consensus: ConsensusConfig) -> Self {
        self.consensus = consensus;
        self
    }

    /// Sets the chain id.
    pub const fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Activation condition of `fork`.
    ///
    /// Forks without a field of their own share the activation of the fork they are grouped with.
    pub fn fork(&self, fork: EthereumHardfork) -> ForkCondition {
        let block = |number: Option<u64>| number.map_or(ForkCondition::Never, ForkCondition::Block);
        let time = |timestamp: Option<u64>| {
            timestamp.map_or(ForkCondition::Never, ForkCondition::Timestamp)
        };
        match fork {
            EthereumHardfork::Frontier => ForkCondition::Block(0),
            EthereumHardfork::Homestead | EthereumHardfork::Dao => block(self.homestead_block),
            EthereumHardfork::Tangerine | EthereumHardfork::SpuriousDragon => {
                block(self.spurious_dragon_block)
            }
            EthereumHardfork::Byzantium |
            EthereumHardfork::Constantinople |
            EthereumHardfork::Petersburg => block(self.byzantium_block),
            EthereumHardfork::Istanbul | EthereumHardfork::MuirGlacier => {
                block(self.istanbul_block)
            }
            EthereumHardfork::Berlin => block(self.berlin_block),
            EthereumHardfork::London |
            EthereumHardfork::ArrowGlacier |
            EthereumHardfork::GrayGlacier |
            EthereumHardfork::Paris => block(self.london_block),
            EthereumHardfork::Shanghai => time(self.shanghai_time),
            EthereumHardfork::Cancun => time(self.cancun_time),
            EthereumHardfork::Prague => time(self.prague_time),
            EthereumHardfork::Osaka => time(self.osaka_time),
        }
    }

    /// Whether `fork` is active for a block with the given number and timestamp.
    pub fn is_active(&self, fork: EthereumHardfork, number: u64, timestamp: u64) -> bool {
        let condition = self.fork(fork);
        condition.active_at_block(number) || condition.active_at_timestamp(timestamp)
    }

    /// Protocol rules in force for a block.
    pub fn rules(&self, number: u64, timestamp: u64) -> Rules {
        let active = |fork| self.is_active(fork, number, timestamp);
        Rules {
            is_homestead: active(EthereumHardfork::Homestead),
            is_spurious_dragon: active(EthereumHardfork::SpuriousDragon),
            is_byzantium: active(EthereumHardfork::Byzantium),
            is_istanbul: active(EthereumHardfork::Istanbul),
            is_berlin: active(EthereumHardfork::Berlin),
            is_london: active(EthereumHardfork::London),
            is_shanghai: active(EthereumHardfork::Shanghai),
            is_cancun: active(EthereumHardfork::Cancun),
            is_prague: active(EthereumHardfork::Prague),
            is_osaka: active(EthereumHardfork::Osaka),
        }
    }

    /// Blob parameters in force at `timestamp`, `None` before Cancun.
    pub fn blob_params(&self, timestamp: u64) -> Option<BlobParams> {
        let active = |condition: Option<u64>| condition.is_some_and(|at| timestamp >= at);
        if active(self.osaka_time) {
            let params = self.blob_schedule.osaka.or(self.blob_schedule.prague);
            Some(params.unwrap_or(BlobParams::prague()))
        } else if active(self.prague_time) {
            Some(self.blob_schedule.prague.unwrap_or(BlobParams::prague()))
        } else if active(self.cancun_time) {
            Some(self.blob_schedule.cancun.unwrap_or(BlobParams::cancun()))
        } else {
            None
        }
    }

    /// Blob gas a block at `timestamp` may use, 0 before Cancun.
    pub fn max_blob_gas_per_block(&self, timestamp: u64) -> u64 {
        self.blob_params(timestamp).map_or(0, |params| params.max_blob_gas_per_block())
    }

    /// Blob base fee for a block with `excess_blob_gas` at `timestamp`, `None` before Cancun.
    pub fn blob_base_fee(&self, excess_blob_gas: u64, timestamp: u64) -> Option<u128> {
        self.blob_params(timestamp).map(|params| {
            fake_exponential(
                BLOB_TX_MIN_BLOB_GASPRICE,
                excess_blob_gas as u128,
                params.base_fee_update_fraction.max(1) as u128,
            )
        })
    }
}

const fn fork_rank(fork: EthereumHardfork) -> u8 {
    match fork {
        EthereumHardfork::Frontier => 0,
        EthereumHardfork::Homestead => 1,
        EthereumHardfork::SpuriousDragon => 2,
        EthereumHardfork::Byzantium => 3,
        EthereumHardfork::Istanbul => 4,
        EthereumHardfork::Berlin => 5,
        EthereumHardfork::London => 6,
        EthereumHardfork::Shanghai => 7,
        EthereumHardfork::Cancun => 8,
        EthereumHardfork::Prague => 9,
        EthereumHardfork::Osaka => 10,
        _ => u8::MAX,
    }
}

/// Protocol rules in force for one block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rules {
    /// Homestead
    pub is_homestead: bool,
    /// Spurious Dragon (EIP-158)
    pub is_spurious_dragon: bool,
    /// Byzantium
    pub is_byzantium: bool,
    /// Istanbul
    pub is_istanbul: bool,
    /// Berlin
    pub is_berlin: bool,
    /// London
    pub is_london: bool,
    /// Shanghai
    pub is_shanghai: bool,
    /// Cancun
    pub is_cancun: bool,
    /// Prague
    pub is_prague: bool,
    /// Osaka
    pub is_osaka: bool,
}

/// Flags controlling how a block is executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VmConfig {
    /// Record failing transactions as rejected instead of failing the block, and skip
    /// verification against the header
    pub stateless_exec: bool,
    /// Do not keep receipts
    pub no_receipts: bool,
    /// Skip block finalization and the state commit
    pub read_only: bool,
    /// Attach a tracer to every transaction
    pub debug: bool,
}

impl VmConfig {
    /// Sets [`Self::stateless_exec`].
    pub const fn with_stateless_exec(mut self, stateless_exec: bool) -> Self {
        self.stateless_exec = stateless_exec;
        self
    }

    /// Sets [`Self::no_receipts`].
    pub const fn with_no_receipts(mut self, no_receipts: bool) -> Self {
        self.no_receipts = no_receipts;
        self
    }

    /// Sets [`Self::read_only`].
    pub const fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Sets [`Self::debug`].
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn test_mainnet_rules() {
        let config = ChainConfig::mainnet_like();
        let rules = config.rules(4_369_999, 0);
        assert!(rules.is_spurious_dragon);
        assert!(!rules.is_byzantium);

        let rules = config.rules(20_000_000, 1_710_338_135);
        assert!(rules.is_london && rules.is_cancun);
        assert!(!rules.is_prague);
    }

    #[test]
    fn test_fork_at_genesis_stops_at_the_fork() {
        let config = ChainConfig::with_fork_at_genesis(EthereumHardfork::Shanghai);
        let rules = config.rules(0, 0);
        assert!(rules.is_shanghai && rules.is_london && rules.is_homestead);
        assert!(!rules.is_cancun);
        assert_eq!(config.max_blob_gas_per_block(0), 0);
        assert_eq!(config.blob_base_fee(0, 0), None);
    }

    #[test]
    fn test_blob_schedule_defaults_and_overrides() {
        let mut config = ChainConfig::all_active();
        assert_eq!(config.max_blob_gas_per_block(0), 9 * DATA_GAS_PER_BLOB);
        assert_eq!(config.blob_base_fee(0, 0), Some(1));

        config.blob_schedule.prague =
            Some(BlobParams { target: 1, max: 2, base_fee_update_fraction: 1 });
        assert_eq!(config.max_blob_gas_per_block(0), 2 * DATA_GAS_PER_BLOB);
    }

    #[test]
    fn test_invalid_blob_params_are_rejected_on_load() {
        let zero_fraction = r#"{ "target": 3, "max": 6, "baseFeeUpdateFraction": 0 }"#;
        let err = serde_json::from_str::<BlobParams>(zero_fraction).unwrap_err();
        assert!(err.to_string().contains("update fraction"), "{err}");

        let huge = format!(r#"{{ "target": 3, "max": {}, "baseFeeUpdateFraction": 1 }}"#, u64::MAX);
        assert!(serde_json::from_str::<BlobParams>(&huge).is_err());

        let inverted = r#"{ "target": 7, "max": 6, "baseFeeUpdateFraction": 1 }"#;
        assert!(serde_json::from_str::<BlobParams>(inverted).is_err());

        let config = r#"{ "chainId": 1, "blobSchedule": { "prague": {
            "target": 6, "max": 9, "baseFeeUpdateFraction": 0 } } }"#;
        assert!(serde_json::from_str::<ChainConfig>(config).is_err());

        let valid = r#"{ "target": 6, "max": 9, "baseFeeUpdateFraction": 5007716 }"#;
        assert_eq!(serde_json::from_str::<BlobParams>(valid).unwrap(), BlobParams::prague());
    }

    #[test]
    fn test_deserialize_genesis_config() {
        let json = r#"{
            "chainId": 137,
            "homesteadBlock": 0,
            "eip158Block": 0,
            "byzantiumBlock": 0,
            "londonBlock": 10,
            "cancunTime": 100,
            "blobSchedule": {
                "cancun": { "target": 3, "max": 6, "baseFeeUpdateFraction": 3338477 }
            },
            "consensus": {
                "engine": "stateSync",
                "receiver": "0x0000000000000000000000000000000000001001",
                "sprint": 16
            }
        }"#;
        let config: ChainConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.chain_id, 137);
        assert_eq!(config.spurious_dragon_block, Some(0));
        assert!(!config.rules(9, 0).is_london);
        assert!(config.rules(10, 0).is_london);
        assert_eq!(
            config.consensus,
            ConsensusConfig::StateSync {
                receiver: address!("0x0000000000000000000000000000000000001001"),
                sprint: 16
            }
        );
    }
}
