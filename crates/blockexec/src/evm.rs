//! Virtual-machine interface.
//!
//! Instruction semantics live outside this crate. The core hands the VM a [`CallMessage`] and
//! the block overlay, and the VM reports a [`CallOutcome`]. Logs, refunds, account creation and
//! code deployment go through the overlay.

use alloy_primitives::{Address, Bytes, U256};
use auto_impl::auto_impl;

use crate::{IntraBlockState, Rules, StateError, StateReader, Tracer};

/// Block-level values visible to the VM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockEnv {
    /// Block number
    pub number: u64,
    /// Block timestamp
    pub timestamp: u64,
    /// Fee recipient
    pub coinbase: Address,
    /// Base fee, from London
    pub base_fee: Option<u64>,
    /// Difficulty, or the randomness beacon after the merge
    pub difficulty: U256,
    /// Block gas limit
    pub gas_limit: u64,
    /// Chain id
    pub chain_id: u64,
    /// Blob base fee, from Cancun
    pub blob_base_fee: Option<u128>,
    /// Protocol rules in force
    pub rules: Rules,
}

/// A message executed by the VM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallMessage {
    /// Sender
    pub caller: Address,
    /// Sender nonce before the transaction, used to derive the address of a created contract
    pub nonce: u64,
    /// Recipient, `None` for contract creation
    pub to: Option<Address>,
    /// Value transferred
    pub value: U256,
    /// Gas available to the call
    pub gas_limit: u64,
    /// Calldata, or initcode for contract creation
    pub input: Bytes,
    /// The message neither pays for gas nor draws from the block gas pool
    pub is_free: bool,
}

impl CallMessage {
    /// Whether the message creates a contract.
    pub const fn is_create(&self) -> bool {
        self.to.is_none()
    }
}

/// How a VM call ended.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum CallStatus {
    /// Completed normally.
    #[display("success")]
    Success,
    /// Reverted. Gas left is returned.
    #[display("reverted")]
    Revert,
    /// Halted exceptionally. All gas is consumed.
    #[display("halted: {_0}")]
    Halt(String),
}

/// Result of a VM call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    /// Return data, or revert data
    pub output: Bytes,
    /// Gas not consumed
    pub gas_left: u64,
    /// How the call ended
    pub status: CallStatus,
}

impl CallOutcome {
    /// Successful outcome.
    pub const fn success(output: Bytes, gas_left: u64) -> Self {
        Self { output, gas_left, status: CallStatus::Success }
    }

    /// Reverted outcome.
    pub const fn revert(output: Bytes, gas_left: u64) -> Self {
        Self { output, gas_left, status: CallStatus::Revert }
    }

    /// Halted outcome, consuming all gas.
    pub fn halt(reason: impl Into<String>) -> Self {
        Self { output: Bytes::new(), gas_left: 0, status: CallStatus::Halt(reason.into()) }
    }

    /// Whether the call completed normally.
    pub const fn is_success(&self) -> bool {
        matches!(self.status, CallStatus::Success)
    }
}

/// Failure that aborts the block. Reverts and halts are not errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvmError {
    /// State could not be read or written.
    #[error(transparent)]
    State(#[from] StateError),
    /// The VM hit an internal failure.
    #[error("vm failure: {0}")]
    Fatal(String),
}

/// The virtual machine.
#[auto_impl(&, Box, Arc)]
pub trait Evm {
    /// Executes `msg` against `state`.
    ///
    /// The caller nonce is already bumped. For contract creation the VM derives the new address
    /// from `msg.caller` and `msg.nonce`, creates the account under a fresh incarnation and
    /// installs the returned code. A failed call leaves its own changes for the caller to revert.
    fn call<R: StateReader>(
        &self,
        env: &BlockEnv,
        state: &mut IntraBlockState<R>,
        msg: &CallMessage,
        tracer: Option<&mut dyn Tracer>,
    ) -> Result<CallOutcome, EvmError>;
}
