//! Bridge between consensus engines and the VM for protocol system calls.
//!
//! A system call is a message from [`SYSTEM_ADDRESS`] to a protocol contract. It is free: no
//! gas is bought and the block gas pool is left alone. Its gas only counts toward the block when
//! the bridge is metering, which the executor enables for post-transaction calls from Prague on.

use alloy_eips::eip4788::SYSTEM_ADDRESS;
use alloy_primitives::{Address, Bytes, U256};
use tracing::{trace, warn};

use crate::{
    constants::SYS_CALL_GAS_LIMIT, BlockEnv, CallMessage, Evm, EvmError, IntraBlockState,
    StateError, StateReader,
};

/// What the bridge does when a system call fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyscallErrorPolicy {
    /// Return the error to the engine.
    #[default]
    Propagate,
    /// Log the error and return an empty output that used no gas.
    Swallow,
}

/// Failure of a system call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SystemCallError {
    /// The contract reverted or halted.
    #[error("system call to {contract} failed: {reason}")]
    Failed {
        /// Called contract
        contract: Address,
        /// Revert or halt reason
        reason: String,
    },
    /// The VM failed.
    #[error("system call to {contract}: {source}")]
    Evm {
        /// Called contract
        contract: Address,
        /// VM failure
        #[source]
        source: EvmError,
    },
    /// State access outside the VM failed.
    #[error(transparent)]
    State(#[from] StateError),
}

/// Output of a successful system call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemCallOutput {
    /// Return data
    pub output: Bytes,
    /// Gas used by the call
    pub gas_used: u64,
}

/// State access a consensus engine gets during block initialization and finalization.
pub trait EngineHost {
    /// Runs a system call to `contract` and keeps its changes.
    fn system_call(
        &mut self,
        contract: Address,
        data: Bytes,
    ) -> Result<SystemCallOutput, SystemCallError>;

    /// Runs a system call to `contract` and discards its changes.
    fn system_call_const(
        &mut self,
        contract: Address,
        data: Bytes,
    ) -> Result<SystemCallOutput, SystemCallError>;

    /// Credits `amount` wei to `address`.
    fn increase_balance(&mut self, address: Address, amount: U256) -> Result<(), StateError>;

    /// Gas of the system calls that count toward the block.
    fn metered_gas(&self) -> u64;
}

/// Runs system calls against the block overlay.
pub struct SystemCaller<'a, E, R> {
    evm: &'a E,
    env: &'a BlockEnv,
    state: &'a mut IntraBlockState<R>,
    policy: SyscallErrorPolicy,
    metered: bool,
    gas_used: u64,
}

impl<E, R> core::fmt::Debug for SystemCaller<'_, E, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SystemCaller")
            .field("policy", &self.policy)
            .field("metered", &self.metered)
            .field("gas_used", &self.gas_used)
            .finish_non_exhaustive()
    }
}

impl<'a, E: Evm, R: StateReader> SystemCaller<'a, E, R> {
    /// Creates an unmetered bridge that propagates errors.
    pub fn new(evm: &'a E, env: &'a BlockEnv, state: &'a mut IntraBlockState<R>) -> Self {
        Self {
            evm,
            env,
            state,
            policy: SyscallErrorPolicy::Propagate,
            metered: false,
            gas_used: 0,
        }
    }

    /// Sets the error policy.
    pub const fn with_policy(mut self, policy: SyscallErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Counts the gas of successful calls toward [`Self::gas_used`].
    pub const fn with_metering(mut self, metered: bool) -> Self {
        self.metered = metered;
        self
    }

    /// Metered gas so far.
    pub const fn gas_used(&self) -> u64 {
        self.gas_used
    }

    /// Calls `contract` with `data` and keeps the resulting state changes. A failed call leaves
    /// no changes behind.
    pub fn call(
        &mut self,
        contract: Address,
        data: Bytes,
    ) -> Result<SystemCallOutput, SystemCallError> {
        let snapshot = self.state.snapshot();
        match self.execute(contract, data) {
            Ok(output) => {
                if self.metered {
                    self.gas_used += output.gas_used;
                }
                Ok(output)
            }
            Err(err) => {
                self.state.revert_to_snapshot(snapshot);
                self.handle_error(err)
            }
        }
    }

    /// Calls `contract` with `data` and reverts every state change afterwards. Never metered.
    pub fn call_const(
        &mut self,
        contract: Address,
        data: Bytes,
    ) -> Result<SystemCallOutput, SystemCallError> {
        let snapshot = self.state.snapshot();
        let result = self.execute(contract, data);
        self.state.revert_to_snapshot(snapshot);
        result.or_else(|err| self.handle_error(err))
    }

    fn execute(
        &mut self,
        contract: Address,
        data: Bytes,
    ) -> Result<SystemCallOutput, SystemCallError> {
        let msg = CallMessage {
            caller: SYSTEM_ADDRESS,
            nonce: 0,
            to: Some(contract),
            value: U256::ZERO,
            gas_limit: SYS_CALL_GAS_LIMIT,
            input: data,
            is_free: true,
        };
        let outcome = self
            .evm
            .call(self.env, self.state, &msg, None)
            .map_err(|source| SystemCallError::Evm { contract, source })?;
        if !outcome.is_success() {
            return Err(SystemCallError::Failed { contract, reason: outcome.status.to_string() });
        }
        let gas_used = SYS_CALL_GAS_LIMIT - outcome.gas_left.min(SYS_CALL_GAS_LIMIT);
        trace!(target: "blockexec::system_call", %contract, gas_used, "system call");
        Ok(SystemCallOutput { output: outcome.output, gas_used })
    }

    fn handle_error(&self, err: SystemCallError) -> Result<SystemCallOutput, SystemCallError> {
        match self.policy {
            SyscallErrorPolicy::Propagate => Err(err),
            SyscallErrorPolicy::Swallow => {
                warn!(target: "blockexec::system_call", %err, "ignoring failed system call");
                Ok(SystemCallOutput::default())
            }
        }
    }
}

impl<E: Evm, R: StateReader> EngineHost for SystemCaller<'_, E, R> {
    fn system_call(
        &mut self,
        contract: Address,
        data: Bytes,
    ) -> Result<SystemCallOutput, SystemCallError> {
        self.call(contract, data)
    }

    fn system_call_const(
        &mut self,
        contract: Address,
        data: Bytes,
    ) -> Result<SystemCallOutput, SystemCallError> {
        self.call_const(contract, data)
    }

    fn increase_balance(&mut self, address: Address, amount: U256) -> Result<(), StateError> {
        self.state.add_balance(address, amount)
    }

    fn metered_gas(&self) -> u64 {
        self.gas_used
    }
}
