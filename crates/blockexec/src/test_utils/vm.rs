use std::collections::HashMap;

use alloy_primitives::{Address, Bytes, Log, B256, U256};

use crate::{
    is_empty_code_hash, BlockEnv, CallMessage, CallOutcome, Evm, EvmError, IntraBlockState,
    StateReader, Tracer,
};

/// What a contract served by [`TransferVm`] does when called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeBehavior {
    /// Stores the first input word in the slot numbered by the block timestamp.
    StoreWord,
    /// Emits a log without topics whose data is the input.
    EmitLog,
    /// Returns fixed output.
    Return(Bytes),
    /// Reverts.
    Revert,
    /// Halts.
    Halt,
}

/// A contract served by [`TransferVm`] and the gas a call to it consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeContract {
    /// What the contract does
    pub behavior: NativeBehavior,
    /// Gas consumed per call
    pub gas: u64,
}

/// A minimal VM: value transfers, contract creation that deploys the initcode verbatim, and a
/// set of natively implemented contracts. Calls to anything else succeed without using gas.
#[derive(Debug, Clone, Default)]
pub struct TransferVm {
    contracts: HashMap<Address, NativeContract>,
}

impl TransferVm {
    /// Creates a VM without native contracts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `address` with `behavior`, consuming `gas` per call.
    pub fn with_contract(mut self, address: Address, behavior: NativeBehavior, gas: u64) -> Self {
        self.contracts.insert(address, NativeContract { behavior, gas });
        self
    }

    fn execute<R: StateReader>(
        &self,
        env: &BlockEnv,
        state: &mut IntraBlockState<R>,
        msg: &CallMessage,
    ) -> Result<CallOutcome, EvmError> {
        if !msg.value.is_zero() {
            if state.get_balance(msg.caller)? < msg.value {
                return Ok(CallOutcome::halt("insufficient balance for transfer"));
            }
            state.sub_balance(msg.caller, msg.value)?;
        }

        let Some(to) = msg.to else { return self.create(env, state, msg) };
        state.add_balance(to, msg.value)?;

        let Some(contract) = self.contracts.get(&to) else {
            return Ok(CallOutcome::success(Bytes::new(), msg.gas_limit));
        };
        if contract.gas > msg.gas_limit {
            return Ok(CallOutcome::halt("out of gas"));
        }
        let gas_left = msg.gas_limit - contract.gas;
        let outcome = match &contract.behavior {
            NativeBehavior::StoreWord => {
                let word = &msg.input[..msg.input.len().min(32)];
                let slot = B256::from(U256::from(env.timestamp));
                state.set_state(to, slot, U256::from_be_slice(word))?;
                CallOutcome::success(Bytes::new(), gas_left)
            }
            NativeBehavior::EmitLog => {
                state.add_log(Log::new_unchecked(to, vec![], msg.input.clone()));
                CallOutcome::success(Bytes::new(), gas_left)
            }
            NativeBehavior::Return(output) => CallOutcome::success(output.clone(), gas_left),
            NativeBehavior::Revert => CallOutcome::revert(Bytes::new(), gas_left),
            NativeBehavior::Halt => CallOutcome::halt("invalid opcode"),
        };
        Ok(outcome)
    }

    fn create<R: StateReader>(
        &self,
        env: &BlockEnv,
        state: &mut IntraBlockState<R>,
        msg: &CallMessage,
    ) -> Result<CallOutcome, EvmError> {
        let address = msg.caller.create(msg.nonce);
        if state.get_nonce(address)? != 0 || !is_empty_code_hash(&state.get_code_hash(address)?) {
            return Ok(CallOutcome::halt("contract address collision"));
        }
        state.create_account(address, true)?;
        if env.rules.is_spurious_dragon {
            state.set_nonce(address, 1)?;
        }
        state.add_balance(address, msg.value)?;
        if !msg.input.is_empty() {
            state.set_code(address, msg.input.clone())?;
        }
        Ok(CallOutcome::success(Bytes::new(), msg.gas_limit))
    }
}

impl Evm for TransferVm {
    fn call<R: StateReader>(
        &self,
        env: &BlockEnv,
        state: &mut IntraBlockState<R>,
        msg: &CallMessage,
        mut tracer: Option<&mut dyn Tracer>,
    ) -> Result<CallOutcome, EvmError> {
        if let Some(tracer) = tracer.as_mut() {
            tracer.on_call_enter(0, msg);
        }
        let outcome = self.execute(env, state, msg)?;
        if let Some(tracer) = tracer {
            tracer.on_call_exit(0, &outcome);
        }
        Ok(outcome)
    }
}
