use std::sync::Arc;

use alloy_primitives::{address, b256, bytes, Address, B256, U256};
use blockexec::{
    kv::{MemoryStore, StateDatabase},
    test_utils::{NativeBehavior, TransferVm},
    BlockEnv, ChainConfig, EngineHost, IntraBlockState, PlainStateReader, SyscallErrorPolicy,
    SystemCallError, SystemCallOutput, SystemCaller,
};

const STORE: Address = address!("0x000000000000000000000000000000000000c0de");
const BROKEN: Address = address!("0x000000000000000000000000000000000000dead");
const WORD: B256 = b256!("0x00000000000000000000000000000000000000000000000000000000000000ff");

fn env() -> BlockEnv {
    BlockEnv {
        number: 1,
        timestamp: 3,
        gas_limit: 30_000_000,
        chain_id: 1,
        rules: ChainConfig::all_active().rules(1, 3),
        ..Default::default()
    }
}

fn vm() -> TransferVm {
    TransferVm::new()
        .with_contract(STORE, NativeBehavior::StoreWord, 700)
        .with_contract(BROKEN, NativeBehavior::Halt, 0)
}

fn slot() -> B256 {
    B256::from(U256::from(3))
}

fn empty_state() -> IntraBlockState<PlainStateReader<blockexec::kv::MemorySnapshot>> {
    IntraBlockState::new(PlainStateReader::new(MemoryStore::new().snapshot(), Arc::default()))
}

#[test]
fn test_call_keeps_changes_and_meters_gas() {
    let (evm, env) = (vm(), env());
    let mut state = empty_state();
    let mut caller = SystemCaller::new(&evm, &env, &mut state).with_metering(true);

    let out = caller.call(STORE, WORD.0.into()).unwrap();
    assert_eq!(out.gas_used, 700);
    caller.call(STORE, WORD.0.into()).unwrap();
    assert_eq!(caller.gas_used(), 1_400);
    assert_eq!(state.get_state(STORE, slot()).unwrap(), U256::from(0xff));
}

#[test]
fn test_unmetered_calls_do_not_count() {
    let (evm, env) = (vm(), env());
    let mut state = empty_state();
    let mut caller = SystemCaller::new(&evm, &env, &mut state);
    caller.call(STORE, WORD.0.into()).unwrap();
    assert_eq!(caller.metered_gas(), 0);
}

#[test]
fn test_const_call_discards_changes() {
    let (evm, env) = (vm(), env());
    let mut state = empty_state();
    let mut caller = SystemCaller::new(&evm, &env, &mut state).with_metering(true);

    let out = caller.call_const(STORE, WORD.0.into()).unwrap();
    assert_eq!(out.gas_used, 700);
    assert_eq!(caller.gas_used(), 0);
    assert_eq!(state.get_state(STORE, slot()).unwrap(), U256::ZERO);
}

#[test]
fn test_failure_follows_policy() {
    let (evm, env) = (vm(), env());
    let mut state = empty_state();

    let mut strict = SystemCaller::new(&evm, &env, &mut state);
    let err = strict.system_call(BROKEN, bytes!("01")).unwrap_err();
    assert_eq!(
        err,
        SystemCallError::Failed { contract: BROKEN, reason: "halted: invalid opcode".into() }
    );

    let mut lenient =
        SystemCaller::new(&evm, &env, &mut state).with_policy(SyscallErrorPolicy::Swallow);
    assert_eq!(lenient.system_call(BROKEN, bytes!("01")).unwrap(), SystemCallOutput::default());
    assert_eq!(
        lenient.system_call_const(BROKEN, bytes!("01")).unwrap(),
        SystemCallOutput::default()
    );
}

#[test]
fn test_increase_balance_credits_account() {
    let (evm, env) = (vm(), env());
    let mut state = empty_state();
    let recipient = address!("0x00000000000000000000000000000000000000aa");
    let mut host = SystemCaller::new(&evm, &env, &mut state);
    host.increase_balance(recipient, U256::from(5)).unwrap();
    host.increase_balance(recipient, U256::from(7)).unwrap();
    assert_eq!(state.get_balance(recipient).unwrap(), U256::from(12));
}
