//! Account resolution out of plain state, including recovery of lost delegation code hashes.

use std::sync::Arc;

use alloy_primitives::{address, bytes, keccak256, Address, Bytes, U256};
use alloy_trie::KECCAK_EMPTY;
use blockexec::{
    delegation_code, is_delegation,
    kv::{account_key, storage_prefix, MemorySnapshot, MemoryStore, StateDatabase, Table},
    test_utils::{encode_account_with_lost_code_hash, StoreBuilder},
    Account, CacheConfig, CachedStateReader, PlainStateReader, ReadThroughCache, RecoveryMetrics,
    RecoveryStats, StateReader,
};
use proptest::prelude::*;
use rstest::rstest;

const EOA: Address = address!("0x00000000000000000000000000000000000e0a01");
const DELEGATE: Address = address!("0x00000000000000000000000000000000de1e9a7e");

fn lost_hash_account(incarnation: u64) -> Account {
    Account { nonce: 4, balance: U256::from(1_000), incarnation, ..Default::default() }
}

/// Store holding `EOA` with a lost code hash and a code pointer at `pointer_incarnation` to
/// `blob`.
fn store_with_pointer(incarnation: u64, pointer_incarnation: u64, blob: Bytes) -> MemoryStore {
    let mut builder = StoreBuilder::new().raw(
        Table::PlainState,
        account_key(EOA),
        encode_account_with_lost_code_hash(&lost_hash_account(incarnation)),
    );
    builder.set_code(EOA, pointer_incarnation, blob);
    builder.build()
}

fn reader(store: &MemoryStore) -> (PlainStateReader<MemorySnapshot>, Arc<RecoveryMetrics>) {
    let metrics = Arc::new(RecoveryMetrics::new());
    (PlainStateReader::new(store.snapshot(), Arc::clone(&metrics)), metrics)
}

fn dump(snapshot: &MemorySnapshot) -> Vec<(Table, Vec<u8>, Bytes)> {
    [
        Table::PlainState,
        Table::PlainContractCode,
        Table::Code,
        Table::IncarnationMap,
        Table::AccountChangeSet,
        Table::StorageChangeSet,
    ]
    .into_iter()
    .flat_map(|table| {
        snapshot.iter(table).map(move |(key, value)| (table, key.to_vec(), value.clone()))
    })
    .collect()
}

#[rstest]
#[case::zero_incarnation_probes_default(0, 1)]
#[case::stored_incarnation(2, 2)]
fn test_delegation_hash_recovered_from_pointer(
    #[case] incarnation: u64,
    #[case] pointer_incarnation: u64,
) {
    let code = delegation_code(DELEGATE);
    let store = store_with_pointer(incarnation, pointer_incarnation, code.clone());
    let (reader, metrics) = reader(&store);

    let account = reader.read_account_data(EOA).unwrap().unwrap();
    assert_eq!(account.code_hash, keccak256(&code));
    assert_eq!(account.nonce, 4);
    assert_eq!(account.incarnation, incarnation);
    assert_eq!(
        reader.read_account_code(EOA, incarnation, account.code_hash).unwrap(),
        Some(code.clone())
    );
    assert_eq!(reader.read_account_code_size(EOA, incarnation, account.code_hash).unwrap(), 23);
    assert_eq!(
        metrics.stats(),
        RecoveryStats { candidates: 1, pointer_hits: 1, ..Default::default() }
    );
}

#[test]
fn test_non_delegation_blob_is_rejected() {
    let store = store_with_pointer(0, 1, bytes!("6080604052348015600f57600080fd5b50"));
    let (reader, metrics) = reader(&store);

    let account = reader.read_account_data(EOA).unwrap().unwrap();
    assert_eq!(account.code_hash, KECCAK_EMPTY);
    assert_eq!(reader.read_account_code(EOA, 0, account.code_hash).unwrap(), None);
    let stats = metrics.stats();
    assert_eq!(stats.rejected_blobs, 1);
    assert_eq!(stats.misses, 1);
}

#[test]
fn test_pointer_at_wrong_incarnation_is_not_used() {
    let store = store_with_pointer(3, 1, delegation_code(DELEGATE));
    let (reader, _) = reader(&store);
    assert_eq!(reader.read_account_data(EOA).unwrap().unwrap().code_hash, KECCAK_EMPTY);
}

#[test]
fn test_latest_code_is_second_choice() {
    let code = delegation_code(DELEGATE);
    let store = StoreBuilder::with_latest_code()
        .raw(
            Table::PlainState,
            account_key(EOA),
            encode_account_with_lost_code_hash(&lost_hash_account(0)),
        )
        .latest_code(EOA, code.clone())
        .build();
    let (reader, metrics) = reader(&store);

    let account = reader.read_account_data(EOA).unwrap().unwrap();
    assert_eq!(account.code_hash, keccak256(&code));
    // the blob is not in the code table, the latest-code store still serves it
    assert_eq!(reader.read_account_code(EOA, 0, account.code_hash).unwrap(), Some(code));
    assert_eq!(metrics.stats().latest_code_hits, 1);
}

#[test]
fn test_stale_pointer_falls_through_to_latest_code() {
    let code = delegation_code(DELEGATE);
    let mut builder = StoreBuilder::with_latest_code()
        .raw(
            Table::PlainState,
            account_key(EOA),
            encode_account_with_lost_code_hash(&lost_hash_account(0)),
        )
        .latest_code(EOA, code.clone());
    builder.set_code(EOA, 1, bytes!("00"));
    let store = builder.build();
    let (reader, metrics) = reader(&store);

    assert_eq!(reader.read_account_data(EOA).unwrap().unwrap().code_hash, keccak256(&code));
    let stats = metrics.stats();
    assert_eq!(stats.rejected_blobs, 1);
    assert_eq!(stats.latest_code_hits, 1);
}

#[test]
fn test_record_without_code_hash_field_is_never_recovered() {
    let code = delegation_code(DELEGATE);
    let mut builder = StoreBuilder::new().account(EOA, lost_hash_account(0));
    builder.set_code(EOA, 1, code);
    let store = builder.build();
    let (reader, metrics) = reader(&store);

    assert_eq!(reader.read_account_data(EOA).unwrap().unwrap().code_hash, KECCAK_EMPTY);
    assert_eq!(metrics.stats().candidates, 0);
}

#[test]
fn test_cached_reader_agrees_with_plain_reader() {
    let code = delegation_code(DELEGATE);
    let store = store_with_pointer(0, 1, code.clone());
    let (plain, _) = reader(&store);
    let cache = ReadThroughCache::new(store.snapshot(), CacheConfig::default());
    let cached = CachedStateReader::new(&cache, Arc::default());

    let expected = plain.read_account_data(EOA).unwrap();
    assert_eq!(cached.read_account_data(EOA).unwrap(), expected);
    assert_eq!(cached.read_account_data(EOA).unwrap(), expected);
    assert!(cache.hits() >= 1);

    let code_hash = keccak256(&code);
    assert_eq!(cached.read_account_code(EOA, 0, code_hash).unwrap(), Some(code));
    assert_eq!(cached.read_account_incarnation(EOA).unwrap(), 0);
}

proptest! {
    #[test]
    fn proptest_resolution_is_idempotent_and_read_only(
        nonce in any::<u64>(),
        balance in any::<u128>(),
        incarnation in 0u64..4,
        delegated in any::<bool>(),
    ) {
        let account = Account {
            nonce,
            balance: U256::from(balance),
            incarnation,
            ..Default::default()
        };
        let blob = if delegated { delegation_code(DELEGATE) } else { bytes!("60016000") };
        let mut builder = StoreBuilder::new().raw(
            Table::PlainState,
            account_key(EOA),
            encode_account_with_lost_code_hash(&account),
        );
        builder.set_code(EOA, incarnation.max(1), blob);
        let store = builder.build();
        let snapshot = store.snapshot();
        let before = dump(&snapshot);

        let reader = PlainStateReader::new(snapshot.clone(), Arc::default());
        let first = reader.read_account_data(EOA).unwrap();
        let second = reader.read_account_data(EOA).unwrap();
        prop_assert_eq!(first, second);
        prop_assert_eq!(dump(&snapshot), before);
        prop_assert_eq!(dump(&store.snapshot()), dump(&snapshot));
    }

    #[test]
    fn proptest_non_delegation_blobs_never_give_code(
        blob in proptest::collection::vec(any::<u8>(), 0..64),
        incarnation in 0u64..4,
    ) {
        prop_assume!(!is_delegation(&blob));
        let mut builder = StoreBuilder::new().raw(
            Table::PlainState,
            account_key(EOA),
            encode_account_with_lost_code_hash(&lost_hash_account(incarnation)),
        );
        builder.set_code(EOA, incarnation.max(1), Bytes::from(blob));
        // a pointer under the incarnation that was not probed changes nothing either
        let store = builder.raw(
            Table::PlainContractCode,
            storage_prefix(EOA, incarnation + 7),
            keccak256(delegation_code(DELEGATE)).to_vec(),
        ).build();

        let reader = PlainStateReader::new(store.snapshot(), Arc::default());
        let account = reader.read_account_data(EOA).unwrap().unwrap();
        prop_assert_eq!(account.code_hash, KECCAK_EMPTY);
    }
}
