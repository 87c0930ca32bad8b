//! Typed accessors over the raw key-value store, one per persisted record
//! family. Write paths go through [`super::Batch`] so a worker's step stays
//! atomic; the readers here are used by workers and the query surface alike.

use super::keys;
use super::kv::{KvError, KvStore};
use std::collections::HashSet;
use torrent_node_config::types::Modules;
use torrent_node_types::{
    AddressInfo, AllNodes, AllTestedNodes, BalanceInfo, BestNodeTest, BlockHeader, BlocksMetadata,
    CommonBalance, ContractCode, ContractDetails, ContractState, DelegateHelper, DelegateState,
    ForgingSums, MinimumSignBlockHeader, NodeRps, NodeTestCount, NodeTestDayNumber, NodeTestTrust,
    SignBlockHeader, Token, TransactionInfo, TransactionStatus, WorkerCursor,
};
use torrent_node_types::{Address, FileInfo, Hash};

pub fn find_block_metadata(kv: &KvStore) -> Result<Option<BlocksMetadata>, KvError> {
    kv.get_record(keys::BLOCK_METADATA_KEY)
}

pub fn find_main_cursor(kv: &KvStore) -> Result<WorkerCursor, KvError> {
    kv.get_record_or_default(keys::MAIN_CURSOR_KEY)
}

pub fn find_contract_cursor(kv: &KvStore) -> Result<WorkerCursor, KvError> {
    kv.get_record_or_default(keys::CONTRACT_CURSOR_KEY)
}

pub fn find_node_test_cursor(kv: &KvStore) -> Result<WorkerCursor, KvError> {
    kv.get_record_or_default(keys::NODE_TEST_CURSOR_KEY)
}

pub fn find_balance(kv: &KvStore, address: &Address) -> Result<BalanceInfo, KvError> {
    kv.get_record_or_default(&keys::balance(address))
}

pub fn find_transaction(kv: &KvStore, hash: &Hash) -> Result<Option<TransactionInfo>, KvError> {
    kv.get_record(&keys::transaction(hash))
}

pub fn find_transaction_status(
    kv: &KvStore,
    hash: &Hash,
) -> Result<Option<TransactionStatus>, KvError> {
    kv.get_record(&keys::transaction_status(hash))
}

pub fn find_token(kv: &KvStore, address: &Address) -> Result<Option<Token>, KvError> {
    kv.get_record(&keys::token(address))
}

pub fn find_delegate_helper(kv: &KvStore, pair: &[u8]) -> Result<Option<DelegateHelper>, KvError> {
    kv.get_record(&keys::delegate_helper(pair))
}

/// The newest still-active delegation under `pair` whose key the current
/// batch has not already deleted.
pub fn find_delegate_row(
    kv: &KvStore,
    pair: &[u8],
    excluded: &HashSet<Vec<u8>>,
) -> Result<Option<(Vec<u8>, DelegateState)>, KvError> {
    let prefix = keys::delegate_rows_prefix(pair);
    match kv.find_first_of(&prefix, excluded)? {
        Some((key, raw)) => {
            let state: DelegateState = bincode::deserialize(&raw).map_err(|source| {
                KvError::Decode {
                    key: hex::encode(&key),
                    source,
                }
            })?;
            Ok(Some((key, state)))
        }
        None => Ok(None),
    }
}

/// Every active delegation going out of `from`, newest first per pair.
pub fn find_all_delegations_from(
    kv: &KvStore,
    from: &Address,
) -> Result<Vec<(Vec<u8>, DelegateState)>, KvError> {
    let prefix = keys::delegate_from_prefix(from);
    let mut result = Vec::new();
    for (key, raw) in kv.prefix_scan(&prefix, 0, 0)? {
        let state: DelegateState =
            bincode::deserialize(&raw).map_err(|source| KvError::Decode {
                key: hex::encode(&key),
                source,
            })?;
        result.push((key, state));
    }
    Ok(result)
}

pub fn find_address_rows(
    kv: &KvStore,
    address: &Address,
    offset: usize,
    count: usize,
) -> Result<Vec<AddressInfo>, KvError> {
    let prefix = keys::address_rows_prefix(address);
    kv.prefix_scan(&prefix, offset, count)?
        .into_iter()
        .map(|(key, raw)| {
            bincode::deserialize(&raw).map_err(|source| KvError::Decode {
                key: hex::encode(&key),
                source,
            })
        })
        .collect()
}

pub fn find_address_statuses(
    kv: &KvStore,
    address: &Address,
) -> Result<Vec<TransactionStatus>, KvError> {
    let prefix = keys::address_status_prefix(address);
    kv.prefix_scan(&prefix, 0, 0)?
        .into_iter()
        .map(|(key, raw)| {
            bincode::deserialize(&raw).map_err(|source| KvError::Decode {
                key: hex::encode(&key),
                source,
            })
        })
        .collect()
}

pub fn get_all_files(kv: &KvStore) -> Result<Vec<FileInfo>, KvError> {
    kv.prefix_scan(keys::FILE_PREFIX, 0, 0)?
        .into_iter()
        .map(|(key, raw)| {
            bincode::deserialize(&raw).map_err(|source| KvError::Decode {
                key: hex::encode(&key),
                source,
            })
        })
        .collect()
}

pub fn get_all_block_headers(kv: &KvStore) -> Result<Vec<BlockHeader>, KvError> {
    kv.prefix_scan(keys::BLOCK_PREFIX, 0, 0)?
        .into_iter()
        .map(|(key, raw)| {
            bincode::deserialize(&raw).map_err(|source| KvError::Decode {
                key: hex::encode(&key),
                source,
            })
        })
        .collect()
}

pub fn find_block_header(kv: &KvStore, hash: &Hash) -> Result<Option<BlockHeader>, KvError> {
    kv.get_record(&keys::block_header(hash))
}

pub fn find_sign_block_header(
    kv: &KvStore,
    hash: &Hash,
) -> Result<Option<SignBlockHeader>, KvError> {
    kv.get_record(&keys::sign_block_header(hash))
}

pub fn find_modules(kv: &KvStore) -> Result<Option<Modules>, KvError> {
    kv.get_record(keys::MODULES_KEY)
}

pub fn find_version_db(kv: &KvStore) -> Result<Option<String>, KvError> {
    kv.get_record(keys::VERSION_DB_KEY)
}

pub fn find_common_balance(kv: &KvStore) -> Result<CommonBalance, KvError> {
    kv.get_record_or_default(keys::COMMON_BALANCE_KEY)
}

pub fn find_forging_sums(kv: &KvStore) -> Result<ForgingSums, KvError> {
    kv.get_record_or_default(keys::FORGING_SUMS_KEY)
}

/// Timeline entries in persisted sequence order.
pub fn find_all_timeline_entries(
    kv: &KvStore,
) -> Result<Vec<(u64, TimelineRecord)>, KvError> {
    let mut result = Vec::new();
    for (key, raw) in kv.prefix_scan(keys::TIMELINE_PREFIX, 0, 0)? {
        let Some(sequence) = keys::parse_timeline_entry(&key) else {
            continue;
        };
        let record: TimelineRecord =
            bincode::deserialize(&raw).map_err(|source| KvError::Decode {
                key: hex::encode(&key),
                source,
            })?;
        result.push((sequence, record));
    }
    result.sort_by_key(|(sequence, _)| *sequence);
    Ok(result)
}

/// Persisted form of one timeline element.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum TimelineRecord {
    Main { hash: Hash },
    Sign(MinimumSignBlockHeader),
}

pub fn find_contract_state(kv: &KvStore, address: &Address) -> Result<Option<ContractState>, KvError> {
    kv.get_record(&keys::contract_state(address))
}

pub fn find_contract_details(
    kv: &KvStore,
    address: &Address,
) -> Result<Option<ContractDetails>, KvError> {
    kv.get_record(&keys::contract_details(address))
}

pub fn find_contract_code(kv: &KvStore, address: &Address) -> Result<Option<ContractCode>, KvError> {
    kv.get_record(&keys::contract_code(address))
}

pub fn find_node_stat_result(kv: &KvStore, server: &str) -> Result<BestNodeTest, KvError> {
    kv.get_record_or_default(&keys::node_stat_result(server))
}

pub fn find_node_stat_trust(kv: &KvStore, server: &str) -> Result<NodeTestTrust, KvError> {
    kv.get_record_or_default(&keys::node_stat_trust(server))
}

pub fn find_node_stat_count(
    kv: &KvStore,
    server: &str,
    day: u64,
) -> Result<NodeTestCount, KvError> {
    kv.get_record_or_default(&keys::node_stat_count(server, day))
}

/// Latest-day test counters for one server; a single seek thanks to the
/// descending day suffix.
pub fn find_node_stat_count_last(
    kv: &KvStore,
    server: &str,
) -> Result<Option<NodeTestCount>, KvError> {
    let prefix = keys::node_stat_count_prefix(server);
    match kv.find_first_of(&prefix, &HashSet::new())? {
        Some((key, raw)) => bincode::deserialize(&raw)
            .map(Some)
            .map_err(|source| KvError::Decode {
                key: hex::encode(&key),
                source,
            }),
        None => Ok(None),
    }
}

pub fn find_node_stats_count(kv: &KvStore, day: u64) -> Result<NodeTestCount, KvError> {
    kv.get_record_or_default(&keys::node_stats_count(day))
}

pub fn find_node_stats_count_last(kv: &KvStore) -> Result<Option<NodeTestCount>, KvError> {
    match kv.find_first_of(keys::NODE_STATS_COUNT_PREFIX, &HashSet::new())? {
        Some((key, raw)) => bincode::deserialize(&raw)
            .map(Some)
            .map_err(|source| KvError::Decode {
                key: hex::encode(&key),
                source,
            }),
        None => Ok(None),
    }
}

pub fn find_node_rps(kv: &KvStore, server: &str, day: u64) -> Result<NodeRps, KvError> {
    kv.get_record_or_default(&keys::node_rps(server, day))
}

pub fn find_all_tested_nodes(kv: &KvStore, day: u64) -> Result<AllTestedNodes, KvError> {
    kv.get_record_or_default(&keys::all_tested_nodes(day))
}

pub fn find_all_tested_nodes_last(kv: &KvStore) -> Result<Option<AllTestedNodes>, KvError> {
    match kv.find_first_of(keys::ALL_TESTED_NODES_PREFIX, &HashSet::new())? {
        Some((key, raw)) => bincode::deserialize(&raw)
            .map(Some)
            .map_err(|source| KvError::Decode {
                key: hex::encode(&key),
                source,
            }),
        None => Ok(None),
    }
}

pub fn find_all_nodes(kv: &KvStore) -> Result<AllNodes, KvError> {
    kv.get_record_or_default(keys::ALL_NODES_KEY)
}

pub fn find_node_test_day(kv: &KvStore) -> Result<NodeTestDayNumber, KvError> {
    kv.get_record_or_default(keys::NODE_TEST_DAY_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Batch;
    use tempfile::TempDir;

    #[test]
    fn cursor_roundtrip() {
        let dir = TempDir::new().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        assert_eq!(find_main_cursor(&kv).unwrap(), WorkerCursor::default());

        let cursor = WorkerCursor::new(5, Hash([1; 32]), 42);
        let mut batch = Batch::new();
        batch
            .put_record(keys::MAIN_CURSOR_KEY.to_vec(), &cursor)
            .unwrap();
        kv.write(batch).unwrap();
        assert_eq!(find_main_cursor(&kv).unwrap(), cursor);
    }

    #[test]
    fn newest_day_wins_single_seek() {
        let dir = TempDir::new().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        for day in [0u64, 1, 2] {
            let count = NodeTestCount {
                count_all: day + 1,
                ..NodeTestCount::new(day)
            };
            kv.put_record(&keys::node_stat_count("srv", day), &count)
                .unwrap();
        }
        let last = find_node_stat_count_last(&kv, "srv").unwrap().unwrap();
        assert_eq!(last.day, 2);
        assert_eq!(last.count_all, 3);
    }
}
