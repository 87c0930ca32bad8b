//! Key layout of the RocksDB store.
//!
//! Keys are `prefix || body`; prefixes are short ASCII tags ending in `_`.
//! Multi-valued keys append `!` and an 8-byte big-endian complement of the
//! counter (or day number) so an ascending prefix scan yields newest-first.

use torrent_node_types::{Address, Hash};

pub const ADDRESS_PREFIX: &[u8] = b"a_";
pub const ADDRESS_STATUS_PREFIX: &[u8] = b"A_";
pub const BALANCE_PREFIX: &[u8] = b"i_";
pub const TRANSACTION_PREFIX: &[u8] = b"t_";
pub const TRANSACTION_STATUS_PREFIX: &[u8] = b"T_";
pub const TOKEN_PREFIX: &[u8] = b"to_";
pub const CONTRACT_STATE_PREFIX: &[u8] = b"v_";
pub const CONTRACT_DETAILS_PREFIX: &[u8] = b"vd_";
pub const CONTRACT_CODE_PREFIX: &[u8] = b"vc_";
pub const BLOCK_PREFIX: &[u8] = b"b_";
pub const SIGN_BLOCK_PREFIX: &[u8] = b"signs_";
pub const MAIN_CURSOR_KEY: &[u8] = b"ms_";
pub const CONTRACT_CURSOR_KEY: &[u8] = b"ss_";
pub const NODE_TEST_CURSOR_KEY: &[u8] = b"ns_";
pub const FILE_PREFIX: &[u8] = b"f_";
pub const DELEGATE_PREFIX: &[u8] = b"d_";
pub const DELEGATE_HELPER_PREFIX: &[u8] = b"dh_";
pub const NODE_STAT_RESULT_PREFIX: &[u8] = b"nr2_";
pub const NODE_STAT_COUNT_PREFIX: &[u8] = b"nc_";
pub const NODE_STAT_TRUST_PREFIX: &[u8] = b"nt_";
pub const NODE_STATS_COUNT_PREFIX: &[u8] = b"ncs_";
pub const NODE_STAT_RPS_PREFIX: &[u8] = b"nrps_";
pub const ALL_TESTED_NODES_PREFIX: &[u8] = b"nsta_";
pub const ALL_NODES_KEY: &[u8] = b"nsaa2_";
pub const NODE_TEST_DAY_KEY: &[u8] = b"nsdn_";
pub const FORGING_SUMS_KEY: &[u8] = b"fsa_";
pub const TIMELINE_PREFIX: &[u8] = b"timeline_";
pub const COMMON_BALANCE_KEY: &[u8] = b"commno_balance";
pub const MODULES_KEY: &[u8] = b"modules";
pub const VERSION_DB_KEY: &[u8] = b"?version_db";
pub const BLOCK_METADATA_KEY: &[u8] = b"?block_meta";

const MULTI_DELIMITER: u8 = b'!';
const DELEGATE_PAIR_DELIMITER: u8 = b';';

/// Big-endian bitwise complement: larger indices sort lexicographically
/// earlier, so ascending scans run newest-first (index zero included).
pub fn desc_index(index: u64) -> [u8; 8] {
    (!index).to_be_bytes()
}

/// Inverse of [`desc_index`] for keys read back from a scan.
pub fn parse_desc_index(bytes: &[u8]) -> Option<u64> {
    <[u8; 8]>::try_from(bytes).ok().map(|raw| !u64::from_be_bytes(raw))
}

fn concat(parts: &[&[u8]]) -> Vec<u8> {
    let mut key = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

pub fn block_header(hash: &Hash) -> Vec<u8> {
    concat(&[BLOCK_PREFIX, hash.as_bytes()])
}

pub fn sign_block_header(hash: &Hash) -> Vec<u8> {
    concat(&[SIGN_BLOCK_PREFIX, hash.as_bytes()])
}

pub fn file_info(file_name: &str) -> Vec<u8> {
    concat(&[FILE_PREFIX, file_name.as_bytes()])
}

pub fn address_row(address: &Address, counter: u64) -> Vec<u8> {
    concat(&[
        ADDRESS_PREFIX,
        address.as_bytes(),
        &[MULTI_DELIMITER],
        &desc_index(counter),
    ])
}

pub fn address_rows_prefix(address: &Address) -> Vec<u8> {
    concat(&[ADDRESS_PREFIX, address.as_bytes(), &[MULTI_DELIMITER]])
}

pub fn address_status(address: &Address, tx_hash: &Hash) -> Vec<u8> {
    concat(&[
        ADDRESS_STATUS_PREFIX,
        address.as_bytes(),
        &[MULTI_DELIMITER],
        tx_hash.as_bytes(),
    ])
}

pub fn address_status_prefix(address: &Address) -> Vec<u8> {
    concat(&[ADDRESS_STATUS_PREFIX, address.as_bytes(), &[MULTI_DELIMITER]])
}

pub fn balance(address: &Address) -> Vec<u8> {
    concat(&[BALANCE_PREFIX, address.as_bytes()])
}

pub fn transaction(hash: &Hash) -> Vec<u8> {
    concat(&[TRANSACTION_PREFIX, hash.as_bytes()])
}

pub fn transaction_status(hash: &Hash) -> Vec<u8> {
    concat(&[TRANSACTION_STATUS_PREFIX, hash.as_bytes()])
}

pub fn token(address: &Address) -> Vec<u8> {
    concat(&[TOKEN_PREFIX, address.as_bytes()])
}

pub fn contract_state(address: &Address) -> Vec<u8> {
    concat(&[CONTRACT_STATE_PREFIX, address.as_bytes()])
}

pub fn contract_details(address: &Address) -> Vec<u8> {
    concat(&[CONTRACT_DETAILS_PREFIX, address.as_bytes()])
}

pub fn contract_code(address: &Address) -> Vec<u8> {
    concat(&[CONTRACT_CODE_PREFIX, address.as_bytes()])
}

/// `from;to` pair identifying one delegation direction.
pub fn delegate_pair(from: &Address, to: &Address) -> Vec<u8> {
    concat(&[from.as_bytes(), &[DELEGATE_PAIR_DELIMITER], to.as_bytes()])
}

/// Recovers the recipient part of a delegate row key produced by
/// [`delegate_row`] for a known sender.
pub fn second_of_delegate_pair(from: &Address, row_key: &[u8]) -> Option<Vec<u8>> {
    let head = DELEGATE_PREFIX.len() + from.as_bytes().len() + 1;
    let tail = row_key.len().checked_sub(9)?; // '!' + 8-byte counter
    if head > tail {
        return None;
    }
    Some(row_key[head..tail].to_vec())
}

pub fn delegate_row(pair: &[u8], counter: u64) -> Vec<u8> {
    concat(&[
        DELEGATE_PREFIX,
        pair,
        &[MULTI_DELIMITER],
        &desc_index(counter),
    ])
}

pub fn delegate_rows_prefix(pair: &[u8]) -> Vec<u8> {
    concat(&[DELEGATE_PREFIX, pair, &[MULTI_DELIMITER]])
}

/// All delegations going out of `from`, regardless of recipient.
pub fn delegate_from_prefix(from: &Address) -> Vec<u8> {
    concat(&[DELEGATE_PREFIX, from.as_bytes(), &[DELEGATE_PAIR_DELIMITER]])
}

pub fn delegate_helper(pair: &[u8]) -> Vec<u8> {
    concat(&[DELEGATE_HELPER_PREFIX, pair])
}

pub fn timeline_entry(sequence: u64) -> Vec<u8> {
    concat(&[TIMELINE_PREFIX, &sequence.to_be_bytes()])
}

pub fn parse_timeline_entry(key: &[u8]) -> Option<u64> {
    let body = key.strip_prefix(TIMELINE_PREFIX)?;
    <[u8; 8]>::try_from(body).ok().map(u64::from_be_bytes)
}

pub fn node_stat_result(server: &str) -> Vec<u8> {
    concat(&[NODE_STAT_RESULT_PREFIX, server.as_bytes()])
}

pub fn node_stat_trust(server: &str) -> Vec<u8> {
    concat(&[NODE_STAT_TRUST_PREFIX, server.as_bytes()])
}

pub fn node_stat_count(server: &str, day: u64) -> Vec<u8> {
    concat(&[
        NODE_STAT_COUNT_PREFIX,
        server.as_bytes(),
        &[MULTI_DELIMITER],
        &desc_index(day),
    ])
}

pub fn node_stat_count_prefix(server: &str) -> Vec<u8> {
    concat(&[NODE_STAT_COUNT_PREFIX, server.as_bytes(), &[MULTI_DELIMITER]])
}

pub fn node_stats_count(day: u64) -> Vec<u8> {
    concat(&[NODE_STATS_COUNT_PREFIX, &desc_index(day)])
}

pub fn node_rps(server: &str, day: u64) -> Vec<u8> {
    concat(&[
        NODE_STAT_RPS_PREFIX,
        server.as_bytes(),
        &[MULTI_DELIMITER],
        &desc_index(day),
    ])
}

pub fn all_tested_nodes(day: u64) -> Vec<u8> {
    concat(&[ALL_TESTED_NODES_PREFIX, &desc_index(day)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desc_index_orders_newest_first() {
        assert!(desc_index(5) < desc_index(4));
        assert!(desc_index(1) < desc_index(0));
        assert_eq!(parse_desc_index(&desc_index(42)), Some(42));
    }

    #[test]
    fn address_rows_scan_newest_first() {
        let address = Address::from_pubkey(b"addr");
        let older = address_row(&address, 1);
        let newer = address_row(&address, 2);
        assert!(newer < older);
        assert!(older.starts_with(&address_rows_prefix(&address)));
    }

    #[test]
    fn delegate_pair_recovers_recipient() {
        let from = Address::from_pubkey(b"from");
        let to = Address::from_pubkey(b"to");
        let pair = delegate_pair(&from, &to);
        let row = delegate_row(&pair, 9);
        let second = second_of_delegate_pair(&from, &row).unwrap();
        assert_eq!(second, to.as_bytes());
    }

    #[test]
    fn timeline_keys_are_sequential() {
        assert!(timeline_entry(1) < timeline_entry(2));
        assert_eq!(parse_timeline_entry(&timeline_entry(7)), Some(7));
    }
}
