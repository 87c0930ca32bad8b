//! Block headers and the records the sync driver persists alongside them.

use crate::primitives::{Address, FilePosition, Hash};
use crate::transaction::TransactionInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Block type tags as they read from the first eight payload bytes
/// (little-endian).
pub mod block_type {
    pub const LEGACY: u64 = 0xEFCD_AB89_6745_2301;
    pub const COMMON: u64 = 0x0000_0000_6745_2301;
    pub const STATE: u64 = 0x1100_0000_6745_2301;
    pub const FORGING: u64 = 0x2200_0000_6745_2301;
    pub const COMMON_V2: u64 = 0x0001_0000_6745_2301;
    pub const STATE_V2: u64 = 0x1101_0000_6745_2301;
    pub const FORGING_V2: u64 = 0x2201_0000_6745_2301;
    pub const SIGN: u64 = 0x1100_1111_6745_2301;
    pub const REJECTED_TXS: u64 = 0x3300_1111_6745_2301;
}

/// Size of the `u64` length field preceding every record in a block file.
pub const BLOCK_SIZE_FIELD_LEN: u64 = 8;

/// Header of a main (transaction-carrying) block.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BlockHeader {
    pub timestamp: u64,
    pub block_size: u64,
    pub block_type: u64,
    pub hash: Hash,
    pub prev_hash: Hash,
    pub txs_hash: Hash,
    /// Data of the leading self-signed transaction, when the block has one.
    pub signature: Vec<u8>,
    pub count_txs: u64,
    pub count_sign_tx: u64,
    pub file_pos: FilePosition,
    /// Assigned when the block is linked into the chain; final afterwards.
    /// Never persisted: a restart re-walks and re-numbers every stored
    /// header from the tip pointer.
    #[serde(skip)]
    pub block_number: Option<u64>,
    pub sender_sign: Vec<u8>,
    pub sender_pubkey: Vec<u8>,
    pub sender_address: Vec<u8>,
}

impl BlockHeader {
    pub fn is_state_block(&self) -> bool {
        self.block_type == block_type::STATE || self.block_type == block_type::STATE_V2
    }

    pub fn is_simple_block(&self) -> bool {
        self.block_type == block_type::LEGACY
            || self.block_type == block_type::COMMON
            || self.block_type == block_type::COMMON_V2
    }

    pub fn is_forging_block(&self) -> bool {
        self.block_type == block_type::FORGING || self.block_type == block_type::FORGING_V2
    }

    pub fn block_kind(&self) -> &'static str {
        if self.is_state_block() {
            "state"
        } else if self.is_forging_block() {
            "forging"
        } else {
            "block"
        }
    }

    /// Offset just past this block's record, including the length field.
    pub fn end_block_pos(&self) -> u64 {
        self.file_pos.pos + self.block_size + BLOCK_SIZE_FIELD_LEN
    }
}

/// Header of a sign block attesting the main block at `prev_hash`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SignBlockHeader {
    pub timestamp: u64,
    pub block_size: u64,
    pub hash: Hash,
    pub prev_hash: Hash,
    pub file_pos: FilePosition,
    pub sender_sign: Vec<u8>,
    pub sender_pubkey: Vec<u8>,
    pub sender_address: Vec<u8>,
}

impl SignBlockHeader {
    pub fn end_block_pos(&self) -> u64 {
        self.file_pos.pos + self.block_size + BLOCK_SIZE_FIELD_LEN
    }
}

/// Timeline entry for a sign block: just enough to find and identify it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MinimumSignBlockHeader {
    pub hash: Hash,
    pub prev_hash: Hash,
    pub file_pos: FilePosition,
}

/// Header of a rejected-transactions block. The body is retained on disk but
/// never projected.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RejectedBlockHeader {
    pub block_size: u64,
    pub file_pos: FilePosition,
}

impl RejectedBlockHeader {
    pub fn end_block_pos(&self) -> u64 {
        self.file_pos.pos + self.block_size + BLOCK_SIZE_FIELD_LEN
    }
}

/// Parsed main block.
#[derive(Clone, Debug, Default)]
pub struct BlockInfo {
    pub header: BlockHeader,
    pub txs: Vec<TransactionInfo>,
}

impl BlockInfo {
    pub fn block_signatures(&self) -> Vec<&TransactionInfo> {
        self.txs.iter().filter(|tx| tx.is_sign_block_tx).collect()
    }
}

/// One attestation record inside a sign block.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SignTransactionInfo {
    pub block_hash: Hash,
    pub sign: Vec<u8>,
    pub pubkey: Vec<u8>,
    pub address: Address,
}

/// Parsed sign block.
#[derive(Clone, Debug, Default)]
pub struct SignBlockInfo {
    pub header: SignBlockHeader,
    pub txs: Vec<SignTransactionInfo>,
}

/// Parsed rejected-transactions block.
#[derive(Clone, Debug, Default)]
pub struct RejectedBlockInfo {
    pub header: RejectedBlockHeader,
}

/// The three block variants the parser can produce.
#[derive(Clone, Debug)]
pub enum Block {
    Main(BlockInfo),
    Sign(SignBlockInfo),
    Rejected(RejectedBlockInfo),
}

/// Canonical tip pointer, tie-broken lexicographically among siblings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocksMetadata {
    pub block_hash: Hash,
    pub prev_block_hash: Hash,
}

/// Per-file ingestion cursor: where the next unread record begins.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_pos: FilePosition,
}

/// Resume point of a projection worker. Each worker persists its own copy so
/// the three pipelines progress independently.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCursor {
    pub block_number: u64,
    pub block_hash: Option<Hash>,
    pub count_val: u64,
}

impl WorkerCursor {
    pub fn new(block_number: u64, block_hash: Hash, count_val: u64) -> WorkerCursor {
        WorkerCursor {
            block_number,
            block_hash: Some(block_hash),
            count_val,
        }
    }
}

/// Cumulative minted value per forging int-status tag.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForgingSums {
    pub sums: BTreeMap<u64, u64>,
    pub block_number: u64,
}

impl ForgingSums {
    pub fn merge(&mut self, other: &ForgingSums) {
        for (status, value) in &other.sums {
            *self.sums.entry(*status).or_default() += value;
        }
        self.block_number = self.block_number.max(other.block_number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_kind_predicates() {
        let mut header = BlockHeader {
            block_type: block_type::COMMON_V2,
            ..BlockHeader::default()
        };
        assert!(header.is_simple_block());
        header.block_type = block_type::STATE;
        assert!(header.is_state_block());
        assert_eq!(header.block_kind(), "state");
        header.block_type = block_type::FORGING_V2;
        assert!(header.is_forging_block());
    }

    #[test]
    fn forging_sums_merge_accumulates() {
        let mut first = ForgingSums::default();
        first.sums.insert(100, 5);
        first.block_number = 3;
        let mut second = ForgingSums::default();
        second.sums.insert(100, 7);
        second.sums.insert(101, 1);
        second.block_number = 2;
        first.merge(&second);
        assert_eq!(first.sums[&100], 12);
        assert_eq!(first.sums[&101], 1);
        assert_eq!(first.block_number, 3);
    }

    #[test]
    fn block_number_does_not_survive_persistence() {
        let header = BlockHeader {
            hash: Hash([3; 32]),
            block_number: Some(7),
            ..BlockHeader::default()
        };
        let raw = bincode::serialize(&header).unwrap();
        let restored: BlockHeader = bincode::deserialize(&raw).unwrap();
        assert_eq!(restored.hash, header.hash);
        // Numbers are assigned by the chain walk, never loaded from disk.
        assert_eq!(restored.block_number, None);
    }

    #[test]
    fn end_block_pos_includes_length_field() {
        let header = BlockHeader {
            block_size: 100,
            file_pos: FilePosition::new("blk00001.dat", 16),
            ..BlockHeader::default()
        };
        assert_eq!(header.end_block_pos(), 124);
    }
}
