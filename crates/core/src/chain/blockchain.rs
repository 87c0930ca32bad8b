//! Hash-indexed header map plus the number->hash vector, built from
//! out-of-order arrivals by walking prev-hash links.

use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use torrent_node_types::{BlockHeader, Hash};

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("block {0} already exists")]
    AlreadyExists(Hash),
    #[error("hash {0} does not belong to the chain")]
    UnknownHash(Hash),
    #[error("block {hash} links to number {number} but the chain holds {len} blocks")]
    Gap { hash: Hash, number: u64, len: u64 },
    #[error("no state block seen yet")]
    NoStateBlock,
}

struct ChainState {
    blocks: HashMap<Hash, BlockHeader>,
    hashes: Vec<Hash>,
    last_state_block: u64,
}

impl ChainState {
    fn genesis() -> ChainState {
        let genesis = BlockHeader {
            hash: Hash::ZERO,
            block_number: Some(0),
            ..BlockHeader::default()
        };
        let mut blocks = HashMap::new();
        blocks.insert(genesis.hash, genesis);
        ChainState {
            blocks,
            hashes: vec![Hash::ZERO],
            last_state_block: 0,
        }
    }
}

/// The chain index. Readers take the shared side of the lock; the two
/// mutators take it exclusively. The sync driver is the only writer.
pub struct BlockChain {
    state: RwLock<ChainState>,
}

impl Default for BlockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockChain {
    pub fn new() -> BlockChain {
        BlockChain {
            state: RwLock::new(ChainState::genesis()),
        }
    }

    /// Inserts a header without assigning a number. Returns whether the
    /// hash was already present.
    pub fn add_without_calc(&self, header: BlockHeader) -> bool {
        let mut state = self.state.write().expect("chain lock poisoned");
        if state.blocks.contains_key(&header.hash) {
            return true;
        }
        state.blocks.insert(header.hash, header);
        false
    }

    pub fn remove_block(&self, hash: &Hash) {
        let mut state = self.state.write().expect("chain lock poisoned");
        state.blocks.remove(hash);
    }

    /// Walks prev-hash links from `last_hash` numbering every unnumbered
    /// header it passes. Returns the resulting chain length, or 0 when the
    /// walk dangles before reaching a numbered anchor (the headers stay
    /// unnumbered in that case).
    pub fn calc_blockchain(&self, last_hash: &Hash) -> Result<u64, ChainError> {
        let mut state = self.state.write().expect("chain lock poisoned");
        let state = &mut *state;

        if !state.blocks.contains_key(last_hash) {
            return Err(ChainError::UnknownHash(*last_hash));
        }

        // Stack of unnumbered headers, newest first.
        let mut pending: Vec<Hash> = Vec::new();
        let mut current = *last_hash;
        let anchor_number = loop {
            let header = match state.blocks.get(&current) {
                Some(header) => header,
                // Dangling prev hash: not linkable yet.
                None => return Ok(0),
            };
            if let Some(number) = header.block_number {
                break number;
            }
            pending.push(current);
            current = header.prev_hash;
        };

        let total = anchor_number + pending.len() as u64;
        for (index, hash) in pending.iter().rev().enumerate() {
            let number = anchor_number + index as u64 + 1;
            let len = state.hashes.len() as u64;
            if number != len {
                // Roll back everything assigned in this walk.
                for assigned in pending.iter().rev().take(index) {
                    if let Some(header) = state.blocks.get_mut(assigned) {
                        header.block_number = None;
                    }
                    state.hashes.pop();
                }
                return Err(ChainError::Gap {
                    hash: *hash,
                    number,
                    len,
                });
            }
            let header = state.blocks.get_mut(hash).expect("pending header present");
            header.block_number = Some(number);
            if header.is_state_block() {
                state.last_state_block = state.last_state_block.max(number);
            }
            state.hashes.push(*hash);
        }

        Ok(total)
    }

    /// Inserts and links one header; on any linking failure the header is
    /// removed again so a later arrival can retry.
    pub fn add_block(&self, header: BlockHeader) -> Result<u64, ChainError> {
        let hash = header.hash;
        if self.add_without_calc(header) {
            return Err(ChainError::AlreadyExists(hash));
        }
        match self.calc_blockchain(&hash) {
            Ok(total) => Ok(total),
            Err(err) => {
                self.remove_block(&hash);
                Err(err)
            }
        }
    }

    pub fn get_block_by_hash(&self, hash: &Hash) -> Option<BlockHeader> {
        let state = self.state.read().expect("chain lock poisoned");
        state.blocks.get(hash).cloned()
    }

    pub fn get_block_by_number(&self, number: u64) -> Option<BlockHeader> {
        let state = self.state.read().expect("chain lock poisoned");
        let hash = state.hashes.get(number as usize)?;
        state.blocks.get(hash).cloned()
    }

    pub fn get_last_block(&self) -> BlockHeader {
        let state = self.state.read().expect("chain lock poisoned");
        let hash = state.hashes.last().expect("genesis always present");
        state.blocks.get(hash).cloned().expect("indexed header present")
    }

    /// Number of linked non-genesis blocks.
    pub fn count_blocks(&self) -> u64 {
        let state = self.state.read().expect("chain lock poisoned");
        state.hashes.len() as u64 - 1
    }

    pub fn get_last_state_block(&self) -> Result<BlockHeader, ChainError> {
        let state = self.state.read().expect("chain lock poisoned");
        if state.last_state_block == 0 {
            return Err(ChainError::NoStateBlock);
        }
        let hash = state.hashes[state.last_state_block as usize];
        Ok(state.blocks.get(&hash).cloned().expect("indexed header present"))
    }

    /// Drops everything back to the genesis sentinel.
    pub fn clear(&self) {
        let mut state = self.state.write().expect("chain lock poisoned");
        *state = ChainState::genesis();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use torrent_node_types::block::block_type;

    fn header(hash: u8, prev: u8) -> BlockHeader {
        BlockHeader {
            hash: Hash([hash; 32]),
            prev_hash: if prev == 0 { Hash::ZERO } else { Hash([prev; 32]) },
            block_type: block_type::COMMON_V2,
            ..BlockHeader::default()
        }
    }

    #[test]
    fn sequential_add() {
        let chain = BlockChain::new();
        assert_eq!(chain.add_block(header(1, 0)).unwrap(), 1);
        assert_eq!(chain.add_block(header(2, 1)).unwrap(), 2);
        assert_eq!(chain.count_blocks(), 2);
        assert_eq!(
            chain.get_block_by_number(2).unwrap().hash,
            Hash([2; 32])
        );
        assert_eq!(chain.get_last_block().hash, Hash([2; 32]));
    }

    #[test]
    fn linking_is_commutative_across_arrival_order() {
        // Any permutation of a linear chain fed to add_without_calc plus a
        // single calc from the tip yields the same numbering.
        let headers: Vec<BlockHeader> = (1..=5u8).map(|i| header(i, i - 1)).collect();
        let permutations: [[usize; 5]; 4] = [
            [0, 1, 2, 3, 4],
            [4, 3, 2, 1, 0],
            [2, 0, 4, 1, 3],
            [1, 4, 0, 3, 2],
        ];
        let mut all_orders = Vec::new();
        for permutation in permutations {
            let chain = BlockChain::new();
            for index in permutation {
                assert!(!chain.add_without_calc(headers[index].clone()));
            }
            assert_eq!(chain.calc_blockchain(&Hash([5; 32])).unwrap(), 5);
            let order: Vec<Hash> = (0..=5)
                .map(|n| chain.get_block_by_number(n).unwrap().hash)
                .collect();
            all_orders.push(order);
        }
        assert!(all_orders.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn orphan_walk_is_reported_not_linkable() {
        let chain = BlockChain::new();
        // Block 2 arrives before block 1: its walk dangles.
        assert!(!chain.add_without_calc(header(2, 1)));
        assert_eq!(chain.calc_blockchain(&Hash([2; 32])).unwrap(), 0);
        assert_eq!(chain.count_blocks(), 0);
        assert!(chain.get_block_by_hash(&Hash([2; 32])).unwrap().block_number.is_none());

        // Once block 1 shows up the pair links in one walk.
        assert!(!chain.add_without_calc(header(1, 0)));
        assert_eq!(chain.calc_blockchain(&Hash([2; 32])).unwrap(), 2);
        assert_eq!(chain.count_blocks(), 2);
    }

    #[test]
    fn duplicate_add_block_fails_and_keeps_header() {
        let chain = BlockChain::new();
        chain.add_block(header(1, 0)).unwrap();
        let err = chain.add_block(header(1, 0)).unwrap_err();
        assert!(matches!(err, ChainError::AlreadyExists(_)));
        assert!(chain.get_block_by_hash(&Hash([1; 32])).is_some());
    }

    #[test]
    fn sibling_fork_is_rejected_as_gap() {
        let chain = BlockChain::new();
        chain.add_block(header(1, 0)).unwrap();
        chain.add_block(header(2, 1)).unwrap();
        // A sibling of block 2 would need number 2 while the chain already
        // holds 3 entries; add_block rolls it back out of the map.
        let err = chain.add_block(header(9, 1)).unwrap_err();
        assert!(matches!(err, ChainError::Gap { .. }));
        assert!(chain.get_block_by_hash(&Hash([9; 32])).is_none());
        assert_eq!(chain.count_blocks(), 2);
    }

    #[test]
    fn state_block_is_tracked() {
        let chain = BlockChain::new();
        chain.add_block(header(1, 0)).unwrap();
        let mut state_header = header(2, 1);
        state_header.block_type = block_type::STATE_V2;
        chain.add_block(state_header).unwrap();
        assert_eq!(chain.get_last_state_block().unwrap().hash, Hash([2; 32]));
    }

    #[test]
    fn no_state_block_is_an_error() {
        let chain = BlockChain::new();
        assert!(matches!(
            chain.get_last_state_block(),
            Err(ChainError::NoStateBlock)
        ));
    }
}
