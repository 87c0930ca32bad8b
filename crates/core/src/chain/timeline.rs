//! Ordered log of observed blocks and the index that answers "which sign
//! block attests this main block".

use crate::storage::records::TimelineRecord;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use torrent_node_types::{BlockHeader, Hash, MinimumSignBlockHeader, SignBlockHeader};

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("timeline is not initialized yet")]
    NotInitialized,
    #[error("element {0} already exists in the timeline")]
    Duplicate(Hash),
    #[error("timeline sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },
}

#[derive(Default)]
struct TimelineState {
    entries: Vec<TimelineRecord>,
    by_hash: HashMap<Hash, usize>,
    signs_parent: HashMap<Hash, usize>,
    initialized: bool,
}

impl TimelineState {
    fn insert(&mut self, record: TimelineRecord) -> Result<u64, TimelineError> {
        let hash = match &record {
            TimelineRecord::Main { hash } => *hash,
            TimelineRecord::Sign(header) => header.hash,
        };
        if self.by_hash.contains_key(&hash) {
            return Err(TimelineError::Duplicate(hash));
        }
        let index = self.entries.len();
        if let TimelineRecord::Sign(header) = &record {
            self.signs_parent.insert(header.prev_hash, index);
        }
        self.by_hash.insert(hash, index);
        self.entries.push(record);
        Ok(index as u64)
    }
}

/// The timeline. Guarded by a single mutex; bulk deserialization runs once
/// at startup and flips the `initialized` flag, reads require it.
#[derive(Default)]
pub struct Timeline {
    state: Mutex<TimelineState>,
}

impl Timeline {
    pub fn new() -> Timeline {
        Timeline::default()
    }

    /// Bulk-loads persisted entries in sequence order.
    pub fn deserialize(
        &self,
        entries: Vec<(u64, TimelineRecord)>,
    ) -> Result<(), TimelineError> {
        let mut state = self.state.lock().expect("timeline lock poisoned");
        for (sequence, record) in entries {
            let expected = state.entries.len() as u64;
            if sequence != expected {
                return Err(TimelineError::SequenceGap {
                    expected,
                    got: sequence,
                });
            }
            state.insert(record)?;
        }
        state.initialized = true;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("timeline lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a main block; returns the sequence key and the record to
    /// persist under it.
    pub fn add_simple_block(
        &self,
        header: &BlockHeader,
    ) -> Result<(u64, TimelineRecord), TimelineError> {
        let record = TimelineRecord::Main { hash: header.hash };
        let mut state = self.state.lock().expect("timeline lock poisoned");
        let sequence = state.insert(record.clone())?;
        Ok((sequence, record))
    }

    /// Appends a sign block and indexes it by the main block it attests.
    pub fn add_sign_block(
        &self,
        header: &SignBlockHeader,
    ) -> Result<(u64, TimelineRecord), TimelineError> {
        let record = TimelineRecord::Sign(MinimumSignBlockHeader {
            hash: header.hash,
            prev_hash: header.prev_hash,
            file_pos: header.file_pos.clone(),
        });
        let mut state = self.state.lock().expect("timeline lock poisoned");
        let sequence = state.insert(record.clone())?;
        Ok((sequence, record))
    }

    /// The sign block attesting `hash`, if one was observed.
    pub fn find_sign_for_block(
        &self,
        hash: &Hash,
    ) -> Result<Option<MinimumSignBlockHeader>, TimelineError> {
        let state = self.state.lock().expect("timeline lock poisoned");
        if !state.initialized {
            return Err(TimelineError::NotInitialized);
        }
        Ok(state.signs_parent.get(hash).map(|index| {
            match &state.entries[*index] {
                TimelineRecord::Sign(header) => header.clone(),
                TimelineRecord::Main { .. } => unreachable!("signs_parent points at sign entries"),
            }
        }))
    }

    /// Sign headers observed between two blocks in timeline order; either
    /// bound may be absent to start at the beginning or run to the end.
    pub fn get_signatures_between(
        &self,
        first: Option<&Hash>,
        second: Option<&Hash>,
    ) -> Result<Vec<MinimumSignBlockHeader>, TimelineError> {
        let state = self.state.lock().expect("timeline lock poisoned");
        if !state.initialized {
            return Err(TimelineError::NotInitialized);
        }
        let begin = first
            .and_then(|hash| state.by_hash.get(hash).copied())
            .unwrap_or(0);
        let end = second
            .and_then(|hash| state.by_hash.get(hash).copied())
            .unwrap_or(state.entries.len());
        Ok(state.entries[begin..end]
            .iter()
            .filter_map(|entry| match entry {
                TimelineRecord::Sign(header) => Some(header.clone()),
                TimelineRecord::Main { .. } => None,
            })
            .collect())
    }

    /// The timeline entry for `hash`, when it is a sign block.
    pub fn find_signature(
        &self,
        hash: &Hash,
    ) -> Result<Option<MinimumSignBlockHeader>, TimelineError> {
        let state = self.state.lock().expect("timeline lock poisoned");
        if !state.initialized {
            return Err(TimelineError::NotInitialized);
        }
        Ok(state.by_hash.get(hash).and_then(|index| {
            match &state.entries[*index] {
                TimelineRecord::Sign(header) => Some(header.clone()),
                TimelineRecord::Main { .. } => None,
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use torrent_node_types::FilePosition;

    fn main_header(hash: u8) -> BlockHeader {
        BlockHeader {
            hash: Hash([hash; 32]),
            ..BlockHeader::default()
        }
    }

    fn sign_header(hash: u8, prev: u8) -> SignBlockHeader {
        SignBlockHeader {
            hash: Hash([hash; 32]),
            prev_hash: Hash([prev; 32]),
            file_pos: FilePosition::new("blk00001.dat", hash as u64),
            ..SignBlockHeader::default()
        }
    }

    fn initialized() -> Timeline {
        let timeline = Timeline::new();
        timeline.deserialize(Vec::new()).unwrap();
        timeline
    }

    #[test]
    fn reads_require_initialization() {
        let timeline = Timeline::new();
        assert!(matches!(
            timeline.find_signature(&Hash([1; 32])),
            Err(TimelineError::NotInitialized)
        ));
    }

    #[test]
    fn sign_block_is_found_by_attested_hash() {
        let timeline = initialized();
        timeline.add_simple_block(&main_header(1)).unwrap();
        timeline.add_sign_block(&sign_header(2, 1)).unwrap();

        let found = timeline.find_sign_for_block(&Hash([1; 32])).unwrap().unwrap();
        assert_eq!(found.hash, Hash([2; 32]));
        assert!(timeline
            .find_sign_for_block(&Hash([9; 32]))
            .unwrap()
            .is_none());
        assert!(timeline.find_signature(&Hash([2; 32])).unwrap().is_some());
        assert!(timeline.find_signature(&Hash([1; 32])).unwrap().is_none());
    }

    #[test]
    fn duplicates_are_rejected() {
        let timeline = initialized();
        timeline.add_simple_block(&main_header(1)).unwrap();
        assert!(matches!(
            timeline.add_simple_block(&main_header(1)),
            Err(TimelineError::Duplicate(_))
        ));
    }

    #[test]
    fn signatures_between_bounds() {
        let timeline = initialized();
        timeline.add_simple_block(&main_header(1)).unwrap();
        timeline.add_sign_block(&sign_header(2, 1)).unwrap();
        timeline.add_simple_block(&main_header(3)).unwrap();
        timeline.add_sign_block(&sign_header(4, 3)).unwrap();

        let all = timeline.get_signatures_between(None, None).unwrap();
        assert_eq!(all.len(), 2);

        let tail = timeline
            .get_signatures_between(Some(&Hash([3; 32])), None)
            .unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].hash, Hash([4; 32]));
    }

    #[test]
    fn persisted_roundtrip_restores_indices() {
        let timeline = initialized();
        timeline.add_simple_block(&main_header(1)).unwrap();
        let (sequence, record) = timeline.add_sign_block(&sign_header(2, 1)).unwrap();
        assert_eq!(sequence, 1);

        let restored = Timeline::new();
        restored
            .deserialize(vec![(0, TimelineRecord::Main { hash: Hash([1; 32]) }), (1, record)])
            .unwrap();
        assert!(restored
            .find_sign_for_block(&Hash([1; 32]))
            .unwrap()
            .is_some());
    }
}
