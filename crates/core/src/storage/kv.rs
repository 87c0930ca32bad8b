//! RocksDB-backed ordered key-value store with atomic write batches.

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("rocksdb: {0}")]
    RocksDb(#[from] rocksdb::Error),
    #[error("record decode failed for key {key}: {source}")]
    Decode {
        key: String,
        source: bincode::Error,
    },
    #[error("record encode failed: {0}")]
    Encode(#[source] bincode::Error),
}

/// Pending writes of one projection step. All puts and deletes land
/// atomically or not at all; reads through the batch observe its own
/// pending state first.
#[derive(Default)]
pub struct Batch {
    // None marks a pending delete.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl Batch {
    pub fn new() -> Batch {
        Batch::default()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    pub fn put_record<T: Serialize>(&mut self, key: Vec<u8>, value: &T) -> Result<(), KvError> {
        let encoded = bincode::serialize(value).map_err(KvError::Encode)?;
        self.put(key, encoded);
        Ok(())
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.writes.insert(key, None);
    }

    /// Pending state for `key`: `None` when untouched, `Some(None)` when
    /// pending deletion.
    pub fn pending(&self, key: &[u8]) -> Option<Option<&[u8]>> {
        self.writes.get(key).map(|value| value.as_deref())
    }

    pub fn pending_record<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, KvError> {
        match self.pending(key) {
            Some(Some(raw)) => decode(key, raw).map(Some),
            _ => Ok(None),
        }
    }

    /// Keys this batch will delete; the delegation scan must skip them.
    pub fn deleted_keys(&self) -> HashSet<Vec<u8>> {
        self.writes
            .iter()
            .filter_map(|(key, value)| value.is_none().then(|| key.clone()))
            .collect()
    }

    fn into_write_batch(self) -> WriteBatch {
        let mut batch = WriteBatch::default();
        for (key, value) in self.writes {
            match value {
                Some(value) => batch.put(&key, &value),
                None => batch.delete(&key),
            }
        }
        batch
    }
}

/// The persistent ordered map. Thread-safe; batches must not be shared
/// across threads.
pub struct KvStore {
    db: DB,
}

impl KvStore {
    pub fn open(path: impl AsRef<Path>) -> Result<KvStore, KvError> {
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DB::open(&options, path)?;
        Ok(KvStore { db })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.db.get(key)?)
    }

    pub fn get_record<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, KvError> {
        match self.db.get(key)? {
            Some(raw) => decode(key, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Like [`Self::get_record`] but substitutes the default value for a
    /// missing key, the usual shape for accumulator records.
    pub fn get_record_or_default<T: DeserializeOwned + Default>(
        &self,
        key: &[u8],
    ) -> Result<T, KvError> {
        Ok(self.get_record(key)?.unwrap_or_default())
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        Ok(self.db.put(key, value)?)
    }

    pub fn put_record<T: Serialize>(&self, key: &[u8], value: &T) -> Result<(), KvError> {
        let encoded = bincode::serialize(value).map_err(KvError::Encode)?;
        self.put(key, &encoded)
    }

    pub fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        Ok(self.db.delete(key)?)
    }

    /// Commits the batch atomically.
    pub fn write(&self, batch: Batch) -> Result<(), KvError> {
        Ok(self.db.write(batch.into_write_batch())?)
    }

    /// Ascending scan of every `(key, value)` under `prefix`, skipping
    /// `offset` entries and returning at most `count` (0 = unlimited).
    pub fn prefix_scan(
        &self,
        prefix: &[u8],
        offset: usize,
        count: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let mut result = Vec::new();
        let mode = IteratorMode::From(prefix, Direction::Forward);
        for (index, entry) in self.db.iterator(mode).enumerate() {
            let (key, value) = entry?;
            if !key.starts_with(prefix) {
                break;
            }
            if index < offset {
                continue;
            }
            result.push((key.to_vec(), value.to_vec()));
            if count != 0 && result.len() >= count {
                break;
            }
        }
        Ok(result)
    }

    /// First entry under `prefix` whose key is not in `excluded`.
    pub fn find_first_of(
        &self,
        prefix: &[u8],
        excluded: &HashSet<Vec<u8>>,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>, KvError> {
        let mode = IteratorMode::From(prefix, Direction::Forward);
        for entry in self.db.iterator(mode) {
            let (key, value) = entry?;
            if !key.starts_with(prefix) {
                break;
            }
            if excluded.contains(key.as_ref()) {
                continue;
            }
            return Ok(Some((key.to_vec(), value.to_vec())));
        }
        Ok(None)
    }
}

fn decode<T: DeserializeOwned>(key: &[u8], raw: &[u8]) -> Result<T, KvError> {
    bincode::deserialize(raw).map_err(|source| KvError::Decode {
        key: hex::encode(key),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn batch_is_atomic_and_overlay_readable() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(dir.path()).unwrap();

        let mut batch = Batch::new();
        batch.put(b"k1".to_vec(), b"v1".to_vec());
        batch.put(b"k2".to_vec(), b"v2".to_vec());
        batch.delete(b"k1".to_vec());
        assert_eq!(batch.pending(b"k2"), Some(Some(b"v2".as_ref())));
        assert_eq!(batch.pending(b"k1"), Some(None));
        assert!(batch.deleted_keys().contains(b"k1".as_slice()));

        store.write(batch).unwrap();
        assert_eq!(store.get(b"k2").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(store.get(b"k1").unwrap(), None);
    }

    #[test]
    fn prefix_scan_is_ascending_and_bounded() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(dir.path()).unwrap();
        for index in [3u8, 1, 2] {
            store.put(&[b'p', b'_', index], &[index]).unwrap();
        }
        store.put(b"q_9", b"other").unwrap();

        let all = store.prefix_scan(b"p_", 0, 0).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].1, vec![1]);
        assert_eq!(all[2].1, vec![3]);

        let page = store.prefix_scan(b"p_", 1, 1).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].1, vec![2]);
    }

    #[test]
    fn find_first_of_skips_excluded() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(dir.path()).unwrap();
        store.put(b"d_a", b"1").unwrap();
        store.put(b"d_b", b"2").unwrap();
        let mut excluded = HashSet::new();
        excluded.insert(b"d_a".to_vec());
        let found = store.find_first_of(b"d_", &excluded).unwrap().unwrap();
        assert_eq!(found.0, b"d_b".to_vec());
    }

    #[test]
    fn typed_records_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(dir.path()).unwrap();
        store.put_record(b"r", &(42u64, "x".to_string())).unwrap();
        let back: (u64, String) = store.get_record(b"r").unwrap().unwrap();
        assert_eq!(back, (42, "x".to_string()));
    }
}
