//! Append-only block file set.
//!
//! One directory holds files named `blk00001.dat, blk00002.dat, ...`; each
//! file is a sequence of `[u64_le length][payload]` records. Records are
//! never rewritten; readers that observed a shorter file size simply stop
//! before the record being appended.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use torrent_node_types::FilePosition;

const LENGTH_FIELD: u64 = 8;

#[derive(Debug, Error)]
pub enum BlockStoreError {
    #[error("block file io: {0}")]
    Io(#[from] std::io::Error),
    #[error("record at {file}:{pos} is truncated")]
    Truncated { file: String, pos: u64 },
    #[error("empty file name")]
    EmptyFileName,
}

/// Handle over the block file directory.
pub struct BlockStore {
    folder: PathBuf,
    max_file_size: u64,
}

impl BlockStore {
    pub fn new(folder: impl Into<PathBuf>, max_file_size: u64) -> Result<BlockStore, BlockStoreError> {
        let folder = folder.into();
        std::fs::create_dir_all(&folder)?;
        Ok(BlockStore {
            folder,
            max_file_size,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    fn full_path(&self, file_name: &str) -> PathBuf {
        self.folder.join(file_name)
    }

    /// Names of every block file, in creation (name) order.
    pub fn list_files(&self) -> Result<Vec<String>, BlockStoreError> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.folder)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    if name.starts_with("blk") && name.ends_with(".dat") {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// The file new appends without an explicit target should go to,
    /// rolling over once the current one exceeds the size limit.
    pub fn current_file(&self) -> Result<String, BlockStoreError> {
        let files = self.list_files()?;
        let Some(last) = files.last() else {
            return Ok("blk00001.dat".to_string());
        };
        let size = std::fs::metadata(self.full_path(last))?.len();
        if size < self.max_file_size {
            return Ok(last.clone());
        }
        let index: u64 = last
            .trim_start_matches("blk")
            .trim_end_matches(".dat")
            .parse()
            .unwrap_or(files.len() as u64);
        Ok(format!("blk{:05}.dat", index + 1))
    }

    /// Appends one record to `file_name` and returns the offset of its
    /// length field.
    pub fn append(&self, file_name: &str, payload: &[u8]) -> Result<FilePosition, BlockStoreError> {
        if file_name.is_empty() {
            return Err(BlockStoreError::EmptyFileName);
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.full_path(file_name))?;
        let pos = file.seek(SeekFrom::End(0))?;
        let mut record = Vec::with_capacity(payload.len() + LENGTH_FIELD as usize);
        record.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        record.extend_from_slice(payload);
        file.write_all(&record)?;
        file.flush()?;
        Ok(FilePosition::new(file_name, pos))
    }

    /// Reads the `[from, to)` byte range of the record payload at `pos`,
    /// clamped to the payload length.
    pub fn read_record(
        &self,
        pos: &FilePosition,
        from: u64,
        to: u64,
    ) -> Result<(u64, Vec<u8>), BlockStoreError> {
        let mut file = File::open(self.full_path(&pos.file_name))?;
        let file_size = file.metadata()?.len();
        if pos.pos + LENGTH_FIELD > file_size {
            return Err(BlockStoreError::Truncated {
                file: pos.file_name.clone(),
                pos: pos.pos,
            });
        }
        file.seek(SeekFrom::Start(pos.pos))?;
        let mut length_field = [0u8; 8];
        file.read_exact(&mut length_field)?;
        let payload_len = u64::from_le_bytes(length_field);
        if pos.pos + LENGTH_FIELD + payload_len > file_size {
            return Err(BlockStoreError::Truncated {
                file: pos.file_name.clone(),
                pos: pos.pos,
            });
        }
        let from = from.min(payload_len);
        let to = to.min(payload_len);
        let mut payload = vec![0u8; (to.saturating_sub(from)) as usize];
        file.seek(SeekFrom::Start(pos.pos + LENGTH_FIELD + from))?;
        file.read_exact(&mut payload)?;
        Ok((payload_len, payload))
    }

    /// Reads the whole payload of the record at `pos`.
    pub fn read_full_record(&self, pos: &FilePosition) -> Result<Vec<u8>, BlockStoreError> {
        let (_, payload) = self.read_record(pos, 0, u64::MAX)?;
        Ok(payload)
    }

    /// Reads up to `len` raw bytes at an absolute file offset. Used to pull
    /// a single transaction back out of the middle of a block record.
    pub fn read_bytes(
        &self,
        file_name: &str,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, BlockStoreError> {
        let mut file = File::open(self.full_path(file_name))?;
        let file_size = file.metadata()?.len();
        if offset >= file_size {
            return Ok(Vec::new());
        }
        let available = (file_size - offset).min(len);
        let mut buffer = vec![0u8; available as usize];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Iterates complete records of one file starting at `pos`; stops at the
    /// first position with fewer than `8 + length` bytes remaining.
    pub fn iterate_from(&self, pos: FilePosition) -> Result<RecordIter, BlockStoreError> {
        let file = File::open(self.full_path(&pos.file_name))?;
        let file_size = file.metadata()?.len();
        Ok(RecordIter {
            file,
            file_size,
            file_name: pos.file_name,
            pos: pos.pos,
        })
    }
}

pub struct RecordIter {
    file: File,
    file_size: u64,
    file_name: String,
    pos: u64,
}

impl Iterator for RecordIter {
    type Item = Result<(FilePosition, Vec<u8>), BlockStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos + LENGTH_FIELD > self.file_size {
            return None;
        }
        let read = || -> Result<Option<(FilePosition, Vec<u8>)>, BlockStoreError> {
            self.file.seek(SeekFrom::Start(self.pos))?;
            let mut length_field = [0u8; 8];
            self.file.read_exact(&mut length_field)?;
            let payload_len = u64::from_le_bytes(length_field);
            if self.pos + LENGTH_FIELD + payload_len > self.file_size {
                return Ok(None);
            }
            let mut payload = vec![0u8; payload_len as usize];
            self.file.read_exact(&mut payload)?;
            let record_pos = FilePosition::new(self.file_name.clone(), self.pos);
            self.pos += LENGTH_FIELD + payload_len;
            Ok(Some((record_pos, payload)))
        };
        read().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_returns_offset_of_length_field() {
        let dir = TempDir::new().unwrap();
        let store = BlockStore::new(dir.path(), 1024).unwrap();
        let first = store.append("blk00001.dat", b"hello").unwrap();
        assert_eq!(first.pos, 0);
        let second = store.append("blk00001.dat", b"world!").unwrap();
        assert_eq!(second.pos, 8 + 5);
    }

    #[test]
    fn read_record_clamps_range() {
        let dir = TempDir::new().unwrap();
        let store = BlockStore::new(dir.path(), 1024).unwrap();
        let pos = store.append("blk00001.dat", b"abcdef").unwrap();
        let (len, payload) = store.read_record(&pos, 2, 100).unwrap();
        assert_eq!(len, 6);
        assert_eq!(payload, b"cdef");
    }

    #[test]
    fn iterate_stops_before_partial_record() {
        let dir = TempDir::new().unwrap();
        let store = BlockStore::new(dir.path(), 1024).unwrap();
        store.append("blk00001.dat", b"one").unwrap();
        store.append("blk00001.dat", b"two2").unwrap();
        // Simulate a torn append: a length field promising more bytes than
        // the file holds.
        let path = dir.path().join("blk00001.dat");
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(&100u64.to_le_bytes()).unwrap();
        file.write_all(b"partial").unwrap();

        let records: Vec<_> = store
            .iterate_from(FilePosition::new("blk00001.dat", 0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].1, b"one");
        assert_eq!(records[1].1, b"two2");
        assert_eq!(records[1].0.pos, 8 + 3);
    }

    #[test]
    fn current_file_rolls_over_at_limit() {
        let dir = TempDir::new().unwrap();
        let store = BlockStore::new(dir.path(), 16).unwrap();
        assert_eq!(store.current_file().unwrap(), "blk00001.dat");
        store.append("blk00001.dat", b"0123456789abcdef").unwrap();
        assert_eq!(store.current_file().unwrap(), "blk00002.dat");
    }
}
