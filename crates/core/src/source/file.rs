//! Replays blocks from the local append-only files, resuming each file at
//! its persisted cursor.

use super::{BlockSource, SourceError};
use crate::parser::{parse_block, ParseOptions};
use crate::storage::{keys, records, Batch, BlockStore, KvStore};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use torrent_node_types::{Block, BlockHeader, BlockInfo, FileInfo, FilePosition};

pub struct FileBlockSource {
    kv: Arc<KvStore>,
    store: Arc<BlockStore>,
    validate: bool,
    all_files: HashMap<String, FileInfo>,
    current: Option<FilePosition>,
    /// Files whose tail held no complete record this round; retried on the
    /// next `do_process`.
    stalled: HashSet<String>,
}

impl FileBlockSource {
    pub fn new(kv: Arc<KvStore>, store: Arc<BlockStore>, validate: bool) -> FileBlockSource {
        FileBlockSource {
            kv,
            store,
            validate,
            all_files: HashMap::new(),
            current: None,
            stalled: HashSet::new(),
        }
    }

    /// The next file with unread bytes, starting from its stored cursor.
    fn next_file(&self) -> Result<Option<FilePosition>, SourceError> {
        for name in self.store.list_files()? {
            if self.stalled.contains(&name) {
                continue;
            }
            let cursor = self
                .all_files
                .get(&name)
                .map(|info| info.file_pos.pos)
                .unwrap_or(0);
            let size = std::fs::metadata(self.store.folder().join(&name))
                .map(|meta| meta.len())
                .unwrap_or(0);
            if cursor + 8 <= size {
                return Ok(Some(FilePosition::new(name, cursor)));
            }
        }
        Ok(None)
    }

    fn confirm_impl(&mut self, file_info: &FileInfo) -> Result<(), SourceError> {
        let mut batch = Batch::new();
        batch.put_record(keys::file_info(&file_info.file_pos.file_name), file_info)?;
        self.kv.write(batch)?;
        self.all_files.insert(
            file_info.file_pos.file_name.clone(),
            file_info.clone(),
        );
        Ok(())
    }

    /// Reads and parses an already linked block straight from the files.
    pub fn existing_block(
        store: &BlockStore,
        header: &BlockHeader,
        validate: bool,
    ) -> Result<(BlockInfo, Vec<u8>), SourceError> {
        let dump = store.read_full_record(&header.file_pos)?;
        let options = if validate {
            ParseOptions::validated()
        } else {
            ParseOptions::default()
        };
        let block = parse_block(&dump, &header.file_pos, &options)?;
        let Block::Main(mut block) = block else {
            return Err(SourceError::NotFound(format!(
                "record at {}:{} is not a main block",
                header.file_pos.file_name, header.file_pos.pos
            )));
        };
        block.header.block_number = header.block_number;
        for tx in &mut block.txs {
            tx.block_number = header.block_number.unwrap_or(0);
        }
        Ok((block, dump))
    }
}

#[async_trait]
impl BlockSource for FileBlockSource {
    async fn initialize(&mut self) -> Result<(), SourceError> {
        self.all_files = records::get_all_files(&self.kv)?
            .into_iter()
            .map(|info| (info.file_pos.file_name.clone(), info))
            .collect();
        Ok(())
    }

    async fn do_process(&mut self, _count_blocks: u64) -> Result<(bool, u64), SourceError> {
        // File replay has no notion of a remote height; the round runs
        // until the files are exhausted.
        self.stalled.clear();
        Ok((true, 0))
    }

    async fn process(&mut self) -> Result<Option<(Block, Vec<u8>)>, SourceError> {
        loop {
            let position = match self.current.take() {
                Some(position) => position,
                None => match self.next_file()? {
                    Some(position) => {
                        tracing::info!(
                            file = %position.file_name,
                            pos = position.pos,
                            "opening next block file"
                        );
                        position
                    }
                    None => return Ok(None),
                },
            };

            let mut iter = self.store.iterate_from(position.clone())?;
            let Some(entry) = iter.next() else {
                // Nothing complete at this position; come back next round.
                self.stalled.insert(position.file_name.clone());
                continue;
            };
            let (record_pos, payload) = entry?;
            let next_pos = record_pos.pos + 8 + payload.len() as u64;
            self.current = Some(FilePosition::new(record_pos.file_name.clone(), next_pos));
            self.all_files.insert(
                record_pos.file_name.clone(),
                FileInfo {
                    file_pos: FilePosition::new(record_pos.file_name.clone(), next_pos),
                },
            );

            let options = if self.validate {
                ParseOptions::validated()
            } else {
                ParseOptions::default()
            };
            let block = parse_block(&payload, &record_pos, &options)?;
            if let Block::Rejected(rejected) = &block {
                // Rejected content is acknowledged here so replay does not
                // revisit it; the driver never sees it.
                let file_info = FileInfo {
                    file_pos: FilePosition::new(
                        rejected.header.file_pos.file_name.clone(),
                        rejected.header.end_block_pos(),
                    ),
                };
                self.confirm_impl(&file_info)?;
                continue;
            }
            return Ok(Some((block, payload)));
        }
    }

    async fn confirm(&mut self, file_info: &FileInfo) -> Result<(), SourceError> {
        self.confirm_impl(file_info)
    }

    async fn get_existing_block(
        &self,
        header: &BlockHeader,
    ) -> Result<(BlockInfo, Vec<u8>), SourceError> {
        Self::existing_block(&self.store, header, self.validate)
    }
}
