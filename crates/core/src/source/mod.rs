//! Block sources: where the sync driver pulls its next block from.

pub mod file;
pub mod messages;
pub mod network;
pub mod peers;

use crate::parser::ParseError;
use crate::storage::block_store::BlockStoreError;
use crate::storage::kv::KvError;
use async_trait::async_trait;
use peers::PeerError;
use thiserror::Error;
use torrent_node_types::{Block, BlockHeader, BlockInfo, FileInfo};

pub use file::FileBlockSource;
pub use network::NetworkBlockSource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Store(#[from] BlockStoreError),
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Peer(#[from] PeerError),
    #[error("malformed peer frame: {0}")]
    Frame(String),
    #[error("dump verification failed: {0}")]
    BadDump(String),
    #[error("no peers configured")]
    NoPeers,
    #[error("block {0} not found")]
    NotFound(String),
}

/// Produces blocks for the ingestion loop.
///
/// One `do_process` round establishes how far the source can currently go;
/// `process` then yields consecutive blocks until it returns `None`, after
/// which the driver starts the next round.
#[async_trait]
pub trait BlockSource: Send {
    async fn initialize(&mut self) -> Result<(), SourceError>;

    /// Prepares a round given the chain's current height. Returns whether
    /// more blocks are available and the highest block the source knows of.
    async fn do_process(&mut self, count_blocks: u64) -> Result<(bool, u64), SourceError>;

    /// The next block and its raw payload, or `None` when the round is
    /// exhausted.
    async fn process(&mut self) -> Result<Option<(Block, Vec<u8>)>, SourceError>;

    /// Persists a file cursor for content the driver will not see again
    /// (rejected blocks during file replay).
    async fn confirm(&mut self, file_info: &FileInfo) -> Result<(), SourceError>;

    /// Re-materializes an already linked block.
    async fn get_existing_block(
        &self,
        header: &BlockHeader,
    ) -> Result<(BlockInfo, Vec<u8>), SourceError>;
}
