//! The ingestion driver: pulls blocks from the source, persists them,
//! registers them in the chain index and the timeline, and fans them out to
//! the projection workers in chain order.

use crate::chain::{BlockChain, ChainError, Timeline};
use crate::source::BlockSource;
use crate::storage::{keys, records, Batch, BlockStore, KvStore};
use crate::workers::WorkerHandle;
use anyhow::{bail, Context};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use torrent_node_config::constants::{SYNC_ROUND_PAUSE_MS, VERSION_DB};
use torrent_node_config::types::Modules;
use torrent_node_types::{
    Block, BlockInfo, BlocksMetadata, FileInfo, FilePosition, RejectedBlockInfo, SignBlockInfo,
};

/// The per-projection worker handles the driver feeds, in fan-out order.
pub struct WorkerSet {
    pub main: Option<WorkerHandle>,
    pub script: Option<WorkerHandle>,
    pub node_test: Option<WorkerHandle>,
    /// Highest block number any worker still needs re-delivered.
    pub min_saved_block: u64,
}

pub struct Sync {
    kv: Arc<KvStore>,
    store: Arc<BlockStore>,
    chain: Arc<BlockChain>,
    timeline: Arc<Timeline>,
    source: Box<dyn BlockSource>,
    workers: WorkerSet,
    modules: Modules,
    /// Network mode persists dumps itself; file replay reads them back.
    save_blocks_to_files: bool,
    known_last_block: Arc<AtomicU64>,
}

impl Sync {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kv: Arc<KvStore>,
        store: Arc<BlockStore>,
        chain: Arc<BlockChain>,
        timeline: Arc<Timeline>,
        source: Box<dyn BlockSource>,
        workers: WorkerSet,
        modules: Modules,
        save_blocks_to_files: bool,
    ) -> Sync {
        Sync {
            kv,
            store,
            chain,
            timeline,
            source,
            workers,
            modules,
            save_blocks_to_files,
            known_last_block: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Highest block any peer reported; served by the `status` query.
    pub fn known_last_block(&self) -> Arc<AtomicU64> {
        self.known_last_block.clone()
    }

    /// Version/modules gate plus the chain and timeline rebuild.
    pub async fn initialize(&mut self) -> anyhow::Result<()> {
        match records::find_modules(&self.kv)? {
            Some(stored) => {
                if stored != self.modules {
                    bail!(
                        "modules changed in this database: stored {stored}, configured {}",
                        self.modules
                    );
                }
            }
            None => self.kv.put_record(keys::MODULES_KEY, &self.modules)?,
        }
        match records::find_version_db(&self.kv)? {
            Some(stored) => {
                if stored != VERSION_DB {
                    bail!("database version {stored} does not match {VERSION_DB}");
                }
            }
            None => self
                .kv
                .put_record(keys::VERSION_DB_KEY, &VERSION_DB.to_string())?,
        }

        self.source.initialize().await?;

        self.chain.clear();
        for header in records::get_all_block_headers(&self.kv)? {
            self.chain.add_without_calc(header);
        }
        if let Some(metadata) = records::find_block_metadata(&self.kv)? {
            let count = self.chain.calc_blockchain(&metadata.block_hash)?;
            tracing::info!(blocks = count, tip = %metadata.block_hash, "chain index rebuilt");
        }

        let entries = records::find_all_timeline_entries(&self.kv)?;
        self.timeline.deserialize(entries)?;
        tracing::info!(entries = self.timeline.len(), "timeline loaded");

        self.replay_for_workers().await?;
        Ok(())
    }

    /// Re-delivers already persisted blocks to workers whose cursors lag
    /// the chain tip; their idempotence guards skip anything applied.
    async fn replay_for_workers(&mut self) -> anyhow::Result<()> {
        let tip = self.chain.count_blocks();
        let from = self.workers.min_saved_block.saturating_add(1);
        if from > tip {
            return Ok(());
        }
        tracing::info!(from, to = tip, "replaying persisted blocks for lagging workers");
        for number in from..=tip {
            let header = self
                .chain
                .get_block_by_number(number)
                .with_context(|| format!("chain index lost block {number}"))?;
            if !(header.is_simple_block() || header.is_forging_block() || header.is_state_block()) {
                continue;
            }
            let (block, _) = self.source.get_existing_block(&header).await?;
            self.fan_out(Arc::new(block)).await?;
        }
        Ok(())
    }

    /// One sync round: poll the source and drain every block it yields.
    pub async fn sync_once(&mut self) -> anyhow::Result<()> {
        let (_sender, receiver) = watch::channel(false);
        self.round(&receiver).await
    }

    /// Runs sync rounds until `stop` flips.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> anyhow::Result<()> {
        loop {
            if *stop.borrow() {
                break;
            }
            let round_started = Instant::now();
            if let Err(err) = self.round(&stop).await {
                if err.downcast_ref::<Fatal>().is_some() {
                    tracing::error!(error = %err, "fatal ingestion error");
                    return Err(err);
                }
                tracing::error!(error = %err, "sync round failed, retrying");
            }

            let elapsed = round_started.elapsed();
            let pause = Duration::from_millis(SYNC_ROUND_PAUSE_MS).saturating_sub(elapsed);
            tokio::select! {
                _ = stop.changed() => {}
                _ = tokio::time::sleep(pause) => {}
            }
        }
        self.shutdown().await
    }

    /// Drains worker queues; current batches finish, nothing mid-batch.
    async fn shutdown(self) -> anyhow::Result<()> {
        let WorkerSet {
            main,
            script,
            node_test,
            ..
        } = self.workers;
        for worker in [main, script, node_test].into_iter().flatten() {
            worker.shutdown().await?;
        }
        tracing::info!("sync stopped");
        Ok(())
    }

    async fn round(&mut self, stop: &watch::Receiver<bool>) -> anyhow::Result<()> {
        let (has_more, last_known) = self.source.do_process(self.chain.count_blocks()).await?;
        self.known_last_block.store(last_known, Ordering::Relaxed);
        if !has_more {
            return Ok(());
        }

        while let Some((block, dump)) = self.source.process().await? {
            match block {
                Block::Main(block_info) => self.handle_main_block(block_info, dump).await?,
                Block::Sign(block_info) => self.handle_sign_block(block_info, dump)?,
                Block::Rejected(block_info) => self.handle_rejected_block(block_info)?,
            }
            if *stop.borrow() {
                break;
            }
        }
        Ok(())
    }

    async fn handle_main_block(
        &mut self,
        mut block: BlockInfo,
        dump: Vec<u8>,
    ) -> anyhow::Result<()> {
        let started = Instant::now();
        if self.save_blocks_to_files && self.modules.contains(Modules::BLOCK_RAW) {
            self.persist_dump(&mut block, &dump)?;
        }

        match self.chain.add_block(block.header.clone()) {
            Ok(0) => {
                self.chain.remove_block(&block.header.hash);
                bail!("block {} does not link to the chain yet", block.header.hash);
            }
            Ok(number) => {
                block.header.block_number = Some(number);
                for tx in &mut block.txs {
                    tx.block_number = number;
                }

                let (sequence, record) = self.timeline.add_simple_block(&block.header)?;
                let mut batch = Batch::new();
                if self.modules.contains(Modules::BLOCK) {
                    batch.put_record(keys::block_header(&block.header.hash), &block.header)?;
                }
                self.update_tip(&mut batch, &block)?;
                batch.put_record(
                    keys::file_info(&block.header.file_pos.file_name),
                    &FileInfo {
                        file_pos: FilePosition::new(
                            block.header.file_pos.file_name.clone(),
                            block.header.end_block_pos(),
                        ),
                    },
                )?;
                batch.put_record(keys::timeline_entry(sequence), &record)?;
                self.kv.write(batch)?;

                tracing::info!(
                    block = number,
                    txs = block.txs.len(),
                    hash = %block.header.hash,
                    parent = %block.header.prev_hash,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "block received"
                );

                self.fan_out(Arc::new(block)).await?;
            }
            Err(ChainError::AlreadyExists(hash)) => {
                tracing::debug!(block = %hash, "duplicate block ignored");
            }
            Err(ChainError::Gap { hash, .. }) => {
                // A sibling of an already linked block: keep it stored and
                // let the tip tie-break decide the canonical branch, but do
                // not project it.
                tracing::warn!(block = %hash, "sibling block stored without linking");
                let mut batch = Batch::new();
                if self.modules.contains(Modules::BLOCK) {
                    batch.put_record(keys::block_header(&block.header.hash), &block.header)?;
                }
                self.update_tip(&mut batch, &block)?;
                if !block.header.file_pos.file_name.is_empty() {
                    batch.put_record(
                        keys::file_info(&block.header.file_pos.file_name),
                        &FileInfo {
                            file_pos: FilePosition::new(
                                block.header.file_pos.file_name.clone(),
                                block.header.end_block_pos(),
                            ),
                        },
                    )?;
                }
                self.kv.write(batch)?;
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    fn handle_sign_block(&mut self, mut block: SignBlockInfo, dump: Vec<u8>) -> anyhow::Result<()> {
        if self.save_blocks_to_files && self.modules.contains(Modules::BLOCK_RAW) {
            let file_name = if block.header.file_pos.file_name.is_empty() {
                self.store.current_file()?
            } else {
                block.header.file_pos.file_name.clone()
            };
            let pos = self.store.append(&file_name, &dump)?;
            block.header.file_pos = pos;
        }

        let (sequence, record) = self.timeline.add_sign_block(&block.header)?;
        let mut batch = Batch::new();
        if self.modules.contains(Modules::BLOCK) {
            batch.put_record(keys::sign_block_header(&block.header.hash), &block.header)?;
        }
        if !block.header.file_pos.file_name.is_empty() {
            batch.put_record(
                keys::file_info(&block.header.file_pos.file_name),
                &FileInfo {
                    file_pos: FilePosition::new(
                        block.header.file_pos.file_name.clone(),
                        block.header.end_block_pos(),
                    ),
                },
            )?;
        }
        batch.put_record(keys::timeline_entry(sequence), &record)?;
        self.kv.write(batch)?;

        tracing::info!(
            hash = %block.header.hash,
            attests = %block.header.prev_hash,
            txs = block.txs.len(),
            "sign block received"
        );
        Ok(())
    }

    fn handle_rejected_block(&mut self, block: RejectedBlockInfo) -> anyhow::Result<()> {
        if block.header.file_pos.file_name.is_empty() {
            return Ok(());
        }
        let mut batch = Batch::new();
        batch.put_record(
            keys::file_info(&block.header.file_pos.file_name),
            &FileInfo {
                file_pos: FilePosition::new(
                    block.header.file_pos.file_name.clone(),
                    block.header.end_block_pos(),
                ),
            },
        )?;
        self.kv.write(batch)?;
        Ok(())
    }

    fn persist_dump(&self, block: &mut BlockInfo, dump: &[u8]) -> anyhow::Result<()> {
        let file_name = if block.header.file_pos.file_name.is_empty() {
            self.store.current_file()?
        } else {
            block.header.file_pos.file_name.clone()
        };
        let pos = self.store.append(&file_name, dump)?;
        block.header.file_pos = pos.clone();
        for tx in &mut block.txs {
            tx.file_pos.file_name = file_name.clone();
            tx.file_pos.pos += pos.pos;
        }
        Ok(())
    }

    /// Tip pointer update with the deterministic sibling tie-break.
    fn update_tip(&self, batch: &mut Batch, block: &BlockInfo) -> anyhow::Result<()> {
        let current = records::find_block_metadata(&self.kv)?;
        let new_metadata = match current {
            Some(current) if current.prev_block_hash == block.header.prev_hash => BlocksMetadata {
                block_hash: current.block_hash.min(block.header.hash),
                prev_block_hash: block.header.prev_hash,
            },
            _ => BlocksMetadata {
                block_hash: block.header.hash,
                prev_block_hash: block.header.prev_hash,
            },
        };
        batch.put_record(keys::BLOCK_METADATA_KEY.to_vec(), &new_metadata)?;
        Ok(())
    }

    /// Hands the block to every worker, in chain order, respecting each
    /// single-slot queue.
    async fn fan_out(&mut self, block: Arc<BlockInfo>) -> anyhow::Result<()> {
        for worker in [
            self.workers.main.as_ref(),
            self.workers.script.as_ref(),
            self.workers.node_test.as_ref(),
        ]
        .into_iter()
        .flatten()
        {
            if !worker.process(block.clone()).await {
                return Err(Fatal("projection worker stopped".to_string()).into());
            }
        }
        Ok(())
    }
}

/// Errors the retry loop must not swallow.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Fatal(String);
