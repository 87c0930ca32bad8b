//! Read-side facade over the chain index, the timeline and the stores;
//! every query method of the HTTP surface resolves here.

use crate::chain::{BlockChain, ChainError, Timeline, TimelineError};
use crate::parser::{parse_block, parse_transaction, ParseError, ParseOptions};
use crate::source::messages;
use crate::storage::block_store::BlockStoreError;
use crate::storage::kv::KvError;
use crate::storage::{keys, records, BlockStore, KvStore};
use crate::workers::main_worker::make_forging_sums;
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use torrent_node_config::constants::{
    MAX_BATCH_BALANCES, MAX_BATCH_BLOCKS, MAX_BATCH_DUMPS, MAX_BATCH_TXS, MAX_HISTORY_SIZE,
    VERSION_DB,
};
use torrent_node_config::types::Modules;
use torrent_node_types::{
    Address, AllNodesNode, BalanceInfo, Block, BlockHeader, BlockInfo, CommonBalance, ContractCode,
    ContractDetails, DelegateState, ForgingSums, Hash, MinimumSignBlockHeader, NodeTestCount,
    NodeTestResult, NodeTestTrust, Token, TransactionInfo, TransactionsFilters,
};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error(transparent)]
    Store(#[from] BlockStoreError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Timeline(#[from] TimelineError),
    #[error("request exceeds limit of {0}")]
    LimitExceeded(usize),
    #[error("module {0} is not enabled on this store")]
    ModuleDisabled(&'static str),
    #[error("{0} not found")]
    NotFound(String),
    #[error("signing key not configured")]
    NoSigningKey,
}

/// Chain-level status snapshot for `status`/`getinfo`.
#[derive(Clone, Debug)]
pub struct NodeStatus {
    pub version: &'static str,
    pub count_blocks: u64,
    pub known_last_block: u64,
    pub timeline_size: usize,
}

#[derive(Clone)]
pub struct Node {
    kv: Arc<KvStore>,
    contract_kv: Arc<KvStore>,
    node_test_kv: Arc<KvStore>,
    store: Arc<BlockStore>,
    chain: Arc<BlockChain>,
    timeline: Arc<Timeline>,
    modules: Modules,
    known_last_block: Arc<AtomicU64>,
    /// Key for signing outgoing dump envelopes, when configured.
    sign_secret: Option<[u8; 32]>,
}

impl Node {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kv: Arc<KvStore>,
        contract_kv: Arc<KvStore>,
        node_test_kv: Arc<KvStore>,
        store: Arc<BlockStore>,
        chain: Arc<BlockChain>,
        timeline: Arc<Timeline>,
        modules: Modules,
        known_last_block: Arc<AtomicU64>,
        sign_secret: Option<[u8; 32]>,
    ) -> Node {
        Node {
            kv,
            contract_kv,
            node_test_kv,
            store,
            chain,
            timeline,
            modules,
            known_last_block,
            sign_secret,
        }
    }

    fn require(&self, module: Modules, name: &'static str) -> Result<(), NodeError> {
        if !self.modules.contains(module) {
            return Err(NodeError::ModuleDisabled(name));
        }
        Ok(())
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            version: VERSION_DB,
            count_blocks: self.chain.count_blocks(),
            known_last_block: self.known_last_block.load(Ordering::Relaxed),
            timeline_size: self.timeline.len(),
        }
    }

    pub fn count_blocks(&self) -> u64 {
        self.chain.count_blocks()
    }

    // ---- balances -------------------------------------------------------

    pub fn fetch_balance(&self, address: &Address) -> Result<BalanceInfo, NodeError> {
        self.require(Modules::BALANCE, "balance")?;
        let mut balance = records::find_balance(&self.kv, address)?;
        if address.as_bytes().iter().all(|byte| *byte == 0) {
            // The zero address accumulates burn traffic; its balance is
            // reported empty.
            balance.balance = Default::default();
        }
        Ok(balance)
    }

    pub fn fetch_balances(
        &self,
        addresses: &[Address],
    ) -> Result<Vec<(Address, BalanceInfo)>, NodeError> {
        if addresses.len() > MAX_BATCH_BALANCES {
            return Err(NodeError::LimitExceeded(MAX_BATCH_BALANCES));
        }
        addresses
            .iter()
            .map(|address| Ok((address.clone(), self.fetch_balance(address)?)))
            .collect()
    }

    pub fn get_common_balance(&self) -> Result<CommonBalance, NodeError> {
        Ok(records::find_common_balance(&self.kv)?)
    }

    // ---- transactions and history --------------------------------------

    pub fn get_tx(&self, hash: &Hash) -> Result<Option<TransactionInfo>, NodeError> {
        self.require(Modules::TXS, "txs")?;
        let Some(mut tx) = records::find_transaction(&self.kv, hash)? else {
            return Ok(None);
        };
        self.fill_status(&mut tx)?;
        Ok(Some(tx))
    }

    pub fn get_txs(&self, hashes: &[Hash]) -> Result<Vec<TransactionInfo>, NodeError> {
        if hashes.len() > MAX_BATCH_TXS {
            return Err(NodeError::LimitExceeded(MAX_BATCH_TXS));
        }
        let mut txs = Vec::with_capacity(hashes.len());
        for hash in hashes {
            if let Some(tx) = self.get_tx(hash)? {
                txs.push(tx);
            }
        }
        Ok(txs)
    }

    fn fill_status(&self, tx: &mut TransactionInfo) -> Result<(), NodeError> {
        if tx.is_status_need() {
            if let Some(status) = records::find_transaction_status(&self.kv, &tx.hash)? {
                if let torrent_node_types::TxStatusKind::UnDelegate { value, .. } = &status.status {
                    if let Some(delegate) = &mut tx.delegate {
                        delegate.value = *value;
                    }
                }
                tx.status = Some(status);
            }
        }
        Ok(())
    }

    /// Address history, newest first, re-read from the block files.
    pub fn fetch_history(
        &self,
        address: &Address,
        from: usize,
        count: usize,
        filters: Option<&TransactionsFilters>,
    ) -> Result<Vec<TransactionInfo>, NodeError> {
        self.require(Modules::ADDR_TXS, "addr-txs")?;
        let requested = if count == 0 { MAX_HISTORY_SIZE } else { count };
        if requested > MAX_HISTORY_SIZE {
            return Err(NodeError::LimitExceeded(MAX_HISTORY_SIZE));
        }

        let rows = records::find_address_rows(&self.kv, address, from, requested)?;
        let mut txs = Vec::with_capacity(rows.len());
        for row in rows {
            let mut tx = self.read_tx_at(&row.file_pos)?;
            tx.block_number = row.block_number;
            tx.block_index = row.block_index;
            tx.file_pos = row.file_pos;
            if let (Some(undelegate_value), Some(delegate)) =
                (row.undelegate_value, &mut tx.delegate)
            {
                delegate.value = undelegate_value;
            }
            if let Some(filters) = filters {
                if !filters.matches(&tx, address) {
                    continue;
                }
            }
            self.fill_status(&mut tx)?;
            txs.push(tx);
        }
        Ok(txs
            .into_iter()
            .sorted_by(|first, second| second.block_number.cmp(&first.block_number))
            .collect())
    }

    /// Re-parses one transaction straight out of a block file.
    fn read_tx_at(
        &self,
        pos: &torrent_node_types::FilePosition,
    ) -> Result<TransactionInfo, NodeError> {
        // Size varint plus slack; the record parser stops at the body end.
        let head = self.store.read_bytes(&pos.file_name, pos.pos, 9)?;
        let (size, consumed) = torrent_node_types::varint::read_varint(&head)
            .map_err(ParseError::Varint)?;
        let raw = self
            .store
            .read_bytes(&pos.file_name, pos.pos, consumed as u64 + size)?;
        parse_transaction(&raw)?
            .ok_or_else(|| NodeError::NotFound(format!("tx at {}:{}", pos.file_name, pos.pos)))
    }

    // ---- tokens, delegations, contracts --------------------------------

    pub fn get_token(&self, address: &Address) -> Result<Option<Token>, NodeError> {
        Ok(records::find_token(&self.kv, address)?)
    }

    /// Active outgoing delegations of an address.
    pub fn get_address_delegations(
        &self,
        address: &Address,
    ) -> Result<Vec<(Address, DelegateState)>, NodeError> {
        let rows = records::find_all_delegations_from(&self.kv, address)?;
        let mut result = Vec::with_capacity(rows.len());
        for (row_key, state) in rows {
            let target = keys::second_of_delegate_pair(address, &row_key)
                .ok_or_else(|| NodeError::NotFound("delegate pair".to_string()))?;
            result.push((Address::new(target), state));
        }
        Ok(result)
    }

    pub fn get_contract_details(&self, address: &Address) -> Result<ContractDetails, NodeError> {
        self.require(Modules::CONTRACT, "contract")?;
        Ok(records::find_contract_details(&self.contract_kv, address)?.unwrap_or_default())
    }

    pub fn get_contract_code(&self, address: &Address) -> Result<ContractCode, NodeError> {
        self.require(Modules::CONTRACT, "contract")?;
        Ok(records::find_contract_code(&self.contract_kv, address)?.unwrap_or_default())
    }

    // ---- forging --------------------------------------------------------

    /// Sums of the `block_indent`-th forging block back from the tip.
    pub fn get_forging_sum(&self, block_indent: u64) -> Result<ForgingSums, NodeError> {
        let mut seen = 0;
        let mut number = self.chain.count_blocks();
        while number > 0 {
            let header = self
                .chain
                .get_block_by_number(number)
                .ok_or_else(|| NodeError::NotFound(format!("block {number}")))?;
            if header.is_forging_block() {
                if seen == block_indent {
                    let block = self.get_full_block(&header, 0, 0)?;
                    return Ok(make_forging_sums(
                        &block,
                        header.block_number.unwrap_or(number),
                    ));
                }
                seen += 1;
            }
            number -= 1;
        }
        Ok(ForgingSums::default())
    }

    pub fn get_forging_sum_all(&self) -> Result<ForgingSums, NodeError> {
        Ok(records::find_forging_sums(&self.kv)?)
    }

    // ---- blocks and dumps ----------------------------------------------

    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<BlockHeader>, NodeError> {
        Ok(self.chain.get_block_by_hash(hash))
    }

    pub fn get_block_by_number(&self, number: u64) -> Result<Option<BlockHeader>, NodeError> {
        Ok(self.chain.get_block_by_number(number))
    }

    pub fn get_blocks(
        &self,
        begin_block: u64,
        count_blocks: u64,
        forward: bool,
    ) -> Result<Vec<BlockHeader>, NodeError> {
        if count_blocks as usize > MAX_BATCH_BLOCKS {
            return Err(NodeError::LimitExceeded(MAX_BATCH_BLOCKS));
        }
        let mut headers = Vec::new();
        let tip = self.chain.count_blocks();
        for offset in 0..count_blocks {
            let number = if forward {
                begin_block + offset
            } else {
                match begin_block.checked_sub(offset) {
                    Some(number) => number,
                    None => break,
                }
            };
            if number == 0 || number > tip {
                break;
            }
            if let Some(header) = self.chain.get_block_by_number(number) {
                headers.push(header);
            }
        }
        Ok(headers)
    }

    /// Full block with its transactions, optionally a tx range.
    pub fn get_full_block(
        &self,
        header: &BlockHeader,
        begin_tx: usize,
        count_tx: usize,
    ) -> Result<BlockInfo, NodeError> {
        self.require(Modules::BLOCK_RAW, "block-raw")?;
        if header.block_number == Some(0) {
            return Ok(BlockInfo {
                header: header.clone(),
                txs: Vec::new(),
            });
        }
        let dump = self.store.read_full_record(&header.file_pos)?;
        let options = ParseOptions {
            begin_tx,
            count_tx,
            ..ParseOptions::default()
        };
        let Block::Main(mut block) = parse_block(&dump, &header.file_pos, &options)? else {
            return Err(NodeError::NotFound(format!("main block {}", header.hash)));
        };
        block.header.block_number = header.block_number;
        for tx in &mut block.txs {
            tx.block_number = header.block_number.unwrap_or(0);
            self.fill_status(tx)?;
        }
        Ok(block)
    }

    /// Raw dump bytes of a block, optionally wrapped into the signed
    /// sender envelope.
    pub fn get_dump_block_by_hash(
        &self,
        hash: &Hash,
        from_byte: u64,
        to_byte: u64,
        is_sign: bool,
    ) -> Result<Vec<u8>, NodeError> {
        self.require(Modules::BLOCK_RAW, "block-raw")?;
        let file_pos = if let Some(header) = self.chain.get_block_by_hash(hash) {
            header.file_pos
        } else if let Some(sign_header) = records::find_sign_block_header(&self.kv, hash)? {
            sign_header.file_pos
        } else if let Some(entry) = self.timeline.find_signature(hash)? {
            entry.file_pos
        } else {
            return Err(NodeError::NotFound(format!("block {hash}")));
        };

        if is_sign {
            let secret = self.sign_secret.as_ref().ok_or(NodeError::NoSigningKey)?;
            let dump = self.store.read_full_record(&file_pos)?;
            return Ok(messages::make_signed_dump(&dump, secret));
        }
        let (_, bytes) = self.store.read_record(&file_pos, from_byte, to_byte)?;
        Ok(bytes)
    }

    pub fn get_dump_block_by_number(
        &self,
        number: u64,
        from_byte: u64,
        to_byte: u64,
        is_sign: bool,
    ) -> Result<Vec<u8>, NodeError> {
        let header = self
            .chain
            .get_block_by_number(number)
            .ok_or_else(|| NodeError::NotFound(format!("block {number}")))?;
        self.get_dump_block_by_hash(&header.hash, from_byte, to_byte, is_sign)
    }

    /// Dump blob of several blocks, the `get-dumps-blocks-by-hash` frame.
    pub fn get_dumps_blocks(
        &self,
        hashes: &[Hash],
        is_sign: bool,
        compress: bool,
    ) -> Result<Vec<u8>, NodeError> {
        if hashes.len() > MAX_BATCH_DUMPS {
            return Err(NodeError::LimitExceeded(MAX_BATCH_DUMPS));
        }
        let mut dumps = Vec::with_capacity(hashes.len());
        for hash in hashes {
            dumps.push(self.get_dump_block_by_hash(hash, 0, u64::MAX, is_sign)?);
        }
        messages::make_dumps_blob(&dumps, compress)
            .map_err(|err| NodeError::NotFound(err.to_string()))
    }

    // ---- signatures -----------------------------------------------------

    pub fn find_sign_block(&self, hash: &Hash) -> Result<Option<MinimumSignBlockHeader>, NodeError> {
        Ok(self.timeline.find_sign_for_block(hash)?)
    }

    pub fn get_signatures_between(
        &self,
        first: Option<&Hash>,
        second: Option<&Hash>,
    ) -> Result<Vec<MinimumSignBlockHeader>, NodeError> {
        Ok(self.timeline.get_signatures_between(first, second)?)
    }

    // ---- node-test statistics ------------------------------------------

    fn last_block_day(&self) -> Result<u64, NodeError> {
        Ok(records::find_node_test_day(&self.node_test_kv)?.day_number)
    }

    /// Last representative test of a server with its day-average rps.
    pub fn get_last_node_stat_result(
        &self,
        server: &str,
    ) -> Result<(u64, NodeTestResult), NodeError> {
        self.require(Modules::NODE_TEST, "node-test")?;
        let last_timestamp = self.chain.get_last_block().timestamp;
        let best = records::find_node_stat_result(&self.node_test_kv, server)?;
        let day = self.last_block_day()?;
        let Some(element) = best.get_max(day) else {
            return Ok((last_timestamp, NodeTestResult::default()));
        };

        let tx = self.read_tx_at(&element.tx_pos)?;
        let mut result = crate::workers::node_test_worker::parse_test_transaction(&tx)
            .ok_or_else(|| NodeError::NotFound(format!("test result for {server}")))?;
        result.day = best.day;
        result.timestamp = element.timestamp;
        let rps = records::find_node_rps(&self.node_test_kv, server, result.day)?;
        if let Some(average) = rps.average() {
            result.avg_rps = average;
        }
        Ok((last_timestamp, result))
    }

    pub fn get_last_node_stat_trust(
        &self,
        server: &str,
    ) -> Result<(u64, NodeTestTrust), NodeError> {
        self.require(Modules::NODE_TEST, "node-test")?;
        let last_timestamp = self.chain.get_last_block().timestamp;
        let trust = records::find_node_stat_trust(&self.node_test_kv, server)?;
        Ok((last_timestamp, trust))
    }

    pub fn get_last_node_stat_count(&self, server: &str) -> Result<NodeTestCount, NodeError> {
        self.require(Modules::NODE_TEST, "node-test")?;
        Ok(records::find_node_stat_count_last(&self.node_test_kv, server)?.unwrap_or_default())
    }

    pub fn get_last_nodes_stats_count(&self) -> Result<NodeTestCount, NodeError> {
        self.require(Modules::NODE_TEST, "node-test")?;
        Ok(records::find_node_stats_count_last(&self.node_test_kv)?.unwrap_or_default())
    }

    pub fn get_all_last_nodes_count(
        &self,
        count_tests: u64,
    ) -> Result<Vec<(String, NodeTestCount)>, NodeError> {
        self.require(Modules::NODE_TEST, "node-test")?;
        let Some(tested) = records::find_all_tested_nodes_last(&self.node_test_kv)? else {
            return Ok(Vec::new());
        };
        let mut result = Vec::new();
        for server in &tested.nodes {
            let count = records::find_node_stat_count(&self.node_test_kv, server, tested.day)?;
            if count.count_success() >= count_tests {
                result.push((server.clone(), count));
            }
        }
        Ok(result)
    }

    /// Rating quintile of a server among the last day's tested nodes,
    /// ordered by average rps.
    pub fn get_nodes_rating(
        &self,
        server: &str,
        count_tests: usize,
    ) -> Result<(i32, u64), NodeError> {
        self.require(Modules::NODE_TEST, "node-test")?;
        let Some(tested) = records::find_all_tested_nodes_last(&self.node_test_kv)? else {
            return Ok((0, 0));
        };
        let mut averages: Vec<(String, u64)> = Vec::new();
        for node in &tested.nodes {
            let rps = records::find_node_rps(&self.node_test_kv, node, tested.day)?;
            if rps.rps.len() >= count_tests {
                if let Some(average) = rps.average() {
                    averages.push((node.clone(), average));
                }
            }
        }
        averages.sort_by_key(|(_, average)| *average);

        let count_nodes = averages.len();
        let count_groups = 5usize;
        let normal_group = count_nodes / count_groups;
        let extended_group = normal_group + 1;
        let count_extended = count_nodes % count_groups;
        let count_normal = count_groups - count_extended;
        let in_normal_groups = count_normal * normal_group;

        let Some(position) = averages.iter().position(|(node, _)| node == server) else {
            return Ok((0, tested.day));
        };
        let group = if position < in_normal_groups {
            position / normal_group.max(1) + 1
        } else {
            (position - in_normal_groups) / extended_group + count_normal + 1
        };
        Ok((group as i32, tested.day))
    }

    pub fn get_all_nodes(&self) -> Result<HashMap<String, AllNodesNode>, NodeError> {
        self.require(Modules::NODE_TEST, "node-test")?;
        Ok(records::find_all_nodes(&self.node_test_kv)?
            .nodes
            .into_iter()
            .collect())
    }
}

#[cfg(test)]
mod tests;
