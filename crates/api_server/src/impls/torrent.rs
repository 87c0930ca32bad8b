use super::{parse_address, parse_hash};
use crate::error::rpc_error;
use jsonrpsee::core::async_trait;
use jsonrpsee::core::RpcResult;
use torrent_node_api_decl::types::{
    BalanceResponse, BlockHeaderResponse, BlockResponse, CommonBalanceResponse,
    DelegationResponse, ForgingSumsResponse, StatusResponse, TokenResponse, TransactionResponse,
};
use torrent_node_api_decl::TorrentNamespaceServer;
use torrent_node_core::node::{Node, NodeError};
use torrent_node_types::{Hash, TransactionsFilters};

pub struct TorrentNamespace {
    node: Node,
}

impl TorrentNamespace {
    pub fn new(node: Node) -> TorrentNamespace {
        TorrentNamespace { node }
    }

    fn status_response(&self) -> StatusResponse {
        let status = self.node.status();
        StatusResponse {
            version: status.version.to_string(),
            count_blocks: status.count_blocks,
            known_last_block: status.known_last_block,
            timeline_size: status.timeline_size,
        }
    }
}

#[async_trait]
impl TorrentNamespaceServer for TorrentNamespace {
    async fn status(&self) -> RpcResult<StatusResponse> {
        Ok(self.status_response())
    }

    async fn getinfo(&self) -> RpcResult<StatusResponse> {
        Ok(self.status_response())
    }

    async fn get_count_blocks(&self) -> RpcResult<u64> {
        Ok(self.node.count_blocks())
    }

    async fn get_block_by_hash(&self, hash: String) -> RpcResult<BlockHeaderResponse> {
        let hash = parse_hash(&hash)?;
        let header = self
            .node
            .get_block_by_hash(&hash)
            .map_err(rpc_error)?
            .ok_or_else(|| rpc_error(NodeError::NotFound(format!("block {hash}"))))?;
        Ok(BlockHeaderResponse::from(&header))
    }

    async fn get_block_by_number(
        &self,
        number: u64,
        begin_tx: Option<usize>,
        count_txs: Option<usize>,
    ) -> RpcResult<BlockResponse> {
        let header = self
            .node
            .get_block_by_number(number)
            .map_err(rpc_error)?
            .ok_or_else(|| rpc_error(NodeError::NotFound(format!("block {number}"))))?;
        let block = self
            .node
            .get_full_block(&header, begin_tx.unwrap_or(0), count_txs.unwrap_or(0))
            .map_err(rpc_error)?;
        Ok(BlockResponse {
            header: BlockHeaderResponse::from(&block.header),
            txs: block.txs.iter().map(TransactionResponse::from).collect(),
        })
    }

    async fn get_blocks(
        &self,
        begin_block: u64,
        count_blocks: u64,
        forward: Option<bool>,
    ) -> RpcResult<Vec<BlockHeaderResponse>> {
        let headers = self
            .node
            .get_blocks(begin_block, count_blocks, forward.unwrap_or(true))
            .map_err(rpc_error)?;
        Ok(headers.iter().map(BlockHeaderResponse::from).collect())
    }

    async fn get_dump_block_by_hash(
        &self,
        hash: String,
        from_byte: Option<u64>,
        to_byte: Option<u64>,
        is_sign: Option<bool>,
    ) -> RpcResult<String> {
        let hash = parse_hash(&hash)?;
        let dump = self
            .node
            .get_dump_block_by_hash(
                &hash,
                from_byte.unwrap_or(0),
                to_byte.unwrap_or(u64::MAX),
                is_sign.unwrap_or(false),
            )
            .map_err(rpc_error)?;
        Ok(hex::encode(dump))
    }

    async fn get_dump_block_by_number(
        &self,
        number: u64,
        from_byte: Option<u64>,
        to_byte: Option<u64>,
        is_sign: Option<bool>,
    ) -> RpcResult<String> {
        let dump = self
            .node
            .get_dump_block_by_number(
                number,
                from_byte.unwrap_or(0),
                to_byte.unwrap_or(u64::MAX),
                is_sign.unwrap_or(false),
            )
            .map_err(rpc_error)?;
        Ok(hex::encode(dump))
    }

    async fn get_dumps_blocks_by_hash(
        &self,
        hashes: Vec<String>,
        is_sign: Option<bool>,
        compress: Option<bool>,
    ) -> RpcResult<String> {
        let hashes = hashes
            .iter()
            .map(|raw| parse_hash(raw))
            .collect::<Result<Vec<Hash>, _>>()?;
        let blob = self
            .node
            .get_dumps_blocks(&hashes, is_sign.unwrap_or(false), compress.unwrap_or(false))
            .map_err(rpc_error)?;
        Ok(hex::encode(blob))
    }

    async fn get_dumps_blocks_by_number(
        &self,
        begin_block: u64,
        count_blocks: u64,
        is_sign: Option<bool>,
        compress: Option<bool>,
    ) -> RpcResult<String> {
        let headers = self
            .node
            .get_blocks(begin_block, count_blocks, true)
            .map_err(rpc_error)?;
        let hashes: Vec<Hash> = headers.iter().map(|header| header.hash).collect();
        let blob = self
            .node
            .get_dumps_blocks(&hashes, is_sign.unwrap_or(false), compress.unwrap_or(false))
            .map_err(rpc_error)?;
        Ok(hex::encode(blob))
    }

    async fn fetch_balance(&self, address: String) -> RpcResult<BalanceResponse> {
        let parsed = parse_address(&address)?;
        let balance = self.node.fetch_balance(&parsed).map_err(rpc_error)?;
        Ok(BalanceResponse::new(parsed.to_string(), &balance))
    }

    async fn fetch_balances(&self, addresses: Vec<String>) -> RpcResult<Vec<BalanceResponse>> {
        let parsed = addresses
            .iter()
            .map(|raw| parse_address(raw))
            .collect::<Result<Vec<_>, _>>()?;
        let balances = self.node.fetch_balances(&parsed).map_err(rpc_error)?;
        Ok(balances
            .iter()
            .map(|(address, balance)| BalanceResponse::new(address.to_string(), balance))
            .collect())
    }

    async fn fetch_history(
        &self,
        address: String,
        begin_tx: Option<usize>,
        count_txs: Option<usize>,
    ) -> RpcResult<Vec<TransactionResponse>> {
        let parsed = parse_address(&address)?;
        let history = self
            .node
            .fetch_history(&parsed, begin_tx.unwrap_or(0), count_txs.unwrap_or(0), None)
            .map_err(rpc_error)?;
        Ok(history.iter().map(TransactionResponse::from).collect())
    }

    async fn fetch_history_filter(
        &self,
        address: String,
        filters: TransactionsFilters,
        begin_tx: Option<usize>,
        count_txs: Option<usize>,
    ) -> RpcResult<Vec<TransactionResponse>> {
        let parsed = parse_address(&address)?;
        let history = self
            .node
            .fetch_history(
                &parsed,
                begin_tx.unwrap_or(0),
                count_txs.unwrap_or(0),
                Some(&filters),
            )
            .map_err(rpc_error)?;
        Ok(history.iter().map(TransactionResponse::from).collect())
    }

    async fn get_tx(&self, hash: String) -> RpcResult<TransactionResponse> {
        let hash = parse_hash(&hash)?;
        let tx = self
            .node
            .get_tx(&hash)
            .map_err(rpc_error)?
            .ok_or_else(|| rpc_error(NodeError::NotFound(format!("tx {hash}"))))?;
        Ok(TransactionResponse::from(&tx))
    }

    async fn get_txs(&self, hashes: Vec<String>) -> RpcResult<Vec<TransactionResponse>> {
        let hashes = hashes
            .iter()
            .map(|raw| parse_hash(raw))
            .collect::<Result<Vec<Hash>, _>>()?;
        let txs = self.node.get_txs(&hashes).map_err(rpc_error)?;
        Ok(txs.iter().map(TransactionResponse::from).collect())
    }

    async fn get_token(&self, address: String) -> RpcResult<TokenResponse> {
        let parsed = parse_address(&address)?;
        let token = self
            .node
            .get_token(&parsed)
            .map_err(rpc_error)?
            .ok_or_else(|| rpc_error(NodeError::NotFound(format!("token {parsed}"))))?;
        Ok(TokenResponse::from(&token))
    }

    async fn get_address_delegations(
        &self,
        address: String,
    ) -> RpcResult<Vec<DelegationResponse>> {
        let parsed = parse_address(&address)?;
        let delegations = self
            .node
            .get_address_delegations(&parsed)
            .map_err(rpc_error)?;
        Ok(delegations
            .iter()
            .map(|(to, state)| DelegationResponse::new(to.to_string(), state))
            .collect())
    }

    async fn get_common_balance(&self) -> RpcResult<CommonBalanceResponse> {
        let balance = self.node.get_common_balance().map_err(rpc_error)?;
        Ok(CommonBalanceResponse::from(&balance))
    }

    async fn get_forging_sum(&self, block_indent: Option<u64>) -> RpcResult<ForgingSumsResponse> {
        let sums = self
            .node
            .get_forging_sum(block_indent.unwrap_or(0))
            .map_err(rpc_error)?;
        Ok(ForgingSumsResponse::from(&sums))
    }

    async fn get_forging_sum_all(&self) -> RpcResult<ForgingSumsResponse> {
        let sums = self.node.get_forging_sum_all().map_err(rpc_error)?;
        Ok(ForgingSumsResponse::from(&sums))
    }
}
