use crate::types::{
    BalanceResponse, BlockHeaderResponse, BlockResponse, CommonBalanceResponse,
    DelegationResponse, ForgingSumsResponse, StatusResponse, TokenResponse, TransactionResponse,
};
use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;
use torrent_node_types::TransactionsFilters;

/// Chain, transaction and balance queries.
#[rpc(server)]
pub trait TorrentNamespace {
    #[method(name = "status")]
    async fn status(&self) -> RpcResult<StatusResponse>;

    #[method(name = "getinfo")]
    async fn getinfo(&self) -> RpcResult<StatusResponse>;

    #[method(name = "get-count-blocks")]
    async fn get_count_blocks(&self) -> RpcResult<u64>;

    #[method(name = "get-block-by-hash")]
    async fn get_block_by_hash(&self, hash: String) -> RpcResult<BlockHeaderResponse>;

    #[method(name = "get-block-by-number")]
    async fn get_block_by_number(
        &self,
        number: u64,
        begin_tx: Option<usize>,
        count_txs: Option<usize>,
    ) -> RpcResult<BlockResponse>;

    #[method(name = "get-blocks")]
    async fn get_blocks(
        &self,
        begin_block: u64,
        count_blocks: u64,
        forward: Option<bool>,
    ) -> RpcResult<Vec<BlockHeaderResponse>>;

    #[method(name = "get-dump-block-by-hash")]
    async fn get_dump_block_by_hash(
        &self,
        hash: String,
        from_byte: Option<u64>,
        to_byte: Option<u64>,
        is_sign: Option<bool>,
    ) -> RpcResult<String>;

    #[method(name = "get-dump-block-by-number")]
    async fn get_dump_block_by_number(
        &self,
        number: u64,
        from_byte: Option<u64>,
        to_byte: Option<u64>,
        is_sign: Option<bool>,
    ) -> RpcResult<String>;

    #[method(name = "get-dumps-blocks-by-hash")]
    async fn get_dumps_blocks_by_hash(
        &self,
        hashes: Vec<String>,
        is_sign: Option<bool>,
        compress: Option<bool>,
    ) -> RpcResult<String>;

    #[method(name = "get-dumps-blocks-by-number")]
    async fn get_dumps_blocks_by_number(
        &self,
        begin_block: u64,
        count_blocks: u64,
        is_sign: Option<bool>,
        compress: Option<bool>,
    ) -> RpcResult<String>;

    #[method(name = "fetch-balance")]
    async fn fetch_balance(&self, address: String) -> RpcResult<BalanceResponse>;

    #[method(name = "fetch-balances")]
    async fn fetch_balances(&self, addresses: Vec<String>) -> RpcResult<Vec<BalanceResponse>>;

    #[method(name = "fetch-history")]
    async fn fetch_history(
        &self,
        address: String,
        begin_tx: Option<usize>,
        count_txs: Option<usize>,
    ) -> RpcResult<Vec<TransactionResponse>>;

    #[method(name = "fetch-history-filter")]
    async fn fetch_history_filter(
        &self,
        address: String,
        filters: TransactionsFilters,
        begin_tx: Option<usize>,
        count_txs: Option<usize>,
    ) -> RpcResult<Vec<TransactionResponse>>;

    #[method(name = "get-tx")]
    async fn get_tx(&self, hash: String) -> RpcResult<TransactionResponse>;

    #[method(name = "get-txs")]
    async fn get_txs(&self, hashes: Vec<String>) -> RpcResult<Vec<TransactionResponse>>;

    #[method(name = "get-token")]
    async fn get_token(&self, address: String) -> RpcResult<TokenResponse>;

    #[method(name = "get-address-delegations")]
    async fn get_address_delegations(
        &self,
        address: String,
    ) -> RpcResult<Vec<DelegationResponse>>;

    #[method(name = "get-common-balance")]
    async fn get_common_balance(&self) -> RpcResult<CommonBalanceResponse>;

    #[method(name = "get-forging-sum")]
    async fn get_forging_sum(&self, block_indent: Option<u64>) -> RpcResult<ForgingSumsResponse>;

    #[method(name = "get-forging-sum-all")]
    async fn get_forging_sum_all(&self) -> RpcResult<ForgingSumsResponse>;
}
