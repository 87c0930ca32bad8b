use crate::types::{
    NodeRatingResponse, NodeStatCountResponse, NodeStatResultResponse, NodeStatTrustResponse,
    RegisteredNodeResponse,
};
use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

/// Queries over the node-test worker's store.
#[rpc(server)]
pub trait NodeTestNamespace {
    #[method(name = "get-last-node-stat-result")]
    async fn get_last_node_stat_result(&self, address: String)
        -> RpcResult<NodeStatResultResponse>;

    #[method(name = "get-last-node-stat-trust")]
    async fn get_last_node_stat_trust(&self, address: String)
        -> RpcResult<NodeStatTrustResponse>;

    #[method(name = "get-last-node-stat-count")]
    async fn get_last_node_stat_count(&self, address: String) -> RpcResult<NodeStatCountResponse>;

    #[method(name = "get-last-nodes-stats-count")]
    async fn get_last_nodes_stats_count(&self) -> RpcResult<NodeStatCountResponse>;

    #[method(name = "get-all-last-nodes-count")]
    async fn get_all_last_nodes_count(
        &self,
        count_tests: Option<u64>,
    ) -> RpcResult<Vec<(String, NodeStatCountResponse)>>;

    #[method(name = "get-nodes-raiting")]
    async fn get_nodes_raiting(
        &self,
        address: String,
        count_tests: Option<usize>,
    ) -> RpcResult<NodeRatingResponse>;

    #[method(name = "get-all-nodes")]
    async fn get_all_nodes(&self) -> RpcResult<Vec<RegisteredNodeResponse>>;
}
