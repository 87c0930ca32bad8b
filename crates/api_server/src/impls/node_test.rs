use crate::error::rpc_error;
use jsonrpsee::core::async_trait;
use jsonrpsee::core::RpcResult;
use torrent_node_api_decl::types::{
    NodeRatingResponse, NodeStatCountResponse, NodeStatResultResponse, NodeStatTrustResponse,
    RegisteredNodeResponse,
};
use torrent_node_api_decl::NodeTestNamespaceServer;
use torrent_node_core::node::Node;

/// Nodes are identified by the string form of their address here, the way
/// testers report them.
pub struct NodeTestNamespace {
    node: Node,
}

impl NodeTestNamespace {
    pub fn new(node: Node) -> NodeTestNamespace {
        NodeTestNamespace { node }
    }
}

#[async_trait]
impl NodeTestNamespaceServer for NodeTestNamespace {
    async fn get_last_node_stat_result(
        &self,
        address: String,
    ) -> RpcResult<NodeStatResultResponse> {
        let (timestamp, result) = self
            .node
            .get_last_node_stat_result(&address)
            .map_err(rpc_error)?;
        Ok(NodeStatResultResponse::new(address, timestamp, &result))
    }

    async fn get_last_node_stat_trust(
        &self,
        address: String,
    ) -> RpcResult<NodeStatTrustResponse> {
        let (timestamp, trust) = self
            .node
            .get_last_node_stat_trust(&address)
            .map_err(rpc_error)?;
        let mut response = NodeStatTrustResponse::from(&trust);
        response.timestamp = response.timestamp.max(timestamp);
        Ok(response)
    }

    async fn get_last_node_stat_count(&self, address: String) -> RpcResult<NodeStatCountResponse> {
        let count = self
            .node
            .get_last_node_stat_count(&address)
            .map_err(rpc_error)?;
        Ok(NodeStatCountResponse::from(&count))
    }

    async fn get_last_nodes_stats_count(&self) -> RpcResult<NodeStatCountResponse> {
        let count = self.node.get_last_nodes_stats_count().map_err(rpc_error)?;
        Ok(NodeStatCountResponse::from(&count))
    }

    async fn get_all_last_nodes_count(
        &self,
        count_tests: Option<u64>,
    ) -> RpcResult<Vec<(String, NodeStatCountResponse)>> {
        let counts = self
            .node
            .get_all_last_nodes_count(count_tests.unwrap_or(0))
            .map_err(rpc_error)?;
        Ok(counts
            .iter()
            .map(|(server, count)| (server.clone(), NodeStatCountResponse::from(count)))
            .collect())
    }

    async fn get_nodes_raiting(
        &self,
        address: String,
        count_tests: Option<usize>,
    ) -> RpcResult<NodeRatingResponse> {
        let (rating, day) = self
            .node
            .get_nodes_rating(&address, count_tests.unwrap_or(1).max(1))
            .map_err(rpc_error)?;
        Ok(NodeRatingResponse {
            address,
            rating,
            day,
        })
    }

    async fn get_all_nodes(&self) -> RpcResult<Vec<RegisteredNodeResponse>> {
        let nodes = self.node.get_all_nodes().map_err(rpc_error)?;
        let mut response: Vec<RegisteredNodeResponse> = nodes
            .iter()
            .map(|(host, node)| RegisteredNodeResponse::new(host.clone(), node))
            .collect();
        response.sort_by(|first, second| first.host.cmp(&second.host));
        Ok(response)
    }
}
