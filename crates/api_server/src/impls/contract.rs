use super::parse_address;
use crate::error::rpc_error;
use jsonrpsee::core::async_trait;
use jsonrpsee::core::RpcResult;
use torrent_node_api_decl::types::{ContractCodeResponse, ContractDetailsResponse};
use torrent_node_api_decl::ContractNamespaceServer;
use torrent_node_core::node::Node;

pub struct ContractNamespace {
    node: Node,
}

impl ContractNamespace {
    pub fn new(node: Node) -> ContractNamespace {
        ContractNamespace { node }
    }
}

#[async_trait]
impl ContractNamespaceServer for ContractNamespace {
    async fn get_contract_details(&self, address: String) -> RpcResult<ContractDetailsResponse> {
        let parsed = parse_address(&address)?;
        let details = self.node.get_contract_details(&parsed).map_err(rpc_error)?;
        Ok(ContractDetailsResponse::from(&details))
    }

    async fn get_contract_code(&self, address: String) -> RpcResult<ContractCodeResponse> {
        let parsed = parse_address(&address)?;
        let code = self.node.get_contract_code(&parsed).map_err(rpc_error)?;
        Ok(ContractCodeResponse::from(&code))
    }
}
