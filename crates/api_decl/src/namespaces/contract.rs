use crate::types::{ContractCodeResponse, ContractDetailsResponse};
use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

/// Queries over the contract worker's store.
#[rpc(server)]
pub trait ContractNamespace {
    #[method(name = "get-contract-details")]
    async fn get_contract_details(&self, address: String) -> RpcResult<ContractDetailsResponse>;

    #[method(name = "get-contract-code")]
    async fn get_contract_code(&self, address: String) -> RpcResult<ContractCodeResponse>;
}
