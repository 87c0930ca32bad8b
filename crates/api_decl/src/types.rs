//! Response shapes of the query surface. Conversions flatten the internal
//! records into the JSON the original protocol exposes: hex hashes and
//! addresses, string block kinds, explicit balance fields.

use serde::{Deserialize, Serialize};
use torrent_node_types::{
    AllNodesNode, BalanceInfo, BlockHeader, CommonBalance, ContractCode, ContractDetails,
    DelegateState, ForgingSums, NodeTestCount, NodeTestResult, NodeTestTrust, Token,
    TransactionInfo, TxStatusKind,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub count_blocks: u64,
    pub known_last_block: u64,
    pub timeline_size: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockHeaderResponse {
    pub number: Option<u64>,
    pub hash: String,
    pub prev_hash: String,
    pub txs_hash: String,
    pub timestamp: u64,
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub count_txs: u64,
    pub count_sign_txs: u64,
    #[serde(rename = "fileName")]
    pub file_name: String,
    pub signature: String,
}

impl From<&BlockHeader> for BlockHeaderResponse {
    fn from(header: &BlockHeader) -> Self {
        BlockHeaderResponse {
            number: header.block_number,
            hash: header.hash.to_string(),
            prev_hash: header.prev_hash.to_string(),
            txs_hash: header.txs_hash.to_string(),
            timestamp: header.timestamp,
            size: header.block_size,
            kind: header.block_kind().to_string(),
            count_txs: header.count_txs,
            count_sign_txs: header.count_sign_tx,
            file_name: header.file_pos.file_name.clone(),
            signature: hex::encode(&header.signature),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxStatusResponse {
    pub is_success: bool,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undelegate_value: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegate_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiled_contract_address: Option<String>,
    #[serde(default)]
    pub is_script_error: bool,
    #[serde(default)]
    pub is_server_error: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub hash: String,
    pub from: String,
    pub to: String,
    pub value: u64,
    pub fees: u64,
    pub real_fee: u64,
    pub nonce: u64,
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub int_status: Option<u64>,
    pub block_number: u64,
    pub block_index: u64,
    pub size: u64,
    pub is_sign_block_tx: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegate_value: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_delegate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TxStatusResponse>,
}

impl From<&TransactionInfo> for TransactionResponse {
    fn from(tx: &TransactionInfo) -> Self {
        let status = tx.status.as_ref().map(|status| {
            let mut response = TxStatusResponse {
                is_success: status.is_success,
                kind: String::new(),
                undelegate_value: None,
                delegate_hash: None,
                compiled_contract_address: None,
                is_script_error: false,
                is_server_error: false,
            };
            match &status.status {
                TxStatusKind::Delegate => response.kind = "delegate".to_string(),
                TxStatusKind::UnDelegate {
                    value,
                    delegate_hash,
                } => {
                    response.kind = "undelegate".to_string();
                    response.undelegate_value = Some(*value);
                    response.delegate_hash = Some(delegate_hash.to_string());
                }
                TxStatusKind::Contract(contract) => {
                    response.kind = "contract".to_string();
                    response.is_script_error = contract.is_script_error;
                    response.is_server_error = contract.is_server_error;
                    response.compiled_contract_address =
                        Some(contract.compiled_contract_address.to_string());
                }
            }
            response
        });
        TransactionResponse {
            hash: tx.hash.to_string(),
            from: tx.from_address.to_string(),
            to: tx.to_address.to_string(),
            value: tx.value,
            fees: tx.fees,
            real_fee: tx.real_fee(),
            nonce: tx.nonce,
            data: hex::encode(&tx.data),
            int_status: tx.int_status,
            block_number: tx.block_number,
            block_index: tx.block_index,
            size: tx.size_raw_tx,
            is_sign_block_tx: tx.is_sign_block_tx,
            delegate_value: tx.delegate.as_ref().map(|delegate| delegate.value),
            is_delegate: tx.delegate.as_ref().map(|delegate| delegate.is_delegate),
            status,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockResponse {
    #[serde(flatten)]
    pub header: BlockHeaderResponse,
    pub txs: Vec<TransactionResponse>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenBalanceResponse {
    pub token: String,
    pub received: u64,
    pub spent: u64,
    pub count_op: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub address: String,
    pub received: u64,
    pub spent: u64,
    pub count_received: u64,
    pub count_spent: u64,
    pub count_txs: u64,
    pub block_number: u64,
    pub current_balance: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undelegate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegated: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undelegated: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserved: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forged: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<TokenBalanceResponse>,
}

impl BalanceResponse {
    pub fn new(address: String, balance: &BalanceInfo) -> BalanceResponse {
        BalanceResponse {
            address,
            received: balance.received(),
            spent: balance.spent(),
            count_received: balance.count_received,
            count_spent: balance.count_spent,
            count_txs: balance.count_txs,
            block_number: balance.block_number,
            current_balance: balance.calc_balance(),
            delegate: balance.delegated.as_ref().map(|d| d.delegate_out()),
            undelegate: balance.delegated.as_ref().map(|d| d.undelegate_out()),
            delegated: balance.delegated.as_ref().map(|d| d.delegated_in()),
            undelegated: balance.delegated.as_ref().map(|d| d.undelegated_in()),
            reserved: balance.delegated.as_ref().map(|d| d.reserved),
            forged: balance.forged.as_ref().map(|f| f.forged),
            tokens: balance
                .tokens
                .iter()
                .map(|(token, token_balance)| TokenBalanceResponse {
                    token: token.to_string(),
                    received: token_balance.balance.received(),
                    spent: token_balance.balance.spent(),
                    count_op: token_balance.count_op,
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub owner: String,
    pub decimals: u32,
    pub begin_value: u64,
    pub all_value: u64,
    pub symbol: String,
    pub name: String,
    pub emission: bool,
    pub tx_hash: String,
}

impl From<&Token> for TokenResponse {
    fn from(token: &Token) -> Self {
        TokenResponse {
            kind: token.kind.clone(),
            owner: token.owner.to_string(),
            decimals: token.decimals,
            begin_value: token.begin_value,
            all_value: token.all_value,
            symbol: token.symbol.clone(),
            name: token.name.clone(),
            emission: token.emission,
            tx_hash: token.tx_hash.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DelegationResponse {
    pub to: String,
    pub value: u64,
    pub tx_hash: String,
}

impl DelegationResponse {
    pub fn new(to: String, state: &DelegateState) -> DelegationResponse {
        DelegationResponse {
            to,
            value: state.value,
            tx_hash: state.tx_hash.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForgingSumsResponse {
    pub sums: Vec<(u64, u64)>,
    pub block_number: u64,
}

impl From<&ForgingSums> for ForgingSumsResponse {
    fn from(sums: &ForgingSums) -> Self {
        ForgingSumsResponse {
            sums: sums.sums.iter().map(|(k, v)| (*k, *v)).collect(),
            block_number: sums.block_number,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommonBalanceResponse {
    pub money: u64,
    pub block_number: u64,
}

impl From<&CommonBalance> for CommonBalanceResponse {
    fn from(balance: &CommonBalance) -> Self {
        CommonBalanceResponse {
            money: balance.money,
            block_number: balance.block_number,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContractDetailsResponse {
    pub details: String,
    pub last_error: String,
}

impl From<&ContractDetails> for ContractDetailsResponse {
    fn from(details: &ContractDetails) -> Self {
        ContractDetailsResponse {
            details: details.details.clone(),
            last_error: details.last_error.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContractCodeResponse {
    pub code: String,
}

impl From<&ContractCode> for ContractCodeResponse {
    fn from(code: &ContractCode) -> Self {
        ContractCodeResponse {
            code: hex::encode(&code.code),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeStatResultResponse {
    pub address: String,
    pub timestamp: u64,
    pub day: u64,
    #[serde(rename = "type")]
    pub type_node: String,
    pub ip: String,
    pub geo: String,
    pub rps: u64,
    pub avg_rps: u64,
    pub success: bool,
}

impl NodeStatResultResponse {
    pub fn new(address: String, timestamp: u64, result: &NodeTestResult) -> Self {
        NodeStatResultResponse {
            address,
            timestamp,
            day: result.day,
            type_node: result.type_node.clone(),
            ip: result.ip.clone(),
            geo: result.geo.clone(),
            rps: result.rps,
            avg_rps: result.avg_rps,
            success: result.success,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeStatCountResponse {
    pub day: u64,
    pub count_all: u64,
    pub count_failure: u64,
    pub count_success: u64,
    pub count_testers: usize,
}

impl From<&NodeTestCount> for NodeStatCountResponse {
    fn from(count: &NodeTestCount) -> Self {
        NodeStatCountResponse {
            day: count.day,
            count_all: count.count_all,
            count_failure: count.count_failure,
            count_success: count.count_success(),
            count_testers: count.testers.len(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeStatTrustResponse {
    pub timestamp: u64,
    pub trust: i64,
    pub trust_json: String,
}

impl From<&NodeTestTrust> for NodeStatTrustResponse {
    fn from(trust: &NodeTestTrust) -> Self {
        NodeStatTrustResponse {
            timestamp: trust.timestamp,
            trust: trust.trust,
            trust_json: trust.trust_json.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeRatingResponse {
    pub address: String,
    pub rating: i32,
    pub day: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisteredNodeResponse {
    pub host: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl RegisteredNodeResponse {
    pub fn new(host: String, node: &AllNodesNode) -> Self {
        RegisteredNodeResponse {
            host,
            name: node.name.clone(),
            kind: node.kind.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use torrent_node_types::{Address, Hash};

    #[test]
    fn balance_response_flattens_delegate_fields() {
        let mut balance = BalanceInfo::default();
        balance.plus_without_delegate(
            &TransactionInfo {
                to_address: Address::from_pubkey(b"x"),
                value: 10,
                ..TransactionInfo::default()
            },
            &Address::from_pubkey(b"x"),
            true,
            false,
        );
        let response = BalanceResponse::new("0xab".to_string(), &balance);
        assert_eq!(response.received, 10);
        assert_eq!(response.current_balance, 10);
        assert!(response.delegate.is_none());
    }

    #[test]
    fn header_response_serializes_hex_hashes() {
        let header = BlockHeader {
            hash: Hash([1; 32]),
            block_number: Some(7),
            block_type: torrent_node_types::block::block_type::COMMON_V2,
            ..BlockHeader::default()
        };
        let response = BlockHeaderResponse::from(&header);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["number"], 7);
        assert_eq!(json["hash"], "01".repeat(32));
        assert_eq!(json["type"], "block");
    }
}
