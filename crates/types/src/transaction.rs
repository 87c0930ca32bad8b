//! Transactions, their decoded sub-records and persisted statuses.

use crate::primitives::{Address, FilePosition, Hash};
use serde::{Deserialize, Serialize};

/// Producer-assigned transaction status tags.
pub mod int_status {
    /// Block approve transaction.
    pub const APPROVE: u64 = 1;
    /// Transaction accepted (data and value moved).
    pub const ACCEPT: u64 = 20;
    /// Not accepted: insufficient funds.
    pub const WRONG_MONEY: u64 = 30;
    /// Not accepted: data method rejected.
    pub const WRONG_DATA: u64 = 40;
    pub const FORGING: u64 = 100;
    pub const FORGING_W: u64 = 101;
    pub const FORGING_N: u64 = 102;
    pub const FORGING_C: u64 = 103;
    pub const FORGING_A: u64 = 104;
    /// State block transaction.
    pub const STATE: u64 = 200;
    /// Technical node-test transaction.
    pub const TECH_NODE_STAT: u64 = 0x1101;

    pub const FORGING_FAMILY: [u64; 5] = [FORGING, FORGING_W, FORGING_N, FORGING_C, FORGING_A];
}

/// Fee threshold: bytes up to this size ride for free.
const FREE_TX_SIZE: u64 = 255;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateInfo {
    pub value: u64,
    pub is_delegate: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptKind {
    Compile,
    Run,
    Pay,
    #[default]
    Unknown,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScriptInfo {
    pub kind: ScriptKind,
    /// The transaction body without trailing sign/pubkey, forwarded to the
    /// contract execution oracle verbatim.
    pub raw_tx: Vec<u8>,
}

/// Token operations decoded from the transaction `data` JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenInfo {
    Create {
        kind: String,
        owner: Address,
        decimals: u32,
        value: u64,
        symbol: String,
        name: String,
        emission: bool,
        begin_distribution: Vec<(Address, u64)>,
    },
    ChangeOwner {
        new_owner: Address,
    },
    ChangeEmission {
        new_emission: bool,
    },
    AddTokens {
        to: Address,
        value: u64,
    },
    MoveTokens {
        to: Address,
        value: u64,
    },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub hash: Hash,
    pub from_address: Address,
    pub to_address: Address,
    pub value: u64,
    pub fees: u64,
    pub nonce: u64,
    pub data: Vec<u8>,
    pub sign: Vec<u8>,
    pub pub_key: Vec<u8>,
    pub int_status: Option<u64>,
    pub delegate: Option<DelegateInfo>,
    pub script_info: Option<ScriptInfo>,
    pub token_info: Option<TokenInfo>,
    pub is_sign_block_tx: bool,
    /// Sender flagged blocked by a 9-byte data record starting with 0x01.
    pub is_blocked_from: bool,
    pub block_number: u64,
    pub block_index: u64,
    pub size_raw_tx: u64,
    pub file_pos: FilePosition,
    /// Joined from the separately persisted status on read paths; never
    /// stored with the transaction itself.
    #[serde(skip)]
    pub status: Option<TransactionStatus>,
}

impl TransactionInfo {
    /// The fee actually charged: the part of the raw size above the free
    /// threshold, capped by what the sender offered.
    pub fn real_fee(&self) -> u64 {
        self.size_raw_tx.saturating_sub(FREE_TX_SIZE).min(self.fees)
    }

    pub fn is_status_no_balance(&self) -> bool {
        self.int_status == Some(int_status::WRONG_MONEY)
    }

    pub fn is_status_not_success(&self) -> bool {
        matches!(
            self.int_status,
            Some(int_status::WRONG_MONEY) | Some(int_status::WRONG_DATA)
        )
    }

    pub fn is_status_forging(&self) -> bool {
        self.int_status
            .map(|status| int_status::FORGING_FAMILY.contains(&status))
            .unwrap_or(false)
    }

    pub fn is_status_node_test(&self) -> bool {
        self.int_status == Some(int_status::TECH_NODE_STAT)
    }

    /// Whether query responses should join the separately persisted status.
    pub fn is_status_need(&self) -> bool {
        self.delegate.is_some() || self.script_info.is_some()
    }
}

/// Tri-state filters for address history queries; unset members do not
/// constrain the result.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionsFilters {
    #[serde(default)]
    pub is_input: Option<bool>,
    #[serde(default)]
    pub is_output: Option<bool>,
    #[serde(default)]
    pub is_success: Option<bool>,
    #[serde(default)]
    pub is_delegate: Option<bool>,
    #[serde(default)]
    pub is_forging: Option<bool>,
    #[serde(default)]
    pub is_test: Option<bool>,
}

impl TransactionsFilters {
    /// Whether `tx`, seen from `address`, passes the filter set.
    pub fn matches(&self, tx: &TransactionInfo, address: &Address) -> bool {
        if self.is_input == Some(true) && &tx.to_address != address {
            return false;
        }
        if self.is_output == Some(true) && &tx.from_address != address {
            return false;
        }
        if self.is_success == Some(true) && tx.is_status_not_success() {
            return false;
        }
        // With no category filter everything else passes; otherwise at
        // least one requested category must match.
        if self.is_delegate.is_none() && self.is_forging.is_none() && self.is_test.is_none() {
            return true;
        }
        (self.is_delegate == Some(true) && tx.delegate.is_some())
            || (self.is_forging == Some(true) && tx.is_status_forging())
            || (self.is_test == Some(true) && tx.is_status_node_test())
    }
}

/// Index row pointing from an address to one of its transactions.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AddressInfo {
    pub file_pos: FilePosition,
    pub block_number: u64,
    pub block_index: u64,
    pub undelegate_value: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractStatus {
    pub is_server_error: bool,
    pub is_script_error: bool,
    pub compiled_contract_address: Address,
}

/// Outcome payload attached to delegate and contract transactions after the
/// relevant worker has applied them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatusKind {
    Delegate,
    UnDelegate { value: u64, delegate_hash: Hash },
    Contract(ContractStatus),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub transaction: Hash,
    pub block_number: u64,
    pub is_success: bool,
    pub status: TxStatusKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(260, 3, 3; "fee capped by offer")]
    #[test_case(260, 10, 5; "fee from size overflow")]
    #[test_case(200, 10, 0; "small tx rides free")]
    fn real_fee(size_raw_tx: u64, fees: u64, expected: u64) {
        let tx = TransactionInfo {
            size_raw_tx,
            fees,
            ..TransactionInfo::default()
        };
        assert_eq!(tx.real_fee(), expected);
    }

    #[test]
    fn status_predicates() {
        let mut tx = TransactionInfo {
            int_status: Some(int_status::WRONG_MONEY),
            ..TransactionInfo::default()
        };
        assert!(tx.is_status_no_balance());
        assert!(tx.is_status_not_success());
        tx.int_status = Some(int_status::FORGING_N);
        assert!(tx.is_status_forging());
        tx.int_status = Some(int_status::TECH_NODE_STAT);
        assert!(tx.is_status_node_test());
        tx.int_status = Some(int_status::ACCEPT);
        assert!(!tx.is_status_not_success());
    }
}
