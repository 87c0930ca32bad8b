//! Contract execution state persisted by the contract worker.

use crate::primitives::Address;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractErrorKind {
    #[default]
    Ok,
    /// 1000-1999 from the oracle: the producer accepted a transaction the
    /// oracle rejects at protocol level. Fatal for ingestion.
    UserError,
    /// 3000-3999 from the oracle.
    ServerError,
    /// 2000-2999 from the oracle.
    ScriptError,
}

impl ContractErrorKind {
    pub fn from_code(code: i64) -> ContractErrorKind {
        match code {
            1000..=1999 => ContractErrorKind::UserError,
            2000..=2999 => ContractErrorKind::ScriptError,
            3000..=3999 => ContractErrorKind::ServerError,
            _ => ContractErrorKind::ServerError,
        }
    }
}

/// Latest execution state of one contract address.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContractState {
    pub address: Address,
    pub state: String,
    pub block_number: u64,
    pub details: String,
    pub error_kind: ContractErrorKind,
    pub error_message: String,
}

impl ContractState {
    pub fn new(block_number: u64) -> ContractState {
        ContractState {
            block_number,
            ..ContractState::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error_kind == ContractErrorKind::Ok
    }
}

/// Human-oriented details of a contract plus the last error it produced.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContractDetails {
    pub details: String,
    pub last_error: String,
}

/// Source dump the contract was compiled from.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContractCode {
    pub code: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_bands() {
        assert_eq!(ContractErrorKind::from_code(1000), ContractErrorKind::UserError);
        assert_eq!(ContractErrorKind::from_code(1999), ContractErrorKind::UserError);
        assert_eq!(ContractErrorKind::from_code(2500), ContractErrorKind::ScriptError);
        assert_eq!(ContractErrorKind::from_code(3001), ContractErrorKind::ServerError);
    }
}
