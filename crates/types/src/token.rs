//! Token registry record, one per token address.

use crate::primitives::{Address, Hash};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: String,
    pub owner: Address,
    pub decimals: u32,
    pub begin_value: u64,
    pub all_value: u64,
    pub symbol: String,
    pub name: String,
    pub emission: bool,
    pub tx_hash: Hash,
}
