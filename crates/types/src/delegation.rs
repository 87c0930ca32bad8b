//! Delegation records. One `DelegateState` exists per still-active
//! delegation event from a sender to a recipient; undelegation removes the
//! newest one (LIFO).

use crate::primitives::Hash;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateState {
    pub value: u64,
    pub tx_hash: Hash,
}

/// Idempotence marker for a (from, to) delegation pair: the last block whose
/// delegate transactions were applied.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateHelper {
    pub block_number: u64,
}
