//! Domain types of the torrent-node: blocks, transactions, balances and the
//! records the projection workers persist. Everything here is plain data;
//! parsing lives in `torrent_node_core::parser` and persistence in
//! `torrent_node_core::storage`.

pub mod balance;
pub mod block;
pub mod contract;
pub mod delegation;
pub mod node_test;
pub mod primitives;
pub mod serde_helpers;
pub mod token;
pub mod transaction;
pub mod varint;

pub use balance::{BalanceElement, BalanceInfo, CommonBalance, DelegateBalance, ForgedBalance, TokenBalance};
pub use block::{
    Block, BlockHeader, BlockInfo, BlocksMetadata, FileInfo, ForgingSums, MinimumSignBlockHeader,
    RejectedBlockHeader, RejectedBlockInfo, SignBlockHeader, SignBlockInfo, SignTransactionInfo,
    WorkerCursor,
};
pub use contract::{ContractCode, ContractDetails, ContractErrorKind, ContractState};
pub use delegation::{DelegateHelper, DelegateState};
pub use node_test::{
    AllNodes, AllNodesNode, AllTestedNodes, BestNodeElement, BestNodeTest, NodeRps, NodeTestCount,
    NodeTestDayNumber, NodeTestResult, NodeTestTrust,
};
pub use primitives::{Address, FilePosition, Hash};
pub use token::Token;
pub use transaction::{
    AddressInfo, ContractStatus, DelegateInfo, ScriptInfo, ScriptKind, TokenInfo, TransactionInfo,
    TransactionStatus, TransactionsFilters, TxStatusKind,
};
