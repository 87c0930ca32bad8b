//! Declarations of the node's JSON query surface: one jsonrpsee trait per
//! namespace plus the response shapes they serialize.

pub mod namespaces;
pub mod types;

pub use namespaces::{
    ContractNamespaceServer, NodeTestNamespaceServer, TorrentNamespaceServer,
};
