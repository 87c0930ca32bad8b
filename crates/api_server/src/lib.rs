//! The node's HTTP query surface: jsonrpsee implementations of the
//! namespaces declared in `torrent_node_api_decl`, served over one socket.

mod error;
mod impls;
mod server;

pub use impls::{ContractNamespace, NodeTestNamespace, TorrentNamespace};
pub use server::{NodeServerBuilder, NodeServerHandle};
