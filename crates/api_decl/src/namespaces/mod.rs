mod contract;
mod node_test;
mod torrent;

pub use contract::ContractNamespaceServer;
pub use node_test::NodeTestNamespaceServer;
pub use torrent::TorrentNamespaceServer;
