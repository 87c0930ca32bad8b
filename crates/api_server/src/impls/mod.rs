mod contract;
mod node_test;
mod torrent;

pub use contract::ContractNamespace;
pub use node_test::NodeTestNamespace;
pub use torrent::TorrentNamespace;

use crate::error::invalid_params;
use jsonrpsee::types::ErrorObjectOwned;
use torrent_node_types::{Address, Hash};

pub(crate) fn parse_address(raw: &str) -> Result<Address, ErrorObjectOwned> {
    Address::from_hex(raw).ok_or_else(|| invalid_params(format!("bad address `{raw}`")))
}

pub(crate) fn parse_hash(raw: &str) -> Result<Hash, ErrorObjectOwned> {
    Hash::from_hex(raw).ok_or_else(|| invalid_params(format!("bad hash `{raw}`")))
}
