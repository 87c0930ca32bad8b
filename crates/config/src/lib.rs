//! Configuration of the torrent-node: everything is decided at startup and
//! threaded through constructors as immutable values.

pub mod constants;
pub mod types;

use crate::types::{Modules, OracleConfig, ServerConfig, StorageConfig, SyncConfig};

/// Top-level node configuration assembled by the CLI.
#[derive(Clone, Debug, Default)]
pub struct NodeConfig {
    pub storage: StorageConfig,
    pub sync: SyncConfig,
    pub oracle: OracleConfig,
    pub server: ServerConfig,
    pub modules: Modules,
}
