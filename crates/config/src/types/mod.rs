use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::constants::DEFAULT_MAX_BLOCK_FILE_SIZE;

/// Where the block files and the key-value stores live.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    /// Directory of the append-only block files.
    pub blocks_folder: PathBuf,
    /// Directory of the main key-value store.
    pub db_folder: PathBuf,
    /// Directory of the contract worker's store.
    pub contract_db_folder: PathBuf,
    /// Directory of the node-test worker's store.
    pub node_test_db_folder: PathBuf,
    /// Roll over to a new block file past this size.
    pub max_block_file_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            blocks_folder: PathBuf::from("data/blocks"),
            db_folder: PathBuf::from("data/db"),
            contract_db_folder: PathBuf::from("data/db-contract"),
            node_test_db_folder: PathBuf::from("data/db-node-test"),
            max_block_file_size: DEFAULT_MAX_BLOCK_FILE_SIZE,
        }
    }
}

/// How the sync pipeline obtains blocks.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Replay from local block files instead of fetching from peers.
    pub blocks_from_file: bool,
    /// Peer base URLs used by the network source.
    pub peers: Vec<String>,
    /// Verify per-transaction signatures while parsing.
    pub validate: bool,
    /// Verify and strip the sender envelope on fetched dumps.
    pub validate_sign: bool,
    /// Run state-block balance assertions.
    pub validate_states: bool,
    /// Ask peers for `pre-load` bundles instead of plain height polls.
    pub pre_load: bool,
    /// Request zlib compression on dump transfers.
    pub compress: bool,
    /// Headers requested per peer call.
    pub count_blocks_in_batch: u64,
    /// How many headers the source keeps fetched ahead of the driver.
    pub max_advanced_load_blocks: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            blocks_from_file: false,
            peers: Vec::new(),
            validate: false,
            validate_sign: false,
            validate_states: false,
            pre_load: false,
            compress: false,
            count_blocks_in_batch: 100,
            max_advanced_load_blocks: 32,
        }
    }
}

/// Contract execution oracle endpoint.
#[derive(Clone, Debug, Default)]
pub struct OracleConfig {
    /// Base URL; empty disables the contract worker.
    pub base_url: String,
    pub timeout_ms: u64,
}

/// HTTP query surface binding.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub listen: String,
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: "0.0.0.0:9999".to_string(),
            cors: false,
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown module name `{0}`")]
pub struct ParseModuleError(String);

/// The set of projections this store maintains. Persisted at first init and
/// immutable for the lifetime of the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modules(u32);

impl Modules {
    pub const BLOCK: Modules = Modules(1);
    pub const BLOCK_RAW: Modules = Modules(1 << 1);
    pub const TXS: Modules = Modules(1 << 2);
    pub const BALANCE: Modules = Modules(1 << 3);
    pub const ADDR_TXS: Modules = Modules(1 << 4);
    pub const CONTRACT: Modules = Modules(1 << 5);
    pub const NODE_TEST: Modules = Modules(1 << 6);

    pub fn all() -> Modules {
        Modules(
            Self::BLOCK.0
                | Self::BLOCK_RAW.0
                | Self::TXS.0
                | Self::BALANCE.0
                | Self::ADDR_TXS.0
                | Self::CONTRACT.0
                | Self::NODE_TEST.0,
        )
    }

    pub fn empty() -> Modules {
        Modules(0)
    }

    pub fn with(self, other: Modules) -> Modules {
        Modules(self.0 | other.0)
    }

    pub fn contains(&self, other: Modules) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Modules {
        Modules(bits)
    }
}

impl Default for Modules {
    fn default() -> Self {
        Modules::all()
    }
}

impl fmt::Display for Modules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:07b}", self.0)
    }
}

impl FromStr for Modules {
    type Err = ParseModuleError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "block" => Ok(Self::BLOCK),
            "block-raw" => Ok(Self::BLOCK_RAW),
            "txs" => Ok(Self::TXS),
            "balance" => Ok(Self::BALANCE),
            "addr-txs" => Ok(Self::ADDR_TXS),
            "contract" => Ok(Self::CONTRACT),
            "node-test" => Ok(Self::NODE_TEST),
            other => Err(ParseModuleError(other.to_string())),
        }
    }
}
