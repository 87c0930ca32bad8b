use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use torrent_node_config::types::{
    Modules, OracleConfig, ServerConfig, StorageConfig, SyncConfig,
};
use torrent_node_config::NodeConfig;

/// Blockchain indexing and serving node.
#[derive(Debug, Parser)]
#[command(name = "torrent-node", version)]
pub struct Cli {
    /// Directory holding the append-only block files.
    #[arg(long, env = "TORRENT_NODE_BLOCKS_FOLDER", default_value = "data/blocks")]
    pub blocks_folder: PathBuf,

    /// Directory of the main key-value store.
    #[arg(long, env = "TORRENT_NODE_DB_FOLDER", default_value = "data/db")]
    pub db_folder: PathBuf,

    /// Directory of the contract worker's store.
    #[arg(long, default_value = "data/db-contract")]
    pub contract_db_folder: PathBuf,

    /// Directory of the node-test worker's store.
    #[arg(long, default_value = "data/db-node-test")]
    pub node_test_db_folder: PathBuf,

    /// Peer base URLs; repeat the flag for every peer.
    #[arg(long = "peer")]
    pub peers: Vec<String>,

    /// Replay blocks from the local files instead of fetching from peers.
    #[arg(long)]
    pub blocks_from_file: bool,

    /// Verify per-transaction signatures while parsing.
    #[arg(long)]
    pub validate: bool,

    /// Verify and strip the sender envelope on fetched dumps.
    #[arg(long)]
    pub validate_sign: bool,

    /// Check state-block balance assertions against the local projection.
    #[arg(long)]
    pub validate_states: bool,

    /// Ask peers for pre-load bundles instead of plain height polls.
    #[arg(long)]
    pub pre_load: bool,

    /// Request zlib compression on bulk dump transfers.
    #[arg(long)]
    pub compress: bool,

    /// Headers requested per peer call.
    #[arg(long, default_value_t = 100)]
    pub count_blocks_in_batch: u64,

    /// How many headers to keep fetched ahead of the ingestion loop.
    #[arg(long, default_value_t = 32)]
    pub max_advanced_load_blocks: u64,

    /// Roll over to a new block file past this many bytes.
    #[arg(long, default_value_t = torrent_node_config::constants::DEFAULT_MAX_BLOCK_FILE_SIZE)]
    pub max_block_file_size: u64,

    /// Base URL of the contract execution oracle; empty disables the
    /// contract worker.
    #[arg(long, env = "TORRENT_NODE_ORACLE_URL", default_value = "")]
    pub oracle_url: String,

    #[arg(long, default_value_t = 30_000)]
    pub oracle_timeout_ms: u64,

    /// Modules to enable; repeat the flag. Defaults to all of them.
    #[arg(long = "module")]
    pub modules: Vec<Modules>,

    /// Socket the query surface listens on.
    #[arg(long, env = "TORRENT_NODE_LISTEN", default_value = "0.0.0.0:9999")]
    pub listen: String,

    /// Add permissive CORS headers to query responses.
    #[arg(long)]
    pub cors: bool,

    /// File holding the hex-encoded 32-byte dump signing key.
    #[arg(long)]
    pub sign_key_file: Option<PathBuf>,
}

impl Cli {
    pub fn into_config(self) -> anyhow::Result<(NodeConfig, Option<[u8; 32]>)> {
        if !self.blocks_from_file && self.peers.is_empty() {
            anyhow::bail!("either --blocks-from-file or at least one --peer is required");
        }

        let sign_secret = match &self.sign_key_file {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading sign key {}", path.display()))?;
                let bytes = hex::decode(raw.trim()).context("sign key is not valid hex")?;
                let key: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("sign key must be 32 bytes"))?;
                Some(key)
            }
            None => None,
        };

        let modules = if self.modules.is_empty() {
            Modules::all()
        } else {
            self.modules
                .iter()
                .fold(Modules::empty(), |acc, module| acc.with(*module))
        };

        let config = NodeConfig {
            storage: StorageConfig {
                blocks_folder: self.blocks_folder,
                db_folder: self.db_folder,
                contract_db_folder: self.contract_db_folder,
                node_test_db_folder: self.node_test_db_folder,
                max_block_file_size: self.max_block_file_size,
            },
            sync: SyncConfig {
                blocks_from_file: self.blocks_from_file,
                peers: self.peers,
                validate: self.validate,
                validate_sign: self.validate_sign,
                validate_states: self.validate_states,
                pre_load: self.pre_load,
                compress: self.compress,
                count_blocks_in_batch: self.count_blocks_in_batch,
                max_advanced_load_blocks: self.max_advanced_load_blocks,
            },
            oracle: OracleConfig {
                base_url: self.oracle_url,
                timeout_ms: self.oracle_timeout_ms,
            },
            server: ServerConfig {
                listen: self.listen,
                cors: self.cors,
            },
            modules,
        };
        Ok((config, sign_secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_require_a_source() {
        let cli = Cli::parse_from(["torrent-node"]);
        assert!(cli.into_config().is_err());
    }

    #[test]
    fn file_mode_and_modules_parse() {
        let cli = Cli::parse_from([
            "torrent-node",
            "--blocks-from-file",
            "--module",
            "block",
            "--module",
            "balance",
        ]);
        let (config, key) = cli.into_config().unwrap();
        assert!(config.sync.blocks_from_file);
        assert!(config.modules.contains(Modules::BLOCK));
        assert!(config.modules.contains(Modules::BALANCE));
        assert!(!config.modules.contains(Modules::CONTRACT));
        assert!(key.is_none());
    }

    #[test]
    fn peer_mode_parses_multiple_peers() {
        let cli = Cli::parse_from([
            "torrent-node",
            "--peer",
            "http://peer-1:9999/",
            "--peer",
            "http://peer-2:9999/",
        ]);
        let (config, _) = cli.into_config().unwrap();
        assert_eq!(config.sync.peers.len(), 2);
        assert_eq!(config.modules, Modules::all());
    }
}
