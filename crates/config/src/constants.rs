//! Process-wide constants.

/// Database schema version, written once at first init. A mismatch on
/// reopen means the store was produced by an incompatible build.
pub const VERSION_DB: &str = "v4.5";

/// How many dumps the network source fetches ahead of the ingestion loop.
pub const COUNT_ADVANCED_BLOCKS: u64 = 8;

/// Blocks a peer returns per `pre-load` call.
pub const PRELOAD_BLOCKS: u64 = 5;

/// Maximum block size accepted through `pre-load` responses.
pub const PRELOAD_MAX_BLOCK_SIZE: u64 = 100_000;

/// Upper bound of the sleep between two sync rounds.
pub const SYNC_ROUND_PAUSE_MS: u64 = 500;

/// Request batch limits of the query surface.
pub const MAX_BATCH_BLOCKS: usize = 1000;
pub const MAX_BATCH_TXS: usize = 10_000;
pub const MAX_BATCH_BALANCES: usize = 10_000;
pub const MAX_HISTORY_SIZE: usize = 10_000;
pub const MAX_BATCH_DUMPS: usize = 1000;

/// Block files roll over once they exceed this many bytes.
pub const DEFAULT_MAX_BLOCK_FILE_SIZE: u64 = 256 * 1024 * 1024;
