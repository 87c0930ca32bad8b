//! torrent-node core: the pipeline between raw block bytes and queryable
//! indexed state.
//!
//! ## Overview
//!
//! - **Storage**: an append-only block file set co-indexed with a RocksDB
//!   store that holds every derived projection and the recovery metadata.
//! - **Parser**: decodes the length-prefixed binary block format into main,
//!   sign and rejected block variants.
//! - **Sources**: produce blocks either by replaying local files or by
//!   fetching from a peer fleet with look-ahead and failover.
//! - **Chain**: the in-memory hash->header index with topological numbering,
//!   plus the timeline that pairs main blocks with their sign blocks.
//! - **Sync**: the ingestion driver that persists raw blocks and fans them
//!   out, in chain order, to the projection workers.
//! - **Workers**: balance/transaction projection, contract execution against
//!   the external oracle, and node-test statistics; each resumes from its
//!   own persisted cursor and applies every block at most once.

pub mod chain;
pub mod node;
pub mod parser;
pub mod source;
pub mod storage;
pub mod sync;
pub mod workers;

mod testing;
